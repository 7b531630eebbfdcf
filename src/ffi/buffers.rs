//! FFI functions for buffer management

use super::utils::{global_pool, global_runtime};

/// Allocate a buffer for an `ENSUserData`. Returns NULL on failure.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn ENSSessionAlloc(length: libc::size_t) -> *mut u8 {
    let Some(runtime) = global_runtime() else {
        return std::ptr::null_mut();
    };

    match runtime.alloc(length) {
        Ok(buffer) => buffer.into_raw_parts().0,
        Err(e) => {
            log::debug!("ENSSessionAlloc({}) failed: {}", length, e);
            std::ptr::null_mut()
        }
    }
}

/// Free a buffer received from the runtime or allocated with
/// `ENSSessionAlloc`. Invalid pointers and double frees are rejected.
/// Buffers from a runtime that was shut down can still be freed.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn ENSSessionFree(data: *mut u8) {
    if data.is_null() {
        return;
    }

    match global_pool() {
        Some(pool) => {
            if let Err(e) = pool.free_raw(data) {
                log::warn!("ENSSessionFree({:p}) rejected: {}", data, e);
            }
        }
        None => log::warn!("ENSSessionFree({:p}): no runtime was ever started", data),
    }
}
