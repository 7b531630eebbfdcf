//! FFI utilities and the process-wide runtime

use std::{
    ffi::{c_char, CStr, CString},
    sync::RwLock,
};

use crate::{
    buffers::BufferPool,
    error::{EnsError, Result},
    runtime::Runtime,
    sync::RwLockExt,
};

use super::types::EnsRuntimeOptions;

/// Lifecycle of the process-wide runtime
enum RuntimeSlot {
    /// No runtime yet; the first C call creates one with defaults
    Uninit,
    Running(Runtime),
    /// `ens_runtime_shutdown` ran. Keeps the old pool so buffers the
    /// workload still holds can be freed.
    ShutDown(BufferPool),
}

// The C signatures carry no runtime handle, so one runtime serves the process
lazy_static::lazy_static! {
    static ref RUNTIME: RwLock<RuntimeSlot> = RwLock::new(RuntimeSlot::Uninit);
}

/// Runtime used by the C API.
///
/// Created from zeroed `EnsRuntimeOptions` on first use. Returns `None`
/// after `ens_runtime_shutdown` until `ens_runtime_init` runs again.
pub fn global_runtime() -> Option<Runtime> {
    match &*RUNTIME.read_unpoisoned() {
        RuntimeSlot::Running(runtime) => return Some(runtime.clone()),
        RuntimeSlot::ShutDown(_) => return None,
        RuntimeSlot::Uninit => {}
    }

    let mut slot = RUNTIME.write_unpoisoned();
    if let RuntimeSlot::Uninit = *slot {
        match EnsRuntimeOptions::default().to_config().and_then(Runtime::new) {
            Ok(runtime) => *slot = RuntimeSlot::Running(runtime),
            Err(e) => {
                log::error!("failed to create the default runtime: {}", e);
                return None;
            }
        }
    }

    match &*slot {
        RuntimeSlot::Running(runtime) => Some(runtime.clone()),
        _ => None,
    }
}

/// Pool that buffers held by the C side belong to: the running runtime's,
/// or the last one's after shutdown
pub fn global_pool() -> Option<BufferPool> {
    match &*RUNTIME.read_unpoisoned() {
        RuntimeSlot::Running(runtime) => Some(runtime.pool().clone()),
        RuntimeSlot::ShutDown(pool) => Some(pool.clone()),
        RuntimeSlot::Uninit => None,
    }
}

/// Install `runtime` unless one is already running
pub fn install_runtime(runtime: Runtime) -> bool {
    let mut slot = RUNTIME.write_unpoisoned();
    if let RuntimeSlot::Running(_) = *slot {
        return false;
    }
    *slot = RuntimeSlot::Running(runtime);
    true
}

/// Remove the process-wide runtime, leaving the slot shut down
pub fn take_runtime() -> Option<Runtime> {
    let mut slot = RUNTIME.write_unpoisoned();
    let RuntimeSlot::Running(runtime) = &*slot else {
        return None;
    };
    let runtime = runtime.clone();
    *slot = RuntimeSlot::ShutDown(runtime.pool().clone());
    Some(runtime)
}

/// Convert C string to Rust String
pub fn c_str_to_string(c_str: *const c_char) -> Result<String> {
    if c_str.is_null() {
        return Err(EnsError::invalid_parameter("string", "null pointer"));
    }

    unsafe {
        CStr::from_ptr(c_str)
            .to_str()
            .map(|s| s.to_owned())
            .map_err(|e| EnsError::invalid_parameter("string", e.to_string()))
    }
}

/// Convert Rust String to C string (caller must free with ens_free_string)
pub fn string_to_c_str(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(c_string) => c_string.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Free a C string allocated by this library
#[no_mangle]
pub extern "C" fn ens_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    }
}
