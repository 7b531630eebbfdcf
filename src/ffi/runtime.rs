//! Host-side FFI functions managing the process-wide runtime

use std::{ffi::c_char, time::Duration};

use crate::runtime::Runtime;

use super::{
    handler::CEventHandler,
    types::{ENSEventFn, EnsRuntimeOptions},
    utils::{c_str_to_string, global_runtime, install_runtime, string_to_c_str, take_runtime},
};

/// How long shutdown waits for queued events
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Create the process-wide runtime. NULL `options` behaves like zeroed
/// options. Fails if a runtime is already running.
#[no_mangle]
pub extern "C" fn ens_runtime_init(options: *const EnsRuntimeOptions) -> bool {
    let config = if options.is_null() {
        EnsRuntimeOptions::default().to_config()
    } else {
        unsafe { &*options }.to_config()
    };

    let runtime = match config.and_then(Runtime::new) {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("ens_runtime_init failed: {}", e);
            return false;
        }
    };

    if !install_runtime(runtime.clone()) {
        log::warn!("ens_runtime_init: a runtime is already running");
        runtime.shutdown();
        return false;
    }
    true
}

/// End all sessions and drop the process-wide runtime. Later C calls fail
/// until `ens_runtime_init` installs a new one; buffers the workload still
/// holds may be freed with `ENSSessionFree`.
#[no_mangle]
pub extern "C" fn ens_runtime_shutdown() {
    if let Some(runtime) = take_runtime() {
        runtime.shutdown();
        if !runtime.wait_idle(SHUTDOWN_GRACE) {
            log::warn!("ens_runtime_shutdown: events still running after {:?}", SHUTDOWN_GRACE);
        }
    }
}

/// Bind `event_fn` to `name` ("<microservice>.<interface>")
#[no_mangle]
pub extern "C" fn ens_register_interface(name: *const c_char, event_fn: Option<ENSEventFn>) -> bool {
    let Some(event_fn) = event_fn else {
        return false;
    };
    let Ok(name) = c_str_to_string(name) else {
        return false;
    };
    let Some(runtime) = global_runtime() else {
        return false;
    };

    match runtime.register_interface(&name, CEventHandler::new(event_fn)) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("ens_register_interface('{}') failed: {}", name, e);
            false
        }
    }
}

/// Report a transport failure on a session
#[no_mangle]
pub extern "C" fn ens_session_disconnect(session_id: u32) -> bool {
    global_runtime().map_or(false, |runtime| runtime.session_disconnect(session_id).is_ok())
}

/// Runtime statistics summary (caller must free with ens_free_string)
#[no_mangle]
pub extern "C" fn ens_runtime_stats() -> *mut c_char {
    match global_runtime() {
        Some(runtime) => string_to_c_str(runtime.stats().summary()),
        None => std::ptr::null_mut(),
    }
}
