//! FFI functions for sessions and data transfer

use std::{ffi::c_char, sync::Arc};

use crate::{buffers::Buffer, dispatch::EventHandler, runtime::Runtime};

use super::{
    handler::CEventHandler,
    types::{ENSEventFn, ENSUserData, ENS_INVALID_SESSION},
    utils::{c_str_to_string, global_runtime},
};

/// Start a session to `interface_name` ("<microservice>.<interface>").
///
/// Without `event_fn` the first registered interface's event function
/// handles the caller side. Returns 0 on failure.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn ENSSessionStart(interface_name: *const c_char, event_fn: Option<ENSEventFn>) -> u32 {
    let name = match c_str_to_string(interface_name) {
        Ok(name) => name,
        Err(_) => return ENS_INVALID_SESSION,
    };

    let Some(runtime) = global_runtime() else {
        return ENS_INVALID_SESSION;
    };

    let handler = event_fn.map(|f| Arc::new(CEventHandler::new(f)) as Arc<dyn EventHandler>);
    match runtime.session_start(&name, handler) {
        Ok(session_id) => session_id,
        Err(e) => {
            log::debug!("ENSSessionStart('{}') failed: {}", name, e);
            ENS_INVALID_SESSION
        }
    }
}

/// End a session
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn ENSSessionEnd(session_id: u32) {
    if let Some(runtime) = global_runtime() {
        if let Err(e) = runtime.session_end(session_id) {
            log::debug!("ENSSessionEnd({}) failed: {}", session_id, e);
        }
    }
}

/// End a session with a reason code and text (deprecated)
#[no_mangle]
#[allow(non_snake_case, deprecated)]
pub extern "C" fn ENSSessionAbort(session_id: u32, reason: u32, info: *const c_char) {
    let info = if info.is_null() {
        None
    } else {
        c_str_to_string(info).ok()
    };

    if let Some(runtime) = global_runtime() {
        if let Err(e) = runtime.session_abort(session_id, reason, info.as_deref()) {
            log::debug!("ENSSessionAbort({}) failed: {}", session_id, e);
        }
    }
}

/// Send a request and block for the response.
///
/// The request buffer always passes to the runtime; `userdata` is cleared.
/// On success it refers to the response, if the responder left one, which
/// the caller frees with `ENSSessionFree`.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn ENSSessionRequest(session_id: u32, sqn: u32, userdata: *mut ENSUserData) -> bool {
    if userdata.is_null() {
        return false;
    }
    let userdata = unsafe { &mut *userdata };

    let Some(runtime) = global_runtime() else {
        return false;
    };
    let Some(request) = take_userdata(&runtime, userdata) else {
        return false;
    };

    match runtime.request(session_id, sqn, request) {
        Ok(Some(response)) => {
            let (p, length) = response.into_raw_parts();
            *userdata = ENSUserData {
                length: length as u32,
                p,
            };
            true
        }
        Ok(None) => true,
        Err(e) => {
            log::debug!("ENSSessionRequest({}, {}) failed: {}", session_id, sqn, e);
            false
        }
    }
}

/// Send a notify. The buffer passes to the runtime and `userdata` is
/// cleared, whether or not the send succeeds.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn ENSSessionNotify(session_id: u32, sqn: u32, userdata: *mut ENSUserData) -> bool {
    if userdata.is_null() {
        return false;
    }
    let userdata = unsafe { &mut *userdata };

    let Some(runtime) = global_runtime() else {
        return false;
    };
    let Some(data) = take_userdata(&runtime, userdata) else {
        return false;
    };

    match runtime.notify(session_id, sqn, data) {
        Ok(()) => true,
        Err(e) => {
            log::debug!("ENSSessionNotify({}, {}) failed: {}", session_id, sqn, e);
            false
        }
    }
}

/// Move the buffer out of `userdata` into the runtime's hands.
/// An empty userdata sends an empty payload.
fn take_userdata(runtime: &Runtime, userdata: &mut ENSUserData) -> Option<Buffer> {
    let taken = std::mem::take(userdata);
    let buffer = if taken.is_empty() {
        runtime.alloc(0)
    } else {
        runtime.pool().from_raw(taken.p, taken.length as usize)
    };

    match buffer {
        Ok(buffer) => Some(buffer),
        Err(e) => {
            log::warn!("rejecting userdata {:p}: {}", taken.p, e);
            None
        }
    }
}
