//! FFI type definitions

use std::{ptr, time::Duration};

use crate::{
    error::{EnsError, Result},
    runtime::RuntimeConfig,
};

pub use crate::dispatch::{
    EVENT_NOTIFY, EVENT_REQUEST, EVENT_SESSION_DISCONNECT, EVENT_SESSION_END, EVENT_SESSION_START,
};

/// Session id returned by `ENSSessionStart` on failure
pub const ENS_INVALID_SESSION: u32 = 0;

/// Data passed across the API. `p` always refers to memory from
/// `ENSSessionAlloc`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ENSUserData {
    /// Length of the data in bytes
    pub length: u32,
    /// Start of the buffer
    pub p: *mut u8,
}

impl ENSUserData {
    /// No buffer
    pub fn empty() -> Self {
        Self {
            length: 0,
            p: ptr::null_mut(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.p.is_null()
    }
}

impl Default for ENSUserData {
    fn default() -> Self {
        Self::empty()
    }
}

/// Workload event function: (session_id, event_type, sqn, userdata)
pub type ENSEventFn =
    extern "C" fn(session_id: u32, event_type: u32, sqn: u32, userdata: *mut ENSUserData);

/// Host options for `ens_runtime_init`. Zero fields keep the defaults,
/// except the timeouts where zero means no timeout.
///
/// NULL options and the runtime created on first use both behave like
/// zeroed options, so C requests wait until their session ends unless
/// `request_timeout_ms` is set.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct EnsRuntimeOptions {
    pub min_threads: u32,
    pub max_threads: u32,
    pub max_queue_depth: u32,
    pub request_timeout_ms: u64,
    pub allocation_timeout_ms: u64,
}

impl EnsRuntimeOptions {
    /// Convert to a runtime config
    pub fn to_config(&self) -> Result<RuntimeConfig> {
        let mut config = RuntimeConfig::default();

        if self.max_threads != 0 {
            config.dispatch.max_threads = self.max_threads as usize;
            config.dispatch.min_threads = config.dispatch.min_threads.min(config.dispatch.max_threads);
        }
        if self.min_threads != 0 {
            config.dispatch.min_threads = self.min_threads as usize;
        }
        if self.max_queue_depth != 0 {
            config.dispatch.max_queue_depth = self.max_queue_depth as usize;
        }

        config.request_timeout = match self.request_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        config.pool.allocation_timeout = match self.allocation_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        config.validate().map_err(|e| match e {
            EnsError::InvalidParameter { .. } => e,
            other => EnsError::invalid_parameter("options", other.to_string()),
        })?;
        Ok(config)
    }
}
