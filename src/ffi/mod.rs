//! C Foreign Function Interface (FFI)
//!
//! Exposes the ENS session API to C and C++ workloads, plus host-side
//! functions to create the process-wide runtime and bind interfaces.

pub mod buffers;
pub mod handler;
pub mod runtime;
pub mod session;
pub mod types;
pub mod utils;
pub mod version;

// Re-export commonly used types and functions
pub use types::{
    ENSEventFn, ENSUserData, EnsRuntimeOptions, ENS_INVALID_SESSION, EVENT_NOTIFY, EVENT_REQUEST,
    EVENT_SESSION_DISCONNECT, EVENT_SESSION_END, EVENT_SESSION_START,
};

pub use handler::CEventHandler;
pub use utils::{ens_free_string, global_runtime};

// Session API
pub use session::{ENSSessionAbort, ENSSessionEnd, ENSSessionNotify, ENSSessionRequest, ENSSessionStart};

// Buffer API
pub use buffers::{ENSSessionAlloc, ENSSessionFree};

// Host API
pub use runtime::{
    ens_register_interface, ens_runtime_init, ens_runtime_shutdown, ens_runtime_stats,
    ens_session_disconnect,
};

// Version API
pub use version::{ens_version_major, ens_version_minor, ens_version_patch, ens_version_string};
