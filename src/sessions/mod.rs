//! Session management
//!
//! A session links two endpoints in the runtime: the outgoing side created
//! by the caller and the incoming side bound to the target interface. Each
//! endpoint has its own id and lifecycle state.

pub mod interfaces;
pub mod session;
pub mod stats;
pub mod table;

// Re-export main types
pub use interfaces::{validate_interface_name, InterfaceRegistry};
pub use session::{
    AbortReason, Admission, Direction, Session, SessionId, SessionState, Termination,
    TerminationStep,
};
pub use stats::{AtomicSessionStats, SessionStats};
pub use table::SessionTable;
