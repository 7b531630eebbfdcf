//! Events delivered to workload event functions

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    buffers::Buffer,
    error::{EnsError, Result},
    runtime::Runtime,
    sessions::SessionId,
};

/// Sequence number of a data transfer (0 for lifecycle events)
pub type Sqn = u32;

/// Incoming request event
pub const EVENT_REQUEST: u32 = 0;
/// Incoming notify event
pub const EVENT_NOTIFY: u32 = 1;
/// Incoming session start event
pub const EVENT_SESSION_START: u32 = 10;
/// Incoming session end event
pub const EVENT_SESSION_END: u32 = 20;
/// Incoming session disconnect event
pub const EVENT_SESSION_DISCONNECT: u32 = 21;

/// Kind of event passed to an event function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum EventType {
    Request = EVENT_REQUEST,
    Notify = EVENT_NOTIFY,
    SessionStart = EVENT_SESSION_START,
    SessionEnd = EVENT_SESSION_END,
    SessionDisconnect = EVENT_SESSION_DISCONNECT,
}

impl EventType {
    /// Wire value of the event type
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Parse a wire value
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            EVENT_REQUEST => Ok(Self::Request),
            EVENT_NOTIFY => Ok(Self::Notify),
            EVENT_SESSION_START => Ok(Self::SessionStart),
            EVENT_SESSION_END => Ok(Self::SessionEnd),
            EVENT_SESSION_DISCONNECT => Ok(Self::SessionDisconnect),
            other => Err(EnsError::invalid_parameter(
                "event_type",
                format!("unknown event type {}", other),
            )),
        }
    }

    /// Request or notify
    pub fn is_data(self) -> bool {
        matches!(self, Self::Request | Self::Notify)
    }

    /// End or disconnect
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::SessionEnd | Self::SessionDisconnect)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Request => "EVENT_REQUEST",
            Self::Notify => "EVENT_NOTIFY",
            Self::SessionStart => "EVENT_SESSION_START",
            Self::SessionEnd => "EVENT_SESSION_END",
            Self::SessionDisconnect => "EVENT_SESSION_DISCONNECT",
        };
        f.write_str(name)
    }
}

/// An event on a session.
///
/// For `Request` the event function leaves the response in `data` before
/// returning: it may keep the request buffer, replace it, or take it and
/// leave nothing. For `Notify` the event function owns `data`; whatever is
/// left in it on return goes back to the pool.
#[derive(Debug)]
pub struct Event {
    /// Session the event arrived on, as seen by the receiving side
    pub session_id: SessionId,
    /// Event kind
    pub kind: EventType,
    /// Sequence number, 0 for lifecycle events
    pub sqn: Sqn,
    /// Payload, if any
    pub data: Option<Buffer>,
}

impl Event {
    /// Create a request event
    pub fn request(session_id: SessionId, sqn: Sqn, data: Buffer) -> Self {
        Self {
            session_id,
            kind: EventType::Request,
            sqn,
            data: Some(data),
        }
    }

    /// Create a notify event
    pub fn notify(session_id: SessionId, sqn: Sqn, data: Buffer) -> Self {
        Self {
            session_id,
            kind: EventType::Notify,
            sqn,
            data: Some(data),
        }
    }

    /// Create a lifecycle event
    pub fn lifecycle(session_id: SessionId, kind: EventType) -> Self {
        debug_assert!(!kind.is_data());
        Self {
            session_id,
            kind,
            sqn: 0,
            data: None,
        }
    }

    /// Take ownership of the payload
    pub fn take_data(&mut self) -> Option<Buffer> {
        self.data.take()
    }

    /// Payload bytes, empty when there is no buffer
    pub fn payload(&self) -> &[u8] {
        self.data.as_ref().map(Buffer::as_slice).unwrap_or(&[])
    }

    /// Set the response of a request event
    pub fn respond(&mut self, response: Buffer) {
        self.data = Some(response);
    }
}

/// Workload event function.
///
/// The runtime may call the same handler concurrently for the same session
/// with different events, so implementations must be thread safe.
pub trait EventHandler: Send + Sync {
    /// Handle one event
    fn on_event(&self, runtime: &Runtime, event: &mut Event);
}

impl<F> EventHandler for F
where
    F: Fn(&Runtime, &mut Event) + Send + Sync,
{
    fn on_event(&self, runtime: &Runtime, event: &mut Event) {
        self(runtime, event)
    }
}
