//! Adapter running a C event function as an `EventHandler`

use crate::{
    dispatch::{Event, EventHandler, EventType},
    runtime::Runtime,
};

use super::types::{ENSEventFn, ENSUserData};

/// Wraps an `ENSEventFn`.
///
/// Event payloads cross into C as raw pointers. For requests, whatever the
/// function leaves in the userdata becomes the response.
#[derive(Debug, Clone, Copy)]
pub struct CEventHandler {
    event_fn: ENSEventFn,
}

impl CEventHandler {
    pub fn new(event_fn: ENSEventFn) -> Self {
        Self { event_fn }
    }
}

impl EventHandler for CEventHandler {
    fn on_event(&self, runtime: &Runtime, event: &mut Event) {
        let mut userdata = match event.take_data() {
            Some(buffer) => {
                let (p, length) = buffer.into_raw_parts();
                ENSUserData {
                    length: length as u32,
                    p,
                }
            }
            None => ENSUserData::empty(),
        };

        (self.event_fn)(event.session_id, event.kind.as_u32(), event.sqn, &mut userdata);

        if event.kind != EventType::Request || userdata.is_empty() {
            return;
        }

        match runtime.pool().from_raw(userdata.p, userdata.length as usize) {
            Ok(response) => event.respond(response),
            Err(e) => log::warn!(
                "discarding response on session {} sqn {}: {}",
                event.session_id,
                event.sqn,
                e
            ),
        }
    }
}
