//! Named interface bindings
//!
//! Workloads publish event functions under `<microservice>.<interface>`
//! names. Session starts resolve the target interface here, and outgoing
//! sessions started without an event function fall back to the first
//! binding that was registered.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::{
    dispatch::EventHandler,
    error::{EnsError, Result},
    sync::RwLockExt,
};

/// Check that `name` has the form `<microservice>.<interface>`
pub fn validate_interface_name(name: &str) -> Result<()> {
    if name.chars().any(char::is_whitespace) {
        return Err(EnsError::invalid_interface_name(
            name,
            "whitespace is not allowed",
        ));
    }

    match name.split_once('.') {
        Some((service, interface))
            if !service.is_empty() && !interface.is_empty() && !interface.contains('.') =>
        {
            Ok(())
        }
        _ => Err(EnsError::invalid_interface_name(
            name,
            "expected <microservice-name>.<interface-name>",
        )),
    }
}

#[derive(Default)]
struct Bindings {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    /// Registration order, oldest first
    order: Vec<String>,
}

/// Registry of interface bindings
#[derive(Default)]
pub struct InterfaceRegistry {
    bindings: RwLock<Bindings>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `name`
    pub fn register(&self, name: &str, handler: Arc<dyn EventHandler>) -> Result<()> {
        validate_interface_name(name)?;

        let mut bindings = self.bindings.write_unpoisoned();
        if bindings.handlers.contains_key(name) {
            return Err(EnsError::InterfaceExists {
                name: name.to_string(),
            });
        }
        bindings.handlers.insert(name.to_string(), handler);
        bindings.order.push(name.to_string());
        log::debug!("registered interface '{}'", name);
        Ok(())
    }

    /// Remove a binding. Sessions already bound keep their event function.
    pub fn unregister(&self, name: &str) -> bool {
        let mut bindings = self.bindings.write_unpoisoned();
        if bindings.handlers.remove(name).is_none() {
            return false;
        }
        bindings.order.retain(|registered| registered != name);
        log::debug!("unregistered interface '{}'", name);
        true
    }

    /// Event function bound to `name`
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn EventHandler>> {
        validate_interface_name(name)?;
        self.bindings
            .read_unpoisoned()
            .handlers
            .get(name)
            .cloned()
            .ok_or_else(|| EnsError::interface_not_found(name))
    }

    /// Event function of the earliest registered interface
    pub fn default_handler(&self) -> Option<Arc<dyn EventHandler>> {
        let bindings = self.bindings.read_unpoisoned();
        bindings
            .order
            .first()
            .and_then(|name| bindings.handlers.get(name))
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.read_unpoisoned().handlers.contains_key(name)
    }

    /// Registered names in registration order
    pub fn names(&self) -> Vec<String> {
        self.bindings.read_unpoisoned().order.clone()
    }

    pub fn len(&self) -> usize {
        self.bindings.read_unpoisoned().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for InterfaceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceRegistry")
            .field("interfaces", &self.names())
            .finish()
    }
}
