//! Service descriptors and the handler registry.
//!
//! The registry maps `(service, message)` pairs to handlers. It is built
//! at startup by each service module's own registration routine; there is
//! no runtime scanning. A second, shared-alias table lets one service
//! expose another service's handler under its own name: resolution tries
//! the exact pair first and consults the alias table only on a miss.
//!
//! The registry is generic over the handler representation so the leaf
//! crate stays free of runtime types; the daemon instantiates it with its
//! boxed handler trait objects.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{DispatchError, DispatchResult};
use crate::privilege::Privilege;

/// A named group of handlers exposed to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Service name as addressed by clients.
    pub name: String,
    /// Whether invocations require a privilege check.
    pub privileged: bool,
    /// The privilege token a caller must hold when the service is
    /// privileged. Defaults to the service name.
    pub privilege: Privilege,
}

impl ServiceDescriptor {
    /// A privileged service requiring the token of its own name.
    #[must_use]
    pub fn privileged(name: impl Into<String>) -> Self {
        let name = name.into();
        let privilege = Privilege::new(name.clone());
        Self {
            name,
            privileged: true,
            privilege,
        }
    }

    /// An open service, executed on behalf of an anonymous identity.
    #[must_use]
    pub fn open(name: impl Into<String>) -> Self {
        let name = name.into();
        let privilege = Privilege::new(name.clone());
        Self {
            name,
            privileged: false,
            privilege,
        }
    }
}

/// Key of one registered handler.
type HandlerKey = (String, String); // (service, message)

/// Canonical target of a shared alias.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SharedHandlerEntry {
    canonical_message: String,
    canonical_service: String,
}

/// Registry of services, handlers, and shared aliases.
pub struct ServiceRegistry<H> {
    services: RwLock<HashMap<String, ServiceDescriptor>>,
    handlers: RwLock<HashMap<HandlerKey, H>>,
    shared: RwLock<HashMap<HandlerKey, SharedHandlerEntry>>,
}

impl<H> Default for ServiceRegistry<H> {
    fn default() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            shared: RwLock::new(HashMap::new()),
        }
    }
}

impl<H: Clone> ServiceRegistry<H> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a service. Re-declaring replaces the descriptor.
    pub fn declare_service(&self, descriptor: ServiceDescriptor) {
        self.services
            .write()
            .expect("lock poisoned")
            .insert(descriptor.name.clone(), descriptor);
    }

    /// Returns the descriptor for `service`.
    #[must_use]
    pub fn descriptor(&self, service: &str) -> Option<ServiceDescriptor> {
        self.services
            .read()
            .expect("lock poisoned")
            .get(service)
            .cloned()
    }

    /// Registers a handler for `(service, message)`. Message names are
    /// unique within one service's own table; re-registration replaces.
    pub fn register(
        &self,
        service: impl Into<String>,
        message: impl Into<String>,
        handler: H,
    ) {
        self.handlers
            .write()
            .expect("lock poisoned")
            .insert((service.into(), message.into()), handler);
    }

    /// Aliases `(owner_service, message)` to the canonical pair, so the
    /// owner service exposes the canonical handler under its own name.
    pub fn register_shared(
        &self,
        message: impl Into<String>,
        owner_service: impl Into<String>,
        canonical_message: impl Into<String>,
        canonical_service: impl Into<String>,
    ) {
        self.shared.write().expect("lock poisoned").insert(
            (owner_service.into(), message.into()),
            SharedHandlerEntry {
                canonical_message: canonical_message.into(),
                canonical_service: canonical_service.into(),
            },
        );
    }

    /// Resolves `(service, message)` to a handler.
    ///
    /// Order: the service's own table first, then the shared-alias table.
    /// Both missing is a per-request [`DispatchError::HandlerNotFound`].
    pub fn resolve(&self, service: &str, message: &str) -> DispatchResult<H> {
        let handlers = self.handlers.read().expect("lock poisoned");
        if let Some(handler) = handlers.get(&(service.to_string(), message.to_string())) {
            return Ok(handler.clone());
        }
        let shared = self.shared.read().expect("lock poisoned");
        if let Some(entry) = shared.get(&(service.to_string(), message.to_string())) {
            if let Some(handler) = handlers.get(&(
                entry.canonical_service.clone(),
                entry.canonical_message.clone(),
            )) {
                return Ok(handler.clone());
            }
        }
        Err(DispatchError::handler_not_found(service, message))
    }

    /// Names of all declared services.
    #[must_use]
    pub fn service_names(&self) -> Vec<String> {
        self.services
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ServiceRegistry<&'static str> {
        let reg = ServiceRegistry::new();
        reg.declare_service(ServiceDescriptor::privileged("mark_service"));
        reg.declare_service(ServiceDescriptor::open("student_service"));
        reg
    }

    #[test]
    fn register_then_resolve_round_trip() {
        let reg = registry();
        reg.register("mark_service", "all_fields", "all_fields_handler");
        let handler = reg.resolve("mark_service", "all_fields").expect("hit");
        assert_eq!(handler, "all_fields_handler");
    }

    #[test]
    fn shared_alias_resolves_canonical_handler() {
        let reg = registry();
        reg.register("mark_service", "all_fields", "all_fields_handler");
        reg.register_shared("all_fields", "student_service", "all_fields", "mark_service");
        // No direct entry for (student_service, all_fields).
        let handler = reg.resolve("student_service", "all_fields").expect("alias");
        assert_eq!(handler, "all_fields_handler");
    }

    #[test]
    fn own_entry_wins_over_alias() {
        let reg = registry();
        reg.register("mark_service", "all_fields", "canonical");
        reg.register("student_service", "all_fields", "own");
        reg.register_shared("all_fields", "student_service", "all_fields", "mark_service");
        assert_eq!(reg.resolve("student_service", "all_fields").unwrap(), "own");
    }

    #[test]
    fn miss_is_handler_not_found() {
        let reg = registry();
        let err = reg.resolve("mark_service", "missing").unwrap_err();
        assert!(matches!(err, DispatchError::HandlerNotFound { .. }));
        assert_eq!(err.client_token(), "nosuchmessage");
    }

    #[test]
    fn descriptor_privilege_defaults_to_name() {
        let desc = ServiceDescriptor::privileged("user_service");
        assert_eq!(desc.privilege.as_str(), "user_service");
        assert!(desc.privileged);
        assert!(!ServiceDescriptor::open("open_data").privileged);
    }
}
