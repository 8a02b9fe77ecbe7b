//! Typed lookup of shared controller services.
//!
//! `ServiceRegistry` stores one value per concrete type, keyed by `TypeId`.
//! Controllers register themselves at startup and look up their
//! collaborators by type; a missing registration is an error naming the type
//! rather than a silently substituted placeholder.

use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    sync::Arc,
};

use thiserror::Error;

/// Returned by [`ServiceRegistry::get`] when no value of the type exists.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("service {type_name} is not registered")]
pub struct NotRegistered {
    /// Name of the requested type.
    pub type_name: &'static str,
}

/// Stores shared services keyed by concrete type.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use hubwire::services::ServiceRegistry;
///
/// struct GateController {
///     zone: &'static str,
/// }
///
/// let mut services = ServiceRegistry::default();
/// services.insert(Arc::new(GateController { zone: "dock" }));
/// let gate = services.get::<GateController>().expect("gate registered");
/// assert_eq!(gate.zone, "dock");
/// assert!(services.get::<String>().is_err());
/// ```
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceRegistry {
    /// Register `service`, replacing any existing value of the same type.
    pub fn insert<T>(&mut self, service: Arc<T>)
    where
        T: Send + Sync + 'static,
    {
        self.values
            .insert(TypeId::of::<T>(), service as Arc<dyn Any + Send + Sync>);
    }

    /// Retrieve the service of type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`NotRegistered`] if no value of type `T` was inserted.
    pub fn get<T>(&self) -> Result<Arc<T>, NotRegistered>
    where
        T: Send + Sync + 'static,
    {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|data| Arc::clone(data).downcast::<T>().ok())
            .ok_or(NotRegistered {
                type_name: type_name::<T>(),
            })
    }

    /// Whether a value of type `T` is registered.
    #[must_use]
    pub fn contains<T>(&self) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.values.contains_key(&TypeId::of::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct EnvironmentController {
        zones: u8,
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn registry_is_send_and_sync() { assert_send_sync::<ServiceRegistry>(); }

    #[test]
    fn lookup_by_type() {
        let mut services = ServiceRegistry::default();
        services.insert(Arc::new(EnvironmentController { zones: 3 }));
        services.insert(Arc::new(String::from("dock")));

        let env = services
            .get::<EnvironmentController>()
            .expect("controller registered");
        assert_eq!(env.zones, 3);
        assert_eq!(services.get::<String>().expect("string").as_str(), "dock");
    }

    #[test]
    fn missing_service_names_the_type() {
        let services = ServiceRegistry::default();
        let err = services
            .get::<EnvironmentController>()
            .expect_err("nothing registered");
        assert!(err.type_name.ends_with("EnvironmentController"));
        assert!(err.to_string().contains("is not registered"));
    }

    #[test]
    fn insert_replaces_previous_value() {
        let mut services = ServiceRegistry::default();
        services.insert(Arc::new(1u32));
        services.insert(Arc::new(2u32));
        assert_eq!(*services.get::<u32>().expect("u32"), 2);
        assert!(services.contains::<u32>());
        assert!(!services.contains::<u64>());
    }
}
