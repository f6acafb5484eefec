// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A name-keyed registry through which managers publish capabilities.
//!
//! A manager registers a service from its attach hook and removes it from its
//! dispose hook. Other managers and the command layer discover it by name and
//! downcast to the concrete type they expect.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// A service registry keyed by name.
///
/// Services are stored as `Arc<dyn Any + Send + Sync>` and retrieved by name
/// and concrete type via [`get`](ServiceRegistry::get).
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use marionette_core::service_registry::ServiceRegistry;
///
/// struct Marker { height: f32 }
///
/// let mut registry = ServiceRegistry::new();
/// registry.register("marker", Arc::new(Marker { height: 0.5 }));
///
/// let svc = registry.get::<Marker>("marker").unwrap();
/// assert_eq!(svc.height, 0.5);
/// ```
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ServiceRegistry {
    /// Creates an empty service registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
        }
    }

    /// Publishes a service under `name`, replacing any previous entry.
    pub fn register<T: Send + Sync + 'static>(&mut self, name: impl Into<String>, service: Arc<T>) {
        let name = name.into();
        if self.services.insert(name.clone(), service).is_some() {
            log::debug!("[ServiceRegistry] Replaced service '{name}'");
        }
    }

    /// Removes a service. Returns `true` if it was present.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.services.remove(name).is_some()
    }

    /// Retrieves a service by name.
    ///
    /// Returns `None` if nothing is registered under `name` or if the entry is
    /// not a `T`.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.services
            .get(name)
            .cloned()
            .and_then(|svc| svc.downcast::<T>().ok())
    }

    /// Returns `true` if a service is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Returns the number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns `true` if no services are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Removes every service.
    pub fn clear(&mut self) {
        self.services.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeMarker {
        name: String,
    }

    struct FakeController {}

    #[test]
    fn test_register_and_get() {
        let mut registry = ServiceRegistry::new();
        registry.register(
            "marker",
            Arc::new(FakeMarker {
                name: "ball".to_string(),
            }),
        );

        let retrieved = registry.get::<FakeMarker>("marker").unwrap();
        assert_eq!(retrieved.name, "ball");
    }

    #[test]
    fn test_get_missing_returns_none() {
        let registry = ServiceRegistry::new();
        assert!(registry.get::<FakeMarker>("marker").is_none());
    }

    #[test]
    fn test_get_with_wrong_type_returns_none() {
        let mut registry = ServiceRegistry::new();
        registry.register("marker", Arc::new(FakeController {}));
        assert!(registry.get::<FakeMarker>("marker").is_none());
        assert!(registry.contains("marker"));
    }

    #[test]
    fn test_replace_and_unregister() {
        let mut registry = ServiceRegistry::new();
        registry.register("marker", Arc::new(FakeMarker { name: "old".into() }));
        registry.register("marker", Arc::new(FakeMarker { name: "new".into() }));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get::<FakeMarker>("marker").unwrap().name, "new");

        assert!(registry.unregister("marker"));
        assert!(!registry.unregister("marker"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_default_is_empty() {
        let registry = ServiceRegistry::default();
        assert!(registry.is_empty());
    }
}
