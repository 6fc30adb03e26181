//! # Application Modules
//!
//! Named, shared application services (database handles, caches, clients)
//! registered on the server before it starts and reachable from every
//! request through [`Context::module`](crate::context::Context::module).
//!
//! Each module is initialized once, when registered. The registry is frozen
//! when the listener starts, so lookups take no lock.

use crate::error::Result;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A shared application service
pub trait Module: Any + Send + Sync {
    /// One-time setup, run at registration
    ///
    /// # Errors
    ///
    /// A failing module is not registered.
    fn init(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Named module storage
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ModuleRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize `module` and store it under `name`
    ///
    /// Replaces any module already registered under that name.
    ///
    /// # Errors
    ///
    /// Whatever `Module::init` returns.
    pub fn register<M: Module>(&mut self, name: impl Into<String>, mut module: M) -> Result<()> {
        let name = name.into();
        module.init()?;

        info!(
            module = %name,
            module_type = std::any::type_name::<M>(),
            "Module registered"
        );
        self.modules.insert(name, Arc::new(module));
        Ok(())
    }

    /// Module stored under `name`
    ///
    /// Returns `None` if the name is unknown or holds a different type.
    #[must_use]
    pub fn get<M: Module>(&self, name: &str) -> Option<Arc<M>> {
        self.modules
            .get(name)
            .cloned()
            .and_then(|module| module.downcast::<M>().ok())
    }

    /// Check if a name is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Get the number of registered modules
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("names", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[derive(Debug, Default)]
    struct Counter {
        ready: bool,
    }

    impl Module for Counter {
        fn init(&mut self) -> Result<()> {
            self.ready = true;
            Ok(())
        }
    }

    struct Greeting(&'static str);

    impl Module for Greeting {}

    struct Broken;

    impl Module for Broken {
        fn init(&mut self) -> Result<()> {
            Err(Error::Config {
                reason: "missing dsn".to_string(),
            })
        }
    }

    #[test]
    fn test_register_runs_init() {
        let mut registry = ModuleRegistry::new();
        registry.register("counter", Counter::default()).unwrap();

        let counter = registry.get::<Counter>("counter").unwrap();
        assert!(counter.ready);
    }

    #[test]
    fn test_type_mismatch() {
        let mut registry = ModuleRegistry::new();
        registry.register("greeting", Greeting("hi")).unwrap();

        assert!(registry.get::<Counter>("greeting").is_none());
        assert_eq!(registry.get::<Greeting>("greeting").unwrap().0, "hi");
    }

    #[test]
    fn test_missing_name() {
        let registry = ModuleRegistry::new();
        assert!(registry.get::<Counter>("nope").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_failed_init_not_registered() {
        let mut registry = ModuleRegistry::new();
        assert!(registry.register("broken", Broken).is_err());
        assert!(!registry.contains("broken"));
    }

    #[test]
    fn test_overwrite() {
        let mut registry = ModuleRegistry::new();
        registry.register("g", Greeting("a")).unwrap();
        registry.register("g", Greeting("b")).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get::<Greeting>("g").unwrap().0, "b");
    }

    #[test]
    fn test_shared_across_threads() {
        let mut registry = ModuleRegistry::new();
        registry.register("g", Greeting("shared")).unwrap();
        let registry = Arc::new(registry);

        let clone = registry.clone();
        let handle = std::thread::spawn(move || clone.get::<Greeting>("g").map(|g| g.0));

        assert_eq!(handle.join().unwrap(), Some("shared"));
    }
}
