use std::collections::HashMap;

use anyhow::{anyhow, Result};

use super::backend::TrackingBackend;

type BackendFactory = Box<dyn Fn() -> Result<Box<dyn TrackingBackend>> + Send + Sync>;

/// Named tracking backend factories.
///
/// A backend is built fresh for each detection loop because backends carry
/// per-stream tracking state. Building can fail (missing model file, missing
/// runtime); callers decide whether that is fatal.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry with every backend compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("stub", || {
            Ok(Box::new(super::StubBackend::new()) as Box<dyn TrackingBackend>)
        });
        registry
    }

    /// Register a backend factory. The first registered backend becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Result<Box<dyn TrackingBackend>> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Build the named backend and run its warm-up hook.
    pub fn build(&self, name: &str) -> Result<Box<dyn TrackingBackend>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow!("backend '{}' not registered", name))?;
        let mut backend = factory()?;
        backend.warm_up()?;
        Ok(backend)
    }

    /// Build the default backend.
    pub fn build_default(&self) -> Result<Box<dyn TrackingBackend>> {
        let name = self
            .default_name
            .as_deref()
            .ok_or_else(|| anyhow!("no tracking backend registered"))?;
        self.build(name)
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::RawObservation;
    use crate::frame::Frame;

    struct BrokenModel;

    impl TrackingBackend for BrokenModel {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn detect_and_track(&mut self, _frame: &Frame) -> Result<Vec<RawObservation>> {
            Ok(Vec::new())
        }

        fn warm_up(&mut self) -> Result<()> {
            Err(anyhow!("weights missing"))
        }
    }

    #[test]
    fn builtin_registry_builds_stub() -> Result<()> {
        let registry = BackendRegistry::with_builtin();
        assert_eq!(registry.list(), vec!["stub".to_string()]);
        assert_eq!(registry.build_default()?.name(), "stub");
        Ok(())
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let registry = BackendRegistry::with_builtin();
        assert!(registry.build("yolo").is_err());
        let mut registry = BackendRegistry::new();
        assert!(registry.build_default().is_err());
        assert!(registry.set_default("stub").is_err());
    }

    #[test]
    fn warm_up_failure_fails_build() {
        let mut registry = BackendRegistry::with_builtin();
        registry.register("broken", || Ok(Box::new(BrokenModel) as Box<dyn TrackingBackend>));
        assert!(registry.build("broken").is_err());
        assert!(registry.set_default("broken").is_ok());
        assert!(registry.build_default().is_err());
    }
}
