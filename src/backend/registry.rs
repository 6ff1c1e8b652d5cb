use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::{BackendAdapter, BackendArgs, colour_threshold, replay};
use crate::error::{BackendError, RegistryError};

/// Builds a backend from its named arguments.
pub type BackendFactory =
    Box<dyn Fn(&BackendArgs) -> Result<Box<dyn BackendAdapter>, BackendError> + Send + Sync>;

/// Mapping from backend name to factory.
#[derive(Default)]
pub struct BackendRegistry {
    factories: BTreeMap<String, BackendFactory>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the backends shipped in this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .factories
            .insert(colour_threshold::NAME.to_string(), Box::new(build_colour_threshold));
        registry
            .factories
            .insert(replay::NAME.to_string(), Box::new(build_replay));
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&BackendArgs) -> Result<Box<dyn BackendAdapter>, BackendError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(RegistryError::DuplicateBackend(name));
        }
        debug!(backend = %name, "registered detection backend");
        self.factories.insert(name, Box::new(factory));
        Ok(())
    }

    /// Build the named backend from `args`.
    pub fn resolve(
        &self,
        name: &str,
        args: &BackendArgs,
    ) -> Result<Box<dyn BackendAdapter>, RegistryError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RegistryError::UnknownBackend {
                name: name.to_string(),
                available: self.names().join(", "),
            })?;
        let backend = factory(args).map_err(|source| RegistryError::BackendConstruction {
            backend: name.to_string(),
            source,
        })?;
        info!(backend = name, "constructed detection backend");
        Ok(backend)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

/// Add the built-in backends to `registry`.
pub fn register_builtin_backends(registry: &mut BackendRegistry) -> Result<(), RegistryError> {
    registry.register(colour_threshold::NAME, build_colour_threshold)?;
    registry.register(replay::NAME, build_replay)
}

fn build_colour_threshold(args: &BackendArgs) -> Result<Box<dyn BackendAdapter>, BackendError> {
    Ok(Box::new(colour_threshold::ColourThresholdBackend::from_args(args)?))
}

fn build_replay(args: &BackendArgs) -> Result<Box<dyn BackendAdapter>, BackendError> {
    Ok(Box::new(replay::ReplayBackend::from_args(args)?))
}

/// Process-wide registry.
///
/// Registration belongs to process startup and must finish before any
/// detection service resolves a backend; the lock only keeps the static
/// sound, it does not make late registration meaningful.
static GLOBAL_REGISTRY: Lazy<RwLock<BackendRegistry>> =
    Lazy::new(|| RwLock::new(BackendRegistry::with_builtins()));

pub fn register_backend<F>(name: impl Into<String>, factory: F) -> Result<(), RegistryError>
where
    F: Fn(&BackendArgs) -> Result<Box<dyn BackendAdapter>, BackendError> + Send + Sync + 'static,
{
    GLOBAL_REGISTRY.write().register(name, factory)
}

pub fn resolve_backend(
    name: &str,
    args: &BackendArgs,
) -> Result<Box<dyn BackendAdapter>, RegistryError> {
    GLOBAL_REGISTRY.read().resolve(name, args)
}

pub fn registered_backends() -> Vec<String> {
    GLOBAL_REGISTRY
        .read()
        .names()
        .into_iter()
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{Detection, Image};

    struct Empty;

    impl BackendAdapter for Empty {
        fn get_detections(
            &mut self,
            _colour: &Image,
            _depth: Option<&Image>,
        ) -> Result<Vec<Detection>, BackendError> {
            Ok(vec![])
        }
    }

    fn empty_factory(_: &BackendArgs) -> Result<Box<dyn BackendAdapter>, BackendError> {
        Ok(Box::new(Empty))
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = BackendRegistry::new();
        registry.register("empty", empty_factory).unwrap();
        assert!(matches!(
            registry.register("empty", empty_factory),
            Err(RegistryError::DuplicateBackend(ref n)) if n == "empty"
        ));
    }

    #[test]
    fn test_builtins_cannot_be_shadowed() {
        let mut registry = BackendRegistry::with_builtins();
        assert!(registry.contains(colour_threshold::NAME));
        assert!(registry.register(replay::NAME, empty_factory).is_err());
    }

    #[test]
    fn test_builtins_register_into_empty_registry() {
        let mut registry = BackendRegistry::new();
        register_builtin_backends(&mut registry).unwrap();
        assert_eq!(registry.names(), vec![colour_threshold::NAME, replay::NAME]);
        assert!(matches!(
            register_builtin_backends(&mut registry),
            Err(RegistryError::DuplicateBackend(_))
        ));
    }

    #[test]
    fn test_unknown_backend_lists_available() {
        let registry = BackendRegistry::with_builtins();
        let err = registry
            .resolve("detectron2", &BackendArgs::new())
            .err()
            .unwrap();
        match err {
            RegistryError::UnknownBackend { name, available } => {
                assert_eq!(name, "detectron2");
                assert!(available.contains(colour_threshold::NAME));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_construction_error_names_argument() {
        let registry = BackendRegistry::with_builtins();
        let err = registry
            .resolve(colour_threshold::NAME, &BackendArgs::new())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            RegistryError::BackendConstruction {
                source: BackendError::MissingArgument(ref arg),
                ..
            } if arg == "class_label"
        ));
        assert!(err.to_string().contains(colour_threshold::NAME));
    }

    #[test]
    fn test_global_registry_round_trip() {
        register_backend("registry-test-empty", empty_factory).unwrap();
        assert!(register_backend("registry-test-empty", empty_factory).is_err());
        assert!(registered_backends().iter().any(|n| n == "registry-test-empty"));
        let mut backend = resolve_backend("registry-test-empty", &BackendArgs::new()).unwrap();
        let frame = Image::new(1, 1, crate::detection::ImageEncoding::Mono8, vec![0]);
        assert!(backend.get_detections(&frame, None).unwrap().is_empty());
    }
}
