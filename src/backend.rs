//! Detector backends and the registry that selects one by name.
//!
//! Backends register a factory under a unique name during process startup;
//! a detection service then resolves exactly one of them, passing the named
//! arguments from its configuration.

mod adapter;
mod args;
pub mod colour_threshold;
mod registry;
pub mod replay;

pub use adapter::BackendAdapter;
pub use args::BackendArgs;
pub use registry::{
    BackendFactory, BackendRegistry, register_backend, register_builtin_backends,
    registered_backends, resolve_backend,
};
