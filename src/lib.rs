//! stackplan
//!
//! Declares cloud deployment topologies as typed resource descriptors,
//! resolves their references and access grants into a dependency-ordered
//! plan, and emits a provisioning manifest for the engine.

pub mod app;
pub mod config;
pub mod context;
pub mod emit;
pub mod error;
pub mod resolver;
pub mod resource;
pub mod stack;

pub use app::container_app;
pub use context::{Context, DeploymentSettings};
pub use emit::{Manifest, OutputFormat};
pub use error::{Result, StackError};
pub use resolver::{EmissionPlan, ResolveWarning};
pub use resource::{
    AccessGrant, Properties, PropertyValue, Protocol, Reference, ResourceDescriptor, ResourceKind,
};
pub use stack::{Stack, StackPhase, Synthesis};

/// Version injected at compile time via STACKPLAN_VERSION env var (set by
/// CI/CD), or "dev" for local builds.
pub const VERSION: &str = match option_env!("STACKPLAN_VERSION") {
    Some(v) => v,
    None => "dev",
};
