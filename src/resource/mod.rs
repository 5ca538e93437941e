//! Resource declaration layer
//!
//! This module provides a data-driven approach to describing cloud resources.
//! Kind schemas are loaded from JSON files at compile time, so a new resource
//! kind or property only needs a schema change.
//!
//! # Architecture
//!
//! - [`registry`] - Loads and caches kind definitions from embedded JSON
//! - [`schema`] - Validates declared properties against a kind's schema
//! - [`descriptor`] - Descriptors, typed references and access grants
//!
//! # Kind Definitions
//!
//! Kinds are defined in JSON files under `src/resources/`:
//! - `network.json` - Network
//! - `storage.json` - DatabaseCluster, FileSystem
//! - `compute.json` - ComputeService
//! - `edge.json` - ContentDelivery, AccessPolicy, DnsRecord, Certificate
//!
//! # Example
//!
//! ```ignore
//! use stackplan::resource::{Properties, ResourceKind};
//! use stackplan::stack::Stack;
//!
//! let mut stack = Stack::new("demo");
//! let vpc = stack.declare(ResourceKind::Network, "Vpc", Properties::new())?;
//! let fs = stack.declare(
//!     ResourceKind::FileSystem,
//!     "Files",
//!     Properties::new().with("network", vpc.attr("vpcId")),
//! )?;
//! ```

mod descriptor;
mod registry;
pub mod schema;

pub use descriptor::*;
pub use registry::*;
