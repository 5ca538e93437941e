//! Kind Registry - Load resource kind schemas from JSON
//!
//! Every resource kind (its properties, outputs, ports and engine type) is
//! described in embedded JSON files. This module parses them once and
//! provides lookup functions for declaration, resolution and emission.

use super::descriptor::{Properties, PropertyValue, ResourceKind};
use indexmap::IndexMap;
use serde::Deserialize;
use std::sync::OnceLock;

/// Embedded kind JSON files (compiled into the binary)
const KIND_FILES: &[&str] = &[
    include_str!("../resources/network.json"),
    include_str!("../resources/storage.json"),
    include_str!("../resources/compute.json"),
    include_str!("../resources/edge.json"),
];

/// Engine attribute name meaning "the resource's own identifier"
pub const SELF_REF: &str = "Ref";

/// Accepted value type of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// String literal, or a reference resolving to one
    String,
    Integer,
    Boolean,
    List,
    Map,
    /// Reference only
    Reference,
    Any,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::List => "list",
            Self::Map => "map",
            Self::Reference => "reference",
            Self::Any => "any",
        }
    }
}

/// Property schema from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct PropertyDef {
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub required: bool,
    /// Enumerated values (compared against the literal's text)
    #[serde(default)]
    pub allowed: Vec<String>,
    /// For references: the kind the target must be
    #[serde(default)]
    pub target_kind: Option<ResourceKind>,
    /// For lists: schema of each item
    #[serde(default)]
    pub items: Option<Box<PropertyDef>>,
    /// For maps with a fixed set of keys
    #[serde(default)]
    pub fields: Option<IndexMap<String, PropertyDef>>,
    /// For free-form maps: schema of every value
    #[serde(default)]
    pub values: Option<Box<PropertyDef>>,
}

/// Picks the engine type from the value of a discriminator property
#[derive(Debug, Clone, Deserialize)]
pub struct EngineTypeSelector {
    pub property: String,
    pub types: IndexMap<String, String>,
}

/// Coupling that requires network access from this kind to the target kind
#[derive(Debug, Clone, Deserialize)]
pub struct CouplingDef {
    /// Top-level property holding the coupling references
    pub property: String,
    pub target_kind: ResourceKind,
}

/// Kind definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct KindDef {
    pub engine_type: String,
    #[serde(default)]
    pub engine_type_by: Option<EngineTypeSelector>,
    /// Port other resources connect to when granted access
    #[serde(default)]
    pub default_port: Option<u16>,
    /// Property overriding `default_port`
    #[serde(default)]
    pub port_property: Option<String>,
    /// Whether the resource owns a security group and can take part in grants
    #[serde(default)]
    pub connectable: bool,
    /// Output attribute -> engine attribute
    #[serde(default)]
    pub outputs: IndexMap<String, String>,
    #[serde(default)]
    pub properties: IndexMap<String, PropertyDef>,
    #[serde(default)]
    pub couplings: Vec<CouplingDef>,
}

impl KindDef {
    /// Engine resource type for a descriptor with these properties
    pub fn engine_type_for(&self, properties: &Properties) -> &str {
        self.engine_type_by
            .as_ref()
            .and_then(|selector| {
                let value = properties.get(&selector.property)?.as_str()?;
                selector.types.get(value)
            })
            .map(String::as_str)
            .unwrap_or(&self.engine_type)
    }

    /// Port the resource accepts connections on
    pub fn service_port(&self, properties: &Properties) -> Option<u16> {
        self.port_property
            .as_deref()
            .and_then(|key| properties.get(key))
            .and_then(PropertyValue::as_int)
            .and_then(|port| u16::try_from(port).ok())
            .or(self.default_port)
    }
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Deserialize)]
pub struct KindConfig {
    #[serde(default)]
    pub kinds: IndexMap<String, KindDef>,
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<KindConfig> = OnceLock::new();

/// Get the kind registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static KindConfig {
    REGISTRY.get_or_init(|| {
        let mut final_config = KindConfig {
            kinds: IndexMap::new(),
        };

        for content in KIND_FILES {
            let partial: KindConfig = serde_json::from_str(content)
                .unwrap_or_else(|e| panic!("Failed to parse embedded kind JSON: {}", e));
            final_config.kinds.extend(partial.kinds);
        }

        final_config
    })
}

/// Get a kind definition
pub fn get_kind(kind: ResourceKind) -> Option<&'static KindDef> {
    get_registry().kinds.get(kind.as_str())
}
