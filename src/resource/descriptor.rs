//! Resource descriptors
//!
//! Plain data describing one declared resource, the typed references
//! between resources, and the access grants connecting them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a declared resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Network,
    DatabaseCluster,
    FileSystem,
    ComputeService,
    ContentDelivery,
    AccessPolicy,
    DnsRecord,
    Certificate,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        Self::Network,
        Self::DatabaseCluster,
        Self::FileSystem,
        Self::ComputeService,
        Self::ContentDelivery,
        Self::AccessPolicy,
        Self::DnsRecord,
        Self::Certificate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "Network",
            Self::DatabaseCluster => "DatabaseCluster",
            Self::FileSystem => "FileSystem",
            Self::ComputeService => "ComputeService",
            Self::ContentDelivery => "ContentDelivery",
            Self::AccessPolicy => "AccessPolicy",
            Self::DnsRecord => "DnsRecord",
            Self::Certificate => "Certificate",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed pointer to an output attribute of another descriptor.
///
/// A reference is never evaluated here. The resolver only checks that the
/// target exists and exposes the attribute; emission writes it out in the
/// engine's own reference syntax.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Reference {
    kind: ResourceKind,
    target: String,
    attribute: String,
}

impl Reference {
    pub fn new(kind: ResourceKind, target: &str, attribute: &str) -> Self {
        Self {
            kind,
            target: target.to_string(),
            attribute: attribute.to_string(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.attribute)
    }
}

/// Value of a descriptor property
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<PropertyValue>),
    Map(Properties),
    Ref(Reference),
}

impl PropertyValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Int(_) => "integer",
            Self::Bool(_) => "boolean",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Ref(_) => "reference",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[PropertyValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Properties> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    fn collect_references<'a>(&'a self, path: String, out: &mut Vec<(String, &'a Reference)>) {
        match self {
            Self::Ref(reference) => out.push((path, reference)),
            Self::List(items) => {
                for (idx, item) in items.iter().enumerate() {
                    item.collect_references(format!("{}[{}]", path, idx), out);
                }
            }
            Self::Map(map) => map.collect_references(&path, out),
            Self::Str(_) | Self::Int(_) | Self::Bool(_) => {}
        }
    }

    /// All references inside this value, with their property paths
    pub fn references(&self, path: &str) -> Vec<(String, &Reference)> {
        let mut out = Vec::new();
        self.collect_references(path.to_string(), &mut out);
        out
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&String> for PropertyValue {
    fn from(value: &String) -> Self {
        Self::Str(value.clone())
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u16> for PropertyValue {
    fn from(value: u16) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Reference> for PropertyValue {
    fn from(value: Reference) -> Self {
        Self::Ref(value)
    }
}

impl From<Properties> for PropertyValue {
    fn from(value: Properties) -> Self {
        Self::Map(value)
    }
}

impl<T: Into<PropertyValue>> From<Vec<T>> for PropertyValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// Ordered property map of a descriptor (or of a nested map value)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties(IndexMap<String, PropertyValue>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<PropertyValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }

    fn collect_references<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Reference)>) {
        for (key, value) in &self.0 {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            value.collect_references(path, out);
        }
    }

    /// All references in the map, depth first, with dotted property paths
    pub fn references(&self) -> Vec<(String, &Reference)> {
        let mut out = Vec::new();
        self.collect_references("", &mut out);
        out
    }
}

/// A declared, schema-checked resource
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    pub name: String,
    pub kind: ResourceKind,
    pub properties: Properties,
}

impl ResourceDescriptor {
    /// Reference one of this descriptor's output attributes.
    ///
    /// Whether the attribute exists is checked when the stack is resolved.
    pub fn attr(&self, attribute: &str) -> Reference {
        Reference::new(self.kind, &self.name, attribute)
    }

    /// Output attributes exposed by this descriptor's kind
    pub fn outputs(&self) -> Vec<&'static str> {
        super::get_kind(self.kind)
            .map(|def| def.outputs.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn exposes(&self, attribute: &str) -> bool {
        super::get_kind(self.kind)
            .map(|def| def.outputs.contains_key(attribute))
            .unwrap_or(false)
    }
}

/// Network protocol of an access grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permission for `source` to open connections to `target`.
///
/// Without an explicit port the target's service port is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub source: String,
    pub target: String,
    pub port: Option<u16>,
    pub protocol: Protocol,
}

impl AccessGrant {
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            port: None,
            protocol: Protocol::Tcp,
        }
    }

    pub fn on_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }
}
