//! Deployment Context
//!
//! Externally supplied configuration values (domain, hosted zone, IP allow
//! list). A context is loaded once before a build and passed explicitly into
//! every declaration; nothing reads it from ambient state.

use crate::error::{Result, StackError};
use anyhow::Context as _;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

pub const CUSTOM_DOMAIN: &str = "customDomain";
pub const CUSTOM_DOMAIN_ZONE_ID: &str = "customDomainZoneId";
pub const CUSTOM_DOMAIN_ZONE_NAME: &str = "customDomainZoneName";
pub const IP_ALLOW_LIST: &str = "ipAllowList";

/// Raw context values keyed by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    values: IndexMap<String, Value>,
}

/// Context file layout: either flat, or nested under `context` like cdk.json
#[derive(Deserialize)]
#[serde(untagged)]
enum ContextFile {
    Nested { context: IndexMap<String, Value> },
    Flat(IndexMap<String, Value>),
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Parse a context document
    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let file: ContextFile =
            serde_json::from_str(content).context("Context must be a JSON object")?;
        let values = match file {
            ContextFile::Nested { context } => context,
            ContextFile::Flat(values) => values,
        };
        Ok(Self { values })
    }

    /// Load a context file from disk
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read context file {}", path.display()))?;
        let context = Self::from_json(&content)
            .with_context(|| format!("Failed to parse context file {}", path.display()))?;
        tracing::info!(
            "Loaded {} context values from {}",
            context.values.len(),
            path.display()
        );
        Ok(context)
    }

    /// Apply a `key=value` override. The value is parsed as JSON when it can
    /// be, otherwise taken as a plain string.
    pub fn apply_override(&mut self, assignment: &str) -> anyhow::Result<()> {
        let (key, raw) = assignment
            .split_once('=')
            .with_context(|| format!("Context override '{}' is not key=value", assignment))?;
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("Context override '{}' has an empty key", assignment);
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        tracing::debug!("Context override: {}={}", key, value);
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    /// Required string value
    pub fn require_str(&self, key: &str) -> Result<&str> {
        match self.values.get(key) {
            None | Some(Value::Null) => Err(StackError::MissingContext {
                key: key.to_string(),
            }),
            Some(Value::String(s)) if s.trim().is_empty() => Err(StackError::MissingContext {
                key: key.to_string(),
            }),
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(StackError::InvalidContext {
                key: key.to_string(),
                cause: format!("expected a string, got {}", other),
            }),
        }
    }

    /// Optional list of strings. A comma-separated string is accepted too;
    /// a blank string counts as absent. An empty array is still a list.
    pub fn optional_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        let invalid = |cause: String| StackError::InvalidContext {
            key: key.to_string(),
            cause,
        };

        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(
                s.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(String::from)
                    .collect(),
            )),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(String::from)
                        .ok_or_else(|| invalid(format!("expected strings, got {}", item)))
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(other) => Err(invalid(format!("expected a list of strings, got {}", other))),
        }
    }
}

/// Typed view of the values the container-app topology needs.
///
/// Built before any descriptor is declared, so a missing key fails the build
/// before anything else happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentSettings {
    pub custom_domain: String,
    pub zone_id: String,
    pub zone_name: String,
    /// `None` when no allow list was supplied
    pub ip_allow_list: Option<Vec<String>>,
}

impl DeploymentSettings {
    pub fn from_context(context: &Context) -> Result<Self> {
        Ok(Self {
            custom_domain: context.require_str(CUSTOM_DOMAIN)?.to_string(),
            zone_id: context.require_str(CUSTOM_DOMAIN_ZONE_ID)?.to_string(),
            zone_name: context.require_str(CUSTOM_DOMAIN_ZONE_NAME)?.to_string(),
            ip_allow_list: context.optional_list(IP_ALLOW_LIST)?,
        })
    }

    /// Whether requests should be blocked unless explicitly allowed.
    /// An empty allow list blocks everything.
    pub fn restricts_by_ip(&self) -> bool {
        self.ip_allow_list.is_some()
    }
}
