//! Property validation against kind schemas

use super::descriptor::{Properties, PropertyValue, ResourceKind};
use super::registry::{get_kind, PropertyDef, ValueType};
use crate::error::{Result, StackError};
use indexmap::{IndexMap, IndexSet};

/// Check that a descriptor name can be used as an engine identifier
pub fn validate_name(name: &str, kind: ResourceKind) -> Result<()> {
    let starts_with_letter = name
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic())
        .unwrap_or(false);
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if starts_with_letter && valid_chars {
        Ok(())
    } else {
        Err(StackError::SchemaViolation {
            name: name.to_string(),
            kind,
            cause: "names must start with a letter and contain only letters, digits, '-' and '_'"
                .to_string(),
        })
    }
}

/// Validate properties against the schema of `kind`
pub fn validate_properties(name: &str, kind: ResourceKind, properties: &Properties) -> Result<()> {
    let violation = |cause: String| StackError::SchemaViolation {
        name: name.to_string(),
        kind,
        cause,
    };

    let def = get_kind(kind).ok_or_else(|| violation("no schema registered".to_string()))?;

    check_fields(&def.properties, properties, "").map_err(violation)?;

    if let Some(key) = def.port_property.as_deref() {
        if let Some(port) = properties.get(key).and_then(PropertyValue::as_int) {
            if !(1..=i64::from(u16::MAX)).contains(&port) {
                return Err(violation(format!(
                    "property '{}' must be a port between 1 and {}, got {}",
                    key,
                    u16::MAX,
                    port
                )));
            }
        }
    }

    if kind == ResourceKind::ComputeService {
        check_mount_points(properties).map_err(violation)?;
    }

    Ok(())
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn check_fields(
    defs: &IndexMap<String, PropertyDef>,
    properties: &Properties,
    prefix: &str,
) -> std::result::Result<(), String> {
    for (key, def) in defs {
        if def.required && !properties.contains_key(key) {
            return Err(format!(
                "missing required property '{}'",
                join_path(prefix, key)
            ));
        }
    }

    for (key, value) in properties.iter() {
        let path = join_path(prefix, key);
        let Some(def) = defs.get(key) else {
            return Err(format!("unknown property '{}'", path));
        };
        check_value(def, value, &path)?;
    }

    Ok(())
}

fn check_value(def: &PropertyDef, value: &PropertyValue, path: &str) -> std::result::Result<(), String> {
    let mismatch = || {
        format!(
            "property '{}' expects {}, got {}",
            path,
            def.value_type.as_str(),
            value.type_name()
        )
    };

    match (def.value_type, value) {
        (ValueType::Any, _) => {}
        (ValueType::String, PropertyValue::Str(_))
        | (ValueType::Integer, PropertyValue::Int(_))
        | (ValueType::Boolean, PropertyValue::Bool(_)) => {}
        (ValueType::String, PropertyValue::Ref(_)) => {
            if !def.allowed.is_empty() {
                return Err(format!(
                    "property '{}' must be one of [{}], not a reference",
                    path,
                    def.allowed.join(", ")
                ));
            }
        }
        (ValueType::Reference, PropertyValue::Ref(reference)) => {
            if let Some(expected) = def.target_kind {
                if reference.kind() != expected {
                    return Err(format!(
                        "property '{}' must reference a {}, got {} '{}'",
                        path,
                        expected,
                        reference.kind(),
                        reference.target()
                    ));
                }
            }
        }
        (ValueType::List, PropertyValue::List(items)) => {
            if let Some(item_def) = &def.items {
                for (idx, item) in items.iter().enumerate() {
                    check_value(item_def, item, &format!("{}[{}]", path, idx))?;
                }
            }
        }
        (ValueType::Map, PropertyValue::Map(map)) => {
            if let Some(fields) = &def.fields {
                check_fields(fields, map, path)?;
            } else if let Some(value_def) = &def.values {
                for (key, item) in map.iter() {
                    check_value(value_def, item, &join_path(path, key))?;
                }
            }
        }
        _ => return Err(mismatch()),
    }

    if !def.allowed.is_empty() {
        let literal = match value {
            PropertyValue::Str(s) => Some(s.clone()),
            PropertyValue::Int(i) => Some(i.to_string()),
            _ => None,
        };
        if let Some(literal) = literal {
            if !def.allowed.contains(&literal) {
                return Err(format!(
                    "property '{}' has value '{}', expected one of [{}]",
                    path,
                    literal,
                    def.allowed.join(", ")
                ));
            }
        }
    }

    Ok(())
}

/// Every mount point must name a volume declared on the same service
fn check_mount_points(properties: &Properties) -> std::result::Result<(), String> {
    let mut volumes = IndexSet::new();
    for volume in properties
        .get("volumes")
        .and_then(PropertyValue::as_list)
        .unwrap_or_default()
    {
        let Some(name) = volume
            .as_map()
            .and_then(|v| v.get("name"))
            .and_then(PropertyValue::as_str)
        else {
            continue;
        };
        if !volumes.insert(name) {
            return Err(format!("volume '{}' is declared twice", name));
        }
    }

    for (idx, mount) in properties
        .get("mountPoints")
        .and_then(PropertyValue::as_list)
        .unwrap_or_default()
        .iter()
        .enumerate()
    {
        let source = mount
            .as_map()
            .and_then(|m| m.get("sourceVolume"))
            .and_then(PropertyValue::as_str);
        if let Some(source) = source {
            if !volumes.contains(source) {
                return Err(format!(
                    "mountPoints[{}] uses volume '{}' which is not declared in volumes",
                    idx, source
                ));
            }
        }
    }

    Ok(())
}
