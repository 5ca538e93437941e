//! Manifest emission
//!
//! Walks a resolved [`EmissionPlan`] and produces the provisioning engine's
//! template: one resource block per descriptor, one ingress rule per access
//! grant, and the stack outputs. Emission is pure: the same plan and context
//! always produce the same manifest.

mod format;

pub use format::OutputFormat;

use crate::context::Context;
use crate::resolver::{EmissionPlan, ResolvedGrant};
use crate::resource::{get_kind, PropertyDef, PropertyValue, Properties, Reference, SELF_REF};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Template format version understood by the engine
pub const FORMAT_VERSION: &str = "2010-09-09";

/// Engine type of the rule implementing an access grant
pub const INGRESS_TYPE: &str = "AWS::EC2::SecurityGroupIngress";

/// Output attribute every connectable kind exposes for its security group
const SECURITY_GROUP_ATTR: &str = "securityGroupId";

/// Deployment manifest in the engine's template format
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Metadata")]
    pub metadata: Value,
    #[serde(rename = "Resources")]
    pub resources: IndexMap<String, ResourceBlock>,
    #[serde(rename = "Outputs", skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, OutputBlock>,
}

/// One engine resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceBlock {
    #[serde(rename = "Type")]
    pub resource_type: String,
    #[serde(rename = "Properties")]
    pub properties: Map<String, Value>,
    #[serde(rename = "DependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// One value surfaced to the operator after deployment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputBlock {
    #[serde(rename = "Value")]
    pub value: Value,
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Manifest {
    /// Block emitted for a declared descriptor name
    pub fn resource(&self, name: &str) -> Option<&ResourceBlock> {
        self.resources.get(&logical_id(name))
    }

    /// Whether any block has the given engine type
    pub fn has_resource_type(&self, resource_type: &str) -> bool {
        self.resources
            .values()
            .any(|block| block.resource_type == resource_type)
    }
}

/// Engine identifier for a descriptor name: separators dropped, the next
/// letter and the first letter upper-cased (`custom-certificate` becomes
/// `CustomCertificate`).
pub fn logical_id(name: &str) -> String {
    let mut id = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if c == '-' || c == '_' {
            upper = true;
            continue;
        }
        if upper {
            id.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            id.push(c);
        }
    }
    id
}

fn pascal_case(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Engine syntax for a reference: `Ref` for the resource's own identifier,
/// `Fn::GetAtt` for anything else
pub fn reference_value(reference: &Reference) -> Value {
    let id = logical_id(reference.target());
    let engine_attr = get_kind(reference.kind())
        .and_then(|def| def.outputs.get(reference.attribute()))
        .map(String::as_str)
        .unwrap_or(reference.attribute());

    if engine_attr == SELF_REF {
        json!({ "Ref": id })
    } else {
        json!({ "Fn::GetAtt": [id, engine_attr] })
    }
}

fn convert_value(value: &PropertyValue, def: Option<&PropertyDef>) -> Value {
    match value {
        PropertyValue::Str(s) => Value::String(s.clone()),
        PropertyValue::Int(i) => Value::from(*i),
        PropertyValue::Bool(b) => Value::Bool(*b),
        PropertyValue::Ref(reference) => reference_value(reference),
        PropertyValue::List(items) => {
            let item_def = def.and_then(|d| d.items.as_deref());
            Value::Array(items.iter().map(|item| convert_value(item, item_def)).collect())
        }
        PropertyValue::Map(map) => match def {
            // Free-form maps keep their keys (environment names, secret names)
            Some(d) if d.values.is_some() => {
                let value_def = d.values.as_deref();
                Value::Object(
                    map.iter()
                        .map(|(key, item)| (key.clone(), convert_value(item, value_def)))
                        .collect(),
                )
            }
            Some(d) => Value::Object(convert_map(map, d.fields.as_ref())),
            None => Value::Object(convert_map(map, None)),
        },
    }
}

fn convert_map(map: &Properties, fields: Option<&IndexMap<String, PropertyDef>>) -> Map<String, Value> {
    map.iter()
        .map(|(key, value)| {
            let def = fields.and_then(|f| f.get(key));
            (pascal_case(key), convert_value(value, def))
        })
        .collect()
}

fn security_group(name: &str, plan: &EmissionPlan) -> Value {
    match plan.order.iter().find(|d| d.name == name) {
        Some(descriptor) => reference_value(&descriptor.attr(SECURITY_GROUP_ATTR)),
        None => json!({ "Fn::GetAtt": [logical_id(name), "SecurityGroupId"] }),
    }
}

fn ingress_block(grant: &ResolvedGrant, plan: &EmissionPlan) -> ResourceBlock {
    let mut properties = Map::new();
    properties.insert("GroupId".into(), security_group(&grant.target, plan));
    properties.insert(
        "SourceSecurityGroupId".into(),
        security_group(&grant.source, plan),
    );
    properties.insert("IpProtocol".into(), json!(grant.protocol.as_str()));
    properties.insert("FromPort".into(), json!(grant.port));
    properties.insert("ToPort".into(), json!(grant.port));
    let description = if grant.synthesized {
        format!("Allow {} to reach {} (implicit)", grant.source, grant.target)
    } else {
        format!("Allow {} to reach {}", grant.source, grant.target)
    };
    properties.insert("Description".into(), json!(description));

    ResourceBlock {
        resource_type: INGRESS_TYPE.to_string(),
        properties,
        depends_on: Vec::new(),
    }
}

/// Emit the manifest for a resolved plan
pub fn emit(plan: &EmissionPlan, context: &Context) -> Manifest {
    tracing::info!(
        "Emitting stack '{}' ({} resources)",
        plan.stack_name,
        plan.order.len()
    );

    let mut resources = IndexMap::new();
    for descriptor in &plan.order {
        let def = get_kind(descriptor.kind);

        let resource_type = def
            .map(|d| d.engine_type_for(&descriptor.properties).to_string())
            .unwrap_or_else(|| format!("Custom::{}", descriptor.kind));

        // The discriminator already chose the engine type
        let discriminator = def
            .and_then(|d| d.engine_type_by.as_ref())
            .map(|selector| selector.property.as_str());
        let fields = def.map(|d| &d.properties);
        let properties = descriptor
            .properties
            .iter()
            .filter(|(key, _)| Some(key.as_str()) != discriminator)
            .map(|(key, value)| {
                let prop_def = fields.and_then(|f| f.get(key));
                (pascal_case(key), convert_value(value, prop_def))
            })
            .collect();

        let depends_on = plan
            .dependencies_of(&descriptor.name)
            .iter()
            .map(|dep| logical_id(dep))
            .collect();

        tracing::debug!("{} -> {}", descriptor.name, resource_type);
        resources.insert(
            logical_id(&descriptor.name),
            ResourceBlock {
                resource_type,
                properties,
                depends_on,
            },
        );
    }

    for grant in &plan.grants {
        resources.insert(grant.logical_id(), ingress_block(grant, plan));
    }

    let outputs = plan
        .outputs
        .iter()
        .map(|(name, output)| {
            (
                logical_id(name),
                OutputBlock {
                    value: convert_value(&output.value, None),
                    description: output.description.clone(),
                },
            )
        })
        .collect();

    let context_values: Map<String, Value> = context
        .keys()
        .filter_map(|key| context.get(key).map(|value| (key.to_string(), value.clone())))
        .collect();

    Manifest {
        format_version: FORMAT_VERSION.to_string(),
        description: plan
            .description
            .clone()
            .unwrap_or_else(|| format!("{} deployment stack", plan.stack_name)),
        metadata: json!({
            "stackplan": {
                "stack": plan.stack_name,
                "context": context_values,
            }
        }),
        resources,
        outputs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;

    #[test]
    fn test_logical_id() {
        assert_eq!(logical_id("custom-certificate"), "CustomCertificate");
        assert_eq!(logical_id("cloudFrontWafAcl"), "CloudFrontWafAcl");
        assert_eq!(logical_id("route53_zone"), "Route53Zone");
        assert_eq!(logical_id("Vpc"), "Vpc");
    }

    #[test]
    fn test_reference_syntax() {
        let id_ref = Reference::new(ResourceKind::FileSystem, "EfsFileSystem", "fileSystemId");
        assert_eq!(reference_value(&id_ref), json!({ "Ref": "EfsFileSystem" }));

        let attr_ref = Reference::new(ResourceKind::DatabaseCluster, "Database", "host");
        assert_eq!(
            reference_value(&attr_ref),
            json!({ "Fn::GetAtt": ["Database", "Endpoint.Address"] })
        );
    }

    #[test]
    fn test_free_form_map_keys_preserved() {
        let def = get_kind(ResourceKind::ComputeService).unwrap();
        let env = Properties::new().with("log_level", "info");
        let value = convert_value(&PropertyValue::Map(env), def.properties.get("environment"));
        assert_eq!(value, json!({ "log_level": "info" }));
    }

    #[test]
    fn test_schema_map_keys_pascal_cased() {
        let def = get_kind(ResourceKind::ComputeService).unwrap();
        let image = Properties::new().with("source", "asset").with("location", "docker");
        let value = convert_value(&PropertyValue::Map(image), def.properties.get("image"));
        assert_eq!(value, json!({ "Source": "asset", "Location": "docker" }));
    }
}
