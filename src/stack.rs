//! Stack
//!
//! In-memory collection of declared descriptors, grants and outputs, and the
//! build state machine around them:
//!
//! ```text
//! Declaring -> Resolving -> Validated -> Emitting -> Emitted
//!                        \-> Rejected
//! ```
//!
//! Any failure moves the stack to `Rejected`, which is terminal and keeps the
//! first error. Nothing can be declared once resolution has started.

use crate::context::Context;
use crate::emit::{self, logical_id, Manifest};
use crate::error::{Result, StackError};
use crate::resolver::{self, EmissionPlan, ResolveInput, ResolveWarning};
use crate::resource::{
    schema, AccessGrant, Properties, PropertyValue, ResourceDescriptor, ResourceKind,
};
use indexmap::IndexMap;

/// Build phase of a stack
#[derive(Debug, Clone, PartialEq)]
pub enum StackPhase {
    Declaring,
    Resolving,
    Validated,
    Emitting,
    Emitted,
    Rejected(StackError),
}

impl StackPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Declaring => "declaring",
            Self::Resolving => "resolving",
            Self::Validated => "validated",
            Self::Emitting => "emitting",
            Self::Emitted => "emitted",
            Self::Rejected(_) => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Emitted | Self::Rejected(_))
    }
}

/// Value surfaced to the operator once the stack is deployed
#[derive(Debug, Clone, PartialEq)]
pub struct StackOutput {
    pub value: PropertyValue,
    pub description: Option<String>,
}

/// Result of a full build
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub plan: EmissionPlan,
    pub manifest: Manifest,
    pub warnings: Vec<ResolveWarning>,
}

/// A deployment description under construction
#[derive(Debug, Clone)]
pub struct Stack {
    name: String,
    description: Option<String>,
    descriptors: IndexMap<String, ResourceDescriptor>,
    grants: Vec<AccessGrant>,
    outputs: IndexMap<String, StackOutput>,
    /// Set once resolution succeeds; emission only ever uses this plan
    plan: Option<EmissionPlan>,
    phase: StackPhase,
}

impl Stack {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            descriptors: IndexMap::new(),
            grants: Vec::new(),
            outputs: IndexMap::new(),
            plan: None,
            phase: StackPhase::Declaring,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> &StackPhase {
        &self.phase
    }

    pub fn get(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.descriptors.get(name)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.descriptors.values()
    }

    pub fn grants(&self) -> &[AccessGrant] {
        &self.grants
    }

    fn sealed(&self, expected: &'static str) -> StackError {
        StackError::Sealed {
            stack: self.name.clone(),
            phase: self.phase.as_str(),
            expected,
        }
    }

    fn ensure_declaring(&self) -> Result<()> {
        match self.phase {
            StackPhase::Declaring => Ok(()),
            _ => Err(self.sealed("declaring")),
        }
    }

    /// Record a failure; only the first one is kept
    fn reject(&mut self, err: StackError) -> StackError {
        if !matches!(self.phase, StackPhase::Rejected(_)) {
            tracing::error!("Stack '{}' rejected: {}", self.name, err);
            self.phase = StackPhase::Rejected(err.clone());
        }
        err
    }

    /// Declare a resource.
    ///
    /// Properties are checked against the kind's schema. References inside
    /// them are only checked when the stack is resolved, so they may point at
    /// descriptors declared later.
    pub fn declare(
        &mut self,
        kind: ResourceKind,
        name: &str,
        properties: Properties,
    ) -> Result<ResourceDescriptor> {
        self.ensure_declaring()?;

        if self.descriptors.contains_key(name) {
            return Err(self.reject(StackError::DuplicateName {
                name: name.to_string(),
            }));
        }
        if let Err(err) = schema::validate_name(name, kind)
            .and_then(|_| schema::validate_properties(name, kind, &properties))
        {
            return Err(self.reject(err));
        }

        let descriptor = ResourceDescriptor {
            name: name.to_string(),
            kind,
            properties,
        };
        tracing::debug!("Declared {} '{}'", kind, name);
        self.descriptors.insert(name.to_string(), descriptor.clone());
        Ok(descriptor)
    }

    /// Allow `source` to reach `target` on the target's service port
    pub fn grant(&mut self, source: &ResourceDescriptor, target: &ResourceDescriptor) -> Result<()> {
        self.add_grant(AccessGrant::new(&source.name, &target.name))
    }

    /// Allow `source` to reach `target` on a specific port
    pub fn grant_on_port(
        &mut self,
        source: &ResourceDescriptor,
        target: &ResourceDescriptor,
        port: u16,
    ) -> Result<()> {
        self.add_grant(AccessGrant::new(&source.name, &target.name).on_port(port))
    }

    /// Add an access grant between descriptors named in it.
    ///
    /// Endpoints are checked when the stack is resolved.
    pub fn add_grant(&mut self, grant: AccessGrant) -> Result<()> {
        self.ensure_declaring()?;
        tracing::debug!("Declared grant {} -> {}", grant.source, grant.target);
        self.grants.push(grant);
        Ok(())
    }

    /// Declare a stack output.
    ///
    /// Names must be unique once mapped to engine identifiers, so `endpoint`
    /// and `Endpoint` cannot both be declared.
    pub fn output(
        &mut self,
        name: &str,
        value: impl Into<PropertyValue>,
        description: Option<&str>,
    ) -> Result<()> {
        self.ensure_declaring()?;

        if self.outputs.contains_key(name) {
            return Err(self.reject(StackError::DuplicateName {
                name: name.to_string(),
            }));
        }
        let valid = name
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic())
            .unwrap_or(false)
            && name.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid {
            return Err(self.reject(StackError::validation(
                &[name],
                "output names must be alphanumeric and start with a letter",
            )));
        }
        let id = logical_id(name);
        let existing = self
            .outputs
            .keys()
            .find(|other| logical_id(other) == id)
            .cloned();
        if let Some(existing) = existing {
            return Err(self.reject(StackError::validation(
                &[existing.as_str(), name],
                format!("both outputs map to engine identifier '{}'", id),
            )));
        }

        self.outputs.insert(
            name.to_string(),
            StackOutput {
                value: value.into(),
                description: description.map(String::from),
            },
        );
        Ok(())
    }

    /// Resolve the declared graph into an emission plan.
    ///
    /// The plan is kept on the stack for [`Self::emit`].
    pub fn resolve(&mut self) -> Result<&EmissionPlan> {
        match &self.phase {
            StackPhase::Declaring => {}
            StackPhase::Rejected(err) => return Err(err.clone()),
            _ => return Err(self.sealed("declaring")),
        }

        self.phase = StackPhase::Resolving;
        let result = resolver::resolve(ResolveInput {
            stack_name: &self.name,
            description: self.description.as_deref(),
            descriptors: &self.descriptors,
            grants: &self.grants,
            outputs: &self.outputs,
        });

        match result {
            Ok(plan) => {
                self.phase = StackPhase::Validated;
                Ok(self.plan.insert(plan))
            }
            Err(err) => Err(self.reject(err)),
        }
    }

    /// Emit the manifest for the plan this stack resolved
    pub fn emit(&mut self, context: &Context) -> Result<Manifest> {
        if self.phase != StackPhase::Validated {
            return Err(self.sealed("validated"));
        }
        let Some(plan) = self.plan.as_ref() else {
            return Err(self.sealed("validated"));
        };

        self.phase = StackPhase::Emitting;
        let manifest = emit::emit(plan, context);
        self.phase = StackPhase::Emitted;
        Ok(manifest)
    }

    /// Resolve and emit in one go. The stack is consumed.
    pub fn synthesize(mut self, context: &Context) -> Result<Synthesis> {
        self.resolve()?;
        let manifest = self.emit(context)?;
        let plan = self.plan.take().ok_or_else(|| self.sealed("validated"))?;
        let warnings = plan.warnings.clone();
        Ok(Synthesis {
            plan,
            manifest,
            warnings,
        })
    }
}
