//! Effect - Side effects represented as values
//!
//! An Effect describes one operation against a Provider. Building Effects
//! performs no I/O; the Interpreter executes them.

use crate::resource::{Resource, ResourceId, State};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Read a data source
    Read { resource: Resource },
    /// Create a resource
    Create(Resource),
    /// Update a resource in place
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Delete a resource by its remote handle
    Delete { id: ResourceId, identifier: String },
}

impl Effect {
    /// Returns whether this Effect mutates remote infrastructure
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Effect::Read { .. })
    }

    pub fn resource_id(&self) -> &ResourceId {
        match self {
            Effect::Read { resource } | Effect::Create(resource) => &resource.id,
            Effect::Update { id, .. } | Effect::Delete { id, .. } => id,
        }
    }

    /// Short verb used in plan output and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Effect::Read { .. } => "read",
            Effect::Create(_) => "create",
            Effect::Update { .. } => "update",
            Effect::Delete { .. } => "delete",
        }
    }
}
