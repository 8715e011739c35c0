//! State file structures for persisting infrastructure state

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use kiln_core::resource::{ResourceId, State, Value};

/// The main state file structure that persists to the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State file format version
    pub version: u32,
    /// Monotonically increasing number for each state modification
    pub serial: u64,
    /// Unique identifier for this state lineage (prevents accidental overwrites)
    pub lineage: String,
    /// Version of kiln that last modified this state
    pub kiln_version: String,
    /// All managed resources, in the order they were created
    pub resources: Vec<ResourceState>,
}

impl StateFile {
    /// Current state file format version
    pub const CURRENT_VERSION: u32 = 1;

    /// Create a new empty state file
    pub fn new() -> Self {
        Self::with_lineage(uuid::Uuid::new_v4().to_string())
    }

    /// Create a new state file with a specific lineage
    pub fn with_lineage(lineage: String) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage,
            kiln_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: Vec::new(),
        }
    }

    /// Increment serial and update kiln version for a new state write
    pub fn increment_serial(&mut self) {
        self.serial += 1;
        self.kiln_version = env!("CARGO_PKG_VERSION").to_string();
    }

    /// Find a resource by type and name
    pub fn find_resource(&self, resource_type: &str, name: &str) -> Option<&ResourceState> {
        self.resources
            .iter()
            .find(|r| r.resource_type == resource_type && r.name == name)
    }

    /// Find a resource mutably by type and name
    pub fn find_resource_mut(
        &mut self,
        resource_type: &str,
        name: &str,
    ) -> Option<&mut ResourceState> {
        self.resources
            .iter_mut()
            .find(|r| r.resource_type == resource_type && r.name == name)
    }

    /// Add or update a resource in the state
    pub fn upsert_resource(&mut self, resource: ResourceState) {
        if let Some(existing) = self.find_resource_mut(&resource.resource_type, &resource.name) {
            *existing = resource;
        } else {
            self.resources.push(resource);
        }
    }

    /// Remove a resource from the state
    pub fn remove_resource(&mut self, resource_type: &str, name: &str) -> Option<ResourceState> {
        let pos = self
            .resources
            .iter()
            .position(|r| r.resource_type == resource_type && r.name == name)?;
        Some(self.resources.remove(pos))
    }

    /// Record a handle the moment it is assigned, before the resource is
    /// known to be usable. The entry stays tainted until a full state
    /// replaces it.
    pub fn record_handle(&mut self, id: &ResourceId, provider: &str, identifier: &str) {
        let mut resource = ResourceState::new(&id.resource_type, &id.name, provider)
            .with_identifier(identifier)
            .with_tainted(true);
        if let Some(existing) = self.find_resource(&id.resource_type, &id.name)
            && existing.identifier.as_deref() == Some(identifier)
        {
            resource.attributes = existing.attributes.clone();
        }
        self.upsert_resource(resource);
    }

    /// Resource IDs of tainted entries
    pub fn tainted(&self) -> Vec<ResourceId> {
        self.resources
            .iter()
            .filter(|r| r.tainted)
            .map(ResourceState::id)
            .collect()
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a single managed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource type (e.g., "image_recipe")
    pub resource_type: String,
    /// Resource name from the configuration
    pub name: String,
    /// Provider name (e.g., "imagebuilder")
    pub provider: String,
    /// Remote handle (ARN)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// All attributes of the resource as JSON values
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    /// Created, but never confirmed usable; replaced on the next apply
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tainted: bool,
}

impl ResourceState {
    /// Create a new resource state
    pub fn new(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            provider: provider.into(),
            identifier: None,
            attributes: HashMap::new(),
            tainted: false,
        }
    }

    /// Capture a provider state
    pub fn from_state(state: &State, provider: impl Into<String>) -> Self {
        let mut resource = Self::new(&state.id.resource_type, &state.id.name, provider);
        resource.identifier = state.identifier.clone();
        resource.attributes = state
            .attributes
            .iter()
            .filter_map(|(k, v)| v.to_json().map(|json| (k.clone(), json)))
            .collect();
        resource
    }

    /// Set an attribute value
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_tainted(mut self, tainted: bool) -> Self {
        self.tainted = tainted;
        self
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.resource_type, &self.name)
    }

    /// Convert back into a provider state
    pub fn to_state(&self) -> State {
        let attributes: HashMap<String, Value> = self
            .attributes
            .iter()
            .filter_map(|(k, v)| Value::from_json(v).map(|value| (k.clone(), value)))
            .collect();
        let state = State::existing(self.id(), attributes);
        match &self.identifier {
            Some(identifier) => state.with_identifier(identifier),
            None => state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARN: &str = "arn:aws:imagebuilder:us-east-1:123456789012:image/web/1.0.0/1";

    #[test]
    fn test_state_file_new() {
        let state = StateFile::new();
        assert_eq!(state.version, StateFile::CURRENT_VERSION);
        assert_eq!(state.serial, 0);
        assert!(!state.lineage.is_empty());
        assert!(state.resources.is_empty());
    }

    #[test]
    fn test_state_file_increment_serial() {
        let mut state = StateFile::new();
        state.increment_serial();
        state.increment_serial();
        assert_eq!(state.serial, 2);
    }

    #[test]
    fn test_state_file_upsert_and_remove() {
        let mut state = StateFile::new();
        state.upsert_resource(
            ResourceState::new("image_recipe", "web", "imagebuilder")
                .with_attribute("version", serde_json::json!("1.0.0")),
        );
        state.upsert_resource(
            ResourceState::new("image_recipe", "web", "imagebuilder")
                .with_attribute("version", serde_json::json!("1.0.1")),
        );
        assert_eq!(state.resources.len(), 1);
        assert_eq!(
            state.resources[0].attributes.get("version"),
            Some(&serde_json::json!("1.0.1"))
        );

        assert!(state.remove_resource("image_recipe", "web").is_some());
        assert!(state.remove_resource("image_recipe", "web").is_none());
    }

    #[test]
    fn test_record_handle_marks_tainted() {
        let mut state = StateFile::new();
        let id = ResourceId::new("image", "web");
        state.record_handle(&id, "imagebuilder", ARN);

        let entry = state.find_resource("image", "web").unwrap();
        assert!(entry.tainted);
        assert_eq!(entry.identifier.as_deref(), Some(ARN));
        assert_eq!(state.tainted(), vec![id.clone()]);

        let full = State::existing(id, HashMap::new()).with_identifier(ARN);
        state.upsert_resource(ResourceState::from_state(&full, "imagebuilder"));
        assert!(state.tainted().is_empty());
    }

    #[test]
    fn test_state_round_trip_through_provider_state() {
        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), Value::String("web".to_string()));
        attributes.insert("image_tests_enabled".to_string(), Value::Bool(true));
        let state = State::existing(ResourceId::new("image", "web"), attributes).with_identifier(ARN);

        let saved = ResourceState::from_state(&state, "imagebuilder");
        assert_eq!(saved.to_state(), state);
    }

    #[test]
    fn test_state_file_serialization() {
        let mut state = StateFile::new();
        state.upsert_resource(
            ResourceState::new("component", "base", "imagebuilder").with_identifier("arn:c"),
        );

        let json = serde_json::to_string_pretty(&state).unwrap();
        assert!(!json.contains("tainted"));
        let deserialized: StateFile = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.lineage, state.lineage);
        assert_eq!(deserialized.resources, state.resources);
    }
}
