//! In-memory provider for command tests

use std::collections::HashMap;
use std::sync::Mutex;

use kiln_core::provider::{
    BoxFuture, ErrorKind, HandleRecorder, Provider, ProviderError, ProviderResult, ResourceType,
};
use kiln_core::resource::{Resource, ResourceId, State, Value};

pub fn arn_for(id: &ResourceId) -> String {
    format!(
        "arn:aws:imagebuilder:us-east-1:123456789012:{}/{}",
        id.resource_type, id.name
    )
}

/// Remote objects keyed by ARN. Creates record their handle before
/// "provisioning", like the real lifecycle handler.
#[derive(Default)]
pub struct FakeProvider {
    remote: Mutex<HashMap<String, State>>,
    failing_type: Option<&'static str>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates of `resource_type` reach a terminal failure after recording
    pub fn failing(mut self, resource_type: &'static str) -> Self {
        self.failing_type = Some(resource_type);
        self
    }

    pub fn with_remote(self, state: State) -> Self {
        if let Some(identifier) = &state.identifier {
            self.remote
                .lock()
                .unwrap()
                .insert(identifier.clone(), state.clone());
        }
        self
    }

    pub fn exists(&self, identifier: &str) -> bool {
        self.remote.lock().unwrap().contains_key(identifier)
    }

    pub fn remote(&self, identifier: &str) -> Option<State> {
        self.remote.lock().unwrap().get(identifier).cloned()
    }

    fn store(&self, id: &ResourceId, identifier: &str, mut attributes: HashMap<String, Value>) -> State {
        attributes.insert("arn".to_string(), Value::String(identifier.to_string()));
        let state = State::existing(id.clone(), attributes).with_identifier(identifier);
        self.remote
            .lock()
            .unwrap()
            .insert(identifier.to_string(), state.clone());
        state
    }
}

impl Provider for FakeProvider {
    fn name(&self) -> &'static str {
        "imagebuilder"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        vec![]
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let state = match identifier.and_then(|i| self.remote(i)) {
            Some(remote) => State {
                id: id.clone(),
                ..remote
            },
            None => State::not_found(id.clone()),
        };
        Box::pin(async move { Ok(state) })
    }

    fn read_data_source(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let id = resource.id.clone();
        let name = resource.get_str("name").map(|s| s.to_string());
        let found = self
            .remote
            .lock()
            .unwrap()
            .values()
            .find(|s| s.attributes.get("name").and_then(Value::as_str) == name.as_deref())
            .cloned();
        Box::pin(async move {
            match found {
                Some(remote) => Ok(State { id, ..remote }),
                None => Err(ProviderError::new("No matching resource")
                    .with_kind(ErrorKind::NotFound)
                    .for_resource(id)),
            }
        })
    }

    fn create<'a>(
        &'a self,
        resource: &Resource,
        recorder: &'a dyn HandleRecorder,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move {
            let identifier = arn_for(&resource.id);
            recorder.record(&resource.id, &identifier).await?;
            if self.failing_type == Some(resource.id.resource_type.as_str()) {
                return Err(ProviderError::new("Resource reached FAILED")
                    .with_kind(ErrorKind::TerminalFailure)
                    .for_resource(resource.id.clone())
                    .with_identifier(identifier));
            }
            Ok(self.store(&resource.id, &identifier, resource.attributes.clone()))
        })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        _from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let state = self.store(id, identifier, to.attributes.clone());
        Box::pin(async move { Ok(state) })
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let removed = self.remote.lock().unwrap().remove(identifier);
        let id = id.clone();
        Box::pin(async move {
            match removed {
                Some(_) => Ok(()),
                None => Err(ProviderError::new("Resource not found")
                    .with_kind(ErrorKind::NotFound)
                    .for_resource(id)),
            }
        })
    }

    fn list(&self, resource_type: &str) -> BoxFuture<'_, ProviderResult<Vec<State>>> {
        let states = self
            .remote
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.id.resource_type == resource_type)
            .cloned()
            .collect();
        Box::pin(async move { Ok(states) })
    }
}
