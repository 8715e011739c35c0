//! Interpreter - Execute Effects using a Provider
//!
//! The Interpreter executes one Effect of a Plan at a time against a
//! Provider. This is where side effects actually occur; the caller decides
//! what to do with each outcome before running the next Effect.

use log::{debug, info};

use crate::effect::Effect;
use crate::provider::{HandleRecorder, Provider, ProviderError, ProviderResult};
use crate::resource::{ResourceId, State};

/// Result of executing each Effect
#[derive(Debug)]
pub enum EffectOutcome {
    /// Read succeeded
    Read { state: State },
    /// Create succeeded
    Created { state: State },
    /// Update succeeded
    Updated { state: State },
    /// Delete succeeded
    Deleted { id: ResourceId },
}

/// Interpreter that executes Effects using a Provider
pub struct Interpreter<P: Provider> {
    provider: P,
}

impl<P: Provider> Interpreter<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Execute a single Effect
    pub async fn execute(
        &self,
        effect: &Effect,
        recorder: &dyn HandleRecorder,
    ) -> ProviderResult<EffectOutcome> {
        debug!("Executing {} {}", effect.kind(), effect.resource_id());

        let outcome = match effect {
            Effect::Read { resource } => {
                let state = self.provider.read_data_source(resource).await?;
                EffectOutcome::Read { state }
            }
            Effect::Create(resource) => {
                let state = self.provider.create(resource, recorder).await?;
                EffectOutcome::Created { state }
            }
            Effect::Update { id, from, to, .. } => {
                let identifier = from.identifier.as_deref().ok_or_else(|| {
                    ProviderError::new("Cannot update a resource without a recorded handle")
                        .for_resource(id.clone())
                })?;
                let state = self.provider.update(id, identifier, from, to).await?;
                EffectOutcome::Updated { state }
            }
            Effect::Delete { id, identifier } => {
                self.provider.delete(id, identifier).await?;
                EffectOutcome::Deleted { id: id.clone() }
            }
        };

        info!("{} {}: done", effect.kind(), effect.resource_id());
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{BoxFuture, NoopRecorder, ResourceType};
    use crate::resource::Resource;
    use std::sync::Mutex;

    #[derive(Default)]
    struct TestProvider {
        deleted: Mutex<Vec<String>>,
    }

    impl Provider for TestProvider {
        fn name(&self) -> &'static str {
            "test"
        }

        fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
            vec![]
        }

        fn read(
            &self,
            id: &ResourceId,
            _identifier: Option<&str>,
        ) -> BoxFuture<'_, ProviderResult<State>> {
            let id = id.clone();
            Box::pin(async move { Ok(State::not_found(id)) })
        }

        fn read_data_source(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
            let state = State::existing(resource.id.clone(), resource.attributes.clone());
            Box::pin(async move { Ok(state) })
        }

        fn create<'a>(
            &'a self,
            resource: &Resource,
            recorder: &'a dyn HandleRecorder,
        ) -> BoxFuture<'a, ProviderResult<State>> {
            let id = resource.id.clone();
            let attributes = resource.attributes.clone();
            Box::pin(async move {
                recorder.record(&id, "test-id").await?;
                if id.name == "broken" {
                    return Err(ProviderError::new("resource entered status FAILED")
                        .with_kind(crate::provider::ErrorKind::TerminalFailure)
                        .for_resource(id)
                        .with_identifier("test-id"));
                }
                Ok(State::existing(id, attributes).with_identifier("test-id"))
            })
        }

        fn update(
            &self,
            id: &ResourceId,
            _identifier: &str,
            _from: &State,
            to: &Resource,
        ) -> BoxFuture<'_, ProviderResult<State>> {
            let state = State::existing(id.clone(), to.attributes.clone());
            Box::pin(async move { Ok(state) })
        }

        fn delete(&self, _id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
            let identifier = identifier.to_string();
            Box::pin(async move {
                self.deleted.lock().unwrap().push(identifier);
                Ok(())
            })
        }

        fn list(&self, _resource_type: &str) -> BoxFuture<'_, ProviderResult<Vec<State>>> {
            Box::pin(async { Ok(vec![]) })
        }
    }

    #[tokio::test]
    async fn create_effect_returns_created_state() {
        let interpreter = Interpreter::new(TestProvider::default());
        let effect = Effect::Create(Resource::new("image_recipe", "web"));

        match interpreter.execute(&effect, &NoopRecorder).await {
            Ok(EffectOutcome::Created { state }) => {
                assert_eq!(state.identifier.as_deref(), Some("test-id"))
            }
            other => panic!("Expected Created, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn read_effect_reads_data_source() {
        let interpreter = Interpreter::new(TestProvider::default());
        let effect = Effect::Read {
            resource: Resource::new("component", "base").with_read_only(true),
        };

        let outcome = interpreter.execute(&effect, &NoopRecorder).await.unwrap();
        assert!(matches!(outcome, EffectOutcome::Read { state } if state.exists));
    }

    #[tokio::test]
    async fn delete_uses_recorded_handle() {
        let interpreter = Interpreter::new(TestProvider::default());
        let effect = Effect::Delete {
            id: ResourceId::new("image", "web"),
            identifier: "arn:web".to_string(),
        };

        let outcome = interpreter.execute(&effect, &NoopRecorder).await.unwrap();
        assert!(matches!(outcome, EffectOutcome::Deleted { .. }));
        assert_eq!(
            *interpreter.provider().deleted.lock().unwrap(),
            vec!["arn:web".to_string()]
        );
    }

    #[tokio::test]
    async fn failed_create_keeps_handle() {
        let interpreter = Interpreter::new(TestProvider::default());
        let effect = Effect::Create(Resource::new("image", "broken"));

        let err = interpreter
            .execute(&effect, &NoopRecorder)
            .await
            .unwrap_err();
        assert_eq!(err.identifier.as_deref(), Some("test-id"));
    }

    #[tokio::test]
    async fn update_without_handle_fails() {
        let interpreter = Interpreter::new(TestProvider::default());
        let id = ResourceId::new("image_recipe", "web");
        let effect = Effect::Update {
            id: id.clone(),
            from: State::existing(id.clone(), Default::default()),
            to: Resource::new("image_recipe", "web"),
            changed_attributes: vec!["description".to_string()],
        };

        assert!(interpreter.execute(&effect, &NoopRecorder).await.is_err());
    }
}
