//! Scripted ImageBuilderApi for tests

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kiln_core::tags::TagDiff;
use serde_json::json;

use crate::api::{ApiError, ImageBuilderApi, PatchOperation, ResourceSummary};
use crate::resources::ResourceKind;

pub const DEFAULT_HANDLE: &str = "arn:aws:imagebuilder:us-east-1:123456789012:image/web/1.0.0/1";

#[derive(Debug, Clone)]
pub enum Call {
    Create {
        kind: ResourceKind,
        desired: serde_json::Value,
        client_token: String,
    },
    Get {
        handle: String,
    },
    Update {
        handle: String,
        patch: Vec<PatchOperation>,
    },
    Delete {
        handle: String,
    },
    List {
        kind: ResourceKind,
    },
    UpdateTags {
        handle: String,
        diff: TagDiff,
    },
}

/// Image snapshot in the shape produced by the image client
pub fn image_snapshot(status: &str, reason: Option<&str>) -> serde_json::Value {
    let mut state = json!({"Status": status});
    if let Some(reason) = reason {
        state["Reason"] = json!(reason);
    }
    json!({
        "Arn": DEFAULT_HANDLE,
        "Name": "web",
        "Version": "1.0.0",
        "ImageRecipeArn": "arn:aws:imagebuilder:us-east-1:123456789012:image-recipe/web/1.0.0",
        "InfrastructureConfigurationArn":
            "arn:aws:imagebuilder:us-east-1:123456789012:infrastructure-configuration/build",
        "ImageId": "ami-0123456789abcdef0",
        "State": state,
    })
}

/// Replays scripted responses and records every call
#[derive(Default)]
pub struct MockApi {
    calls: Arc<Mutex<Vec<Call>>>,
    creates: Mutex<VecDeque<Result<String, ApiError>>>,
    snapshots: Mutex<VecDeque<Result<Option<serde_json::Value>, ApiError>>>,
    /// Repeated once the scripted snapshots run out
    last_snapshot: Mutex<Option<serde_json::Value>>,
    existing: Mutex<HashSet<String>>,
    delete_error: Mutex<Option<ApiError>>,
    summaries: Vec<ResourceSummary>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_create(self, result: Result<String, ApiError>) -> Self {
        self.creates.lock().unwrap().push_back(result);
        self
    }

    pub fn with_snapshots(
        self,
        snapshots: Vec<Result<Option<serde_json::Value>, ApiError>>,
    ) -> Self {
        self.snapshots.lock().unwrap().extend(snapshots);
        self
    }

    pub fn with_existing(self, handle: &str) -> Self {
        self.existing.lock().unwrap().insert(handle.to_string());
        self
    }

    pub fn with_delete_error(self, err: ApiError) -> Self {
        *self.delete_error.lock().unwrap() = Some(err);
        self
    }

    pub fn with_summaries(mut self, summaries: Vec<(&str, serde_json::Value)>) -> Self {
        self.summaries = summaries
            .into_iter()
            .map(|(identifier, properties)| ResourceSummary {
                identifier: identifier.to_string(),
                properties,
            })
            .collect();
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_handle(&self) -> Arc<Mutex<Vec<Call>>> {
        Arc::clone(&self.calls)
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ImageBuilderApi for MockApi {
    async fn create(
        &self,
        kind: ResourceKind,
        desired: serde_json::Value,
        client_token: &str,
    ) -> Result<String, ApiError> {
        self.record(Call::Create {
            kind,
            desired,
            client_token: client_token.to_string(),
        });
        let result = self
            .creates
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(DEFAULT_HANDLE.to_string()));
        if let Ok(handle) = &result {
            self.existing.lock().unwrap().insert(handle.clone());
        }
        result
    }

    async fn get(
        &self,
        _kind: ResourceKind,
        handle: &str,
    ) -> Result<Option<serde_json::Value>, ApiError> {
        self.record(Call::Get {
            handle: handle.to_string(),
        });
        match self.snapshots.lock().unwrap().pop_front() {
            Some(Ok(Some(snapshot))) => {
                *self.last_snapshot.lock().unwrap() = Some(snapshot.clone());
                Ok(Some(snapshot))
            }
            Some(other) => other,
            None => Ok(self.last_snapshot.lock().unwrap().clone()),
        }
    }

    async fn update(
        &self,
        _kind: ResourceKind,
        handle: &str,
        patch: Vec<PatchOperation>,
    ) -> Result<(), ApiError> {
        self.record(Call::Update {
            handle: handle.to_string(),
            patch,
        });
        Ok(())
    }

    async fn delete(&self, _kind: ResourceKind, handle: &str) -> Result<(), ApiError> {
        self.record(Call::Delete {
            handle: handle.to_string(),
        });
        if let Some(err) = self.delete_error.lock().unwrap().take() {
            return Err(err);
        }
        if self.existing.lock().unwrap().remove(handle) {
            Ok(())
        } else {
            Err(ApiError::NotFound)
        }
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<ResourceSummary>, ApiError> {
        self.record(Call::List { kind });
        Ok(self.summaries.clone())
    }

    async fn update_tags(&self, handle: &str, diff: &TagDiff) -> Result<(), ApiError> {
        self.record(Call::UpdateTags {
            handle: handle.to_string(),
            diff: diff.clone(),
        });
        Ok(())
    }
}
