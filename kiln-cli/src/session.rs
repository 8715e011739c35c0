//! State session: backend, lock and the in-memory state file
//!
//! Every change is written through to the backend immediately, including
//! handles recorded while a resource is still provisioning.

use std::collections::HashMap;

use log::{debug, info, warn};
use tokio::sync::Mutex;

use kiln_core::provider::{BoxFuture, HandleRecorder, Provider, ProviderError, ProviderResult};
use kiln_core::resource::{ResourceId, State, Value};
use kiln_state::{
    BackendConfig, BackendResult, LockInfo, ResourceState, StateBackend, StateFile,
    create_backend,
};

/// Attributes the remote API may not return and that refresh keeps from
/// saved state. Tags are always reported, so a missing tag map is drift.
const REFRESH_SKIP: &[&str] = &["tags"];

pub struct Session {
    backend: Box<dyn StateBackend>,
    lock: Option<LockInfo>,
    provider_name: &'static str,
    state: Mutex<StateFile>,
}

impl Session {
    /// Open the backend; `operation` takes the state lock for that operation
    pub async fn open(
        config: &BackendConfig,
        provider_name: &'static str,
        operation: Option<&str>,
    ) -> BackendResult<Self> {
        let backend = create_backend(config).await?;
        Self::with_backend(backend, provider_name, operation).await
    }

    pub async fn with_backend(
        backend: Box<dyn StateBackend>,
        provider_name: &'static str,
        operation: Option<&str>,
    ) -> BackendResult<Self> {
        let lock = match operation {
            Some(operation) => Some(backend.acquire_lock(operation).await?),
            None => None,
        };
        let state = match backend.read_state().await {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                if let Some(lock) = &lock
                    && let Err(release) = backend.release_lock(lock).await
                {
                    warn!("Failed to release lock {}: {}", lock.id, release);
                }
                return Err(e);
            }
        };
        Ok(Self {
            backend,
            lock,
            provider_name,
            state: Mutex::new(state),
        })
    }

    /// Snapshot of the current state file
    pub async fn state(&self) -> StateFile {
        self.state.lock().await.clone()
    }

    /// Modify the state and write it to the backend. The in-memory state
    /// only changes once the write succeeds.
    pub async fn update(&self, f: impl FnOnce(&mut StateFile) + Send) -> BackendResult<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        f(&mut next);
        next.increment_serial();
        self.backend.write_state(&next).await?;
        *state = next;
        Ok(())
    }

    /// Store a provider state, keeping attributes the remote API does not
    /// report (e.g. component `data`) from `known`
    pub async fn save(&self, state: &State, known: &HashMap<String, Value>) -> BackendResult<()> {
        let mut state = state.clone();
        merge_missing(&mut state, known);
        let entry = ResourceState::from_state(&state, self.provider_name);
        self.update(move |file| file.upsert_resource(entry)).await
    }

    pub async fn forget(&self, id: &ResourceId) -> BackendResult<()> {
        self.update(|file| {
            file.remove_resource(&id.resource_type, &id.name);
        })
        .await
    }

    /// Read every resource in state from the provider.
    ///
    /// Returns the refreshed states in state order; resources that no longer
    /// exist are dropped. With `persist` the state file is rewritten.
    pub async fn refresh(&self, provider: &dyn Provider, persist: bool) -> ProviderResult<Vec<State>> {
        let saved = self.state().await;
        let mut refreshed = Vec::new();
        let mut entries = Vec::new();

        for entry in &saved.resources {
            let id = entry.id();
            let mut state = provider.read(&id, entry.identifier.as_deref()).await?;
            if !state.exists {
                info!("{} no longer exists; dropping it from state", id);
                continue;
            }
            merge_missing(&mut state, &entry.to_state().attributes);
            debug!("Refreshed {}", id);
            entries.push(
                ResourceState::from_state(&state, entry.provider.clone()).with_tainted(entry.tainted),
            );
            refreshed.push(state);
        }

        if persist {
            self.update(move |file| file.resources = entries)
                .await
                .map_err(|e| ProviderError::new(format!("Failed to write state: {}", e)))?;
        }
        Ok(refreshed)
    }

    /// Release the lock, if held
    pub async fn close(self) -> BackendResult<()> {
        match &self.lock {
            Some(lock) => self.backend.release_lock(lock).await,
            None => Ok(()),
        }
    }
}

fn merge_missing(state: &mut State, known: &HashMap<String, Value>) {
    for (key, value) in known {
        if REFRESH_SKIP.contains(&key.as_str()) || value.has_refs() {
            continue;
        }
        state
            .attributes
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
}

impl HandleRecorder for Session {
    fn record<'a>(
        &'a self,
        id: &'a ResourceId,
        identifier: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        let provider_name = self.provider_name;
        Box::pin(async move {
            self.update(|file| file.record_handle(id, provider_name, identifier))
                .await
                .map_err(|e| ProviderError::new(format!("Failed to record handle in state: {}", e)))
        })
    }
}
