//! Backend implementations for state storage

mod local;

pub use local::LocalBackend;

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};

/// Create a backend from configuration
///
/// Dispatches to the backend implementation named by `backend_type`.
pub async fn create_backend(config: &BackendConfig) -> BackendResult<Box<dyn StateBackend>> {
    match config.backend_type.as_str() {
        "local" => {
            let backend = LocalBackend::from_config(config)?;
            backend.init().await?;
            Ok(Box::new(backend))
        }
        other => Err(BackendError::unsupported_backend(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_unsupported_backend() {
        let config = BackendConfig {
            backend_type: "s3".to_string(),
            attributes: HashMap::new(),
        };

        let result = create_backend(&config).await;
        match result {
            Err(BackendError::UnsupportedBackend(name)) => assert_eq!(name, "s3"),
            _ => panic!("Expected UnsupportedBackend error"),
        }
    }

    #[tokio::test]
    async fn test_local_backend_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let mut attributes = HashMap::new();
        attributes.insert(
            "path".to_string(),
            serde_json::json!(dir.path().join("kiln.state.json")),
        );
        let config = BackendConfig {
            backend_type: "local".to_string(),
            attributes,
        };

        let backend = create_backend(&config).await.unwrap();
        assert!(backend.read_state().await.unwrap().is_none());
    }
}
