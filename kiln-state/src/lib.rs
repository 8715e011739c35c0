//! Kiln State Management
//!
//! Persists the handles and attributes of managed resources between runs,
//! with locking so two applies never race on the same state.
//!
//! - **StateFile**: all managed resources, in creation order
//! - **StateBackend**: storage trait (currently a local JSON file)
//! - **LockInfo**: who holds the state lock and until when
//!
//! A handle is recorded as soon as the remote API assigns it, marked
//! tainted. If the apply is interrupted while the resource is still
//! provisioning, the next apply still knows about it and replaces it.
//!
//! # Example
//!
//! ```ignore
//! use kiln_state::{create_backend, BackendConfig};
//!
//! let backend = create_backend(&BackendConfig::default()).await?;
//! let lock = backend.acquire_lock("apply").await?;
//! let mut state = backend.read_state().await?.unwrap_or_default();
//! // ... apply changes ...
//! state.increment_serial();
//! backend.write_state(&state).await?;
//! backend.release_lock(&lock).await?;
//! ```

pub mod backend;
pub mod backends;
pub mod lock;
pub mod state;

// Re-export main types for convenience
pub use backend::{BackendConfig, BackendError, BackendResult, StateBackend};
pub use backends::{LocalBackend, create_backend};
pub use lock::LockInfo;
pub use state::{ResourceState, StateFile};
