//! Kiln Core
//!
//! Core library for declarative provisioning of asynchronously built cloud
//! resources: resource model, provider trait, status poller, and planning.

pub mod differ;
pub mod effect;
pub mod interpreter;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod retry;
pub mod schema;
pub mod tags;
pub mod waiter;
