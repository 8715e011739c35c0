//! API client boundary
//!
//! The lifecycle handler talks to Image Builder only through
//! [`ImageBuilderApi`], so tests can substitute a scripted client. Desired
//! state and snapshots are CloudFormation-shaped JSON documents.

use async_trait::async_trait;
use kiln_core::tags::TagDiff;
use serde::Serialize;

use crate::resources::ResourceKind;

/// Errors returned by an API client
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The handle does not name an existing resource
    #[error("resource not found")]
    NotFound,

    /// The service rejected the request
    #[error("{code}: {message}")]
    Service { code: String, message: String },

    /// An accepted request later failed
    #[error("operation failed ({code}): {message}")]
    OperationFailed { code: String, message: String },

    /// An accepted request did not finish in time
    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("operation cancelled")]
    Cancelled,

    /// The request never reached the service or the response was lost
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A creation request was accepted and named its resource, but did not
    /// settle; the resource may still come into existence
    #[error("{source} (resource {identifier})")]
    Unsettled {
        identifier: String,
        source: Box<ApiError>,
    },
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound)
    }

    /// Message suitable for a one-line report
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Remote resource as returned by a list call
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSummary {
    /// Resource handle (ARN)
    pub identifier: String,
    pub properties: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
}

/// One RFC 6902 patch operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl PatchOperation {
    pub fn add(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn replace(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value: Some(value),
        }
    }
}

/// Operations the lifecycle handler needs from Image Builder
#[async_trait]
pub trait ImageBuilderApi: Send + Sync {
    /// Submit a creation request and return the new resource's handle.
    ///
    /// `client_token` makes resubmission of the same request idempotent. A
    /// request that names its resource but times out or is cancelled before
    /// settling fails with [`ApiError::Unsettled`].
    async fn create(
        &self,
        kind: ResourceKind,
        desired: serde_json::Value,
        client_token: &str,
    ) -> Result<String, ApiError>;

    /// Fetch a fresh snapshot; `Ok(None)` means the handle names nothing
    async fn get(
        &self,
        kind: ResourceKind,
        handle: &str,
    ) -> Result<Option<serde_json::Value>, ApiError>;

    /// Apply a patch to mutable properties
    async fn update(
        &self,
        kind: ResourceKind,
        handle: &str,
        patch: Vec<PatchOperation>,
    ) -> Result<(), ApiError>;

    /// Delete; an absent resource yields `ApiError::NotFound`
    async fn delete(&self, kind: ResourceKind, handle: &str) -> Result<(), ApiError>;

    /// List every resource of a kind owned by the account
    async fn list(&self, kind: ResourceKind) -> Result<Vec<ResourceSummary>, ApiError>;

    /// Add and remove tags in one reconciliation
    async fn update_tags(&self, handle: &str, diff: &TagDiff) -> Result<(), ApiError>;
}
