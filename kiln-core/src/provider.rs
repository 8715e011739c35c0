//! Provider - Trait abstracting resource operations
//!
//! A Provider defines the Create/Read/Update/Delete operations for one family
//! of remote resources. It is responsible for converting Effects into actual
//! API calls, including waiting for asynchronously provisioned resources.

use std::future::Future;
use std::pin::Pin;

use crate::resource::{Resource, ResourceId, State};
use crate::schema::ResourceSchema;

/// Classification of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The creation request failed before a handle was obtained
    Submission,
    /// The remote API no longer knows the handle
    NotFound,
    /// The resource reached a failure status while being polled
    TerminalFailure,
    /// The resource did not reach a terminal status before the deadline
    Timeout,
    /// The operation was cancelled by the caller
    Cancelled,
    /// The desired configuration is invalid
    Validation,
    /// Any other remote API failure
    Api,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Submission => "submission failed",
            ErrorKind::NotFound => "not found",
            ErrorKind::TerminalFailure => "failed",
            ErrorKind::Timeout => "timed out",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Validation => "invalid configuration",
            ErrorKind::Api => "api error",
        };
        write!(f, "{}", s)
    }
}

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    pub resource_id: Option<ResourceId>,
    /// Remote handle, when one was obtained before the failure
    pub identifier: Option<String>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref id) = self.resource_id {
            write!(f, "[{}.{}] ", id.resource_type, id.name)?;
        }
        if let Some(ref identifier) = self.identifier {
            write!(f, "({}) ", identifier)?;
        }
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Api,
            message: message.into(),
            resource_id: None,
            identifier: None,
            cause: None,
        }
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn submission(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Submission)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Validation)
    }

    pub fn for_resource(mut self, id: ResourceId) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Whether re-invoking with a fresh deadline may succeed.
    ///
    /// Only timeouts qualify: the remote resource keeps provisioning after the
    /// poll gives up.
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Definition of resource types that a Provider can handle
pub trait ResourceType: Send + Sync {
    /// Resource type name (e.g., "image_recipe")
    fn name(&self) -> &'static str;

    /// Attribute schema for this resource type
    fn schema(&self) -> ResourceSchema;
}

/// Receives a resource's handle as soon as the remote API assigns it
///
/// Create calls this before polling begins so that a timeout while waiting
/// does not orphan the remote resource from the caller's bookkeeping.
pub trait HandleRecorder: Send + Sync {
    fn record<'a>(
        &'a self,
        id: &'a ResourceId,
        identifier: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>>;
}

/// Recorder that discards handles
pub struct NoopRecorder;

impl HandleRecorder for NoopRecorder {
    fn record<'a>(
        &'a self,
        _id: &'a ResourceId,
        _identifier: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Main Provider trait
///
/// All operations are async and involve side effects.
pub trait Provider: Send + Sync {
    /// Name of this Provider (e.g., "imagebuilder")
    fn name(&self) -> &'static str;

    /// List of resource types this Provider can handle
    fn resource_types(&self) -> Vec<Box<dyn ResourceType>>;

    /// Fill provider-level defaults (e.g. default tags) into a desired
    /// resource before it is compared with current state
    fn prepare(&self, resource: &Resource) -> Resource {
        resource.clone()
    }

    /// Get the current state of a resource
    ///
    /// Returns `State::not_found()` if the resource does not exist, so callers
    /// can drop stale state without treating it as a failure.
    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>>;

    /// Read a data source from its configured lookup attributes
    fn read_data_source(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>>;

    /// Create a resource
    ///
    /// Returns State with identifier set to the remote handle.
    fn create<'a>(
        &'a self,
        resource: &Resource,
        recorder: &'a dyn HandleRecorder,
    ) -> BoxFuture<'a, ProviderResult<State>>;

    /// Update a resource
    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>>;

    /// Delete a resource
    ///
    /// Deleting a resource that no longer exists succeeds.
    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>>;

    /// List all remote resources of a type
    fn list(&self, resource_type: &str) -> BoxFuture<'_, ProviderResult<Vec<State>>>;
}

/// Provider implementation for Box<dyn Provider>
/// This enables dynamic dispatch for Providers
impl Provider for Box<dyn Provider> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        (**self).resource_types()
    }

    fn prepare(&self, resource: &Resource) -> Resource {
        (**self).prepare(resource)
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).read(id, identifier)
    }

    fn read_data_source(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).read_data_source(resource)
    }

    fn create<'a>(
        &'a self,
        resource: &Resource,
        recorder: &'a dyn HandleRecorder,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        (**self).create(resource, recorder)
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).update(id, identifier, from, to)
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        (**self).delete(id, identifier)
    }

    fn list(&self, resource_type: &str) -> BoxFuture<'_, ProviderResult<Vec<State>>> {
        (**self).list(resource_type)
    }
}
