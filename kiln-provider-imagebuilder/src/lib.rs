//! Kiln AWS EC2 Image Builder Provider
//!
//! ## Module Structure
//!
//! - `api` - Client boundary used by the lifecycle handler
//! - `client` - AWS SDK implementation of the client boundary
//! - `convert` - Attribute and API document conversion
//! - `provider` - ImageBuilderProvider lifecycle handler
//! - `resources` - Resource kind descriptor table
//! - `schemas` - Resource schemas

pub mod api;
pub mod client;
pub mod convert;
pub mod provider;
pub mod resources;
pub mod schemas;

#[cfg(test)]
mod testing;

// Re-export main types
pub use api::{ApiError, ImageBuilderApi};
pub use client::AwsImageBuilderApi;
pub use provider::{ImageBuilderProvider, ProviderConfig, ProviderSettings};
pub use resources::ResourceKind;

use kiln_core::provider::{BoxFuture, HandleRecorder, Provider, ProviderResult, ResourceType};
use kiln_core::resource::{Resource, ResourceId, State};

use resources::resource_types;

// =============================================================================
// Provider Trait Implementation
// =============================================================================

impl<A: ImageBuilderApi> Provider for ImageBuilderProvider<A> {
    fn name(&self) -> &'static str {
        "imagebuilder"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        resource_types()
    }

    fn prepare(&self, resource: &Resource) -> Resource {
        self.prepare_resource(resource)
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.map(|s| s.to_string());
        Box::pin(async move { self.read_resource(&id, identifier.as_deref()).await })
    }

    fn read_data_source(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.lookup_data_source(&resource).await })
    }

    fn create<'a>(
        &'a self,
        resource: &Resource,
        recorder: &'a dyn HandleRecorder,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.create_resource(&resource, recorder).await })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let from = from.clone();
        let to = to.clone();
        Box::pin(async move { self.update_resource(&id, &identifier, &from, &to).await })
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move { self.delete_resource(&id, &identifier).await })
    }

    fn list(&self, resource_type: &str) -> BoxFuture<'_, ProviderResult<Vec<State>>> {
        let resource_type = resource_type.to_string();
        Box::pin(async move { self.list_resources(&resource_type).await })
    }
}
