//! AWS implementation of [`ImageBuilderApi`]
//!
//! Images are created, read and deleted through the Image Builder API, whose
//! `GetImage` exposes the build state the lifecycle handler polls. All other
//! kinds, and updates and listing of every kind, go through the Cloud
//! Control API, waiting here for each Cloud Control request to settle.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::{Region, SdkConfig};
use aws_sdk_cloudcontrol::Client as CloudControlClient;
use aws_sdk_cloudcontrol::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudcontrol::types::{HandlerErrorCode, ProgressEvent};
use aws_sdk_imagebuilder::Client as ImageBuilderClient;
use aws_sdk_imagebuilder::types::{Image, ImageTestsConfiguration};
use kiln_core::tags::TagDiff;
use kiln_core::waiter::{Observed, WaitConfig, WaitError, Waiter};
use log::{debug, warn};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::{ApiError, ImageBuilderApi, PatchOperation, ResourceSummary};
use crate::resources::{OPERATION_STATUS, ResourceKind, descriptor};

const NOT_FOUND_CODE: &str = "ResourceNotFoundException";

/// Image Builder client backed by the AWS SDK
pub struct AwsImageBuilderApi {
    cloudcontrol: CloudControlClient,
    imagebuilder: ImageBuilderClient,
    operation_wait: WaitConfig,
    cancel: CancellationToken,
}

impl AwsImageBuilderApi {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            cloudcontrol: CloudControlClient::new(config),
            imagebuilder: ImageBuilderClient::new(config),
            operation_wait: WaitConfig::new(Duration::from_secs(10 * 60))
                .with_fixed_interval(Duration::from_secs(5)),
            cancel: CancellationToken::new(),
        }
    }

    /// Load credentials and region from the environment; `region` overrides
    /// the environment's region
    pub async fn from_env(region: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        Self::new(&loader.load().await)
    }

    /// Abort Cloud Control request waits when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    // =========================================================================
    // Cloud Control API Methods
    // =========================================================================

    async fn cc_create(
        &self,
        kind: ResourceKind,
        desired: serde_json::Value,
        client_token: &str,
    ) -> Result<String, ApiError> {
        let result = self
            .cloudcontrol
            .create_resource()
            .type_name(descriptor(kind).type_name)
            .desired_state(desired.to_string())
            .client_token(client_token)
            .send()
            .await
            .map_err(sdk_error)?;

        let request_token = result
            .progress_event()
            .and_then(|p| p.request_token())
            .ok_or_else(|| ApiError::InvalidResponse("no request token returned".to_string()))?;
        let submitted = result
            .progress_event()
            .and_then(|p| p.identifier())
            .map(str::to_string);

        match self.wait_for_operation(request_token).await {
            Ok(progress) => progress
                .identifier()
                .map(str::to_string)
                .or(submitted)
                .ok_or_else(|| ApiError::InvalidResponse("no identifier returned".to_string())),
            Err(e @ (ApiError::Timeout(_) | ApiError::Cancelled)) => {
                let identifier = match submitted {
                    Some(identifier) => Some(identifier),
                    None => self.request_identifier(request_token).await,
                };
                match identifier {
                    Some(identifier) => Err(ApiError::Unsettled {
                        identifier,
                        source: Box::new(e),
                    }),
                    None => {
                        warn!(
                            "Create request {} did not settle and named no resource",
                            request_token
                        );
                        Err(e)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Identifier reported so far by a Cloud Control request, if any
    async fn request_identifier(&self, request_token: &str) -> Option<String> {
        let status = self
            .cloudcontrol
            .get_resource_request_status()
            .request_token(request_token)
            .send()
            .await
            .ok()?;
        status
            .progress_event()
            .and_then(|p| p.identifier())
            .map(str::to_string)
    }

    async fn cc_get(
        &self,
        kind: ResourceKind,
        identifier: &str,
    ) -> Result<Option<serde_json::Value>, ApiError> {
        let result = self
            .cloudcontrol
            .get_resource()
            .type_name(descriptor(kind).type_name)
            .identifier(identifier)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                return match sdk_error(e) {
                    ApiError::NotFound => Ok(None),
                    other => Err(other),
                };
            }
        };

        match response.resource_description().and_then(|d| d.properties()) {
            Some(props) => serde_json::from_str(props)
                .map(Some)
                .map_err(|e| ApiError::InvalidResponse(format!("resource properties: {}", e))),
            None => Ok(None),
        }
    }

    /// Wait for a Cloud Control request to settle
    async fn wait_for_operation(&self, request_token: &str) -> Result<ProgressEvent, ApiError> {
        let waiter = Waiter::new(self.operation_wait.clone());
        let cloudcontrol = &self.cloudcontrol;
        let result = waiter
            .wait(&OPERATION_STATUS, &self.cancel, move || async move {
                cloudcontrol
                    .get_resource_request_status()
                    .request_token(request_token)
                    .send()
                    .await
                    .map(|status| status.progress_event().cloned().map(Progress))
                    .map_err(|e| DisplayErrorContext(e).to_string())
            })
            .await;

        match result {
            Ok(Progress(event)) => Ok(event),
            Err(WaitError::Failed {
                status, snapshot, ..
            }) => {
                let event = snapshot.0;
                let message = event
                    .status_message()
                    .unwrap_or("unknown error")
                    .to_string();
                match event.error_code() {
                    Some(HandlerErrorCode::NotFound) => Err(ApiError::NotFound),
                    Some(code) => Err(ApiError::OperationFailed {
                        code: code.as_str().to_string(),
                        message,
                    }),
                    None => Err(ApiError::OperationFailed {
                        code: status,
                        message,
                    }),
                }
            }
            Err(e @ WaitError::Timeout { .. }) => Err(ApiError::Timeout(e.to_string())),
            Err(WaitError::NotFound) => Err(ApiError::InvalidResponse(format!(
                "unknown request token {}",
                request_token
            ))),
            Err(WaitError::Cancelled) => Err(ApiError::Cancelled),
        }
    }

    // =========================================================================
    // Image Builder API Methods (images)
    // =========================================================================

    async fn create_image(
        &self,
        desired: &serde_json::Value,
        client_token: &str,
    ) -> Result<String, ApiError> {
        let str_field = |name: &str| desired.get(name).and_then(|v| v.as_str()).map(str::to_string);

        let tests = desired.get("ImageTestsConfiguration").map(|t| {
            ImageTestsConfiguration::builder()
                .set_image_tests_enabled(t.get("ImageTestsEnabled").and_then(|v| v.as_bool()))
                .set_timeout_minutes(
                    t.get("TimeoutMinutes")
                        .and_then(|v| v.as_i64())
                        .and_then(|v| i32::try_from(v).ok()),
                )
                .build()
        });

        let tags = desired.get("Tags").and_then(|t| t.as_object()).map(|t| {
            t.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect::<HashMap<_, _>>()
        });

        let result = self
            .imagebuilder
            .create_image()
            .set_image_recipe_arn(str_field("ImageRecipeArn"))
            .set_container_recipe_arn(str_field("ContainerRecipeArn"))
            .set_infrastructure_configuration_arn(str_field("InfrastructureConfigurationArn"))
            .set_distribution_configuration_arn(str_field("DistributionConfigurationArn"))
            .set_enhanced_image_metadata_enabled(
                desired
                    .get("EnhancedImageMetadataEnabled")
                    .and_then(|v| v.as_bool()),
            )
            .set_image_tests_configuration(tests)
            .set_tags(tags)
            .client_token(client_token)
            .send()
            .await
            .map_err(sdk_error)?;

        result
            .image_build_version_arn()
            .map(str::to_string)
            .ok_or_else(|| {
                ApiError::InvalidResponse("no image build version ARN returned".to_string())
            })
    }

    async fn get_image(&self, arn: &str) -> Result<Option<serde_json::Value>, ApiError> {
        let result = self
            .imagebuilder
            .get_image()
            .image_build_version_arn(arn)
            .send()
            .await;

        match result {
            Ok(response) => Ok(response.image().map(image_snapshot)),
            Err(e) => match sdk_error(e) {
                ApiError::NotFound => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn delete_image(&self, arn: &str) -> Result<(), ApiError> {
        self.imagebuilder
            .delete_image()
            .image_build_version_arn(arn)
            .send()
            .await
            .map(|_| ())
            .map_err(sdk_error)
    }
}

#[async_trait]
impl ImageBuilderApi for AwsImageBuilderApi {
    async fn create(
        &self,
        kind: ResourceKind,
        desired: serde_json::Value,
        client_token: &str,
    ) -> Result<String, ApiError> {
        debug!("Create {} request: {}", kind, desired);
        match kind {
            ResourceKind::Image => self.create_image(&desired, client_token).await,
            _ => self.cc_create(kind, desired, client_token).await,
        }
    }

    async fn get(
        &self,
        kind: ResourceKind,
        handle: &str,
    ) -> Result<Option<serde_json::Value>, ApiError> {
        match kind {
            ResourceKind::Image => self.get_image(handle).await,
            _ => self.cc_get(kind, handle).await,
        }
    }

    async fn update(
        &self,
        kind: ResourceKind,
        handle: &str,
        patch: Vec<PatchOperation>,
    ) -> Result<(), ApiError> {
        let patch_document = serde_json::to_string(&patch)
            .map_err(|e| ApiError::InvalidResponse(format!("patch document: {}", e)))?;
        debug!("Update {} request: {}", kind, patch_document);

        let result = self
            .cloudcontrol
            .update_resource()
            .type_name(descriptor(kind).type_name)
            .identifier(handle)
            .patch_document(patch_document)
            .client_token(Uuid::new_v4().to_string())
            .send()
            .await
            .map_err(sdk_error)?;

        if let Some(request_token) = result.progress_event().and_then(|p| p.request_token()) {
            self.wait_for_operation(request_token).await?;
        }
        Ok(())
    }

    async fn delete(&self, kind: ResourceKind, handle: &str) -> Result<(), ApiError> {
        if kind == ResourceKind::Image {
            return self.delete_image(handle).await;
        }

        let result = self
            .cloudcontrol
            .delete_resource()
            .type_name(descriptor(kind).type_name)
            .identifier(handle)
            .client_token(Uuid::new_v4().to_string())
            .send()
            .await
            .map_err(sdk_error)?;

        if let Some(request_token) = result.progress_event().and_then(|p| p.request_token()) {
            self.wait_for_operation(request_token).await?;
        }
        Ok(())
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<ResourceSummary>, ApiError> {
        let mut summaries = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .cloudcontrol
                .list_resources()
                .type_name(descriptor(kind).type_name)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(sdk_error)?;

            for desc in page.resource_descriptions() {
                let Some(identifier) = desc.identifier() else {
                    continue;
                };
                let properties = match desc.properties() {
                    Some(props) => serde_json::from_str(props).map_err(|e| {
                        ApiError::InvalidResponse(format!("resource properties: {}", e))
                    })?,
                    None => json!({}),
                };
                summaries.push(ResourceSummary {
                    identifier: identifier.to_string(),
                    properties,
                });
            }

            match page.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(summaries)
    }

    async fn update_tags(&self, handle: &str, diff: &TagDiff) -> Result<(), ApiError> {
        if !diff.remove.is_empty() {
            self.imagebuilder
                .untag_resource()
                .resource_arn(handle)
                .set_tag_keys(Some(diff.remove.clone()))
                .send()
                .await
                .map_err(sdk_error)?;
        }
        if !diff.set.is_empty() {
            self.imagebuilder
                .tag_resource()
                .resource_arn(handle)
                .set_tags(Some(diff.set.map().clone().into_iter().collect()))
                .send()
                .await
                .map_err(sdk_error)?;
        }
        Ok(())
    }
}

/// Cloud Control progress event as seen by the waiter
#[derive(Debug)]
struct Progress(ProgressEvent);

impl Observed for Progress {
    fn status(&self) -> Option<&str> {
        self.0.operation_status().map(|s| s.as_str())
    }

    fn failure_reason(&self) -> Option<&str> {
        self.0.status_message()
    }
}

/// Render an SDK image in the CloudFormation shape used by the schemas
fn image_snapshot(image: &Image) -> serde_json::Value {
    let mut doc = serde_json::Map::new();
    let mut put = |key: &str, value: Option<&str>| {
        if let Some(value) = value {
            doc.insert(key.to_string(), json!(value));
        }
    };

    put("Arn", image.arn());
    put("Name", image.name());
    put("Version", image.version());
    put("ImageRecipeArn", image.image_recipe().and_then(|r| r.arn()));
    put("ContainerRecipeArn", image.container_recipe().and_then(|r| r.arn()));
    put(
        "InfrastructureConfigurationArn",
        image.infrastructure_configuration().and_then(|c| c.arn()),
    );
    put(
        "DistributionConfigurationArn",
        image.distribution_configuration().and_then(|c| c.arn()),
    );
    put("Platform", image.platform().map(|p| p.as_str()));
    put("OsVersion", image.os_version());
    put("DateCreated", image.date_created());
    put(
        "ImageId",
        image
            .output_resources()
            .and_then(|o| o.amis().first())
            .and_then(|ami| ami.image()),
    );
    put(
        "ImageUri",
        image
            .output_resources()
            .and_then(|o| o.containers().first())
            .and_then(|c| c.image_uris().first())
            .map(String::as_str),
    );

    if let Some(enabled) = image.enhanced_image_metadata_enabled() {
        doc.insert("EnhancedImageMetadataEnabled".to_string(), json!(enabled));
    }

    if let Some(tests) = image.image_tests_configuration() {
        let mut t = serde_json::Map::new();
        if let Some(enabled) = tests.image_tests_enabled() {
            t.insert("ImageTestsEnabled".to_string(), json!(enabled));
        }
        if let Some(minutes) = tests.timeout_minutes() {
            t.insert("TimeoutMinutes".to_string(), json!(minutes));
        }
        doc.insert("ImageTestsConfiguration".to_string(), serde_json::Value::Object(t));
    }

    if let Some(state) = image.state() {
        let mut s = serde_json::Map::new();
        if let Some(status) = state.status() {
            s.insert("Status".to_string(), json!(status.as_str()));
        }
        if let Some(reason) = state.reason() {
            s.insert("Reason".to_string(), json!(reason));
        }
        doc.insert("State".to_string(), serde_json::Value::Object(s));
    }

    if let Some(tags) = image.tags() {
        doc.insert("Tags".to_string(), json!(tags));
    }

    serde_json::Value::Object(doc)
}

/// Map an SDK failure; a missing resource becomes `ApiError::NotFound`
fn sdk_error<E, R>(err: SdkError<E, R>) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::ServiceError(service) => {
            let e = service.err();
            let code = e.code().unwrap_or("Unknown");
            if code == NOT_FOUND_CODE {
                return ApiError::NotFound;
            }
            ApiError::Service {
                code: code.to_string(),
                message: e.message().unwrap_or_default().to_string(),
            }
        }
        _ => ApiError::Transport(DisplayErrorContext(&err).to_string()),
    }
}
