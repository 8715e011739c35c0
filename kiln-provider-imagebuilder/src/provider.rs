//! Image Builder lifecycle handler
//!
//! Drives Create -> Poll -> Read, Read, Update and Delete for every kind in
//! the descriptor table, on top of an injected [`ImageBuilderApi`].

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use kiln_core::provider::{ErrorKind, HandleRecorder, ProviderError, ProviderResult};
use kiln_core::resource::{Resource, ResourceId, State, Value};
use kiln_core::retry::{RetryPolicy, retry_with_backoff};
use kiln_core::schema::TypeError;
use kiln_core::tags::{IgnoreConfig, KeyValueTags};
use kiln_core::waiter::{Observed, WaitConfig, WaitError, Waiter};
use log::{debug, info};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::{ApiError, ImageBuilderApi};
use crate::convert::{self, TAGS};
use crate::resources::{ResourceDescriptor, ResourceKind, WaitSpec, descriptor_for};

/// Provider block of the project file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderSettings {
    pub region: Option<String>,
    pub default_tags: BTreeMap<String, String>,
    pub ignore_tags: IgnoreConfig,
    /// Per resource type, e.g. `{"image": {"create": "90m"}}`
    pub timeouts: HashMap<String, TimeoutSettings>,
    /// Initial poll interval, e.g. "10s"
    pub poll_interval: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutSettings {
    pub create: Option<String>,
}

/// Resolved provider configuration
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub region: Option<String>,
    /// Merged under every resource's own tags
    pub default_tags: KeyValueTags,
    pub ignore_tags: IgnoreConfig,
    pub create_timeouts: HashMap<ResourceKind, Duration>,
    pub poll_interval: Option<Duration>,
}

impl ProviderConfig {
    pub fn create_timeout(&self, kind: ResourceKind) -> Option<Duration> {
        self.create_timeouts.get(&kind).copied()
    }

    fn wait_config(&self, timeout: Duration) -> WaitConfig {
        let config = WaitConfig::new(timeout);
        match self.poll_interval {
            Some(interval) => {
                let max = config.max_interval.max(interval);
                config.with_poll_interval(interval).with_max_interval(max)
            }
            None => config,
        }
    }
}

impl TryFrom<ProviderSettings> for ProviderConfig {
    type Error = ProviderError;

    fn try_from(settings: ProviderSettings) -> Result<Self, Self::Error> {
        let mut create_timeouts = HashMap::new();
        for (resource_type, timeouts) in &settings.timeouts {
            let kind = ResourceKind::from_type_name(resource_type).ok_or_else(|| {
                ProviderError::validation(format!(
                    "Unknown resource type in timeouts: {}",
                    resource_type
                ))
            })?;
            if let Some(create) = &timeouts.create {
                create_timeouts.insert(kind, parse_duration("create timeout", create)?);
            }
        }

        let poll_interval = settings
            .poll_interval
            .as_deref()
            .map(|s| parse_duration("poll_interval", s))
            .transpose()?;

        Ok(Self {
            region: settings.region,
            default_tags: settings.default_tags.into_iter().collect(),
            ignore_tags: settings.ignore_tags,
            create_timeouts,
            poll_interval,
        })
    }
}

fn parse_duration(field: &str, value: &str) -> ProviderResult<Duration> {
    humantime::parse_duration(value).map_err(|e| {
        ProviderError::validation(format!("Invalid {} '{}': {}", field, value, e)).with_cause(e)
    })
}

/// Snapshot of an asynchronously provisioned resource
#[derive(Debug)]
struct Snapshot {
    doc: serde_json::Value,
    spec: &'static WaitSpec,
}

impl Observed for Snapshot {
    fn status(&self) -> Option<&str> {
        self.doc.pointer(self.spec.status_pointer)?.as_str()
    }

    fn failure_reason(&self) -> Option<&str> {
        self.doc.pointer(self.spec.reason_pointer)?.as_str()
    }
}

/// AWS EC2 Image Builder Provider
pub struct ImageBuilderProvider<A> {
    api: A,
    config: ProviderConfig,
    cancel: CancellationToken,
}

impl<A: ImageBuilderApi> ImageBuilderProvider<A> {
    pub fn new(api: A, config: ProviderConfig) -> Self {
        Self {
            api,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort in-progress waits when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn descriptor(&self, id: &ResourceId) -> ProviderResult<&'static ResourceDescriptor> {
        descriptor_for(&id.resource_type).ok_or_else(|| {
            ProviderError::validation(format!("Unknown resource type: {}", id.resource_type))
                .for_resource(id.clone())
        })
    }

    /// Resource tags over provider default tags, without reserved or ignored keys
    fn desired_tags(&self, resource: &Resource) -> KeyValueTags {
        KeyValueTags::from_value(resource.attributes.get(TAGS))
            .merge_onto(&self.config.default_tags)
            .ignore_system()
            .ignore(&self.config.ignore_tags)
    }

    /// Merge default tags into a desired resource
    pub fn prepare_resource(&self, resource: &Resource) -> Resource {
        let has_tags = descriptor_for(&resource.id.resource_type).is_some_and(|d| d.has_tags);
        if !has_tags || resource.is_data_source() || self.config.default_tags.is_empty() {
            return resource.clone();
        }
        let mut prepared = resource.clone();
        prepared
            .attributes
            .insert(TAGS.to_string(), self.desired_tags(resource).to_value());
        prepared
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Create a resource and wait until it is usable.
    ///
    /// The handle is passed to `recorder` before any polling, so a failed or
    /// timed-out wait never loses track of the remote resource.
    pub async fn create_resource(
        &self,
        resource: &Resource,
        recorder: &dyn HandleRecorder,
    ) -> ProviderResult<State> {
        let id = &resource.id;
        let desc = self.descriptor(id)?;
        let schema = (desc.schema)();
        schema
            .validate(&resource.attributes)
            .map_err(|errors| validation_failure(id, errors))?;

        let mut desired = convert::expand(resource, &schema)?;
        if desc.has_tags {
            let tags = self.desired_tags(resource);
            if !tags.is_empty() {
                desired.insert("Tags".to_string(), tags.to_json());
            }
        }

        info!("Creating {}", id);
        let handle = match self.submit(desc, serde_json::Value::Object(desired)).await {
            Ok(handle) => handle,
            Err(ApiError::Unsettled { identifier, source }) => {
                // Accepted but not settled: the remote resource may still appear
                recorder
                    .record(id, &identifier)
                    .await
                    .map_err(|e| e.for_resource(id.clone()).with_identifier(identifier.as_str()))?;
                return Err(api_failure("Resource creation did not complete", *source)
                    .for_resource(id.clone())
                    .with_identifier(identifier));
            }
            Err(e) => {
                return Err(
                    ProviderError::submission(format!("Failed to create resource: {}", e))
                        .for_resource(id.clone())
                        .with_cause(e),
                );
            }
        };
        info!("Created {} ({})", id, handle);

        recorder
            .record(id, &handle)
            .await
            .map_err(|e| e.for_resource(id.clone()).with_identifier(handle.as_str()))?;

        if let Some(wait) = &desc.wait {
            self.wait_until_available(desc.kind, wait, id, &handle)
                .await?;
        }

        let state = self.read_resource(id, Some(&handle)).await?;
        if !state.exists {
            return Err(ProviderError::new("Resource not found after creation")
                .with_kind(ErrorKind::NotFound)
                .for_resource(id.clone())
                .with_identifier(handle));
        }
        Ok(state)
    }

    async fn submit(
        &self,
        desc: &ResourceDescriptor,
        desired: serde_json::Value,
    ) -> Result<String, ApiError> {
        let kind = desc.kind;
        let api = &self.api;
        let desired = &desired;
        // One token per attempt; a repeated token replays the earlier outcome
        let attempt = move || {
            let client_token = Uuid::new_v4().to_string();
            let desired = desired.clone();
            async move { api.create(kind, desired, &client_token).await }
        };
        match &desc.create_retry {
            Some(retry) => {
                retry_with_backoff(&RetryPolicy::new(retry.timeout), retry.is_retryable, attempt)
                    .await
            }
            None => attempt().await,
        }
    }

    async fn wait_until_available(
        &self,
        kind: ResourceKind,
        wait: &'static WaitSpec,
        id: &ResourceId,
        handle: &str,
    ) -> ProviderResult<()> {
        let timeout = self
            .config
            .create_timeout(kind)
            .unwrap_or(wait.default_timeout);
        info!(
            "Waiting up to {} for {} to become available",
            humantime::format_duration(timeout),
            id
        );

        let waiter = Waiter::new(self.config.wait_config(timeout));
        let api = &self.api;
        let result = waiter
            .wait(&wait.table, &self.cancel, move || async move {
                match api.get(kind, handle).await {
                    Ok(doc) => Ok(doc.map(|doc| Snapshot { doc, spec: wait })),
                    Err(ApiError::NotFound) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await;

        result.map(|_| ()).map_err(|e| {
            let kind = match &e {
                WaitError::Failed { .. } => ErrorKind::TerminalFailure,
                WaitError::Timeout { .. } => ErrorKind::Timeout,
                WaitError::NotFound => ErrorKind::NotFound,
                WaitError::Cancelled => ErrorKind::Cancelled,
            };
            ProviderError::new(e.to_string())
                .with_kind(kind)
                .for_resource(id.clone())
                .with_identifier(handle)
                .with_cause(e)
        })
    }

    /// Read a resource by handle; an unknown handle yields `State::not_found`
    pub async fn read_resource(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> ProviderResult<State> {
        let desc = self.descriptor(id)?;

        let identifier = match identifier {
            Some(identifier) => identifier,
            None => return Ok(State::not_found(id.clone())),
        };

        let props = match self.api.get(desc.kind, identifier).await {
            Ok(Some(props)) => props,
            Ok(None) | Err(ApiError::NotFound) => {
                debug!("{} ({}) no longer exists", id, identifier);
                return Ok(State::not_found(id.clone()));
            }
            Err(e) => {
                return Err(api_failure("Failed to read resource", e)
                    .for_resource(id.clone())
                    .with_identifier(identifier));
            }
        };

        Ok(State::existing(id.clone(), self.flatten(desc, &props)).with_identifier(identifier))
    }

    fn flatten(
        &self,
        desc: &ResourceDescriptor,
        props: &serde_json::Value,
    ) -> HashMap<String, Value> {
        let mut attributes = convert::flatten(props, &(desc.schema)());
        attributes.remove(TAGS);
        if desc.has_tags {
            let tags = KeyValueTags::from_json(props.get("Tags"))
                .ignore_system()
                .ignore(&self.config.ignore_tags);
            if !tags.is_empty() {
                attributes.insert(TAGS.to_string(), tags.to_value());
            }
        }
        attributes
    }

    /// Read a data source by `arn`, or by matching its other lookup
    /// attributes (typically `name`) against listed resources
    pub async fn lookup_data_source(&self, resource: &Resource) -> ProviderResult<State> {
        let id = &resource.id;
        let desc = self.descriptor(id)?;
        (desc.schema)()
            .validate_lookup(&resource.attributes)
            .map_err(|errors| validation_failure(id, errors))?;

        if let Some(arn) = resource.get_str("arn") {
            let state = self.read_resource(id, Some(arn)).await?;
            if !state.exists {
                return Err(data_source_not_found(id).with_identifier(arn));
            }
            return Ok(state);
        }

        if resource.attributes.is_empty() {
            return Err(ProviderError::validation(
                "Data source needs an arn or attributes to match",
            )
            .for_resource(id.clone()));
        }

        let summaries = self.api.list(desc.kind).await.map_err(|e| {
            api_failure("Failed to list resources", e).for_resource(id.clone())
        })?;

        let mut found: Option<State> = None;
        for summary in summaries {
            let mut attributes = self.flatten(desc, &summary.properties);
            let lookup_known = resource
                .attributes
                .keys()
                .all(|k| attributes.contains_key(k));
            if !lookup_known {
                // List results may carry only the identifier
                match self.read_resource(id, Some(&summary.identifier)).await? {
                    state if state.exists => attributes = state.attributes,
                    _ => continue,
                }
            }
            let matches = resource
                .attributes
                .iter()
                .all(|(k, v)| attributes.get(k) == Some(v));
            if !matches {
                continue;
            }
            if found.is_some() {
                return Err(ProviderError::validation(
                    "Data source matches more than one resource; select it by arn",
                )
                .for_resource(id.clone()));
            }
            found = Some(
                State::existing(id.clone(), attributes).with_identifier(summary.identifier),
            );
        }

        found.ok_or_else(|| data_source_not_found(id))
    }

    /// Update mutable attributes, then reconcile tags with a single call
    pub async fn update_resource(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let desc = self.descriptor(id)?;
        let schema = (desc.schema)();
        schema
            .validate(&to.attributes)
            .map_err(|errors| validation_failure(id, errors))?;

        let patch = convert::patch_document(from, to, &schema)?;
        if !patch.is_empty() {
            info!("Updating {} ({} change(s))", id, patch.len());
            self.api
                .update(desc.kind, identifier, patch)
                .await
                .map_err(|e| {
                    api_failure("Failed to update resource", e)
                        .for_resource(id.clone())
                        .with_identifier(identifier)
                })?;
        }

        if desc.has_tags {
            let old = KeyValueTags::from_value(from.attributes.get(TAGS));
            let diff = old.diff(&self.desired_tags(to));
            if !diff.is_empty() {
                debug!(
                    "Updating tags of {}: set {:?}, remove {:?}",
                    id,
                    diff.set.keys(),
                    diff.remove
                );
                self.api
                    .update_tags(identifier, &diff)
                    .await
                    .map_err(|e| {
                        api_failure("Failed to update tags", e)
                            .for_resource(id.clone())
                            .with_identifier(identifier)
                    })?;
            }
        }

        let state = self.read_resource(id, Some(identifier)).await?;
        if !state.exists {
            return Err(ProviderError::new("Resource not found after update")
                .with_kind(ErrorKind::NotFound)
                .for_resource(id.clone())
                .with_identifier(identifier));
        }
        Ok(state)
    }

    /// Delete a resource; deleting an absent resource succeeds
    pub async fn delete_resource(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        let desc = self.descriptor(id)?;

        match self.api.delete(desc.kind, identifier).await {
            Ok(()) => {
                info!("Deleted {} ({})", id, identifier);
                Ok(())
            }
            Err(ApiError::NotFound) => {
                debug!("{} ({}) already deleted", id, identifier);
                Ok(())
            }
            Err(e) => Err(api_failure("Failed to delete resource", e)
                .for_resource(id.clone())
                .with_identifier(identifier)),
        }
    }

    /// List all remote resources of a type
    pub async fn list_resources(&self, resource_type: &str) -> ProviderResult<Vec<State>> {
        let desc = descriptor_for(resource_type).ok_or_else(|| {
            ProviderError::validation(format!("Unknown resource type: {}", resource_type))
        })?;

        let summaries = self
            .api
            .list(desc.kind)
            .await
            .map_err(|e| api_failure("Failed to list resources", e))?;

        Ok(summaries
            .into_iter()
            .map(|summary| {
                let attributes = self.flatten(desc, &summary.properties);
                let name = attributes
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or(&summary.identifier)
                    .to_string();
                State::existing(ResourceId::new(resource_type, name), attributes)
                    .with_identifier(summary.identifier)
            })
            .collect())
    }
}

fn api_failure(context: &str, err: ApiError) -> ProviderError {
    let kind = match &err {
        ApiError::NotFound => ErrorKind::NotFound,
        ApiError::Timeout(_) => ErrorKind::Timeout,
        ApiError::Cancelled => ErrorKind::Cancelled,
        _ => ErrorKind::Api,
    };
    ProviderError::new(format!("{}: {}", context, err))
        .with_kind(kind)
        .with_cause(err)
}

fn validation_failure(id: &ResourceId, errors: Vec<TypeError>) -> ProviderError {
    let message = errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    ProviderError::validation(message).for_resource(id.clone())
}

fn data_source_not_found(id: &ResourceId) -> ProviderError {
    ProviderError::new("No matching resource found")
        .with_kind(ErrorKind::NotFound)
        .for_resource(id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::IMAGE_STATUS;
    use crate::testing::{Call, MockApi, image_snapshot};
    use kiln_core::provider::{BoxFuture, NoopRecorder};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    const IMAGE_ARN: &str = "arn:aws:imagebuilder:us-east-1:123456789012:image/web/1.0.0/1";
    const INFRA_ARN: &str =
        "arn:aws:imagebuilder:us-east-1:123456789012:infrastructure-configuration/build";

    fn s(v: &str) -> Value {
        Value::String(v.to_string())
    }

    fn image() -> Resource {
        Resource::new("image", "web")
            .with_attribute(
                "image_recipe_arn",
                s("arn:aws:imagebuilder:us-east-1:123456789012:image-recipe/web/1.0.0"),
            )
            .with_attribute("infrastructure_configuration_arn", s(INFRA_ARN))
    }

    fn infrastructure_configuration() -> Resource {
        Resource::new("infrastructure_configuration", "build")
            .with_attribute("name", s("build"))
            .with_attribute("instance_profile_name", s("ImageBuilderRole"))
    }

    fn provider(api: MockApi) -> ImageBuilderProvider<MockApi> {
        ImageBuilderProvider::new(api, ProviderConfig::default())
    }

    /// Records handles together with how many API calls preceded them
    struct CountingRecorder {
        api_calls: Arc<Mutex<Vec<Call>>>,
        seen: Mutex<Vec<(String, usize)>>,
    }

    impl HandleRecorder for CountingRecorder {
        fn record<'a>(
            &'a self,
            _id: &'a ResourceId,
            identifier: &'a str,
        ) -> BoxFuture<'a, ProviderResult<()>> {
            Box::pin(async move {
                let calls = self.api_calls.lock().unwrap().len();
                self.seen
                    .lock()
                    .unwrap()
                    .push((identifier.to_string(), calls));
                Ok(())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn create_polls_until_available() {
        let api = MockApi::new()
            .with_create(Ok(IMAGE_ARN.to_string()))
            .with_snapshots(vec![
                Ok(Some(image_snapshot("PENDING", None))),
                Ok(Some(image_snapshot("BUILDING", None))),
                Ok(Some(image_snapshot("TESTING", None))),
                Ok(Some(image_snapshot("AVAILABLE", None))),
            ]);
        let recorder = CountingRecorder {
            api_calls: api.calls_handle(),
            seen: Mutex::new(vec![]),
        };
        let provider = provider(api);

        let state = provider.create_resource(&image(), &recorder).await.unwrap();

        assert!(state.exists);
        assert_eq!(state.identifier.as_deref(), Some(IMAGE_ARN));
        assert_eq!(state.attributes.get("image_id"), Some(&s("ami-0123456789abcdef0")));
        // Handle recorded after the create call, before the first poll
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![(IMAGE_ARN.to_string(), 1)]
        );
        // Four polls plus the final read
        assert_eq!(provider.api().count(|c| matches!(c, Call::Get { .. })), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn create_reports_failure_reason_with_handle() {
        let api = MockApi::new().with_snapshots(vec![
            Ok(Some(image_snapshot("BUILDING", None))),
            Ok(Some(image_snapshot(
                "FAILED",
                Some("Image Build Failed: component update-linux failed"),
            ))),
        ]);
        let provider = provider(api);

        let err = provider
            .create_resource(&image(), &NoopRecorder)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::TerminalFailure);
        assert_eq!(err.identifier.as_deref(), Some(IMAGE_ARN));
        assert!(err.message.contains("component update-linux failed"));
        assert!(!err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn create_times_out_with_configured_deadline() {
        let api = MockApi::new().with_snapshots(vec![Ok(Some(image_snapshot("BUILDING", None)))]);
        let mut config = ProviderConfig::default();
        config
            .create_timeouts
            .insert(ResourceKind::Image, Duration::from_secs(600));
        let provider = ImageBuilderProvider::new(api, config);

        let start = Instant::now();
        let err = provider
            .create_resource(&image(), &NoopRecorder)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.is_retryable());
        assert_eq!(err.identifier.as_deref(), Some(IMAGE_ARN));
        assert!(err.message.contains("BUILDING"));
        assert!(start.elapsed() >= Duration::from_secs(600));
        assert!(start.elapsed() < Duration::from_secs(600 + 31));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_poll_errors_do_not_abort() {
        let api = MockApi::new().with_snapshots(vec![
            Ok(Some(image_snapshot("BUILDING", None))),
            Err(ApiError::Transport("connection reset".to_string())),
            Ok(Some(image_snapshot("AVAILABLE", None))),
        ]);
        let provider = provider(api);

        let state = provider.create_resource(&image(), &NoopRecorder).await.unwrap();
        assert!(state.exists);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_wait() {
        let api = MockApi::new().with_snapshots(vec![Ok(Some(image_snapshot("BUILDING", None)))]);
        let cancel = CancellationToken::new();
        let provider = provider(api).with_cancellation(cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            cancel.cancel();
        });
        let err = provider
            .create_resource(&image(), &NoopRecorder)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(err.identifier.as_deref(), Some(IMAGE_ARN));
    }

    #[tokio::test]
    async fn submission_failure_has_no_handle() {
        let api = MockApi::new().with_create(Err(ApiError::Service {
            code: "AccessDeniedException".to_string(),
            message: "not authorized to perform imagebuilder:CreateImage".to_string(),
        }));
        let recorder = CountingRecorder {
            api_calls: api.calls_handle(),
            seen: Mutex::new(vec![]),
        };
        let provider = provider(api);

        let err = provider.create_resource(&image(), &recorder).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Submission);
        assert!(err.identifier.is_none());
        assert!(recorder.seen.lock().unwrap().is_empty());
        assert_eq!(provider.api().count(|c| matches!(c, Call::Get { .. })), 0);
    }

    #[tokio::test]
    async fn invalid_configuration_is_rejected_before_submission() {
        let provider = provider(MockApi::new());
        let resource = Resource::new("image", "web")
            .with_attribute("infrastructure_configuration_arn", s("not-an-arn"));

        let err = provider
            .create_resource(&resource, &NoopRecorder)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(provider.api().calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn infrastructure_configuration_retries_profile_propagation() {
        let propagation = || ApiError::Service {
            code: "InvalidParameterValueException".to_string(),
            message: "The provided instance profile does not exist.".to_string(),
        };
        let api = MockApi::new()
            .with_create(Err(propagation()))
            .with_create(Err(propagation()))
            .with_create(Ok(INFRA_ARN.to_string()))
            .with_snapshots(vec![Ok(Some(json!({
                "Arn": INFRA_ARN,
                "Name": "build",
                "InstanceProfileName": "ImageBuilderRole"
            })))]);
        let provider = provider(api);

        let state = provider
            .create_resource(&infrastructure_configuration(), &NoopRecorder)
            .await
            .unwrap();
        assert_eq!(state.identifier.as_deref(), Some(INFRA_ARN));

        let tokens: Vec<String> = provider
            .api()
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Create { client_token, .. } => Some(client_token),
                _ => None,
            })
            .collect();
        assert_eq!(tokens.len(), 3);
        assert_ne!(tokens[0], tokens[1]);
        assert_ne!(tokens[1], tokens[2]);
        assert_ne!(tokens[0], tokens[2]);
    }

    #[tokio::test]
    async fn unsettled_create_records_handle_before_failing() {
        let api = MockApi::new().with_create(Err(ApiError::Unsettled {
            identifier: INFRA_ARN.to_string(),
            source: Box::new(ApiError::Timeout("request did not settle".to_string())),
        }));
        let recorder = CountingRecorder {
            api_calls: api.calls_handle(),
            seen: Mutex::new(vec![]),
        };
        let provider = provider(api);

        let err = provider
            .create_resource(&infrastructure_configuration(), &recorder)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(err.identifier.as_deref(), Some(INFRA_ARN));
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![(INFRA_ARN.to_string(), 1)]
        );
        assert_eq!(provider.api().count(|c| matches!(c, Call::Get { .. })), 0);
    }

    #[tokio::test]
    async fn cancelled_unsettled_create_keeps_handle() {
        let api = MockApi::new().with_create(Err(ApiError::Unsettled {
            identifier: INFRA_ARN.to_string(),
            source: Box::new(ApiError::Cancelled),
        }));
        let provider = provider(api);

        let err = provider
            .create_resource(&infrastructure_configuration(), &NoopRecorder)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(err.identifier.as_deref(), Some(INFRA_ARN));
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_while_polling_aborts_immediately() {
        let api = MockApi::new().with_snapshots(vec![
            Err(ApiError::NotFound),
            Ok(Some(image_snapshot("AVAILABLE", None))),
        ]);
        let provider = provider(api);

        let start = Instant::now();
        let err = provider
            .create_resource(&image(), &NoopRecorder)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.identifier.as_deref(), Some(IMAGE_ARN));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(provider.api().count(|c| matches!(c, Call::Get { .. })), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn every_pending_image_status_polls_again_after_one_interval() {
        for status in IMAGE_STATUS.pending {
            let api = MockApi::new().with_snapshots(vec![
                Ok(Some(image_snapshot(*status, None))),
                Ok(Some(image_snapshot("AVAILABLE", None))),
            ]);
            let provider = provider(api);

            let start = Instant::now();
            let state = provider.create_resource(&image(), &NoopRecorder).await.unwrap();

            assert!(state.exists, "{}", status);
            assert_eq!(start.elapsed(), Duration::from_secs(2), "{}", status);
            // Two polls plus the final read
            assert_eq!(
                provider.api().count(|c| matches!(c, Call::Get { .. })),
                3,
                "{}",
                status
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn every_terminal_image_status_ends_the_wait_at_once() {
        for status in IMAGE_STATUS.success {
            let api = MockApi::new().with_snapshots(vec![Ok(Some(image_snapshot(*status, None)))]);
            let provider = provider(api);

            let start = Instant::now();
            let state = provider.create_resource(&image(), &NoopRecorder).await.unwrap();

            assert!(state.exists, "{}", status);
            assert_eq!(start.elapsed(), Duration::ZERO, "{}", status);
        }

        for status in IMAGE_STATUS.failure {
            let api = MockApi::new().with_snapshots(vec![Ok(Some(image_snapshot(*status, None)))]);
            let provider = provider(api);

            let start = Instant::now();
            let err = provider
                .create_resource(&image(), &NoopRecorder)
                .await
                .unwrap_err();

            assert_eq!(err.kind, ErrorKind::TerminalFailure, "{}", status);
            assert!(err.message.contains(*status), "{}", status);
            assert_eq!(err.identifier.as_deref(), Some(IMAGE_ARN));
            assert_eq!(start.elapsed(), Duration::ZERO, "{}", status);
            assert_eq!(provider.api().count(|c| matches!(c, Call::Get { .. })), 1);
        }
    }

    #[tokio::test]
    async fn default_tags_are_merged_under_resource_tags() {
        let api = MockApi::new()
            .with_create(Ok(INFRA_ARN.to_string()))
            .with_snapshots(vec![Ok(Some(json!({"Arn": INFRA_ARN, "Name": "build"})))]);
        let config = ProviderConfig {
            default_tags: [("team", "platform"), ("env", "dev")].into_iter().collect(),
            ..Default::default()
        };
        let provider = ImageBuilderProvider::new(api, config);

        let mut tags = HashMap::new();
        tags.insert("env".to_string(), s("prod"));
        let resource = infrastructure_configuration().with_attribute("tags", Value::Map(tags));
        provider
            .create_resource(&resource, &NoopRecorder)
            .await
            .unwrap();

        let desired = provider
            .api()
            .calls()
            .into_iter()
            .find_map(|c| match c {
                Call::Create { desired, .. } => Some(desired),
                _ => None,
            })
            .unwrap();
        assert_eq!(desired["Tags"], json!({"team": "platform", "env": "prod"}));
        assert_eq!(desired["Name"], json!("build"));
    }

    #[tokio::test]
    async fn read_maps_missing_resources_to_not_found() {
        let id = ResourceId::new("image", "web");

        let provider1 = provider(MockApi::new().with_snapshots(vec![Ok(None)]));
        let state = provider1.read_resource(&id, Some(IMAGE_ARN)).await.unwrap();
        assert!(!state.exists);

        let provider2 = provider(MockApi::new().with_snapshots(vec![Err(ApiError::NotFound)]));
        let state = provider2.read_resource(&id, Some(IMAGE_ARN)).await.unwrap();
        assert!(!state.exists);

        let provider3 = provider(MockApi::new());
        let state = provider3.read_resource(&id, None).await.unwrap();
        assert!(!state.exists);
        assert!(provider3.api().calls().is_empty());
    }

    #[tokio::test]
    async fn read_propagates_other_errors() {
        let api = MockApi::new().with_snapshots(vec![Err(ApiError::Service {
            code: "ThrottlingException".to_string(),
            message: "Rate exceeded".to_string(),
        })]);
        let provider = provider(api);

        let err = provider
            .read_resource(&ResourceId::new("image", "web"), Some(IMAGE_ARN))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Api);
        assert!(err.message.contains("Rate exceeded"));
    }

    #[tokio::test]
    async fn read_hides_system_and_ignored_tags() {
        let api = MockApi::new().with_snapshots(vec![Ok(Some(json!({
            "Arn": INFRA_ARN,
            "Name": "build",
            "Tags": {
                "aws:cloudformation:stack-name": "builds",
                "kubernetes.io/cluster/a": "owned",
                "team": "platform"
            }
        })))]);
        let config = ProviderConfig {
            ignore_tags: IgnoreConfig {
                keys: vec![],
                key_prefixes: vec!["kubernetes.io/".to_string()],
            },
            ..Default::default()
        };
        let provider = ImageBuilderProvider::new(api, config);

        let state = provider
            .read_resource(
                &ResourceId::new("infrastructure_configuration", "build"),
                Some(INFRA_ARN),
            )
            .await
            .unwrap();

        let mut expected = HashMap::new();
        expected.insert("team".to_string(), s("platform"));
        assert_eq!(state.attributes.get("tags"), Some(&Value::Map(expected)));
    }

    #[tokio::test]
    async fn update_sends_one_minimal_tag_change() {
        let api = MockApi::new().with_snapshots(vec![Ok(Some(json!({
            "Arn": INFRA_ARN,
            "Name": "build",
            "InstanceProfileName": "ImageBuilderRole",
            "Tags": {"b": "3", "c": "4", "z": "9"}
        })))]);
        let provider = provider(api);

        let tags = |pairs: &[(&str, &str)]| {
            Value::Map(pairs.iter().map(|(k, v)| (k.to_string(), s(v))).collect())
        };
        let id = ResourceId::new("infrastructure_configuration", "build");
        let from = State::existing(
            id.clone(),
            infrastructure_configuration()
                .with_attribute("tags", tags(&[("a", "1"), ("b", "2"), ("z", "9")]))
                .attributes,
        )
        .with_identifier(INFRA_ARN);
        let to = infrastructure_configuration()
            .with_attribute("tags", tags(&[("b", "3"), ("c", "4"), ("z", "9")]));

        let state = provider
            .update_resource(&id, INFRA_ARN, &from, &to)
            .await
            .unwrap();
        assert_eq!(state.attributes.get("tags"), to.attributes.get("tags"));

        let tag_calls: Vec<_> = provider
            .api()
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::UpdateTags { handle, diff } => Some((handle, diff)),
                _ => None,
            })
            .collect();
        assert_eq!(tag_calls.len(), 1);
        let (handle, diff) = &tag_calls[0];
        assert_eq!(handle, INFRA_ARN);
        assert_eq!(diff.remove, vec!["a".to_string()]);
        assert_eq!(diff.set.keys(), vec!["b".to_string(), "c".to_string()]);
        assert_eq!(provider.api().count(|c| matches!(c, Call::Update { .. })), 0);
    }

    #[tokio::test]
    async fn update_patches_mutable_attributes() {
        let api = MockApi::new().with_snapshots(vec![Ok(Some(json!({
            "Arn": INFRA_ARN,
            "Name": "build",
            "InstanceProfileName": "ImageBuilderRole",
            "Description": "nightly builds"
        })))]);
        let provider = provider(api);

        let id = ResourceId::new("infrastructure_configuration", "build");
        let from = State::existing(id.clone(), infrastructure_configuration().attributes)
            .with_identifier(INFRA_ARN);
        let to = infrastructure_configuration().with_attribute("description", s("nightly builds"));

        provider
            .update_resource(&id, INFRA_ARN, &from, &to)
            .await
            .unwrap();

        let patches: Vec<_> = provider
            .api()
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Update { patch, .. } => Some(patch),
                _ => None,
            })
            .collect();
        assert_eq!(patches.len(), 1);
        assert_eq!(
            serde_json::to_value(&patches[0]).unwrap(),
            json!([{"op": "add", "path": "/Description", "value": "nightly builds"}])
        );
        assert_eq!(provider.api().count(|c| matches!(c, Call::UpdateTags { .. })), 0);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let api = MockApi::new().with_existing(IMAGE_ARN);
        let provider = provider(api);
        let id = ResourceId::new("image", "web");

        provider.delete_resource(&id, IMAGE_ARN).await.unwrap();
        provider.delete_resource(&id, IMAGE_ARN).await.unwrap();

        assert_eq!(provider.api().count(|c| matches!(c, Call::Delete { .. })), 2);
    }

    #[tokio::test]
    async fn delete_propagates_other_errors() {
        let api = MockApi::new().with_delete_error(ApiError::Service {
            code: "ResourceDependencyException".to_string(),
            message: "in use by image pipeline".to_string(),
        });
        let provider = provider(api);

        let err = provider
            .delete_resource(&ResourceId::new("image_recipe", "web"), "arn:recipe")
            .await
            .unwrap_err();
        assert!(err.message.contains("in use by image pipeline"));
        assert_eq!(err.identifier.as_deref(), Some("arn:recipe"));
    }

    #[tokio::test]
    async fn data_source_by_name_reads_full_snapshot() {
        let base = "arn:aws:imagebuilder:us-east-1:123456789012:component/base/1.0.0/1";
        let other = "arn:aws:imagebuilder:us-east-1:123456789012:component/other/1.0.0/1";
        let api = MockApi::new()
            .with_summaries(vec![
                (other, json!({"Arn": other})),
                (base, json!({"Arn": base})),
            ])
            .with_snapshots(vec![
                Ok(Some(json!({"Arn": other, "Name": "other", "Version": "1.0.0"}))),
                Ok(Some(json!({"Arn": base, "Name": "base", "Version": "1.0.0"}))),
            ]);
        let provider = provider(api);

        let lookup = Resource::new("component", "base")
            .with_attribute("name", s("base"))
            .with_read_only(true);
        let state = provider.lookup_data_source(&lookup).await.unwrap();

        assert_eq!(state.identifier.as_deref(), Some(base));
        assert_eq!(state.attributes.get("version"), Some(&s("1.0.0")));
    }

    #[tokio::test]
    async fn list_names_states_after_remote_names() {
        let api = MockApi::new().with_summaries(vec![(
            INFRA_ARN,
            json!({"Arn": INFRA_ARN, "Name": "build"}),
        )]);
        let provider = provider(api);

        let states = provider
            .list_resources("infrastructure_configuration")
            .await
            .unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].id.name, "build");
        assert_eq!(states[0].identifier.as_deref(), Some(INFRA_ARN));
    }

    #[test]
    fn settings_parse_humantime_durations() {
        let settings: ProviderSettings = serde_json::from_value(json!({
            "region": "us-east-1",
            "default_tags": {"team": "platform"},
            "ignore_tags": {"key_prefixes": ["kubernetes.io/"]},
            "timeouts": {"image": {"create": "90m"}},
            "poll_interval": "10s"
        }))
        .unwrap();

        let config = ProviderConfig::try_from(settings).unwrap();
        assert_eq!(
            config.create_timeout(ResourceKind::Image),
            Some(Duration::from_secs(90 * 60))
        );
        assert_eq!(config.poll_interval, Some(Duration::from_secs(10)));
        assert_eq!(config.default_tags.get("team"), Some("platform"));
        assert!(config.ignore_tags.matches("kubernetes.io/cluster/a"));

        let bad: ProviderSettings =
            serde_json::from_value(json!({"timeouts": {"image": {"create": "soon"}}})).unwrap();
        assert!(ProviderConfig::try_from(bad).is_err());
    }
}
