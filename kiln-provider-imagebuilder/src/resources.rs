//! Resource kind descriptors
//!
//! Every Image Builder resource kind is described once in a static table:
//! its CloudFormation type, its schema, whether creation is asynchronous
//! (and how to poll it), and whether creation must be retried on known
//! transient errors. All lookups happen at call time.

use std::fmt;
use std::time::Duration;

use kiln_core::provider::ResourceType;
use kiln_core::schema::ResourceSchema;
use kiln_core::waiter::StatusTable;

use crate::api::ApiError;
use crate::schemas;

/// Image Builder resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Component,
    ContainerRecipe,
    DistributionConfiguration,
    Image,
    ImagePipeline,
    ImageRecipe,
    InfrastructureConfiguration,
    LifecyclePolicy,
    Workflow,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Component,
        ResourceKind::ContainerRecipe,
        ResourceKind::DistributionConfiguration,
        ResourceKind::Image,
        ResourceKind::ImagePipeline,
        ResourceKind::ImageRecipe,
        ResourceKind::InfrastructureConfiguration,
        ResourceKind::LifecyclePolicy,
        ResourceKind::Workflow,
    ];

    /// Resource type name used in configuration (e.g., "image_recipe")
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Component => "component",
            ResourceKind::ContainerRecipe => "container_recipe",
            ResourceKind::DistributionConfiguration => "distribution_configuration",
            ResourceKind::Image => "image",
            ResourceKind::ImagePipeline => "image_pipeline",
            ResourceKind::ImageRecipe => "image_recipe",
            ResourceKind::InfrastructureConfiguration => "infrastructure_configuration",
            ResourceKind::LifecyclePolicy => "lifecycle_policy",
            ResourceKind::Workflow => "workflow",
        }
    }

    pub fn from_type_name(resource_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == resource_type)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How to poll an asynchronously provisioned kind
#[derive(Debug)]
pub struct WaitSpec {
    pub table: StatusTable,
    /// JSON pointer to the status inside a snapshot
    pub status_pointer: &'static str,
    /// JSON pointer to the failure reason inside a snapshot
    pub reason_pointer: &'static str,
    pub default_timeout: Duration,
}

/// Retry of the creation request while an error is known to be transient
#[derive(Debug)]
pub struct CreateRetry {
    pub timeout: Duration,
    pub is_retryable: fn(&ApiError) -> bool,
}

/// Static description of one resource kind
#[derive(Debug)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    /// AWS CloudFormation type name (e.g., "AWS::ImageBuilder::Image")
    pub type_name: &'static str,
    /// Whether this resource type uses tags
    pub has_tags: bool,
    pub schema: fn() -> ResourceSchema,
    pub wait: Option<WaitSpec>,
    pub create_retry: Option<CreateRetry>,
}

pub const IMAGE_STATUS: StatusTable = StatusTable {
    pending: &[
        "PENDING",
        "CREATING",
        "BUILDING",
        "TESTING",
        "DISTRIBUTING",
        "INTEGRATING",
    ],
    success: &["AVAILABLE"],
    failure: &["FAILED", "CANCELLED", "DEPRECATED", "DELETED", "DISABLED"],
};

/// Cloud Control request status
pub const OPERATION_STATUS: StatusTable = StatusTable {
    pending: &["PENDING", "IN_PROGRESS", "CANCEL_IN_PROGRESS"],
    success: &["SUCCESS"],
    failure: &["FAILED", "CANCEL_COMPLETE"],
};

/// Freshly created instance profiles take a while to become visible to Image Builder
fn is_instance_profile_propagation(err: &ApiError) -> bool {
    match err {
        ApiError::Service { message, .. } | ApiError::OperationFailed { message, .. } => {
            message.contains("instance profile does not exist")
        }
        _ => false,
    }
}

static DESCRIPTORS: [ResourceDescriptor; 9] = [
    ResourceDescriptor {
        kind: ResourceKind::Component,
        type_name: "AWS::ImageBuilder::Component",
        has_tags: true,
        schema: schemas::component::component_schema,
        wait: None,
        create_retry: None,
    },
    ResourceDescriptor {
        kind: ResourceKind::ContainerRecipe,
        type_name: "AWS::ImageBuilder::ContainerRecipe",
        has_tags: true,
        schema: schemas::container_recipe::container_recipe_schema,
        wait: None,
        create_retry: None,
    },
    ResourceDescriptor {
        kind: ResourceKind::DistributionConfiguration,
        type_name: "AWS::ImageBuilder::DistributionConfiguration",
        has_tags: true,
        schema: schemas::distribution_configuration::distribution_configuration_schema,
        wait: None,
        create_retry: None,
    },
    ResourceDescriptor {
        kind: ResourceKind::Image,
        type_name: "AWS::ImageBuilder::Image",
        has_tags: true,
        schema: schemas::image::image_schema,
        wait: Some(WaitSpec {
            table: IMAGE_STATUS,
            status_pointer: "/State/Status",
            reason_pointer: "/State/Reason",
            default_timeout: Duration::from_secs(60 * 60),
        }),
        create_retry: None,
    },
    ResourceDescriptor {
        kind: ResourceKind::ImagePipeline,
        type_name: "AWS::ImageBuilder::ImagePipeline",
        has_tags: true,
        schema: schemas::image_pipeline::image_pipeline_schema,
        wait: None,
        create_retry: None,
    },
    ResourceDescriptor {
        kind: ResourceKind::ImageRecipe,
        type_name: "AWS::ImageBuilder::ImageRecipe",
        has_tags: true,
        schema: schemas::image_recipe::image_recipe_schema,
        wait: None,
        create_retry: None,
    },
    ResourceDescriptor {
        kind: ResourceKind::InfrastructureConfiguration,
        type_name: "AWS::ImageBuilder::InfrastructureConfiguration",
        has_tags: true,
        schema: schemas::infrastructure_configuration::infrastructure_configuration_schema,
        wait: None,
        create_retry: Some(CreateRetry {
            timeout: Duration::from_secs(2 * 60),
            is_retryable: is_instance_profile_propagation,
        }),
    },
    ResourceDescriptor {
        kind: ResourceKind::LifecyclePolicy,
        type_name: "AWS::ImageBuilder::LifecyclePolicy",
        has_tags: true,
        schema: schemas::lifecycle_policy::lifecycle_policy_schema,
        wait: None,
        create_retry: None,
    },
    ResourceDescriptor {
        kind: ResourceKind::Workflow,
        type_name: "AWS::ImageBuilder::Workflow",
        has_tags: true,
        schema: schemas::workflow::workflow_schema,
        wait: None,
        create_retry: None,
    },
];

/// Descriptor of a kind
pub fn descriptor(kind: ResourceKind) -> &'static ResourceDescriptor {
    // The table holds exactly one entry per kind, in declaration order
    &DESCRIPTORS[kind as usize]
}

/// Descriptor of a configuration resource type (e.g., "image_recipe")
pub fn descriptor_for(resource_type: &str) -> Option<&'static ResourceDescriptor> {
    ResourceKind::from_type_name(resource_type).map(descriptor)
}

pub fn descriptors() -> &'static [ResourceDescriptor] {
    &DESCRIPTORS
}

/// Resource type exposed through the Provider trait
pub struct ImageBuilderResourceType(&'static ResourceDescriptor);

impl ResourceType for ImageBuilderResourceType {
    fn name(&self) -> &'static str {
        self.0.kind.as_str()
    }

    fn schema(&self) -> ResourceSchema {
        (self.0.schema)()
    }
}

/// Returns all resource types supported by this provider
pub fn resource_types() -> Vec<Box<dyn ResourceType>> {
    DESCRIPTORS
        .iter()
        .map(|d| Box::new(ImageBuilderResourceType(d)) as Box<dyn ResourceType>)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::waiter::StatusClass;

    #[test]
    fn table_matches_kind_order() {
        for kind in ResourceKind::ALL {
            assert_eq!(descriptor(kind).kind, kind);
            assert_eq!(descriptor_for(kind.as_str()).map(|d| d.kind), Some(kind));
            assert_eq!((descriptor(kind).schema)().resource_type, kind.as_str());
        }
        assert!(descriptor_for("ec2_vpc").is_none());
    }

    #[test]
    fn only_images_are_polled() {
        let polled: Vec<_> = descriptors()
            .iter()
            .filter(|d| d.wait.is_some())
            .map(|d| d.kind)
            .collect();
        assert_eq!(polled, vec![ResourceKind::Image]);
    }

    #[test]
    fn status_sets_are_disjoint() {
        for table in [IMAGE_STATUS, OPERATION_STATUS] {
            for s in table.pending {
                assert!(!table.success.contains(s) && !table.failure.contains(s));
            }
            for s in table.success {
                assert!(!table.failure.contains(s));
            }
        }
    }

    #[test]
    fn image_status_classes() {
        assert_eq!(IMAGE_STATUS.classify("BUILDING"), StatusClass::Pending);
        assert_eq!(IMAGE_STATUS.classify("AVAILABLE"), StatusClass::Success);
        assert_eq!(IMAGE_STATUS.classify("CANCELLED"), StatusClass::Failure);
    }

    #[test]
    fn infrastructure_configuration_retries_on_profile_propagation() {
        let retry = descriptor(ResourceKind::InfrastructureConfiguration)
            .create_retry
            .as_ref()
            .unwrap();
        assert_eq!(retry.timeout, Duration::from_secs(120));

        let transient = ApiError::Service {
            code: "InvalidParameterValueException".to_string(),
            message: "The value supplied for parameter 'instanceProfileName' is not valid. \
                      The provided instance profile does not exist."
                .to_string(),
        };
        assert!((retry.is_retryable)(&transient));

        let other = ApiError::Service {
            code: "InvalidParameterValueException".to_string(),
            message: "subnet does not exist".to_string(),
        };
        assert!(!(retry.is_retryable)(&other));
    }
}
