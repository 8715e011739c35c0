//! Image Builder resource schema definitions
//!
//! One module per resource kind, modelled on the CloudFormation resource
//! schemas (`AWS::ImageBuilder::*`). Tags are mutable on every kind because
//! they are reconciled through the tagging API rather than the resource API.

pub mod component;
pub mod container_recipe;
pub mod distribution_configuration;
pub mod image;
pub mod image_pipeline;
pub mod image_recipe;
pub mod infrastructure_configuration;
pub mod lifecycle_policy;
pub mod workflow;

use kiln_core::schema::{AttributeSchema, AttributeType, StructField, types};

/// Returns all Image Builder schemas
pub fn all_schemas() -> Vec<kiln_core::schema::ResourceSchema> {
    crate::resources::descriptors()
        .iter()
        .map(|d| (d.schema)())
        .collect()
}

/// Tags type for Image Builder resources (flat string map)
pub fn tags_type() -> AttributeType {
    types::tags()
}

fn list_of(inner: AttributeType) -> AttributeType {
    AttributeType::List(Box::new(inner))
}

fn string_list() -> AttributeType {
    list_of(AttributeType::String)
}

fn enum_of(values: &[&str]) -> AttributeType {
    AttributeType::Enum(values.iter().map(|v| v.to_string()).collect())
}

/// `tags` attribute shared by all kinds
pub(crate) fn tags_attribute(description: &str) -> AttributeSchema {
    AttributeSchema::new("tags", tags_type())
        .with_description(description)
        .with_provider_name("Tags")
}

/// Computed `arn` attribute shared by all kinds
pub(crate) fn arn_attribute(description: &str) -> AttributeSchema {
    AttributeSchema::new("arn", types::arn())
        .computed()
        .with_description(description)
        .with_provider_name("Arn")
}

/// Components of an image or container recipe, in run order
pub(crate) fn component_configurations() -> AttributeType {
    list_of(AttributeType::Struct(vec![
        StructField::new("component_arn", AttributeType::String).required(),
        StructField::new(
            "parameters",
            list_of(AttributeType::Struct(vec![
                StructField::new("name", AttributeType::String).required(),
                StructField::new("value", string_list()).required(),
            ])),
        ),
    ]))
}

/// Test settings of an image or pipeline
pub(crate) fn image_tests_configuration() -> AttributeType {
    AttributeType::Struct(vec![
        StructField::new("image_tests_enabled", AttributeType::Bool),
        StructField::new("timeout_minutes", types::positive_int()),
    ])
}

/// EBS-backed device mappings of a build instance
pub(crate) fn block_device_mappings() -> AttributeType {
    list_of(AttributeType::Struct(vec![
        StructField::new("device_name", AttributeType::String),
        StructField::new("virtual_name", AttributeType::String),
        StructField::new("no_device", AttributeType::String),
        StructField::new(
            "ebs",
            AttributeType::Struct(vec![
                StructField::new("delete_on_termination", AttributeType::Bool),
                StructField::new("encrypted", AttributeType::Bool),
                StructField::new("iops", types::positive_int()),
                StructField::new("kms_key_id", AttributeType::String),
                StructField::new("snapshot_id", AttributeType::String),
                StructField::new("throughput", types::positive_int()),
                StructField::new("volume_size", types::positive_int()),
                StructField::new(
                    "volume_type",
                    enum_of(&["standard", "io1", "io2", "gp2", "gp3", "sc1", "st1"]),
                ),
            ]),
        ),
    ]))
}

/// ECR repository receiving container images
pub(crate) fn target_repository() -> AttributeType {
    AttributeType::Struct(vec![
        StructField::new("service", enum_of(&["ECR"])),
        StructField::new("repository_name", AttributeType::String).required(),
    ])
}
