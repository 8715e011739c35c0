//! image schema definition (AWS::ImageBuilder::Image)
//!
//! An image is built asynchronously; its snapshot carries a `State` block
//! whose status is polled until the build succeeds or fails.

use super::{arn_attribute, image_tests_configuration, tags_attribute};
use kiln_core::schema::{AttributeSchema, AttributeType, ResourceSchema, StructField, types};

/// Returns the schema for image
pub fn image_schema() -> ResourceSchema {
    ResourceSchema::new("image")
        .with_description("An image build run from a recipe and an infrastructure configuration.")
        .attribute(arn_attribute("The Amazon Resource Name (ARN) of the image build version."))
        .attribute(
            AttributeSchema::new("image_recipe_arn", types::arn())
                .create_only()
                .with_description("Conflicts with container_recipe_arn.")
                .conflicts_with("container_recipe_arn")
                .with_provider_name("ImageRecipeArn"),
        )
        .attribute(
            AttributeSchema::new("container_recipe_arn", types::arn())
                .create_only()
                .with_description("Conflicts with image_recipe_arn.")
                .conflicts_with("image_recipe_arn")
                .with_provider_name("ContainerRecipeArn"),
        )
        .attribute(
            AttributeSchema::new("infrastructure_configuration_arn", types::arn())
                .required()
                .create_only()
                .with_provider_name("InfrastructureConfigurationArn"),
        )
        .attribute(
            AttributeSchema::new("distribution_configuration_arn", types::arn())
                .create_only()
                .with_provider_name("DistributionConfigurationArn"),
        )
        .attribute(
            AttributeSchema::new("enhanced_image_metadata_enabled", AttributeType::Bool)
                .create_only()
                .with_provider_name("EnhancedImageMetadataEnabled"),
        )
        .attribute(
            AttributeSchema::new("image_tests_configuration", image_tests_configuration())
                .create_only()
                .with_provider_name("ImageTestsConfiguration"),
        )
        .attribute(
            AttributeSchema::new("name", AttributeType::String)
                .computed()
                .with_provider_name("Name"),
        )
        .attribute(
            AttributeSchema::new("version", AttributeType::String)
                .computed()
                .with_provider_name("Version"),
        )
        .attribute(
            AttributeSchema::new("image_id", AttributeType::String)
                .computed()
                .with_description("AMI ID of the image in the build region.")
                .with_provider_name("ImageId"),
        )
        .attribute(
            AttributeSchema::new("image_uri", AttributeType::String)
                .computed()
                .with_description("URI of the container image.")
                .with_provider_name("ImageUri"),
        )
        .attribute(
            AttributeSchema::new("platform", AttributeType::String)
                .computed()
                .with_provider_name("Platform"),
        )
        .attribute(
            AttributeSchema::new("os_version", AttributeType::String)
                .computed()
                .with_provider_name("OsVersion"),
        )
        .attribute(
            AttributeSchema::new("date_created", AttributeType::String)
                .computed()
                .with_provider_name("DateCreated"),
        )
        .attribute(
            AttributeSchema::new(
                "state",
                AttributeType::Struct(vec![
                    StructField::new("status", AttributeType::String),
                    StructField::new("reason", AttributeType::String),
                ]),
            )
            .computed()
            .with_provider_name("State"),
        )
        .attribute(tags_attribute("The tags of the image."))
}
