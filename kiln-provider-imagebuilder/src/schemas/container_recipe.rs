//! container_recipe schema definition (AWS::ImageBuilder::ContainerRecipe)

use super::{
    arn_attribute, block_device_mappings, component_configurations, enum_of, tags_attribute,
    target_repository,
};
use kiln_core::schema::{AttributeSchema, AttributeType, ResourceSchema, StructField};

/// Returns the schema for container_recipe
pub fn container_recipe_schema() -> ResourceSchema {
    ResourceSchema::new("container_recipe")
        .with_description("The Dockerfile template, parent image and components of a container image.")
        .attribute(arn_attribute("The Amazon Resource Name (ARN) of the container recipe."))
        .attribute(
            AttributeSchema::new("name", AttributeType::String)
                .required()
                .create_only()
                .with_provider_name("Name"),
        )
        .attribute(
            AttributeSchema::new("version", AttributeType::String)
                .required()
                .create_only()
                .with_provider_name("Version"),
        )
        .attribute(
            AttributeSchema::new("container_type", enum_of(&["DOCKER"]))
                .required()
                .create_only()
                .with_provider_name("ContainerType"),
        )
        .attribute(
            AttributeSchema::new("parent_image", AttributeType::String)
                .required()
                .create_only()
                .with_provider_name("ParentImage"),
        )
        .attribute(
            AttributeSchema::new("target_repository", target_repository())
                .required()
                .create_only()
                .with_provider_name("TargetRepository"),
        )
        .attribute(
            AttributeSchema::new("components", component_configurations())
                .create_only()
                .with_provider_name("Components"),
        )
        .attribute(
            AttributeSchema::new("description", AttributeType::String)
                .create_only()
                .with_provider_name("Description"),
        )
        .attribute(
            AttributeSchema::new("dockerfile_template_data", AttributeType::String)
                .create_only()
                .with_provider_name("DockerfileTemplateData"),
        )
        .attribute(
            AttributeSchema::new("dockerfile_template_uri", AttributeType::String)
                .create_only()
                .with_provider_name("DockerfileTemplateUri"),
        )
        .attribute(
            AttributeSchema::new("platform_override", enum_of(&["Linux", "Windows"]))
                .create_only()
                .with_provider_name("PlatformOverride"),
        )
        .attribute(
            AttributeSchema::new("image_os_version_override", AttributeType::String)
                .create_only()
                .with_provider_name("ImageOsVersionOverride"),
        )
        .attribute(
            AttributeSchema::new("working_directory", AttributeType::String)
                .create_only()
                .with_provider_name("WorkingDirectory"),
        )
        .attribute(
            AttributeSchema::new("kms_key_id", AttributeType::String)
                .create_only()
                .with_provider_name("KmsKeyId"),
        )
        .attribute(
            AttributeSchema::new(
                "instance_configuration",
                AttributeType::Struct(vec![
                    StructField::new("image", AttributeType::String),
                    StructField::new("block_device_mappings", block_device_mappings()),
                ]),
            )
            .create_only()
            .with_provider_name("InstanceConfiguration"),
        )
        .attribute(tags_attribute("The tags of the container recipe."))
}
