//! image_recipe schema definition (AWS::ImageBuilder::ImageRecipe)

use super::{arn_attribute, block_device_mappings, component_configurations, tags_attribute};
use kiln_core::schema::{AttributeSchema, AttributeType, ResourceSchema, StructField};

/// Returns the schema for image_recipe
pub fn image_recipe_schema() -> ResourceSchema {
    ResourceSchema::new("image_recipe")
        .with_description("The parent image and the components applied to produce an AMI.")
        .attribute(arn_attribute("The Amazon Resource Name (ARN) of the image recipe."))
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
            AttributeSchema::new("parent_image", AttributeType::String)
                .required()
                .create_only()
                .with_description("AMI ID or Image Builder image ARN to start from.")
                .with_provider_name("ParentImage"),
        )
        .attribute(
            AttributeSchema::new("components", component_configurations())
                .required()
                .create_only()
                .with_provider_name("Components"),
        )
        .attribute(
            AttributeSchema::new("description", AttributeType::String)
                .create_only()
                .with_provider_name("Description"),
        )
        .attribute(
            AttributeSchema::new("block_device_mappings", block_device_mappings())
                .create_only()
                .with_provider_name("BlockDeviceMappings"),
        )
        .attribute(
            AttributeSchema::new("working_directory", AttributeType::String)
                .create_only()
                .with_provider_name("WorkingDirectory"),
        )
        .attribute(
            AttributeSchema::new(
                "additional_instance_configuration",
                AttributeType::Struct(vec![
                    StructField::new(
                        "systems_manager_agent",
                        AttributeType::Struct(vec![StructField::new(
                            "uninstall_after_build",
                            AttributeType::Bool,
                        )]),
                    ),
                    StructField::new("user_data_override", AttributeType::String),
                ]),
            )
            .with_provider_name("AdditionalInstanceConfiguration"),
        )
        .attribute(tags_attribute("The tags of the image recipe."))
}
