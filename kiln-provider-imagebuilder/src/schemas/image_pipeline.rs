//! image_pipeline schema definition (AWS::ImageBuilder::ImagePipeline)

use super::{arn_attribute, enum_of, image_tests_configuration, string_list, tags_attribute};
use kiln_core::schema::{AttributeSchema, AttributeType, ResourceSchema, StructField, types};

/// Returns the schema for image_pipeline
pub fn image_pipeline_schema() -> ResourceSchema {
    ResourceSchema::new("image_pipeline")
        .with_description("Automates image builds on a schedule.")
        .attribute(arn_attribute("The Amazon Resource Name (ARN) of the image pipeline."))
        .attribute(
            AttributeSchema::new("name", AttributeType::String)
                .required()
                .create_only()
                .with_provider_name("Name"),
        )
        .attribute(
            AttributeSchema::new("description", AttributeType::String)
                .with_provider_name("Description"),
        )
        .attribute(
            AttributeSchema::new("image_recipe_arn", types::arn())
                .with_provider_name("ImageRecipeArn"),
        )
        .attribute(
            AttributeSchema::new("container_recipe_arn", types::arn())
                .with_provider_name("ContainerRecipeArn"),
        )
        .attribute(
            AttributeSchema::new("infrastructure_configuration_arn", types::arn())
                .required()
                .with_provider_name("InfrastructureConfigurationArn"),
        )
        .attribute(
            AttributeSchema::new("distribution_configuration_arn", types::arn())
                .with_provider_name("DistributionConfigurationArn"),
        )
        .attribute(
            AttributeSchema::new("enhanced_image_metadata_enabled", AttributeType::Bool)
                .with_provider_name("EnhancedImageMetadataEnabled"),
        )
        .attribute(
            AttributeSchema::new("image_tests_configuration", image_tests_configuration())
                .with_provider_name("ImageTestsConfiguration"),
        )
        .attribute(
            AttributeSchema::new(
                "schedule",
                AttributeType::Struct(vec![
                    StructField::new("schedule_expression", AttributeType::String).required(),
                    StructField::new(
                        "pipeline_execution_start_condition",
                        enum_of(&[
                            "EXPRESSION_MATCH_ONLY",
                            "EXPRESSION_MATCH_AND_DEPENDENCY_UPDATES_AVAILABLE",
                        ]),
                    ),
                ]),
            )
            .with_provider_name("Schedule"),
        )
        .attribute(
            AttributeSchema::new("status", enum_of(&["ENABLED", "DISABLED"]))
                .with_default(kiln_core::resource::Value::String("ENABLED".to_string()))
                .with_provider_name("Status"),
        )
        .attribute(
            AttributeSchema::new("execution_role", AttributeType::String)
                .with_provider_name("ExecutionRole"),
        )
        .attribute(
            AttributeSchema::new(
                "image_scanning_configuration",
                AttributeType::Struct(vec![
                    StructField::new("image_scanning_enabled", AttributeType::Bool),
                    StructField::new(
                        "ecr_configuration",
                        AttributeType::Struct(vec![
                            StructField::new("repository_name", AttributeType::String),
                            StructField::new("container_tags", string_list()),
                        ]),
                    ),
                ]),
            )
            .with_provider_name("ImageScanningConfiguration"),
        )
        .attribute(tags_attribute("The tags of the image pipeline."))
}
