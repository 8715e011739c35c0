//! workflow schema definition (AWS::ImageBuilder::Workflow)

use super::{arn_attribute, enum_of, tags_attribute};
use kiln_core::schema::{AttributeSchema, AttributeType, ResourceSchema};

/// Returns the schema for workflow
pub fn workflow_schema() -> ResourceSchema {
    ResourceSchema::new("workflow")
        .with_description("A sequence of steps run by Image Builder during build, test or distribution.")
        .attribute(arn_attribute("The Amazon Resource Name (ARN) of the workflow."))
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
            AttributeSchema::new("type", enum_of(&["BUILD", "TEST", "DISTRIBUTION"]))
                .required()
                .create_only()
                .with_provider_name("Type"),
        )
        .attribute(
            AttributeSchema::new("description", AttributeType::String)
                .create_only()
                .with_provider_name("Description"),
        )
        .attribute(
            AttributeSchema::new("change_description", AttributeType::String)
                .create_only()
                .with_provider_name("ChangeDescription"),
        )
        .attribute(
            AttributeSchema::new("data", AttributeType::String)
                .create_only()
                .with_provider_name("Data"),
        )
        .attribute(
            AttributeSchema::new("uri", AttributeType::String)
                .create_only()
                .with_provider_name("Uri"),
        )
        .attribute(
            AttributeSchema::new("kms_key_id", AttributeType::String)
                .create_only()
                .with_provider_name("KmsKeyId"),
        )
        .attribute(tags_attribute("The tags of the workflow."))
}
