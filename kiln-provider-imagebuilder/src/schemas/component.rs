//! component schema definition (AWS::ImageBuilder::Component)

use super::{arn_attribute, enum_of, string_list, tags_attribute};
use kiln_core::schema::{AttributeSchema, AttributeType, ResourceSchema};

/// Returns the schema for component
pub fn component_schema() -> ResourceSchema {
    ResourceSchema::new("component")
        .with_description("A build or test step applied to an image, defined as an AWSTOE YAML document.")
        .attribute(arn_attribute("The Amazon Resource Name (ARN) of the component."))
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
                .with_description("Semantic version of the component (e.g., 1.0.0).")
                .with_provider_name("Version"),
        )
        .attribute(
            AttributeSchema::new("platform", enum_of(&["Linux", "Windows", "macOS"]))
                .required()
                .create_only()
                .with_provider_name("Platform"),
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
                .with_description("Inline YAML document. Conflicts with uri.")
                .conflicts_with("uri")
                .with_provider_name("Data"),
        )
        .attribute(
            AttributeSchema::new("uri", AttributeType::String)
                .create_only()
                .with_description("S3 URI of the YAML document. Conflicts with data.")
                .conflicts_with("data")
                .with_provider_name("Uri"),
        )
        .attribute(
            AttributeSchema::new("kms_key_id", AttributeType::String)
                .create_only()
                .with_provider_name("KmsKeyId"),
        )
        .attribute(
            AttributeSchema::new("supported_os_versions", string_list())
                .create_only()
                .with_provider_name("SupportedOsVersions"),
        )
        .attribute(
            AttributeSchema::new("type", AttributeType::String)
                .computed()
                .with_description("BUILD or TEST.")
                .with_provider_name("Type"),
        )
        .attribute(
            AttributeSchema::new("encrypted", AttributeType::Bool)
                .computed()
                .with_provider_name("Encrypted"),
        )
        .attribute(tags_attribute("The tags of the component."))
}
