//! infrastructure_configuration schema definition (AWS::ImageBuilder::InfrastructureConfiguration)

use super::{arn_attribute, enum_of, string_list, tags_attribute};
use kiln_core::schema::{AttributeSchema, AttributeType, ResourceSchema, StructField, types};

/// Returns the schema for infrastructure_configuration
pub fn infrastructure_configuration_schema() -> ResourceSchema {
    ResourceSchema::new("infrastructure_configuration")
        .with_description("The EC2 infrastructure used to build and test images.")
        .attribute(arn_attribute(
            "The Amazon Resource Name (ARN) of the infrastructure configuration.",
        ))
        .attribute(
            AttributeSchema::new("name", AttributeType::String)
                .required()
                .create_only()
                .with_provider_name("Name"),
        )
        .attribute(
            AttributeSchema::new("instance_profile_name", AttributeType::String)
                .required()
                .with_description("IAM instance profile of the build instance.")
                .with_provider_name("InstanceProfileName"),
        )
        .attribute(
            AttributeSchema::new("description", AttributeType::String)
                .with_provider_name("Description"),
        )
        .attribute(
            AttributeSchema::new("instance_types", string_list())
                .with_provider_name("InstanceTypes"),
        )
        .attribute(
            AttributeSchema::new("security_group_ids", string_list())
                .with_provider_name("SecurityGroupIds"),
        )
        .attribute(
            AttributeSchema::new("subnet_id", AttributeType::String)
                .with_provider_name("SubnetId"),
        )
        .attribute(
            AttributeSchema::new("key_pair", AttributeType::String)
                .with_provider_name("KeyPair"),
        )
        .attribute(
            AttributeSchema::new("terminate_instance_on_failure", AttributeType::Bool)
                .with_provider_name("TerminateInstanceOnFailure"),
        )
        .attribute(
            AttributeSchema::new("sns_topic_arn", types::arn())
                .with_provider_name("SnsTopicArn"),
        )
        .attribute(
            AttributeSchema::new(
                "logging",
                AttributeType::Struct(vec![StructField::new(
                    "s3_logs",
                    AttributeType::Struct(vec![
                        StructField::new("s3_bucket_name", AttributeType::String).required(),
                        StructField::new("s3_key_prefix", AttributeType::String),
                    ]),
                )]),
            )
            .with_provider_name("Logging"),
        )
        .attribute(
            AttributeSchema::new(
                "instance_metadata_options",
                AttributeType::Struct(vec![
                    StructField::new("http_tokens", enum_of(&["required", "optional"])),
                    StructField::new("http_put_response_hop_limit", types::positive_int()),
                ]),
            )
            .with_provider_name("InstanceMetadataOptions"),
        )
        .attribute(
            AttributeSchema::new(
                "resource_tags",
                AttributeType::Map(Box::new(AttributeType::String)),
            )
            .with_description("Tags attached to resources created during the build.")
            .with_provider_name("ResourceTags"),
        )
        .attribute(tags_attribute("The tags of the infrastructure configuration."))
}
