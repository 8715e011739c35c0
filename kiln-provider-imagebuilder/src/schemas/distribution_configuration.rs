//! distribution_configuration schema definition (AWS::ImageBuilder::DistributionConfiguration)

use super::{arn_attribute, list_of, string_list, tags_attribute, target_repository};
use kiln_core::schema::{AttributeSchema, AttributeType, ResourceSchema, StructField};

fn ami_distribution_configuration() -> AttributeType {
    AttributeType::Struct(vec![
        StructField::new("name", AttributeType::String),
        StructField::new("description", AttributeType::String),
        StructField::new("target_account_ids", string_list()),
        StructField::new("ami_tags", AttributeType::Map(Box::new(AttributeType::String))),
        StructField::new("kms_key_id", AttributeType::String),
        StructField::new(
            "launch_permission_configuration",
            AttributeType::Struct(vec![
                StructField::new("user_ids", string_list()),
                StructField::new("user_groups", string_list()),
                StructField::new("organization_arns", string_list()),
                StructField::new("organizational_unit_arns", string_list()),
            ]),
        ),
    ])
}

fn distribution() -> AttributeType {
    AttributeType::Struct(vec![
        StructField::new("region", AttributeType::String).required(),
        StructField::new("ami_distribution_configuration", ami_distribution_configuration()),
        StructField::new(
            "container_distribution_configuration",
            AttributeType::Struct(vec![
                StructField::new("description", AttributeType::String),
                StructField::new("container_tags", string_list()),
                StructField::new("target_repository", target_repository()),
            ]),
        ),
        StructField::new("license_configuration_arns", string_list()),
        StructField::new(
            "launch_template_configurations",
            list_of(AttributeType::Struct(vec![
                StructField::new("launch_template_id", AttributeType::String),
                StructField::new("account_id", AttributeType::String),
                StructField::new("set_default_version", AttributeType::Bool),
            ])),
        ),
    ])
}

/// Returns the schema for distribution_configuration
pub fn distribution_configuration_schema() -> ResourceSchema {
    ResourceSchema::new("distribution_configuration")
        .with_description("Regions and accounts that receive the output of an image build.")
        .attribute(arn_attribute(
            "The Amazon Resource Name (ARN) of the distribution configuration.",
        ))
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
            AttributeSchema::new("distributions", list_of(distribution()))
                .required()
                .with_provider_name("Distributions"),
        )
        .attribute(tags_attribute("The tags of the distribution configuration."))
}
