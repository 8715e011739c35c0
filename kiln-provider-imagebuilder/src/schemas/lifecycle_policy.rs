//! lifecycle_policy schema definition (AWS::ImageBuilder::LifecyclePolicy)

use super::{arn_attribute, enum_of, list_of, tags_attribute};
use kiln_core::schema::{AttributeSchema, AttributeType, ResourceSchema, StructField, types};

fn policy_detail() -> AttributeType {
    AttributeType::Struct(vec![
        StructField::new(
            "action",
            AttributeType::Struct(vec![
                StructField::new("type", enum_of(&["DELETE", "DEPRECATE", "DISABLE"])).required(),
                StructField::new(
                    "include_resources",
                    AttributeType::Struct(vec![
                        StructField::new("amis", AttributeType::Bool),
                        StructField::new("snapshots", AttributeType::Bool),
                        StructField::new("containers", AttributeType::Bool),
                    ]),
                ),
            ]),
        )
        .required(),
        StructField::new(
            "filter",
            AttributeType::Struct(vec![
                StructField::new("type", enum_of(&["AGE", "COUNT"])).required(),
                StructField::new("value", types::positive_int()).required(),
                StructField::new("unit", enum_of(&["DAYS", "WEEKS", "MONTHS", "YEARS"])),
                StructField::new("retain_at_least", AttributeType::Int),
            ]),
        )
        .required(),
        StructField::new(
            "exclusion_rules",
            AttributeType::Struct(vec![StructField::new(
                "tag_map",
                AttributeType::Map(Box::new(AttributeType::String)),
            )]),
        ),
    ])
}

/// Returns the schema for lifecycle_policy
pub fn lifecycle_policy_schema() -> ResourceSchema {
    ResourceSchema::new("lifecycle_policy")
        .with_description("Rules that deprecate, disable or delete aging images.")
        .attribute(arn_attribute("The Amazon Resource Name (ARN) of the lifecycle policy."))
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
            AttributeSchema::new("execution_role", AttributeType::String)
                .required()
                .with_provider_name("ExecutionRole"),
        )
        .attribute(
            AttributeSchema::new("resource_type", enum_of(&["AMI_IMAGE", "CONTAINER_IMAGE"]))
                .required()
                .with_provider_name("ResourceType"),
        )
        .attribute(
            AttributeSchema::new("status", enum_of(&["ENABLED", "DISABLED"]))
                .with_provider_name("Status"),
        )
        .attribute(
            AttributeSchema::new("policy_details", list_of(policy_detail()))
                .required()
                .with_provider_name("PolicyDetails"),
        )
        .attribute(
            AttributeSchema::new(
                "resource_selection",
                AttributeType::Struct(vec![
                    StructField::new(
                        "recipes",
                        list_of(AttributeType::Struct(vec![
                            StructField::new("name", AttributeType::String).required(),
                            StructField::new("semantic_version", AttributeType::String).required(),
                        ])),
                    ),
                    StructField::new(
                        "tag_map",
                        AttributeType::Map(Box::new(AttributeType::String)),
                    ),
                ]),
            )
            .required()
            .with_provider_name("ResourceSelection"),
        )
        .attribute(tags_attribute("The tags of the lifecycle policy."))
}
