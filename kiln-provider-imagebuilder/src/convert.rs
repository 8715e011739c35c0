//! Conversion between configuration attributes and API documents
//!
//! Configuration uses snake_case names; the API uses CloudFormation-style
//! PascalCase properties. Top-level names come from the schema's
//! `provider_name`, nested block fields are converted with `heck`, and map
//! keys (tags, AMI tags) are user data and kept as-is.

use std::collections::HashMap;

use heck::ToPascalCase;
use kiln_core::provider::{ProviderError, ProviderResult};
use kiln_core::resource::{Resource, State, Value};
use kiln_core::schema::{AttributeSchema, AttributeType, ResourceSchema};

use crate::api::PatchOperation;

/// Name reserved for the tag map; tags travel through the tagging API
pub const TAGS: &str = "tags";

/// Provider-side property name of an attribute
pub fn provider_name(attr: &AttributeSchema) -> String {
    attr.provider_name
        .clone()
        .unwrap_or_else(|| attr.name.to_pascal_case())
}

/// Build the desired-state document of a resource, without tags.
///
/// Computed attributes are never sent. Absent attributes with a schema
/// default are sent with the default.
pub fn expand(
    resource: &Resource,
    schema: &ResourceSchema,
) -> ProviderResult<serde_json::Map<String, serde_json::Value>> {
    let mut desired = serde_json::Map::new();

    for (name, attr) in &schema.attributes {
        if name == TAGS || attr.computed {
            continue;
        }
        let value = match (resource.attributes.get(name), &attr.default) {
            (Some(value), _) => value,
            (None, Some(default)) => default,
            (None, None) => continue,
        };
        let json = expand_value(value, &attr.attr_type).ok_or_else(|| unresolved(resource, name))?;
        desired.insert(provider_name(attr), json);
    }

    Ok(desired)
}

fn unresolved(resource: &Resource, name: &str) -> ProviderError {
    ProviderError::validation(format!(
        "Attribute '{}' holds an unresolved reference",
        name
    ))
    .for_resource(resource.id.clone())
}

/// Convert one attribute value; `None` if it still holds a reference
pub fn expand_value(value: &Value, attr_type: &AttributeType) -> Option<serde_json::Value> {
    if value.has_refs() {
        return None;
    }
    match (attr_type, value) {
        (AttributeType::Custom { base, .. }, v) => expand_value(v, base),
        (AttributeType::List(inner), Value::List(items)) => items
            .iter()
            .map(|item| expand_value(item, inner))
            .collect::<Option<Vec<_>>>()
            .map(serde_json::Value::Array),
        (AttributeType::Struct(fields), Value::Map(map)) => {
            let mut obj = serde_json::Map::new();
            for field in fields {
                if let Some(v) = map.get(&field.name) {
                    obj.insert(field.name.to_pascal_case(), expand_value(v, &field.field_type)?);
                }
            }
            Some(serde_json::Value::Object(obj))
        }
        _ => value.to_json(),
    }
}

/// Convert a snapshot into attributes, dropping unknown properties
pub fn flatten(props: &serde_json::Value, schema: &ResourceSchema) -> HashMap<String, Value> {
    schema
        .attributes
        .iter()
        .filter_map(|(name, attr)| {
            let json = props.get(provider_name(attr))?;
            flatten_value(json, &attr.attr_type).map(|v| (name.clone(), v))
        })
        .collect()
}

fn flatten_value(json: &serde_json::Value, attr_type: &AttributeType) -> Option<Value> {
    match (attr_type, json) {
        (AttributeType::Custom { base, .. }, j) => flatten_value(j, base),
        (AttributeType::List(inner), serde_json::Value::Array(items)) => Some(Value::List(
            items.iter().filter_map(|i| flatten_value(i, inner)).collect(),
        )),
        (AttributeType::Struct(fields), serde_json::Value::Object(obj)) => {
            let map: HashMap<String, Value> = fields
                .iter()
                .filter_map(|field| {
                    let j = obj.get(&field.name.to_pascal_case())?;
                    flatten_value(j, &field.field_type).map(|v| (field.name.clone(), v))
                })
                .collect();
            Some(Value::Map(map))
        }
        _ => Value::from_json(json),
    }
}

/// JSON Patch for the mutable, non-tag attributes that differ
///
/// Attributes dropped from configuration keep their remote value, matching
/// the differ, which only compares configured attributes.
pub fn patch_document(
    from: &State,
    to: &Resource,
    schema: &ResourceSchema,
) -> ProviderResult<Vec<PatchOperation>> {
    let mut names: Vec<&String> = schema.attributes.keys().collect();
    names.sort();

    let mut ops = Vec::new();
    for name in names {
        let attr = &schema.attributes[name];
        if name == TAGS || attr.computed || attr.create_only {
            continue;
        }
        let Some(desired) = to.attributes.get(name) else {
            continue;
        };
        let current = from.attributes.get(name);
        if current == Some(desired) {
            continue;
        }
        let path = format!("/{}", provider_name(attr));
        let json = expand_value(desired, &attr.attr_type).ok_or_else(|| unresolved(to, name))?;
        if current.is_some() {
            ops.push(PatchOperation::replace(path, json));
        } else {
            ops.push(PatchOperation::add(path, json));
        }
    }
    Ok(ops)
}
