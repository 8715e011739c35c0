//! Schema - Define type schemas for resources
//!
//! Providers define schemas for each resource type, enabling validation of
//! configuration before any API call is made.

use std::collections::HashMap;
use std::fmt;

use crate::resource::Value;

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    /// String
    String,
    /// Integer
    Int,
    /// Boolean
    Bool,
    /// Enum (list of allowed values)
    Enum(Vec<String>),
    /// Custom type (with validation function)
    Custom {
        name: String,
        base: Box<AttributeType>,
        validate: fn(&Value) -> Result<(), String>,
    },
    /// List
    List(Box<AttributeType>),
    /// Map with arbitrary keys
    Map(Box<AttributeType>),
    /// Nested block with named fields
    Struct(Vec<StructField>),
}

/// Field of a nested block
#[derive(Debug, Clone)]
pub struct StructField {
    pub name: String,
    pub field_type: AttributeType,
    pub required: bool,
}

impl StructField {
    pub fn new(name: impl Into<String>, field_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

impl AttributeType {
    /// Check if a value conforms to this type
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        match (self, value) {
            // References resolve to strings at apply time
            (
                AttributeType::String | AttributeType::Custom { .. },
                Value::ResourceRef(_, _),
            ) => Ok(()),
            (AttributeType::String, Value::String(_)) => Ok(()),
            (AttributeType::Int, Value::Int(_)) => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(variants), Value::String(s)) => {
                if variants.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: variants.clone(),
                    })
                }
            }

            (AttributeType::Custom { validate, .. }, v) => {
                validate(v).map_err(|msg| TypeError::ValidationFailed { message: msg })
            }

            (AttributeType::List(inner), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Map(inner), Value::Map(map)) => {
                for (k, v) in map {
                    inner.validate(v).map_err(|e| TypeError::MapValueError {
                        key: k.clone(),
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Struct(fields), Value::Map(map)) => {
                for field in fields {
                    match map.get(&field.name) {
                        Some(v) => {
                            field
                                .field_type
                                .validate(v)
                                .map_err(|e| TypeError::MapValueError {
                                    key: field.name.clone(),
                                    inner: Box::new(e),
                                })?
                        }
                        None if field.required => {
                            return Err(TypeError::MissingRequired {
                                name: field.name.clone(),
                            });
                        }
                        None => {}
                    }
                }
                if let Some(unknown) = map.keys().find(|k| !fields.iter().any(|f| &f.name == *k)) {
                    return Err(TypeError::UnknownAttribute {
                        name: unknown.clone(),
                    });
                }
                Ok(())
            }

            _ => Err(TypeError::TypeMismatch {
                expected: self.type_name(),
                got: value.type_name(),
            }),
        }
    }

    fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Enum(variants) => format!("Enum({})", variants.join(" | ")),
            AttributeType::Custom { name, .. } => name.clone(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
            AttributeType::Struct(_) => "Struct".to_string(),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Type error
#[derive(Debug, Clone, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid enum variant '{value}', expected one of: {}", expected.join(", "))]
    InvalidEnumVariant {
        value: String,
        expected: Vec<String>,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Required attribute '{name}' is missing")]
    MissingRequired { name: String },

    #[error("Unknown attribute '{name}'")]
    UnknownAttribute { name: String },

    #[error("Attribute '{name}' is computed and cannot be set")]
    ComputedAttribute { name: String },

    #[error("Attributes '{name}' and '{other}' cannot both be set")]
    ConflictingAttributes { name: String, other: String },

    #[error("List item at index {index}: {inner}")]
    ListItemError { index: usize, inner: Box<TypeError> },

    #[error("Map value for key '{key}': {inner}")]
    MapValueError { key: String, inner: Box<TypeError> },
}

impl Value {
    fn type_name(&self) -> String {
        match self {
            Value::String(_) => "String".to_string(),
            Value::Int(_) => "Int".to_string(),
            Value::Bool(_) => "Bool".to_string(),
            Value::List(_) => "List".to_string(),
            Value::Map(_) => "Map".to_string(),
            Value::ResourceRef(binding, attr) => format!("ResourceRef({}.{})", binding, attr),
        }
    }
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    /// Set by the remote API only (e.g., "arn", "date_created")
    pub computed: bool,
    /// Changing this attribute requires replacing the resource
    pub create_only: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
    /// Provider-side property name (e.g., "ImageRecipeArn")
    pub provider_name: Option<String>,
    /// Attributes that must not be set together with this one
    pub conflicts_with: Vec<String>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            computed: false,
            create_only: false,
            default: None,
            description: None,
            provider_name: None,
            conflicts_with: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn create_only(mut self) -> Self {
        self.create_only = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = Some(name.into());
        self
    }

    pub fn conflicts_with(mut self, name: impl Into<String>) -> Self {
        self.conflicts_with.push(name.into());
        self
    }
}

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: HashMap<String, AttributeSchema>,
    pub description: Option<String>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: HashMap::new(),
            description: None,
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Whether a change to `name` forces replacement
    pub fn is_create_only(&self, name: &str) -> bool {
        self.attributes.get(name).is_some_and(|a| a.create_only)
    }

    /// Whether `name` is set by the remote API only
    pub fn is_computed(&self, name: &str) -> bool {
        self.attributes.get(name).is_some_and(|a| a.computed)
    }

    /// Validate resource attributes
    pub fn validate(&self, attributes: &HashMap<String, Value>) -> Result<(), Vec<TypeError>> {
        let mut errors = Vec::new();

        // Check required attributes
        for (name, schema) in &self.attributes {
            if schema.required && !attributes.contains_key(name) && schema.default.is_none() {
                errors.push(TypeError::MissingRequired { name: name.clone() });
            }
        }

        // Type check each attribute
        for (name, value) in attributes {
            match self.attributes.get(name) {
                Some(schema) if schema.computed => {
                    errors.push(TypeError::ComputedAttribute { name: name.clone() });
                }
                Some(schema) => {
                    if let Err(e) = schema.attr_type.validate(value) {
                        errors.push(TypeError::MapValueError {
                            key: name.clone(),
                            inner: Box::new(e),
                        });
                    }
                }
                None => errors.push(TypeError::UnknownAttribute { name: name.clone() }),
            }
        }

        // Each conflicting pair is reported once
        for name in attributes.keys() {
            let Some(schema) = self.attributes.get(name) else {
                continue;
            };
            for other in &schema.conflicts_with {
                let reported = self
                    .attributes
                    .get(other)
                    .is_some_and(|o| o.conflicts_with.contains(name))
                    && other < name;
                if attributes.contains_key(other) && !reported {
                    errors.push(TypeError::ConflictingAttributes {
                        name: name.clone(),
                        other: other.clone(),
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate the lookup attributes of a data source
    ///
    /// Data sources may set computed attributes (e.g. `arn`) to select the
    /// remote object, and nothing is required.
    pub fn validate_lookup(&self, attributes: &HashMap<String, Value>) -> Result<(), Vec<TypeError>> {
        let errors: Vec<TypeError> = attributes
            .iter()
            .filter_map(|(name, value)| match self.attributes.get(name) {
                Some(schema) => schema.attr_type.validate(value).err(),
                None => Some(TypeError::UnknownAttribute { name: name.clone() }),
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Helper functions for common types
pub mod types {
    use super::*;

    /// Positive integer type
    pub fn positive_int() -> AttributeType {
        AttributeType::Custom {
            name: "PositiveInt".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| {
                if let Value::Int(n) = value {
                    if *n > 0 {
                        Ok(())
                    } else {
                        Err("Value must be positive".to_string())
                    }
                } else {
                    Err("Expected integer".to_string())
                }
            },
        }
    }

    /// ARN type (e.g., "arn:aws:imagebuilder:us-east-1:123456789012:component/x/1.0.0/1")
    pub fn arn() -> AttributeType {
        AttributeType::Custom {
            name: "Arn".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| {
                if let Value::String(s) = value {
                    validate_arn(s)
                } else {
                    Err("Expected string".to_string())
                }
            },
        }
    }

    /// String tag map
    pub fn tags() -> AttributeType {
        AttributeType::Map(Box::new(AttributeType::String))
    }
}

/// Validate ARN format: arn:partition:service:region:account-id:resource
pub fn validate_arn(arn: &str) -> Result<(), String> {
    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    if parts.len() != 6 || parts[0] != "arn" {
        return Err(format!(
            "Invalid ARN '{}': expected arn:partition:service:region:account:resource",
            arn
        ));
    }
    if parts[1].is_empty() {
        return Err(format!("Invalid ARN '{}': empty partition", arn));
    }
    if parts[2].is_empty() {
        return Err(format!("Invalid ARN '{}': empty service", arn));
    }
    if parts[5].is_empty() {
        return Err(format!("Invalid ARN '{}': empty resource", arn));
    }
    Ok(())
}
