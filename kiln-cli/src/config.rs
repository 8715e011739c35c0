//! Project file loading
//!
//! A project is a JSON file with a provider block, a state backend block,
//! managed resources and data sources. Attribute values map directly onto
//! [`Value`]; an object of the form `{"ref": "<type>.<name>.<attribute>"}`
//! references another resource's attribute.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use kiln_core::resource::{Resource, ResourceId, Value};
use kiln_provider_imagebuilder::ProviderSettings;
use kiln_state::BackendConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid project file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{resource}: attribute '{attribute}': {message}")]
    Attribute {
        resource: ResourceId,
        attribute: String,
        message: String,
    },

    #[error("{0} is declared more than once")]
    Duplicate(ResourceId),

    #[error("{resource} references undeclared {binding}")]
    UnknownReference { resource: ResourceId, binding: String },

    #[error("Dependency cycle through {0}")]
    Cycle(ResourceId),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectFile {
    #[serde(default)]
    provider: ProviderSettings,
    #[serde(default)]
    backend: BackendConfig,
    #[serde(default)]
    resources: Vec<ResourceBlock>,
    #[serde(default)]
    data: Vec<ResourceBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceBlock {
    #[serde(rename = "type")]
    resource_type: String,
    name: String,
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
}

/// A loaded project
#[derive(Debug)]
pub struct Project {
    pub provider: ProviderSettings,
    pub backend: BackendConfig,
    /// Resources and data sources, dependencies first
    pub resources: Vec<Resource>,
}

impl Project {
    /// Managed resources, without data sources
    pub fn managed(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(|r| !r.is_data_source())
    }
}

pub fn load(path: &Path) -> Result<Project, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<Project, ConfigError> {
    let file: ProjectFile = serde_json::from_str(content)?;

    let mut resources = Vec::new();
    let mut seen = HashSet::new();
    let blocks = file
        .resources
        .into_iter()
        .map(|b| (b, false))
        .chain(file.data.into_iter().map(|b| (b, true)));
    for (block, read_only) in blocks {
        let resource = to_resource(block, read_only)?;
        if !seen.insert(resource.id.clone()) {
            return Err(ConfigError::Duplicate(resource.id));
        }
        resources.push(resource);
    }

    Ok(Project {
        provider: file.provider,
        backend: file.backend,
        resources: sort_by_dependencies(resources)?,
    })
}

fn to_resource(block: ResourceBlock, read_only: bool) -> Result<Resource, ConfigError> {
    let mut resource = Resource::new(block.resource_type, block.name).with_read_only(read_only);
    for (key, json) in block.attributes {
        let value = attribute_value(&json).map_err(|message| ConfigError::Attribute {
            resource: resource.id.clone(),
            attribute: key.clone(),
            message,
        })?;
        resource.attributes.insert(key, value);
    }
    Ok(resource)
}

fn attribute_value(json: &serde_json::Value) -> Result<Value, String> {
    match json {
        serde_json::Value::Null => Err("null is not a value; omit the attribute".to_string()),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| format!("{} is not an integer", n)),
        serde_json::Value::String(s) => Ok(Value::String(s.clone())),
        serde_json::Value::Array(items) => items
            .iter()
            .map(attribute_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        serde_json::Value::Object(obj) => {
            if let Some(target) = obj.get("ref") {
                if obj.len() != 1 {
                    return Err("a reference object takes only \"ref\"".to_string());
                }
                return target
                    .as_str()
                    .and_then(parse_reference)
                    .ok_or_else(|| "expected {\"ref\": \"<type>.<name>.<attribute>\"}".to_string());
            }
            obj.iter()
                .map(|(k, v)| attribute_value(v).map(|v| (k.clone(), v)))
                .collect::<Result<HashMap<_, _>, _>>()
                .map(Value::Map)
        }
    }
}

/// "image_recipe.web.arn" -> ResourceRef("image_recipe.web", "arn")
fn parse_reference(s: &str) -> Option<Value> {
    let (binding, attribute) = s.rsplit_once('.')?;
    let (resource_type, name) = binding.split_once('.')?;
    if resource_type.is_empty() || name.is_empty() || attribute.is_empty() {
        return None;
    }
    Some(Value::ResourceRef(binding.to_string(), attribute.to_string()))
}

/// Bindings a resource references
pub fn dependencies(resource: &Resource) -> BTreeSet<String> {
    let mut deps = BTreeSet::new();
    for value in resource.attributes.values() {
        collect_dependencies(value, &mut deps);
    }
    deps
}

fn collect_dependencies(value: &Value, deps: &mut BTreeSet<String>) {
    match value {
        Value::ResourceRef(binding, _) => {
            deps.insert(binding.clone());
        }
        Value::List(items) => {
            for item in items {
                collect_dependencies(item, deps);
            }
        }
        Value::Map(map) => {
            for v in map.values() {
                collect_dependencies(v, deps);
            }
        }
        _ => {}
    }
}

/// Sort resources topologically, keeping declaration order otherwise
pub fn sort_by_dependencies(resources: Vec<Resource>) -> Result<Vec<Resource>, ConfigError> {
    let by_binding: HashMap<String, &Resource> =
        resources.iter().map(|r| (r.id.binding(), r)).collect();

    for resource in &resources {
        for dep in dependencies(resource) {
            if !by_binding.contains_key(&dep) {
                return Err(ConfigError::UnknownReference {
                    resource: resource.id.clone(),
                    binding: dep,
                });
            }
        }
    }

    fn visit<'a>(
        resource: &'a Resource,
        by_binding: &HashMap<String, &'a Resource>,
        visited: &mut HashSet<String>,
        visiting: &mut HashSet<String>,
        sorted: &mut Vec<Resource>,
    ) -> Result<(), ConfigError> {
        let binding = resource.id.binding();
        if visited.contains(&binding) {
            return Ok(());
        }
        if !visiting.insert(binding.clone()) {
            return Err(ConfigError::Cycle(resource.id.clone()));
        }

        for dep in dependencies(resource) {
            if let Some(dep_resource) = by_binding.get(&dep) {
                visit(dep_resource, by_binding, visited, visiting, sorted)?;
            }
        }

        visiting.remove(&binding);
        visited.insert(binding);
        sorted.push(resource.clone());
        Ok(())
    }

    let mut sorted = Vec::with_capacity(resources.len());
    let mut visited = HashSet::new();
    let mut visiting = HashSet::new();
    for resource in &resources {
        visit(
            resource,
            &by_binding,
            &mut visited,
            &mut visiting,
            &mut sorted,
        )?;
    }
    Ok(sorted)
}
