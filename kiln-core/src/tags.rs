//! Tags - Key/value tag sets and their reconciliation
//!
//! Updating tags never rewrites the whole set: the difference between the old
//! and new sets is computed and submitted as one add/remove request.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::resource::Value;

/// Prefix reserved for tags managed by AWS itself
pub const SYSTEM_TAG_PREFIX: &str = "aws:";

/// An ordered set of tags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValueTags(BTreeMap<String, String>);

impl KeyValueTags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an attribute value; non-string entries are skipped
    pub fn from_value(value: Option<&Value>) -> Self {
        let mut tags = BTreeMap::new();
        if let Some(Value::Map(map)) = value {
            for (key, value) in map {
                if let Value::String(v) = value {
                    tags.insert(key.clone(), v.clone());
                }
            }
        }
        Self(tags)
    }

    /// Build from a JSON object; non-string entries are skipped
    pub fn from_json(value: Option<&serde_json::Value>) -> Self {
        let mut tags = BTreeMap::new();
        if let Some(serde_json::Value::Object(obj)) = value {
            for (key, value) in obj {
                if let Some(v) = value.as_str() {
                    tags.insert(key.clone(), v.to_string());
                }
            }
        }
        Self(tags)
    }

    pub fn to_value(&self) -> Value {
        Value::Map(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        )
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tags present here but absent from `new`
    pub fn removed(&self, new: &KeyValueTags) -> KeyValueTags {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| !new.0.contains_key(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Tags in `new` that are absent here or carry a different value
    pub fn updated(&self, new: &KeyValueTags) -> KeyValueTags {
        Self(
            new.0
                .iter()
                .filter(|(k, v)| self.0.get(*k) != Some(*v))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Add/remove operations turning `self` into `new`
    pub fn diff(&self, new: &KeyValueTags) -> TagDiff {
        TagDiff {
            set: self.updated(new),
            remove: self.removed(new).keys(),
        }
    }

    /// Drop tags with the reserved `aws:` prefix
    pub fn ignore_system(&self) -> KeyValueTags {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| !k.starts_with(SYSTEM_TAG_PREFIX))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Drop tags matched by the ignore configuration
    pub fn ignore(&self, config: &IgnoreConfig) -> KeyValueTags {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| !config.matches(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Merge `self` on top of `defaults`; keys in `self` win
    pub fn merge_onto(&self, defaults: &KeyValueTags) -> KeyValueTags {
        let mut merged = defaults.0.clone();
        for (k, v) in &self.0 {
            merged.insert(k.clone(), v.clone());
        }
        Self(merged)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for KeyValueTags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Minimal tag change set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    /// Tags to add or overwrite
    pub set: KeyValueTags,
    /// Keys to remove
    pub remove: Vec<String>,
}

impl TagDiff {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }
}

/// Tags the provider should neither report nor manage
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    pub keys: Vec<String>,
    pub key_prefixes: Vec<String>,
}

impl IgnoreConfig {
    pub fn matches(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key) || self.key_prefixes.iter().any(|p| key.starts_with(p))
    }
}
