//! Differ - Compare desired state with current state to generate a Plan
//!
//! Compares the "desired state" declared in configuration with the "current
//! state" fetched from the Provider, and generates a list of required Effects
//! (Plan).

use std::collections::{HashMap, HashSet};

use crate::effect::Effect;
use crate::plan::Plan;
use crate::resource::{Resource, ResourceId, State, Value};
use crate::schema::ResourceSchema;

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create(Resource),
    /// Resource exists with differences -> needs update
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// A create-only attribute changed -> delete and create again
    Replace {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with no differences -> no action needed
    NoChange(ResourceId),
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange(_))
    }
}

/// Compare desired state with current state to compute a Diff
pub fn diff(desired: &Resource, current: &State, schema: Option<&ResourceSchema>) -> Diff {
    if !current.exists {
        return Diff::Create(desired.clone());
    }

    let changed = find_changed_attributes(&desired.attributes, &current.attributes, schema);

    if changed.is_empty() {
        return Diff::NoChange(desired.id.clone());
    }

    let replace = schema.is_some_and(|s| changed.iter().any(|name| s.is_create_only(name)));
    if replace {
        Diff::Replace {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    } else {
        Diff::Update {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    }
}

/// Find changed attributes between desired and current state
fn find_changed_attributes(
    desired: &HashMap<String, Value>,
    current: &HashMap<String, Value>,
    schema: Option<&ResourceSchema>,
) -> Vec<String> {
    let mut changed: Vec<String> = desired
        .iter()
        .filter(|(key, _)| !key.starts_with('_'))
        .filter(|(key, _)| !schema.is_some_and(|s| s.is_computed(key)))
        .filter(|(key, desired_value)| current.get(*key) != Some(*desired_value))
        .map(|(key, _)| key.clone())
        .collect();

    // Tags removed from configuration entirely still need reconciling
    if !desired.contains_key("tags")
        && let Some(Value::Map(tags)) = current.get("tags")
        && !tags.is_empty()
    {
        changed.push("tags".to_string());
    }

    changed.sort();
    changed
}

/// Compute Diffs for all resources and generate a Plan
///
/// `current` holds the refreshed state of every resource known to the state
/// file, in state order. Resources in `tainted` were recorded before their
/// provisioning finished and are replaced.
pub fn create_plan(
    desired: &[Resource],
    current: &[State],
    schemas: &HashMap<String, ResourceSchema>,
    tainted: &HashSet<ResourceId>,
) -> Plan {
    let mut plan = Plan::new();

    let declared: HashSet<&ResourceId> = desired.iter().map(|r| &r.id).collect();
    let by_id: HashMap<&ResourceId, &State> = current.iter().map(|s| (&s.id, s)).collect();

    // Orphans first, newest first, so dependents go before what they use
    for state in current.iter().rev() {
        if declared.contains(&state.id) || !state.exists {
            continue;
        }
        if let Some(identifier) = &state.identifier {
            plan.add(Effect::Delete {
                id: state.id.clone(),
                identifier: identifier.clone(),
            });
        }
    }

    for resource in desired {
        if resource.is_data_source() {
            plan.add(Effect::Read {
                resource: resource.clone(),
            });
            continue;
        }

        let current = by_id
            .get(&resource.id)
            .map(|s| (*s).clone())
            .unwrap_or_else(|| State::not_found(resource.id.clone()));

        if tainted.contains(&resource.id) && current.exists {
            add_replacement(&mut plan, &current, resource);
            continue;
        }

        match diff(resource, &current, schemas.get(&resource.id.resource_type)) {
            Diff::Create(r) => plan.add(Effect::Create(r)),
            Diff::Update {
                id,
                from,
                to,
                changed_attributes,
            } => plan.add(Effect::Update {
                id,
                from,
                to,
                changed_attributes,
            }),
            Diff::Replace { from, to, .. } => add_replacement(&mut plan, &from, &to),
            Diff::NoChange(_) => {}
        }
    }

    plan
}

fn add_replacement(plan: &mut Plan, from: &State, to: &Resource) {
    if let Some(identifier) = &from.identifier {
        plan.add(Effect::Delete {
            id: from.id.clone(),
            identifier: identifier.clone(),
        });
    }
    plan.add(Effect::Create(to.clone()));
}
