//! Planning and plan execution
//!
//! References between resources are resolved through bindings: a map from
//! "type.name" to the attributes known for that resource. At plan time a
//! binding holds the refreshed state of resources that stay in place; a
//! resource about to be created or replaced only exposes its desired
//! attributes, so references to its computed attributes stay unresolved
//! until apply.

use std::collections::{HashMap, HashSet};

use log::{debug, info};
use tokio_util::sync::CancellationToken;

use kiln_core::differ::{self, Diff};
use kiln_core::effect::Effect;
use kiln_core::interpreter::{EffectOutcome, Interpreter};
use kiln_core::plan::Plan;
use kiln_core::provider::{ErrorKind, Provider, ProviderError, ProviderResult};
use kiln_core::resource::{Resource, ResourceId, State, Value};
use kiln_core::schema::ResourceSchema;

use crate::config;
use crate::session::Session;

pub type Bindings = HashMap<String, HashMap<String, Value>>;

pub fn schema_map(provider: &dyn Provider) -> HashMap<String, ResourceSchema> {
    provider
        .resource_types()
        .into_iter()
        .map(|t| (t.name().to_string(), t.schema()))
        .collect()
}

pub fn resolve_ref_value(value: &Value, bindings: &Bindings) -> Value {
    match value {
        Value::ResourceRef(binding, attribute) => {
            if let Some(attrs) = bindings.get(binding)
                && let Some(resolved) = attrs.get(attribute)
                && !resolved.has_refs()
            {
                return resolved.clone();
            }
            value.clone()
        }
        Value::List(items) => Value::List(
            items
                .iter()
                .map(|v| resolve_ref_value(v, bindings))
                .collect(),
        ),
        Value::Map(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_ref_value(v, bindings)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

pub fn resolve_resource(resource: &Resource, bindings: &Bindings) -> Resource {
    let mut resolved = resource.clone();
    for value in resolved.attributes.values_mut() {
        *value = resolve_ref_value(value, bindings);
    }
    resolved
}

/// Desired attributes overlaid with everything else the state knows
fn merged_binding(desired: &HashMap<String, Value>, state: &State) -> HashMap<String, Value> {
    let mut attrs = desired.clone();
    for (k, v) in &state.attributes {
        attrs.entry(k.clone()).or_insert_with(|| v.clone());
    }
    attrs
}

pub struct Planned {
    pub plan: Plan,
    /// Bindings known before anything is applied
    pub bindings: Bindings,
}

/// Build the plan for `resources` (dependencies first) against the
/// refreshed `current` state. Data sources are looked up here.
pub async fn plan(
    provider: &dyn Provider,
    resources: &[Resource],
    current: &[State],
    tainted: &HashSet<ResourceId>,
) -> ProviderResult<Planned> {
    let schemas = schema_map(provider);
    let by_id: HashMap<&ResourceId, &State> = current.iter().map(|s| (&s.id, s)).collect();
    let mut bindings = Bindings::new();
    let mut desired = Vec::with_capacity(resources.len());

    for resource in resources {
        let resolved = resolve_resource(resource, &bindings);
        let binding = resource.id.binding();

        if resource.is_data_source() {
            if let Some(dep) = first_unresolved(&resolved) {
                return Err(ProviderError::validation(format!(
                    "Data source lookup depends on {}, which is not known until apply",
                    dep
                ))
                .for_resource(resource.id.clone()));
            }
            let state = provider.read_data_source(&resolved).await?;
            debug!("Data source {} resolved to {:?}", resource.id, state.identifier);
            bindings.insert(binding, merged_binding(&resolved.attributes, &state));
            desired.push(resolved);
            continue;
        }

        let prepared = provider.prepare(&resolved);
        let state = by_id
            .get(&resource.id)
            .map(|s| (*s).clone())
            .unwrap_or_else(|| State::not_found(resource.id.clone()));
        let changes_handle = tainted.contains(&resource.id)
            || matches!(
                differ::diff(&prepared, &state, schemas.get(&resource.id.resource_type)),
                Diff::Create(_) | Diff::Replace { .. }
            );
        let attrs = if changes_handle {
            prepared.attributes.clone()
        } else {
            merged_binding(&prepared.attributes, &state)
        };
        bindings.insert(binding, attrs);
        desired.push(prepared);
    }

    Ok(Planned {
        plan: differ::create_plan(&desired, current, &schemas, tainted),
        bindings,
    })
}

/// A binding the resource still references after resolution
fn first_unresolved(resource: &Resource) -> Option<String> {
    config::dependencies(resource).into_iter().next()
}

fn resolve_effect(effect: &Effect, bindings: &Bindings) -> Effect {
    match effect {
        Effect::Read { resource } => Effect::Read {
            resource: resolve_resource(resource, bindings),
        },
        Effect::Create(resource) => Effect::Create(resolve_resource(resource, bindings)),
        Effect::Update {
            id,
            from,
            to,
            changed_attributes,
        } => Effect::Update {
            id: id.clone(),
            from: from.clone(),
            to: resolve_resource(to, bindings),
            changed_attributes: changed_attributes.clone(),
        },
        Effect::Delete { .. } => effect.clone(),
    }
}

fn state_write_error(e: impl std::error::Error + Send + Sync + 'static) -> ProviderError {
    ProviderError::new(format!("Failed to write state: {}", e)).with_cause(e)
}

/// Execute `plan` effect by effect, writing state after each one.
///
/// References are re-resolved against the live bindings before each effect.
/// Stops at the first failure or when `cancel` fires; `report` sees every
/// effect that ran, with its error if it failed. Returns the number of
/// effects applied.
pub async fn execute<P: Provider>(
    interpreter: &Interpreter<P>,
    plan: &Plan,
    bindings: &mut Bindings,
    session: &Session,
    cancel: &CancellationToken,
    mut report: impl FnMut(&Effect, Option<&ProviderError>),
) -> ProviderResult<usize> {
    let mut applied = 0;

    for effect in plan.effects() {
        if cancel.is_cancelled() {
            return Err(ProviderError::new("Apply interrupted").with_kind(ErrorKind::Cancelled));
        }

        let effect = resolve_effect(effect, bindings);
        let desired = match &effect {
            Effect::Read { resource } | Effect::Create(resource) => Some(resource),
            Effect::Update { to, .. } => Some(to),
            Effect::Delete { .. } => None,
        };
        if let Some(resource) = desired
            && let Some(dep) = first_unresolved(resource)
        {
            let err = ProviderError::new(format!("Depends on {}, which has no value", dep))
                .for_resource(resource.id.clone());
            report(&effect, Some(&err));
            return Err(err);
        }

        info!("Applying {} {}", effect.kind(), effect.resource_id());
        let outcome = match interpreter.execute(&effect, session).await {
            Ok(outcome) => outcome,
            Err(e) => {
                report(&effect, Some(&e));
                return Err(e);
            }
        };

        match (&outcome, desired) {
            (EffectOutcome::Created { state } | EffectOutcome::Updated { state }, Some(resource)) => {
                session
                    .save(state, &resource.attributes)
                    .await
                    .map_err(state_write_error)?;
                let mut attrs = resource.attributes.clone();
                attrs.extend(state.attributes.clone());
                bindings.insert(resource.id.binding(), attrs);
            }
            (EffectOutcome::Read { state }, Some(resource)) => {
                bindings.insert(
                    resource.id.binding(),
                    merged_binding(&resource.attributes, state),
                );
            }
            (EffectOutcome::Deleted { id }, _) => {
                session.forget(id).await.map_err(state_write_error)?;
            }
            _ => {}
        }

        report(&effect, None);
        applied += 1;
    }

    Ok(applied)
}
