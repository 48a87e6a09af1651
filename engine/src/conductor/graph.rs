//! Step graph validation and `$step` argument references
//!
//! A step argument may embed the result of an earlier step:
//! `{"$step": "<id>"}` is replaced by that step's whole result and
//! `{"$step": "<id>", "pointer": "/json/pointer"}` by the pointed-at value.
//! References are only legal to declared dependencies, so by the time a step
//! runs every value it references exists.

use std::collections::{HashMap, HashSet, VecDeque};

use sdk::{EngineError, ToolError};
use serde_json::{Map, Value};
use thiserror::Error;

use super::types::Step;

/// Key marking a reference object inside step arguments
pub const STEP_REF_KEY: &str = "$step";
const POINTER_KEY: &str = "pointer";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlanValidationError {
    #[error("plan has no steps")]
    Empty,

    #[error("duplicate step id `{0}`")]
    DuplicateStep(String),

    #[error("step `{step}` depends on unknown step `{dependency}`")]
    UnknownDependency { step: String, dependency: String },

    #[error("step `{0}` depends on itself")]
    SelfDependency(String),

    #[error("dependency cycle among steps `{0}`")]
    Cycle(String),

    #[error("step `{step}` references `{reference}`, which is not one of its dependencies")]
    UndeclaredReference { step: String, reference: String },

    #[error("step `{step}` uses unknown tool `{tool}`")]
    UnknownTool { step: String, tool: String },

    #[error("malformed proposal: {0}")]
    Malformed(String),
}

impl From<PlanValidationError> for EngineError {
    fn from(err: PlanValidationError) -> Self {
        EngineError::PlanValidation(err.to_string())
    }
}

/// Validate a step list and build its id index
pub fn validate(steps: &[Step]) -> Result<HashMap<String, usize>, PlanValidationError> {
    if steps.is_empty() {
        return Err(PlanValidationError::Empty);
    }

    let mut index = HashMap::with_capacity(steps.len());
    for (position, step) in steps.iter().enumerate() {
        if index.insert(step.id.clone(), position).is_some() {
            return Err(PlanValidationError::DuplicateStep(step.id.clone()));
        }
    }

    for step in steps {
        for dependency in &step.dependencies {
            if dependency == &step.id {
                return Err(PlanValidationError::SelfDependency(step.id.clone()));
            }
            if !index.contains_key(dependency) {
                return Err(PlanValidationError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
        for reference in references(&Value::Object(step.args.clone())) {
            if !step.dependencies.contains(&reference) {
                return Err(PlanValidationError::UndeclaredReference {
                    step: step.id.clone(),
                    reference,
                });
            }
        }
    }

    check_acyclic(steps, &index)?;
    Ok(index)
}

/// Peel off steps whose dependencies are all peeled, in declared order.
/// Whatever is left waits on a cycle.
fn check_acyclic(
    steps: &[Step],
    index: &HashMap<String, usize>,
) -> Result<(), PlanValidationError> {
    let mut in_degree: Vec<usize> = steps.iter().map(|s| s.dependencies.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (position, step) in steps.iter().enumerate() {
        for dependency in &step.dependencies {
            if let Some(&upstream) = index.get(dependency) {
                dependents[upstream].push(position);
            }
        }
    }

    let mut ready: VecDeque<usize> = (0..steps.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut peeled = 0;
    while let Some(position) = ready.pop_front() {
        peeled += 1;
        for &next in &dependents[position] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if peeled == steps.len() {
        return Ok(());
    }
    let stuck: Vec<&str> = steps
        .iter()
        .zip(&in_degree)
        .filter(|(_, degree)| **degree > 0)
        .map(|(step, _)| step.id.as_str())
        .collect();
    Err(PlanValidationError::Cycle(stuck.join(", ")))
}

/// The step id if `value` is a reference object
fn as_reference(map: &Map<String, Value>) -> Option<&str> {
    let id = map.get(STEP_REF_KEY)?.as_str()?;
    let only_ref_keys = map.keys().all(|k| k == STEP_REF_KEY || k == POINTER_KEY);
    only_ref_keys.then_some(id)
}

/// Every step id referenced anywhere inside `value`
pub fn references(value: &Value) -> Vec<String> {
    let mut found = Vec::new();
    collect_references(value, &mut found);
    found
}

fn collect_references(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::Object(map) => match as_reference(map) {
            Some(id) => found.push(id.to_string()),
            None => map.values().for_each(|v| collect_references(v, found)),
        },
        Value::Array(items) => items.iter().for_each(|v| collect_references(v, found)),
        _ => {}
    }
}

/// Replace every reference inside `value` with the referenced result.
///
/// A reference to a step without a result, or a pointer that doesn't resolve,
/// is `InvalidArgs`.
pub fn resolve(value: &Value, results: &HashMap<String, Value>) -> Result<Value, ToolError> {
    match value {
        Value::Object(map) => match as_reference(map) {
            Some(id) => {
                let result = results.get(id).ok_or_else(|| {
                    ToolError::invalid_args(format!("step `{}` has no result to reference", id))
                })?;
                match map.get(POINTER_KEY) {
                    None => Ok(result.clone()),
                    Some(Value::String(pointer)) => {
                        result.pointer(pointer).cloned().ok_or_else(|| {
                            ToolError::invalid_args(format!(
                                "pointer `{}` not found in the result of step `{}`",
                                pointer, id
                            ))
                        })
                    }
                    Some(_) => Err(ToolError::invalid_args(format!(
                        "pointer in reference to step `{}` must be a string",
                        id
                    ))),
                }
            }
            None => {
                let mut resolved = Map::with_capacity(map.len());
                for (key, inner) in map {
                    resolved.insert(key.clone(), resolve(inner, results)?);
                }
                Ok(Value::Object(resolved))
            }
        },
        Value::Array(items) => items
            .iter()
            .map(|v| resolve(v, results))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

/// Ids of every step that transitively depends on `root`, in declared order
pub fn transitive_dependents(steps: &[Step], root: &str) -> Vec<String> {
    let mut tainted: HashSet<&str> = HashSet::from([root]);
    loop {
        let before = tainted.len();
        for step in steps {
            if step.dependencies.iter().any(|d| tainted.contains(d.as_str())) {
                tainted.insert(step.id.as_str());
            }
        }
        if tainted.len() == before {
            break;
        }
    }
    steps
        .iter()
        .filter(|s| s.id != root && tainted.contains(s.id.as_str()))
        .map(|s| s.id.clone())
        .collect()
}
