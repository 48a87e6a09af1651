//! Conductor data types: steps, plans and execution reports

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use sdk::ToolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::graph::{self, PlanValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Ready => "ready",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    /// Classification used when the model doesn't give one
    pub fn from_step_count(count: usize) -> Self {
        match count {
            0..=2 => Complexity::Simple,
            3..=5 => Complexity::Moderate,
            _ => Complexity::Complex,
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
        })
    }
}

/// One planned tool invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub id: String,
    /// Tool name
    pub action: String,
    pub args: Map<String, Value>,
    pub dependencies: BTreeSet<String>,
    pub description: Option<String>,
    /// Failure of an optional step doesn't count against the goal
    pub optional: bool,
    pub status: StepStatus,
    pub result: Option<Value>,
    pub error: Option<ToolError>,
}

impl Step {
    pub fn new(id: impl Into<String>, action: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            args: match args {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            dependencies: BTreeSet::new(),
            description: None,
            optional: false,
            status: StepStatus::Pending,
            result: None,
            error: None,
        }
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Short human label: the description, or `action` when there is none
    pub fn label(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.action)
    }
}

/// A validated step graph. Steps are kept in declared order; edges are the
/// dependency id sets on each step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub goal: String,
    pub complexity: Complexity,
    steps: Vec<Step>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Plan {
    /// Build and validate a plan. Rejects empty plans, duplicate ids, unknown
    /// or self dependencies, cycles, and `$step` references to steps that
    /// aren't declared dependencies.
    pub fn new(
        goal: impl Into<String>,
        complexity: Option<Complexity>,
        steps: Vec<Step>,
    ) -> Result<Self, PlanValidationError> {
        let index = graph::validate(&steps)?;
        Ok(Self {
            goal: goal.into(),
            complexity: complexity.unwrap_or_else(|| Complexity::from_step_count(steps.len())),
            steps,
            index,
        })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Step> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    pub(crate) fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub(crate) fn step_mut(&mut self, position: usize) -> &mut Step {
        &mut self.steps[position]
    }

    pub fn status(&self, id: &str) -> Option<StepStatus> {
        self.get(id).map(|s| s.status)
    }
}

/// Final state of one step, as reported back to the loop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub step_id: String,
    pub action: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

/// Outcome of running a plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub goal: String,
    /// Per-step outcome in declared order
    pub steps: Vec<StepOutcome>,
    pub goal_achieved: bool,
    pub interrupted: bool,
}

impl ExecutionReport {
    pub fn status(&self, id: &str) -> Option<StepStatus> {
        self.steps.iter().find(|s| s.step_id == id).map(|s| s.status)
    }

    /// Results of succeeded steps, in declared order
    pub fn results(&self) -> Vec<(&str, &Value)> {
        self.steps
            .iter()
            .filter_map(|s| s.result.as_ref().map(|r| (s.step_id.as_str(), r)))
            .collect()
    }

    /// Errors of failed steps, in declared order
    pub fn errors(&self) -> Vec<(&str, &ToolError)> {
        self.steps
            .iter()
            .filter_map(|s| s.error.as_ref().map(|e| (s.step_id.as_str(), e)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_complexity_from_step_count() {
        assert_eq!(Complexity::from_step_count(1), Complexity::Simple);
        assert_eq!(Complexity::from_step_count(2), Complexity::Simple);
        assert_eq!(Complexity::from_step_count(5), Complexity::Moderate);
        assert_eq!(Complexity::from_step_count(6), Complexity::Complex);
    }

    #[test]
    fn test_plan_derives_complexity_and_indexes_steps() {
        let plan = Plan::new(
            "read things",
            None,
            vec![
                Step::new("a", "file_read", json!({"path": "a.txt"})),
                Step::new("b", "file_read", json!({"path": "b.txt"})).depends_on("a"),
                Step::new("c", "list_dir", json!({})),
            ],
        )
        .unwrap();

        assert_eq!(plan.complexity, Complexity::Moderate);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.get("b").unwrap().args["path"], "b.txt");
        assert_eq!(plan.status("c"), Some(StepStatus::Pending));
        assert!(plan.get("zzz").is_none());
    }

    #[test]
    fn test_explicit_complexity_wins() {
        let plan = Plan::new(
            "one",
            Some(Complexity::Complex),
            vec![Step::new("a", "list_dir", json!({}))],
        )
        .unwrap();
        assert_eq!(plan.complexity, Complexity::Complex);
    }

    #[test]
    fn test_status_terminality() {
        assert!(!StepStatus::Running.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert_eq!(StepStatus::Succeeded.to_string(), "succeeded");
    }
}
