//! Conductor System
//!
//! Interprets model proposals, validates step graphs and executes them.

pub mod context;
pub mod evaluator;
pub mod executor;
pub mod graph;
pub mod planner;
pub mod project;
pub mod types;

pub use context::ContextAssembler;
pub use evaluator::Evaluator;
pub use executor::{Executor, StepDispatcher};
pub use graph::PlanValidationError;
pub use planner::{execute_plan_schema, interpret, Proposal, EXECUTE_PLAN};
pub use project::{ProjectIdentity, ProjectSummary};
pub use types::{Complexity, ExecutionReport, Plan, Step, StepOutcome, StepStatus};
