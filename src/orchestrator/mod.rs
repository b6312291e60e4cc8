//! Orchestrator module - PLAN/ACT/JUDGE reasoning over a tool registry
//!
//! Three stateless reasoning stages (Planner, Executor, Judge) coordinated
//! by a state machine with multi-dimensional budgets and ASK_USER
//! suspension. The machine owns no global state: the provider, registry,
//! and telemetry sink arrive as explicit dependencies.

mod executor;
mod judge;
mod planner;
mod state;
mod state_machine;
mod types;

pub use executor::{normalize_params, ActOutcome, Executor};
pub use judge::Judge;
pub use planner::Planner;
pub use state::{render_value, ExecutionState, StepError};
pub use state_machine::Orchestrator;
pub use types::{
    ActiveTask, AskExpects, AskUserPending, JudgeVerdict, OrchestrationResult, Plan, PlanStep,
    SliceStatus, StepKind, USER_INPUT_KEYS,
};
