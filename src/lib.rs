//! FlowRunner - Embeddable Process Workflow Engine
//!
//! Executes process graphs (tasks, gateways, timer and message events,
//! sub-processes) inside a host application. The engine is single-threaded
//! and never blocks: the host drives it by calling the step loop, polling
//! timers, and delivering messages, and may suspend a workflow to a
//! snapshot at any point.
//!
//! # Architecture
//!
//! The library is organized into these modules:
//!
//! - [`spec`]: Immutable process graphs and their validation
//! - [`task`]: Task instances, the task tree, and the lifecycle state machine
//! - [`schedule`]: Timer definitions, occurrence state, and clocks
//! - [`execution`]: The workflow aggregate and every host-facing operation
//! - [`snapshot`]: Versioned save/restore
//! - [`script`]: The injected expression and script evaluator
//! - [`config`]: Engine tunables
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flowrunner::{EventDefinition, ProcessSpec, Workflow};
//! # use flowrunner::{ScriptEngine, ScriptError, TaskData};
//! # struct Engine;
//! # impl ScriptEngine for Engine {
//! #     fn evaluate(&self, _: &str, _: &TaskData) -> Result<serde_json::Value, ScriptError> { Ok(true.into()) }
//! #     fn execute(&self, _: &str, d: &TaskData) -> Result<TaskData, ScriptError> { Ok(d.clone()) }
//! # }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let spec = ProcessSpec::builder("coffee")
//!         .start("Start")
//!         .user_task("Get_Coffee")
//!         .boundary_event("Reminder", "Get_Coffee", EventDefinition::timer_cycle("R2/PT1M")?, false)
//!         .script_task("Nag", "nag()")
//!         .end("End")
//!         .end("Nagged")
//!         .flow("Start", "Get_Coffee")
//!         .flow("Get_Coffee", "End")
//!         .flow("Reminder", "Nag")
//!         .flow("Nag", "Nagged")
//!         .build()?;
//!
//!     let mut workflow = Workflow::new(spec, Arc::new(Engine))?;
//!     workflow.do_engine_steps();
//!
//!     // Later, from the host's own loop
//!     workflow.refresh_waiting_tasks();
//!     workflow.do_engine_steps();
//!
//!     // Suspend and resume
//!     let bytes = workflow.snapshot()?;
//!     let resumed = Workflow::restore(&bytes, workflow.spec().clone(), Vec::new(), Arc::new(Engine))?;
//!     assert_eq!(resumed.waiting_events(), workflow.waiting_events());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod schedule;
pub mod script;
pub mod snapshot;
pub mod spec;
pub mod task;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{ConfigError, EngineError, ScheduleError, ScriptError, SnapshotError, SpecError};
pub use execution::{CorrelationKey, DeliveryOutcome, StepReport, WaitingEvent, Workflow};
pub use schedule::{Clock, ManualClock, SystemClock};
pub use script::ScriptEngine;
pub use spec::{EventDefinition, MessageDefinition, ProcessSpec, SpecKind, TaskSpec};
pub use task::{Task, TaskData, TaskId, TaskState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "FlowRunner";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "FlowRunner");
    }

    #[test]
    fn test_module_exports_spec() {
        let spec = ProcessSpec::builder("exports")
            .start("Start")
            .end("End")
            .flow("Start", "End")
            .build()
            .unwrap();
        assert_eq!(spec.len(), 2);
    }

    #[test]
    fn test_module_exports_workflow() {
        let spec = testing::linear_process();
        let workflow = Workflow::new(spec, testing::TableEngine::shared()).unwrap();
        assert!(!workflow.is_completed());
        assert_eq!(workflow.tasks().len(), 1);
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
