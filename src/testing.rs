//! Shared fixtures for unit tests: a table-driven script engine and a few
//! sample processes.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::ScriptError;
use crate::script::ScriptEngine;
use crate::spec::{EventDefinition, ProcessSpec};
use crate::task::{TaskData, TaskState};
use crate::Workflow;

type ScriptFn = Arc<dyn Fn(&mut TaskData) -> Result<(), ScriptError> + Send + Sync>;
type ExpressionFn = Arc<dyn Fn(&TaskData) -> Result<Value, ScriptError> + Send + Sync>;

/// Script engine backed by closures keyed on the script or expression text.
///
/// Expressions without an entry are looked up as data keys, so a guard
/// named `approved` reads `data["approved"]` (or null when unset).
#[derive(Clone, Default)]
pub(crate) struct TableEngine {
    scripts: BTreeMap<String, ScriptFn>,
    expressions: BTreeMap<String, ExpressionFn>,
}

impl TableEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn shared() -> Arc<dyn ScriptEngine> {
        Arc::new(Self::new())
    }

    pub(crate) fn script<F>(mut self, script: &str, f: F) -> Self
    where
        F: Fn(&mut TaskData) -> Result<(), ScriptError> + Send + Sync + 'static,
    {
        self.scripts.insert(script.to_string(), Arc::new(f));
        self
    }

    pub(crate) fn expression<F>(mut self, expression: &str, f: F) -> Self
    where
        F: Fn(&TaskData) -> Result<Value, ScriptError> + Send + Sync + 'static,
    {
        self.expressions.insert(expression.to_string(), Arc::new(f));
        self
    }

    pub(crate) fn into_shared(self) -> Arc<dyn ScriptEngine> {
        Arc::new(self)
    }
}

impl ScriptEngine for TableEngine {
    fn evaluate(&self, expression: &str, data: &TaskData) -> Result<Value, ScriptError> {
        match self.expressions.get(expression) {
            Some(f) => f(data),
            None => Ok(data.get(expression).cloned().unwrap_or(Value::Null)),
        }
    }

    fn execute(&self, script: &str, data: &TaskData) -> Result<TaskData, ScriptError> {
        let f = self
            .scripts
            .get(script)
            .ok_or_else(|| ScriptError::new(format!("unknown script '{}'", script)))?;
        let mut scope = data.clone();
        f(&mut scope)?;
        Ok(scope)
    }
}

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Converts a JSON object literal into task data.
pub(crate) fn data(value: Value) -> TaskData {
    match value {
        Value::Object(fields) => fields,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// Start -> Greet (script `greet`) -> End
pub(crate) fn linear_process() -> ProcessSpec {
    ProcessSpec::builder("linear")
        .start("Start")
        .script_task("Greet", "greet")
        .end("End")
        .flow("Start", "Greet")
        .flow("Greet", "End")
        .build()
        .unwrap()
}

/// Start -> Review (user task) -> End
pub(crate) fn user_task_process() -> ProcessSpec {
    ProcessSpec::builder("review")
        .start("Start")
        .user_task("Review")
        .end("End")
        .flow("Start", "Review")
        .flow("Review", "End")
        .build()
        .unwrap()
}

/// Parallel split into scripts `left` and `right`, joined before End.
pub(crate) fn diamond_process() -> ProcessSpec {
    ProcessSpec::builder("diamond")
        .start("Start")
        .parallel_gateway("Split")
        .script_task("Left", "left")
        .script_task("Right", "right")
        .parallel_gateway("Join")
        .end("End")
        .flow("Start", "Split")
        .flow("Split", "Left")
        .flow("Split", "Right")
        .flow("Left", "Join")
        .flow("Right", "Join")
        .flow("Join", "End")
        .build()
        .unwrap()
}

/// A user task carrying a non-interrupting cyclic timer whose every
/// occurrence runs the `custom_function` script.
pub(crate) fn coffee_process(cycle: &str) -> ProcessSpec {
    ProcessSpec::builder("timer")
        .start("Start")
        .user_task("Get_Coffee")
        .boundary_event(
            "CatchMessage",
            "Get_Coffee",
            EventDefinition::timer_cycle(cycle).unwrap(),
            false,
        )
        .script_task("Increment", "custom_function")
        .end("End")
        .end("Done")
        .flow("Start", "Get_Coffee")
        .flow("Get_Coffee", "End")
        .flow("CatchMessage", "Increment")
        .flow("Increment", "Done")
        .build()
        .unwrap()
}

pub(crate) fn counting_engine() -> Arc<dyn ScriptEngine> {
    TableEngine::new()
        .script("custom_function", |d| {
            let count = d.get("counter").and_then(Value::as_u64).unwrap_or(0);
            d.insert("counter".to_string(), Value::from(count + 1));
            Ok(())
        })
        .into_shared()
}

/// Completed runs of the cyclic timer's script.
pub(crate) fn occurrences(workflow: &Workflow) -> usize {
    workflow
        .tasks()
        .iter()
        .filter(|t| t.spec_name() == "Increment" && t.state() == TaskState::Completed)
        .count()
}
