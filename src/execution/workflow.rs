//! Workflow Aggregate
//!
//! A [`Workflow`] is one running instance of a process graph: the task
//! tree, the occurrence state of every waiting timer, process-wide
//! counters, and handles to the injected script engine and clock.
//!
//! It is mutated only through the host-facing operations:
//!
//! - [`Workflow::do_engine_steps`] runs READY work until none is left
//! - [`Workflow::refresh_waiting_tasks`] polls timers against the clock
//! - [`Workflow::deliver_message`] injects an external message
//! - [`Workflow::complete_task`] and [`Workflow::cancel_task`] act for a user
//! - [`Workflow::snapshot`] and [`Workflow::restore`] suspend and resume
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flowrunner::{ProcessSpec, Workflow};
//! # use flowrunner::{ScriptEngine, ScriptError, TaskData};
//! # struct Engine;
//! # impl ScriptEngine for Engine {
//! #     fn evaluate(&self, _: &str, _: &TaskData) -> Result<serde_json::Value, ScriptError> { Ok(true.into()) }
//! #     fn execute(&self, _: &str, d: &TaskData) -> Result<TaskData, ScriptError> { Ok(d.clone()) }
//! # }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let spec = ProcessSpec::builder("hello")
//!         .start("Start")
//!         .script_task("Greet", "greeting = 'hello'")
//!         .end("End")
//!         .flow("Start", "Greet")
//!         .flow("Greet", "End")
//!         .build()?;
//!
//!     let mut workflow = Workflow::new(spec, Arc::new(Engine))?;
//!     workflow.do_engine_steps();
//!     assert!(workflow.is_completed());
//!     Ok(())
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, error, info};

use crate::config::EngineConfig;
use crate::error::{EngineError, SpecError};
use crate::schedule::{Clock, SystemClock, TimerState};
use crate::script::ScriptEngine;
use crate::spec::{validate_process, validate_processes, MergePolicy, ProcessSpec, SpecKind, TaskSpec};
use crate::task::{FailureKind, Task, TaskData, TaskFailure, TaskId, TaskState, TaskTree};

/// Shared node handles of one process graph, keyed by spec name.
pub(crate) type NodeIndex = BTreeMap<String, Arc<TaskSpec>>;

/// A running instance of a process.
pub struct Workflow {
    pub(crate) spec: Arc<ProcessSpec>,
    pub(crate) subprocesses: BTreeMap<String, Arc<ProcessSpec>>,
    pub(crate) nodes: BTreeMap<String, NodeIndex>,
    pub(crate) tasks: TaskTree,
    pub(crate) schedules: BTreeMap<TaskId, TimerState>,
    pub(crate) messages_delivered: u64,
    pub(crate) script_engine: Arc<dyn ScriptEngine>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: EngineConfig,
}

impl Workflow {
    /// Creates a workflow for a process without sub-processes.
    pub fn new(
        spec: impl Into<Arc<ProcessSpec>>,
        script_engine: Arc<dyn ScriptEngine>,
    ) -> Result<Self, SpecError> {
        Self::with_subprocesses(spec, Vec::new(), script_engine)
    }

    /// Creates a workflow whose process may invoke the given sub-processes.
    ///
    /// Every graph is validated before the root task is created, so
    /// modeling errors surface here rather than mid-run.
    pub fn with_subprocesses(
        spec: impl Into<Arc<ProcessSpec>>,
        subprocesses: Vec<Arc<ProcessSpec>>,
        script_engine: Arc<dyn ScriptEngine>,
    ) -> Result<Self, SpecError> {
        let mut workflow = Self::assemble(spec.into(), subprocesses, script_engine)?;

        let start = workflow
            .spec
            .start()
            .map(|s| s.name.clone())
            .ok_or_else(|| SpecError::MissingStart(workflow.spec.id.clone()))?;
        let process = workflow.spec.id.clone();
        let node = workflow
            .node(&process, &start)
            .ok_or_else(|| SpecError::MissingStart(process.clone()))?;

        let root = workflow.tasks.insert_root(&process, node, TaskData::new());
        workflow.activate(root);

        info!(
            "Created workflow for process '{}' ({} specs, {} sub-processes)",
            process,
            workflow.spec.len(),
            workflow.subprocesses.len()
        );
        Ok(workflow)
    }

    /// Validates the graphs and builds an empty workflow around them.
    pub(crate) fn assemble(
        spec: Arc<ProcessSpec>,
        subprocesses: Vec<Arc<ProcessSpec>>,
        script_engine: Arc<dyn ScriptEngine>,
    ) -> Result<Self, SpecError> {
        validate_process(&spec)?;
        let mut library = BTreeMap::new();
        for sub in subprocesses {
            validate_process(&sub)?;
            library.insert(sub.id.clone(), sub);
        }
        validate_processes(&spec, &library)?;

        let mut nodes = BTreeMap::new();
        nodes.insert(spec.id.clone(), index_nodes(&spec));
        for (id, sub) in &library {
            nodes.insert(id.clone(), index_nodes(sub));
        }

        Ok(Self {
            spec,
            subprocesses: library,
            nodes,
            tasks: TaskTree::new(),
            schedules: BTreeMap::new(),
            messages_delivered: 0,
            script_engine,
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
        })
    }

    /// Shared handle to a node of a known process.
    pub(crate) fn node(&self, process: &str, name: &str) -> Option<Arc<TaskSpec>> {
        self.nodes.get(process).and_then(|n| n.get(name)).cloned()
    }

    /// Graph a process id refers to.
    pub(crate) fn process_spec(&self, process: &str) -> Option<&ProcessSpec> {
        if process == self.spec.id {
            Some(&self.spec)
        } else {
            self.subprocesses.get(process).map(Arc::as_ref)
        }
    }

    /// Replaces the script engine, e.g. after a restore.
    pub fn set_script_engine(&mut self, script_engine: Arc<dyn ScriptEngine>) {
        self.script_engine = script_engine;
    }

    /// Replaces the clock timers are compared against.
    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The main process graph.
    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// Sub-process graphs keyed by process id.
    pub fn subprocesses(&self) -> &BTreeMap<String, Arc<ProcessSpec>> {
        &self.subprocesses
    }

    pub fn tasks(&self) -> &TaskTree {
        &self.tasks
    }

    pub fn get_task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Tasks in tree order, optionally filtered by state.
    pub fn get_tasks(&self, state: Option<TaskState>) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| state.map_or(true, |s| t.state == s))
            .collect()
    }

    /// First READY task with the given spec name, or else the first task
    /// with that name in any state.
    pub fn get_next_task(&self, spec_name: &str) -> Option<&Task> {
        let mut fallback = None;
        for task in self.tasks.iter().filter(|t| t.spec.name == spec_name) {
            if task.state == TaskState::Ready {
                return Some(task);
            }
            fallback = fallback.or(Some(task));
        }
        fallback
    }

    /// READY tasks awaiting the host.
    pub fn ready_user_tasks(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Ready && matches!(t.spec.kind, SpecKind::UserTask))
            .collect()
    }

    /// Occurrence state of a waiting timer task.
    pub fn timer_state(&self, id: TaskId) -> Option<&TimerState> {
        self.schedules.get(&id)
    }

    /// Number of messages delivered over the workflow's lifetime.
    pub fn messages_delivered(&self) -> u64 {
        self.messages_delivered
    }

    /// True once every task has finished.
    pub fn is_completed(&self) -> bool {
        self.tasks.iter().all(|t| t.state.is_finished())
    }

    /// Data left by the completed end events of the main process.
    pub fn data(&self) -> TaskData {
        let mut result = TaskData::new();
        for task in self.tasks.iter() {
            let finished_end = task.state == TaskState::Completed
                && matches!(task.spec.kind, SpecKind::EndEvent { .. })
                && task.process == self.spec.id;
            if finished_end {
                MergePolicy::LastWriterWins.merge(&mut result, &task.data);
            }
        }
        result
    }

    /// Completes a READY user task, merging data supplied by the host.
    pub fn complete_task(&mut self, id: TaskId, data: Option<TaskData>) -> Result<(), EngineError> {
        let task = self.tasks.get(id).ok_or(EngineError::UnknownTask(id))?;
        if !matches!(task.spec.kind, SpecKind::UserTask) {
            return Err(EngineError::NotUserTask(id));
        }
        if task.state != TaskState::Ready {
            return Err(EngineError::InvalidState {
                id,
                state: task.state,
                expected: TaskState::Ready,
            });
        }

        if let Some(data) = data {
            if let Some(task) = self.tasks.get_mut(id) {
                MergePolicy::LastWriterWins.merge(&mut task.data, &data);
            }
        }
        info!("Completing user task {} ('{}')", id, self.spec_name(id));
        let targets = self.all_targets(id);
        self.complete(id, &targets);
        Ok(())
    }

    /// Merges host-supplied values into a task that has not finished.
    pub fn update_data(&mut self, id: TaskId, data: TaskData) -> Result<(), EngineError> {
        let task = self.tasks.get_mut(id).ok_or(EngineError::UnknownTask(id))?;
        if task.state.is_finished() {
            return Err(EngineError::AlreadyFinished(id));
        }
        MergePolicy::LastWriterWins.merge(&mut task.data, &data);
        Ok(())
    }

    /// Cancels a task and every unfinished task below it.
    pub fn cancel_task(&mut self, id: TaskId) -> Result<(), EngineError> {
        let state = self.tasks.state(id).ok_or(EngineError::UnknownTask(id))?;
        if state.is_finished() {
            return Err(EngineError::AlreadyFinished(id));
        }
        info!("Cancelling task {} ('{}')", id, self.spec_name(id));
        self.cancel_subtree(id);
        Ok(())
    }

    /// Cancels every unfinished task.
    pub fn cancel(&mut self) {
        if let Some(root) = self.tasks.root() {
            info!("Cancelling workflow '{}'", self.spec.id);
            self.cancel_subtree(root);
        }
    }

    pub(crate) fn spec_name(&self, id: TaskId) -> String {
        self.tasks
            .get(id)
            .map(|t| t.spec.name.clone())
            .unwrap_or_default()
    }

    pub(crate) fn cancel_subtree(&mut self, id: TaskId) {
        for current in self.tasks.walk_from(id) {
            let live = self.tasks.state(current).is_some_and(|s| !s.is_finished());
            if live && self.tasks.transition(current, TaskState::Cancelled) {
                self.schedules.remove(&current);
                debug!("Task {} ('{}') cancelled", current, self.spec_name(current));
            }
        }
    }

    /// Moves a task to ERROR, recording why. Siblings are unaffected.
    pub(crate) fn fail(&mut self, id: TaskId, kind: FailureKind, message: impl Into<String>) {
        let message = message.into();
        if !self.tasks.transition(id, TaskState::Error) {
            return;
        }
        self.schedules.remove(&id);
        error!("Task {} ('{}') failed: {}", id, self.spec_name(id), message);
        if let Some(task) = self.tasks.get_mut(id) {
            task.failure = Some(TaskFailure::new(kind, message));
        }
    }
}

fn index_nodes(process: &ProcessSpec) -> NodeIndex {
    process
        .specs
        .iter()
        .map(|(name, spec)| (name.clone(), Arc::new(spec.clone())))
        .collect()
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("process", &self.spec.id)
            .field("tasks", &self.tasks.len())
            .field("timers", &self.schedules.len())
            .field("messages_delivered", &self.messages_delivered)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{data, init_logging, linear_process, user_task_process, TableEngine};
    use serde_json::json;

    #[test]
    fn test_new_workflow_has_ready_root() {
        init_logging();
        let workflow = Workflow::new(linear_process(), TableEngine::shared()).unwrap();
        let root = workflow.tasks().root().unwrap();
        let task = workflow.get_task(root).unwrap();
        assert_eq!(task.spec_name(), "Start");
        assert_eq!(task.state(), TaskState::Ready);
        assert!(task.parent().is_none());
        assert!(!workflow.is_completed());
    }

    #[test]
    fn test_unknown_subprocess_rejected() {
        let spec = ProcessSpec::builder("main")
            .start("Start")
            .sub_process("Call", "missing")
            .flow("Start", "Call")
            .build()
            .unwrap();
        let result = Workflow::new(spec, TableEngine::shared());
        assert!(matches!(result, Err(SpecError::UnknownProcess { .. })));
    }

    #[test]
    fn test_complete_user_task() {
        let mut workflow = Workflow::new(user_task_process(), TableEngine::shared()).unwrap();
        workflow.do_engine_steps();

        let review = workflow.get_next_task("Review").unwrap();
        assert_eq!(review.state(), TaskState::Ready);
        let id = review.id();
        assert_eq!(workflow.ready_user_tasks().len(), 1);

        workflow
            .complete_task(id, Some(data(json!({"approved": true}))))
            .unwrap();
        workflow.do_engine_steps();

        assert!(workflow.is_completed());
        assert_eq!(workflow.data().get("approved"), Some(&json!(true)));
    }

    #[test]
    fn test_complete_task_rejects_misuse() {
        let mut workflow = Workflow::new(user_task_process(), TableEngine::shared()).unwrap();
        let root = workflow.tasks().root().unwrap();
        assert_eq!(workflow.complete_task(root, None), Err(EngineError::NotUserTask(root)));
        assert_eq!(
            workflow.complete_task(TaskId(999), None),
            Err(EngineError::UnknownTask(TaskId(999)))
        );

        workflow.do_engine_steps();
        let id = workflow.get_next_task("Review").unwrap().id();
        workflow.complete_task(id, None).unwrap();
        assert!(matches!(
            workflow.complete_task(id, None),
            Err(EngineError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_cancel_task_and_workflow() {
        let mut workflow = Workflow::new(user_task_process(), TableEngine::shared()).unwrap();
        workflow.do_engine_steps();
        let id = workflow.get_next_task("Review").unwrap().id();

        workflow.cancel_task(id).unwrap();
        assert_eq!(workflow.get_task(id).unwrap().state(), TaskState::Cancelled);
        assert_eq!(workflow.cancel_task(id), Err(EngineError::AlreadyFinished(id)));
        assert!(workflow.is_completed());

        let mut other = Workflow::new(user_task_process(), TableEngine::shared()).unwrap();
        other.do_engine_steps();
        other.cancel();
        assert!(other.is_completed());
        assert!(other.get_tasks(Some(TaskState::Cancelled)).len() >= 1);
    }

    #[test]
    fn test_update_data() {
        let mut workflow = Workflow::new(user_task_process(), TableEngine::shared()).unwrap();
        workflow.do_engine_steps();
        let id = workflow.get_next_task("Review").unwrap().id();
        workflow.update_data(id, data(json!({"note": "draft"}))).unwrap();
        assert_eq!(workflow.get_task(id).unwrap().get_data("note"), Some(&json!("draft")));

        let root = workflow.tasks().root().unwrap();
        assert_eq!(
            workflow.update_data(root, TaskData::new()),
            Err(EngineError::AlreadyFinished(root))
        );
    }

    #[test]
    fn test_get_next_task_prefers_ready() {
        let mut workflow = Workflow::new(user_task_process(), TableEngine::shared()).unwrap();
        assert_eq!(workflow.get_next_task("Start").unwrap().state(), TaskState::Ready);
        workflow.do_engine_steps();
        assert_eq!(workflow.get_next_task("Start").unwrap().state(), TaskState::Completed);
        assert!(workflow.get_next_task("Nope").is_none());
    }

    #[test]
    fn test_debug_output() {
        let workflow = Workflow::new(linear_process(), TableEngine::shared()).unwrap();
        let text = format!("{:?}", workflow);
        assert!(text.contains("linear"));
    }
}
