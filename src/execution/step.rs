//! Task Activation and Execution
//!
//! Handles the lifecycle of a single task:
//! - Activation when its predecessor completes (READY, WAITING, or a join decision)
//! - Running READY work (scripts, gateway decisions)
//! - Completion side effects (boundary cleanup, interruption, termination)
//! - Spawning children along the chosen outgoing flows
//!
//! [`Workflow::do_engine_steps`] drives these in a loop until no
//! engine-executable task is READY.

use log::{debug, info, warn};

use super::workflow::Workflow;
use crate::schedule::TimerState;
use crate::script::is_truthy;
use crate::spec::{EventDefinition, SpecKind, TaskSpec};
use crate::task::{FailureKind, TaskData, TaskFailure, TaskId, TaskState};

/// Summary of one `do_engine_steps` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Tasks run to completion or failure
    pub executed: usize,
    /// Tasks that ended in ERROR during this call
    pub failed: Vec<TaskId>,
    /// True if the call stopped at `max_engine_steps` with work left
    pub budget_exhausted: bool,
}

impl Workflow {
    /// Runs every READY engine task, and everything they make READY, until
    /// only user tasks, waiting tasks and finished tasks remain.
    ///
    /// Calling it again without any external input does nothing.
    pub fn do_engine_steps(&mut self) -> StepReport {
        let mut report = StepReport::default();
        let budget = self.config.max_engine_steps;

        loop {
            self.update_waiting();

            let ready: Vec<TaskId> = self
                .tasks
                .iter()
                .filter(|t| t.state == TaskState::Ready && !matches!(t.spec.kind, SpecKind::UserTask))
                .map(|t| t.id)
                .collect();
            if ready.is_empty() {
                break;
            }

            for id in ready {
                if report.executed >= budget {
                    warn!(
                        "Engine step budget of {} exhausted with work remaining",
                        budget
                    );
                    report.budget_exhausted = true;
                    return report;
                }
                // An earlier task in this pass may have cancelled it
                if self.tasks.state(id) != Some(TaskState::Ready) {
                    continue;
                }
                self.run_task(id);
                report.executed += 1;
                if self.tasks.state(id) == Some(TaskState::Error) {
                    report.failed.push(id);
                }
            }
        }

        debug!(
            "Engine steps finished: {} executed, {} failed",
            report.executed,
            report.failed.len()
        );
        report
    }

    /// Places a freshly spawned task in its first live state.
    pub(crate) fn activate(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get(id) else {
            return;
        };
        let spec = task.spec.clone();

        match &spec.kind {
            SpecKind::ParallelGateway { .. } if spec.is_join() => {
                self.tasks.transition(id, TaskState::Waiting);
            }
            SpecKind::ExclusiveGateway { .. } if spec.is_join() => self.arrive_at_exclusive_join(id),
            SpecKind::IntermediateCatchEvent { event } | SpecKind::BoundaryEvent { event, .. } => {
                self.start_waiting(id, event)
            }
            SpecKind::SubProcess { process } => {
                self.tasks.transition(id, TaskState::Waiting);
                self.spawn_boundary_events(id);
                self.enter_subprocess(id, process);
            }
            kind => {
                self.tasks.transition(id, TaskState::Ready);
                if kind.is_activity() {
                    self.spawn_boundary_events(id);
                }
            }
        }
    }

    fn start_waiting(&mut self, id: TaskId, event: &EventDefinition) {
        self.tasks.transition(id, TaskState::Waiting);

        let now = self.clock.now();
        let due = match event {
            EventDefinition::Timer(timer) => timer.due(now),
            EventDefinition::TimerCycle(cycle) => cycle.first_due(now),
            EventDefinition::Message(message) => {
                debug!("Task {} waiting for message '{}'", id, message.name);
                return;
            }
        };

        match due {
            Ok(at) => {
                debug!("Task {} waiting for timer due at {}", id, at);
                self.schedules.insert(id, TimerState::new(at));
            }
            Err(e) => self.fail(id, FailureKind::Schedule, e.to_string()),
        }
    }

    fn spawn_boundary_events(&mut self, host: TaskId) {
        let Some(task) = self.tasks.get(host) else {
            return;
        };
        let process = task.process.clone();
        let data = task.data.clone();
        let names: Vec<String> = self
            .process_spec(&process)
            .map(|p| {
                p.boundary_events(&task.spec.name)
                    .iter()
                    .map(|s| s.name.clone())
                    .collect()
            })
            .unwrap_or_default();

        for name in names {
            if let Some(node) = self.node(&process, &name) {
                let child = self.tasks.add_child(host, &process, node, data.clone(), None);
                self.activate(child);
            }
        }
    }

    fn enter_subprocess(&mut self, id: TaskId, process: &str) {
        let start = self
            .process_spec(process)
            .and_then(|p| p.start())
            .map(|s| s.name.clone());
        let node = start.and_then(|name| self.node(process, &name));
        let data = self.tasks.get(id).map(|t| t.data.clone()).unwrap_or_default();

        match node {
            Some(node) => {
                info!("Task {} entering sub-process '{}'", id, process);
                let child = self.tasks.add_child(id, process, node, data, None);
                self.activate(child);
            }
            None => self.fail(
                id,
                FailureKind::Modeling,
                format!("sub-process '{}' is not available", process),
            ),
        }
    }

    /// Executes one READY task and completes it along the flows it selects.
    fn run_task(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get(id) else {
            return;
        };
        let spec = task.spec.clone();
        debug!("Running task {} ('{}', {})", id, spec.name, spec.kind);

        let targets = match &spec.kind {
            SpecKind::ScriptTask { script } => match self.script_engine.execute(script, &task.data) {
                Ok(data) => {
                    if let Some(task) = self.tasks.get_mut(id) {
                        task.data = data;
                    }
                    self.all_targets(id)
                }
                Err(e) => {
                    self.fail(id, FailureKind::Evaluation, e.to_string());
                    return;
                }
            },
            SpecKind::ExclusiveGateway { default } => {
                match self.choose_flow(&spec, default.as_deref(), &task.data) {
                    Ok(targets) => targets,
                    Err(failure) => {
                        self.fail(id, failure.kind, failure.message);
                        return;
                    }
                }
            }
            _ => self.all_targets(id),
        };

        self.complete(id, &targets);
    }

    /// Picks the outgoing flow of an exclusive gateway.
    ///
    /// Guards are tried in declaration order; the default flow is only
    /// taken when none of them holds.
    fn choose_flow(
        &self,
        spec: &TaskSpec,
        default: Option<&str>,
        data: &TaskData,
    ) -> Result<Vec<String>, TaskFailure> {
        if spec.outputs.is_empty() {
            return Ok(Vec::new());
        }

        for flow in spec.outputs.iter().filter(|f| Some(f.target.as_str()) != default) {
            let Some(condition) = &flow.condition else {
                return Ok(vec![flow.target.clone()]);
            };
            let value = self
                .script_engine
                .evaluate(condition, data)
                .map_err(|e| TaskFailure::new(FailureKind::Evaluation, e.to_string()))?;
            if is_truthy(&value) {
                return Ok(vec![flow.target.clone()]);
            }
        }

        match default {
            Some(target) => Ok(vec![target.to_string()]),
            None => Err(TaskFailure::new(
                FailureKind::Modeling,
                format!("no outgoing flow of '{}' matched and no default is declared", spec.name),
            )),
        }
    }

    pub(crate) fn all_targets(&self, id: TaskId) -> Vec<String> {
        self.tasks
            .get(id)
            .map(|t| t.spec.outputs.iter().map(|f| f.target.clone()).collect())
            .unwrap_or_default()
    }

    /// Completes a task, applies its side effects and spawns its children.
    pub(crate) fn complete(&mut self, id: TaskId, targets: &[String]) {
        let Some(task) = self.tasks.get(id) else {
            return;
        };
        let spec = task.spec.clone();
        let parent = task.parent;
        if !self.tasks.transition(id, TaskState::Completed) {
            return;
        }
        self.schedules.remove(&id);
        debug!("Task {} ('{}') completed", id, spec.name);

        match &spec.kind {
            kind if kind.is_activity() => self.cancel_pending_boundaries(id),
            SpecKind::BoundaryEvent {
                interrupting: true,
                attached_to,
                ..
            } => {
                if let Some(host) = parent {
                    info!("Boundary event '{}' interrupts '{}'", spec.name, attached_to);
                    self.interrupt(host);
                }
            }
            SpecKind::EndEvent { terminate: true } => self.terminate(id),
            _ => {}
        }

        self.spawn(id, targets);
    }

    fn spawn(&mut self, id: TaskId, targets: &[String]) {
        let Some(task) = self.tasks.get(id) else {
            return;
        };
        let process = task.process.clone();
        let data = task.data.clone();

        for target in targets {
            match self.node(&process, target) {
                Some(node) => {
                    let child = self.tasks.add_child(id, &process, node, data.clone(), None);
                    self.activate(child);
                }
                None => warn!("Flow from task {} targets unknown spec '{}'", id, target),
            }
        }
    }

    /// Cancels the boundary events of a finished host that can no longer
    /// fire: every WAITING one, and interrupting ones that fired but have
    /// not run yet. Non-interrupting occurrences that already fired run on.
    fn cancel_pending_boundaries(&mut self, host: TaskId) {
        let pending: Vec<TaskId> = self
            .boundary_children(host)
            .into_iter()
            .filter(|c| {
                self.tasks.get(*c).is_some_and(|t| match t.state {
                    TaskState::Waiting => true,
                    TaskState::Ready => matches!(
                        t.spec.kind,
                        SpecKind::BoundaryEvent {
                            interrupting: true,
                            ..
                        }
                    ),
                    _ => false,
                })
            })
            .collect();

        for child in pending {
            self.cancel_subtree(child);
        }
    }

    /// Cancels an interrupted host, its boundary events that have not
    /// completed, and its nested sub-process run. Work spawned by boundary
    /// events that already completed is left running.
    fn interrupt(&mut self, host: TaskId) {
        let live = self.tasks.state(host).is_some_and(|s| !s.is_finished());
        if live && self.tasks.transition(host, TaskState::Cancelled) {
            self.schedules.remove(&host);
            debug!("Task {} ('{}') cancelled", host, self.spec_name(host));
        }

        let boundaries = self.boundary_children(host).into_iter().filter(|c| {
            self.tasks
                .state(*c)
                .is_some_and(|s| s != TaskState::Completed)
        });
        let doomed: Vec<TaskId> = boundaries.chain(self.nested_roots(host)).collect();
        for child in doomed {
            self.cancel_subtree(child);
        }
    }

    fn boundary_children(&self, host: TaskId) -> Vec<TaskId> {
        self.tasks
            .get(host)
            .map(|t| t.children.clone())
            .unwrap_or_default()
            .into_iter()
            .filter(|c| {
                self.tasks
                    .get(*c)
                    .is_some_and(|t| matches!(t.spec.kind, SpecKind::BoundaryEvent { .. }))
            })
            .collect()
    }

    /// Cancels everything still live in the terminating end event's scope:
    /// the enclosing sub-process, or the whole workflow at the top level.
    fn terminate(&mut self, id: TaskId) {
        match self.scope_of(id) {
            Some(scope) => {
                info!("Terminate end event {} ends sub-process task {}", id, scope);
                for nested in self.nested_roots(scope) {
                    self.cancel_subtree(nested);
                }
            }
            None => {
                info!("Terminate end event {} ends the workflow", id);
                self.cancel();
            }
        }
    }
}
