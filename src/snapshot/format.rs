//! Snapshot Document Format
//!
//! The serialized shape of a workflow. Specs are referenced by name and
//! guarded by digests; the graphs themselves are supplied again at restore.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::execution::Workflow;
use crate::schedule::TimerState;
use crate::task::{Task, TaskData, TaskFailure, TaskId, TaskState, TaskTree};

/// Version written by this engine.
pub const CURRENT_VERSION: u32 = 2;

/// A complete, self-describing workflow snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub version: u32,
    /// Id of the main process
    pub process: String,
    pub spec_digest: String,
    #[serde(default)]
    pub subprocess_digests: BTreeMap<String, String>,
    pub root: TaskId,
    pub tasks: Vec<TaskRecord>,
    #[serde(default)]
    pub schedules: Vec<ScheduleRecord>,
    pub counters: Counters,
}

/// One task, with its spec referenced by name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: TaskId,
    pub parent: Option<TaskId>,
    #[serde(default)]
    pub children: Vec<TaskId>,
    pub process: String,
    pub spec: String,
    pub state: TaskState,
    #[serde(default)]
    pub data: TaskData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
}

/// Occurrence state of a waiting timer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ScheduleRecord {
    pub task: TaskId,
    pub next_due: DateTime<Utc>,
    pub fired: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub next_task_id: u64,
    #[serde(default)]
    pub messages_delivered: u64,
}

impl Snapshot {
    /// Captures the persistent state of a workflow.
    pub fn capture(workflow: &Workflow) -> Result<Self, SnapshotError> {
        let root = workflow
            .tasks
            .root()
            .ok_or_else(|| SnapshotError::Corrupt("workflow has no root task".to_string()))?;

        let tasks = workflow
            .tasks
            .iter()
            .map(|task| TaskRecord {
                id: task.id,
                parent: task.parent,
                children: task.children.clone(),
                process: task.process.clone(),
                spec: task.spec.name.clone(),
                state: task.state,
                data: task.data.clone(),
                failure: task.failure.clone(),
            })
            .collect();

        let schedules = workflow
            .schedules
            .iter()
            .map(|(task, state)| ScheduleRecord {
                task: *task,
                next_due: state.next_due,
                fired: state.fired,
            })
            .collect();

        Ok(Self {
            version: CURRENT_VERSION,
            process: workflow.spec.id.clone(),
            spec_digest: workflow.spec.digest(),
            subprocess_digests: workflow
                .subprocesses
                .iter()
                .map(|(id, spec)| (id.clone(), spec.digest()))
                .collect(),
            root,
            tasks,
            schedules,
            counters: Counters {
                next_task_id: workflow.tasks.next_id(),
                messages_delivered: workflow.messages_delivered,
            },
        })
    }

    /// Rebuilds the task tree and timer state into a freshly assembled
    /// workflow, checking that the snapshot fits the supplied graphs.
    pub fn apply(self, workflow: &mut Workflow) -> Result<(), SnapshotError> {
        if self.process != workflow.spec.id {
            return Err(SnapshotError::ProcessMismatch {
                expected: self.process,
                found: workflow.spec.id.clone(),
            });
        }
        if self.spec_digest != workflow.spec.digest() {
            return Err(SnapshotError::SpecDrift {
                process: self.process,
            });
        }
        for (id, digest) in &self.subprocess_digests {
            let spec = workflow
                .subprocesses
                .get(id)
                .ok_or_else(|| SnapshotError::MissingProcess(id.clone()))?;
            if *digest != spec.digest() {
                return Err(SnapshotError::SpecDrift { process: id.clone() });
            }
        }

        let mut tasks = BTreeMap::new();
        for record in self.tasks {
            if record.id.0 >= self.counters.next_task_id {
                return Err(corrupt(format!(
                    "task {} is not below the id counter {}",
                    record.id, self.counters.next_task_id
                )));
            }
            if !self.subprocess_digests.contains_key(&record.process) && record.process != self.process {
                return Err(corrupt(format!(
                    "task {} belongs to unrecorded process '{}'",
                    record.id, record.process
                )));
            }
            let spec = workflow.node(&record.process, &record.spec).ok_or_else(|| {
                corrupt(format!(
                    "task {} refers to unknown spec '{}' in process '{}'",
                    record.id, record.spec, record.process
                ))
            })?;
            let task = Task {
                id: record.id,
                parent: record.parent,
                children: record.children,
                process: record.process,
                spec,
                state: record.state,
                data: record.data,
                failure: record.failure,
            };
            if tasks.insert(task.id, task).is_some() {
                return Err(corrupt(format!("task {} appears twice", record.id)));
            }
        }
        check_structure(&tasks, self.root)?;

        let mut schedules = BTreeMap::new();
        for record in self.schedules {
            let task = tasks
                .get(&record.task)
                .ok_or_else(|| corrupt(format!("timer state for unknown task {}", record.task)))?;
            if task.state != TaskState::Waiting || !is_timer(task) {
                return Err(corrupt(format!(
                    "timer state recorded for task {}, which is not a waiting timer",
                    record.task
                )));
            }
            let state = TimerState {
                next_due: record.next_due,
                fired: record.fired,
            };
            if schedules.insert(record.task, state).is_some() {
                return Err(corrupt(format!("timer state for task {} appears twice", record.task)));
            }
        }
        if let Some(task) = tasks
            .values()
            .find(|t| t.state == TaskState::Waiting && is_timer(t) && !schedules.contains_key(&t.id))
        {
            return Err(corrupt(format!("waiting timer task {} has no timer state", task.id)));
        }

        workflow.tasks = TaskTree::from_parts(tasks, self.root, self.counters.next_task_id);
        workflow.schedules = schedules;
        workflow.messages_delivered = self.counters.messages_delivered;
        Ok(())
    }
}

fn is_timer(task: &Task) -> bool {
    task.spec.kind.event().is_some_and(|e| e.is_timer())
}

fn corrupt(message: String) -> SnapshotError {
    SnapshotError::Corrupt(message)
}

/// Parent and child links must agree and every task must hang off the root.
fn check_structure(tasks: &BTreeMap<TaskId, Task>, root: TaskId) -> Result<(), SnapshotError> {
    let root_task = tasks
        .get(&root)
        .ok_or_else(|| corrupt(format!("root task {} is missing", root)))?;
    if root_task.parent.is_some() {
        return Err(corrupt(format!("root task {} has a parent", root)));
    }

    for task in tasks.values() {
        if let Some(parent) = task.parent {
            let listed = tasks.get(&parent).is_some_and(|p| p.children.contains(&task.id));
            if !listed {
                return Err(corrupt(format!(
                    "task {} is not listed as a child of its parent {}",
                    task.id, parent
                )));
            }
        }
        for child in &task.children {
            if tasks.get(child).and_then(|c| c.parent) != Some(task.id) {
                return Err(corrupt(format!(
                    "task {} lists {} as a child, which does not point back",
                    task.id, child
                )));
            }
        }
    }

    let mut seen = BTreeSet::new();
    let mut stack = vec![root];
    while let Some(current) = stack.pop() {
        if !seen.insert(current) {
            return Err(corrupt(format!("task {} is reachable twice", current)));
        }
        if let Some(task) = tasks.get(&current) {
            stack.extend(task.children.iter().copied());
        }
    }
    if seen.len() != tasks.len() {
        return Err(corrupt("some tasks are not reachable from the root".to_string()));
    }
    Ok(())
}
