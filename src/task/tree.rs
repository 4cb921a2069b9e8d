//! Task Instance Tree
//!
//! The dynamic mirror of the process graph for one workflow run. Every
//! task owns its children; the tree is stored as an arena keyed by
//! [`TaskId`], which is allocated monotonically so id order is creation
//! order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::state::TaskState;
use crate::spec::TaskSpec;

/// Key/value scope visible to expressions evaluated for a task.
pub type TaskData = serde_json::Map<String, Value>;

/// Identifier of a task within one workflow.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a task ended in ERROR.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The script engine rejected an expression or script
    Evaluation,
    /// The process graph left the engine without a valid path
    Modeling,
    /// Timer arithmetic failed
    Schedule,
}

/// Failure recorded on a task in ERROR.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// One instance of a [`TaskSpec`] within a workflow run.
#[derive(Debug, Clone)]
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) parent: Option<TaskId>,
    pub(crate) children: Vec<TaskId>,
    pub(crate) process: String,
    pub(crate) spec: Arc<TaskSpec>,
    pub(crate) state: TaskState,
    pub(crate) data: TaskData,
    pub(crate) failure: Option<TaskFailure>,
}

impl Task {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn parent(&self) -> Option<TaskId> {
        self.parent
    }

    pub fn children(&self) -> &[TaskId] {
        &self.children
    }

    /// Id of the process graph the spec belongs to.
    pub fn process(&self) -> &str {
        &self.process
    }

    pub fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    pub fn spec_name(&self) -> &str {
        &self.spec.name
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn data(&self) -> &TaskData {
        &self.data
    }

    /// Looks up a single data value.
    pub fn get_data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        self.failure.as_ref()
    }
}

/// Arena holding every task of a workflow.
#[derive(Debug, Clone, Default)]
pub struct TaskTree {
    tasks: BTreeMap<TaskId, Task>,
    root: Option<TaskId>,
    next_id: u64,
}

impl TaskTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reassembles a tree from restored tasks. Structural checks are the
    /// caller's responsibility.
    pub(crate) fn from_parts(tasks: BTreeMap<TaskId, Task>, root: TaskId, next_id: u64) -> Self {
        Self {
            tasks,
            root: Some(root),
            next_id,
        }
    }

    fn allocate(&mut self) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Creates the root task. Replaces nothing: a tree has a single root.
    pub(crate) fn insert_root(&mut self, process: &str, spec: Arc<TaskSpec>, data: TaskData) -> TaskId {
        let id = self.allocate();
        self.tasks.insert(
            id,
            Task {
                id,
                parent: None,
                children: Vec::new(),
                process: process.to_string(),
                spec,
                state: TaskState::Future,
                data,
                failure: None,
            },
        );
        self.root = Some(id);
        id
    }

    /// Adds a FUTURE child, optionally placed right after an existing sibling.
    pub(crate) fn add_child(
        &mut self,
        parent: TaskId,
        process: &str,
        spec: Arc<TaskSpec>,
        data: TaskData,
        after: Option<TaskId>,
    ) -> TaskId {
        let id = self.allocate();
        self.tasks.insert(
            id,
            Task {
                id,
                parent: Some(parent),
                children: Vec::new(),
                process: process.to_string(),
                spec,
                state: TaskState::Future,
                data,
                failure: None,
            },
        );

        if let Some(owner) = self.tasks.get_mut(&parent) {
            let position = after
                .and_then(|sibling| owner.children.iter().position(|c| *c == sibling))
                .map(|i| i + 1)
                .unwrap_or(owner.children.len());
            owner.children.insert(position, id);
        }
        id
    }

    pub fn root(&self) -> Option<TaskId> {
        self.root
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.tasks.get(&id).map(|t| t.state)
    }

    /// Next id to be allocated; always greater than every existing id.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Moves a task to a new state if the lifecycle allows it.
    ///
    /// Returns false (and leaves the task untouched) otherwise.
    pub(crate) fn transition(&mut self, id: TaskId, next: TaskState) -> bool {
        let Some(task) = self.tasks.get_mut(&id) else {
            return false;
        };
        if !task.state.can_transition_to(next) {
            warn!(
                "Ignoring illegal transition of task {} ('{}') from {} to {}",
                id, task.spec.name, task.state, next
            );
            return false;
        }
        task.state = next;
        true
    }

    /// Task ids in depth-first pre-order, children in their stored order.
    pub fn walk(&self) -> Vec<TaskId> {
        match self.root {
            Some(root) => self.walk_from(root),
            None => Vec::new(),
        }
    }

    /// Pre-order walk of the subtree rooted at `id`, including `id`.
    pub fn walk_from(&self, id: TaskId) -> Vec<TaskId> {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(task) = self.tasks.get(&current) else {
                continue;
            };
            order.push(current);
            stack.extend(task.children.iter().rev());
        }
        order
    }

    /// True when `ancestor` lies strictly above `id`.
    pub fn is_ancestor(&self, ancestor: TaskId, id: TaskId) -> bool {
        let mut current = self.tasks.get(&id).and_then(|t| t.parent);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.tasks.get(&parent).and_then(|t| t.parent);
        }
        false
    }

    /// Tasks in walk order, as references.
    pub fn iter(&self) -> impl Iterator<Item = &Task> + '_ {
        self.walk().into_iter().filter_map(move |id| self.tasks.get(&id))
    }
}
