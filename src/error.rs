//! Error Types
//!
//! One error enum per failure class the engine distinguishes:
//!
//! - [`SpecError`]: malformed or inconsistent process graphs
//! - [`ScheduleError`]: malformed timer definitions and timer arithmetic overflow
//! - [`ScriptError`]: failures raised by an injected [`ScriptEngine`](crate::script::ScriptEngine)
//! - [`SnapshotError`]: snapshots that cannot be restored
//! - [`ConfigError`]: unreadable or invalid engine configuration
//! - [`EngineError`]: host operations invoked on the wrong task or state
//!
//! Failures local to a single task are not returned as errors; they are
//! recorded on the task as a [`TaskFailure`](crate::task::TaskFailure).

use thiserror::Error;

use crate::task::{TaskId, TaskState};

/// Errors detected while validating a process graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpecError {
    #[error("process '{0}' has no start event")]
    MissingStart(String),

    #[error("process '{process}' has more than one start event ('{first}', '{second}')")]
    MultipleStarts {
        process: String,
        first: String,
        second: String,
    },

    #[error("duplicate task spec '{0}'")]
    DuplicateSpec(String),

    #[error("flow to '{to}' starts at unknown spec '{from}'")]
    UnknownSource { from: String, to: String },

    #[error("'{spec}' has a flow to unknown spec '{target}'")]
    UnknownTarget { spec: String, target: String },

    #[error("boundary event '{spec}' is attached to unknown activity '{host}'")]
    UnknownHost { spec: String, host: String },

    #[error("boundary event '{spec}' cannot be attached to '{host}', which is not an activity")]
    InvalidHost { spec: String, host: String },

    #[error("'{0}' cannot have incoming flows")]
    UnexpectedIncoming(String),

    #[error("exclusive gateway '{gateway}' has an unguarded flow to '{target}' that is not its default")]
    UnguardedFlow { gateway: String, target: String },

    #[error("exclusive gateway '{gateway}' declares default '{target}', which is not one of its outgoing flows")]
    InvalidDefault { gateway: String, target: String },

    #[error("'{spec}' has a guarded flow to '{target}' but only exclusive gateways evaluate guards")]
    UnexpectedGuard { spec: String, target: String },

    #[error("'{0}' is unreachable from the start event")]
    Unreachable(String),

    #[error("sub-process '{spec}' refers to unknown process '{process}'")]
    UnknownProcess { spec: String, process: String },

    #[error("process '{0}' invokes itself through its sub-processes")]
    RecursiveProcess(String),

    #[error("invalid event definition on '{spec}': {source}")]
    InvalidEvent {
        spec: String,
        #[source]
        source: ScheduleError,
    },
}

/// Errors raised while parsing or advancing a timer schedule.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScheduleError {
    #[error("invalid ISO-8601 duration '{0}'")]
    InvalidDuration(String),

    #[error("invalid ISO-8601 recurrence '{0}'")]
    InvalidCycle(String),

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("recurrence '{0}' never fires (zero repetitions)")]
    ZeroRepeat(String),

    #[error("recurrence '{0}' has a zero interval")]
    ZeroInterval(String),

    #[error("timer arithmetic overflowed")]
    Overflow,
}

/// An error reported by a script engine.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ScriptError {
    pub message: String,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors raised when a snapshot cannot be restored.
///
/// Restoration never yields a partially rebuilt workflow: any of these
/// aborts the whole operation.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("snapshot has no usable version tag")]
    MissingVersion,

    #[error("snapshot version {found} is not supported (this engine reads up to {supported})")]
    UnsupportedVersion { found: u64, supported: u32 },

    #[error("cannot upgrade snapshot from version {from}: {reason}")]
    Migration { from: u32, reason: String },

    #[error("snapshot was taken against process '{expected}' but '{found}' was supplied")]
    ProcessMismatch { expected: String, found: String },

    #[error("process '{process}' changed since the snapshot was taken")]
    SpecDrift { process: String },

    #[error("snapshot requires sub-process '{0}', which was not supplied")]
    MissingProcess(String),

    #[error("supplied process graph is invalid: {0}")]
    InvalidSpec(#[from] SpecError),

    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}

/// Errors raised while loading engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors returned by host-facing operations on a workflow.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("task {0} does not exist")]
    UnknownTask(TaskId),

    #[error("task {id} is {state}, expected {expected}")]
    InvalidState {
        id: TaskId,
        state: TaskState,
        expected: TaskState,
    },

    #[error("task {0} is not a user task")]
    NotUserTask(TaskId),

    #[error("task {0} has already finished")]
    AlreadyFinished(TaskId),
}
