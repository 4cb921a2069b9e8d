//! Task Instances
//!
//! Runtime tasks and the lifecycle they move through.
//!
//! - [`state`]: The task state machine
//! - [`tree`]: Task instances and the tree that owns them

pub mod state;
pub mod tree;

pub use state::TaskState;
pub use tree::{FailureKind, Task, TaskData, TaskFailure, TaskId, TaskTree};
