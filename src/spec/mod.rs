//! Process Definition Module
//!
//! Provides the immutable process graph a workflow is instantiated from.
//!
//! # Structure
//!
//! - [`model`]: Nodes, flows, and the process graph (ProcessSpec, TaskSpec)
//! - [`event`]: Timer and message event definitions
//! - [`validator`]: Structural validation and modeling-error detection

pub mod event;
pub mod model;
pub mod validator;

pub use event::{EventDefinition, EventKind, MessageDefinition};
pub use model::{Flow, MergePolicy, ProcessSpec, ProcessSpecBuilder, SpecKind, TaskSpec};
pub use validator::{validate_process, validate_processes};
