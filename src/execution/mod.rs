//! Workflow Execution Module
//!
//! Drives a running workflow: the step loop, joins, timer polling and
//! message delivery, all as operations on [`Workflow`].
//!
//! # Architecture
//!
//! - [`workflow`]: The workflow aggregate and its host-facing operations
//! - [`step`]: Task activation, execution and the step loop
//! - [`join`]: Parallel/exclusive joins and sub-process completion
//! - [`refresh`]: Timer polling and waiting events
//! - [`message`]: Message correlation and delivery

pub mod join;
pub mod message;
pub mod refresh;
pub mod step;
pub mod workflow;

pub use message::{CorrelationKey, DeliveryOutcome};
pub use refresh::WaitingEvent;
pub use step::StepReport;
pub use workflow::Workflow;
