//! Snapshot and Restore
//!
//! Serializes a workflow to a versioned JSON document and rebuilds it
//! later against the same process graphs, so that a restored workflow
//! behaves exactly like the original would have.
//!
//! # Structure
//!
//! - [`format`]: The snapshot document and its conversion to and from a workflow
//! - [`migrate`]: Upgrades of older snapshot versions
//!
//! Runtime handles (script engine, clock, config) are not persisted.
//! Restore uses the default config and the system clock; hosts replace
//! them afterwards with `set_clock` and `set_config`.

pub mod format;
pub mod migrate;

use std::sync::Arc;

use log::info;
use serde_json::Value;

pub use format::{Counters, ScheduleRecord, Snapshot, TaskRecord, CURRENT_VERSION};

use crate::error::SnapshotError;
use crate::execution::Workflow;
use crate::script::ScriptEngine;
use crate::spec::ProcessSpec;

impl Workflow {
    /// Serializes the workflow's persistent state.
    pub fn snapshot(&self) -> Result<Vec<u8>, SnapshotError> {
        let snapshot = Snapshot::capture(self)?;
        let bytes = serde_json::to_vec(&snapshot)?;
        info!(
            "Snapshot taken for workflow '{}' ({} tasks, {} bytes)",
            snapshot.process,
            snapshot.tasks.len(),
            bytes.len()
        );
        Ok(bytes)
    }

    /// Rebuilds a workflow from a snapshot taken against the same graphs.
    ///
    /// Fails closed: a snapshot that is malformed, from an unknown
    /// version, taken against a different graph, or structurally
    /// inconsistent yields an error rather than a partial workflow.
    pub fn restore(
        bytes: &[u8],
        spec: impl Into<Arc<ProcessSpec>>,
        subprocesses: Vec<Arc<ProcessSpec>>,
        script_engine: Arc<dyn ScriptEngine>,
    ) -> Result<Self, SnapshotError> {
        let document: Value = serde_json::from_slice(bytes)?;
        let document = migrate::upgrade(document)?;
        let snapshot: Snapshot = serde_json::from_value(document)?;

        let mut workflow = Workflow::assemble(spec.into(), subprocesses, script_engine)?;
        let tasks = snapshot.tasks.len();
        snapshot.apply(&mut workflow)?;

        info!(
            "Restored workflow '{}' with {} tasks",
            workflow.spec.id, tasks
        );
        Ok(workflow)
    }
}
