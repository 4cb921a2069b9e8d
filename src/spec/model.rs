//! Process Graph Data Model
//!
//! A [`ProcessSpec`] is an immutable graph of [`TaskSpec`] nodes joined by
//! directed [`Flow`]s. Graphs are built once (normally by an external
//! loader, or programmatically through [`ProcessSpecBuilder`]) and shared
//! by reference between every task instantiated from them.
//!
//! # Example
//!
//! ```
//! use flowrunner::spec::{EventDefinition, ProcessSpec};
//!
//! let spec = ProcessSpec::builder("coffee")
//!     .start("Start")
//!     .user_task("Get_Coffee")
//!     .boundary_event(
//!         "Reminder",
//!         "Get_Coffee",
//!         EventDefinition::timer_cycle("R2/PT0.1S").unwrap(),
//!         false,
//!     )
//!     .script_task("Nag", "nag()")
//!     .end("End")
//!     .flow("Start", "Get_Coffee")
//!     .flow("Get_Coffee", "End")
//!     .flow("Reminder", "Nag")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(spec.start().map(|s| s.name.as_str()), Some("Start"));
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::event::EventDefinition;
use super::validator::validate_process;
use crate::error::SpecError;

/// How data from several arriving branches is combined at a join.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Later arrivals overwrite keys set by earlier ones
    #[default]
    LastWriterWins,
    /// The first arrival to set a key keeps it
    FirstWriterWins,
}

impl MergePolicy {
    /// Folds `incoming` into `target` according to the policy.
    pub fn merge(self, target: &mut serde_json::Map<String, Value>, incoming: &serde_json::Map<String, Value>) {
        for (key, value) in incoming {
            match self {
                Self::LastWriterWins => {
                    target.insert(key.clone(), value.clone());
                }
                Self::FirstWriterWins => {
                    if !target.contains_key(key) {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
    }
}

/// Node kind. Every kind's spawn and join behaviour is dispatched on this enum.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpecKind {
    StartEvent,
    EndEvent {
        #[serde(default)]
        terminate: bool,
    },
    /// An activity with no action of its own
    Task,
    ScriptTask {
        script: String,
    },
    /// Waits in READY until the host completes it
    UserTask,
    ExclusiveGateway {
        /// Target taken when no guard matches
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    ParallelGateway {
        /// Overrides the engine-wide join merge policy
        #[serde(default, skip_serializing_if = "Option::is_none")]
        merge: Option<MergePolicy>,
    },
    IntermediateCatchEvent {
        event: EventDefinition,
    },
    BoundaryEvent {
        attached_to: String,
        event: EventDefinition,
        #[serde(default = "default_interrupting")]
        interrupting: bool,
    },
    SubProcess {
        process: String,
    },
}

fn default_interrupting() -> bool {
    true
}

impl SpecKind {
    /// Activities can carry boundary events.
    pub fn is_activity(&self) -> bool {
        matches!(
            self,
            Self::Task | Self::ScriptTask { .. } | Self::UserTask | Self::SubProcess { .. }
        )
    }

    pub fn is_gateway(&self) -> bool {
        matches!(self, Self::ExclusiveGateway { .. } | Self::ParallelGateway { .. })
    }

    /// Event the task waits for, if any.
    pub fn event(&self) -> Option<&EventDefinition> {
        match self {
            Self::IntermediateCatchEvent { event } | Self::BoundaryEvent { event, .. } => Some(event),
            _ => None,
        }
    }
}

impl fmt::Display for SpecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StartEvent => "start event",
            Self::EndEvent { .. } => "end event",
            Self::Task => "task",
            Self::ScriptTask { .. } => "script task",
            Self::UserTask => "user task",
            Self::ExclusiveGateway { .. } => "exclusive gateway",
            Self::ParallelGateway { .. } => "parallel gateway",
            Self::IntermediateCatchEvent { .. } => "intermediate catch event",
            Self::BoundaryEvent { .. } => "boundary event",
            Self::SubProcess { .. } => "sub-process",
        };
        f.write_str(name)
    }
}

/// A directed sequence flow to another node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Flow {
    pub target: String,

    /// Guard expression, evaluated by exclusive gateways only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// A node of the process graph.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskSpec {
    /// Unique name within the process
    pub name: String,

    #[serde(flatten)]
    pub kind: SpecKind,

    /// Outgoing flows in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<Flow>,

    /// Sources of incoming flows (derived)
    #[serde(skip)]
    pub inputs: Vec<String>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, kind: SpecKind) -> Self {
        Self {
            name: name.into(),
            kind,
            outputs: Vec::new(),
            inputs: Vec::new(),
        }
    }

    /// A gateway with several incoming flows merges branches.
    pub fn is_join(&self) -> bool {
        self.kind.is_gateway() && self.inputs.len() > 1
    }
}

/// Serialized shape of a process; derived fields are rebuilt on load.
#[derive(Deserialize)]
struct ProcessSpecDef {
    id: String,
    #[serde(default)]
    name: Option<String>,
    specs: BTreeMap<String, TaskSpec>,
}

impl From<ProcessSpecDef> for ProcessSpec {
    fn from(def: ProcessSpecDef) -> Self {
        let mut process = Self {
            id: def.id,
            name: def.name,
            specs: def.specs,
            attachments: BTreeMap::new(),
        };
        process.link();
        process
    }
}

/// An immutable process graph.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(from = "ProcessSpecDef")]
pub struct ProcessSpec {
    /// Process identifier, used to reference it as a sub-process
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Nodes keyed by name
    pub specs: BTreeMap<String, TaskSpec>,

    /// Boundary event names keyed by the activity they are attached to
    #[serde(skip)]
    attachments: BTreeMap<String, Vec<String>>,
}

impl ProcessSpec {
    pub fn builder(id: impl Into<String>) -> ProcessSpecBuilder {
        ProcessSpecBuilder::new(id)
    }

    /// Builds a process from nodes, deriving incoming flows and attachments.
    pub fn from_specs(id: impl Into<String>, specs: Vec<TaskSpec>) -> Result<Self, SpecError> {
        let mut map = BTreeMap::new();
        for spec in specs {
            if map.contains_key(&spec.name) {
                return Err(SpecError::DuplicateSpec(spec.name));
            }
            map.insert(spec.name.clone(), spec);
        }
        let mut process = Self {
            id: id.into(),
            name: None,
            specs: map,
            attachments: BTreeMap::new(),
        };
        process.link();
        validate_process(&process)?;
        Ok(process)
    }

    /// Recomputes `inputs` and boundary attachments from the flows.
    fn link(&mut self) {
        let mut inputs: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut attachments: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for spec in self.specs.values() {
            for flow in &spec.outputs {
                inputs
                    .entry(flow.target.clone())
                    .or_default()
                    .push(spec.name.clone());
            }
            if let SpecKind::BoundaryEvent { attached_to, .. } = &spec.kind {
                attachments
                    .entry(attached_to.clone())
                    .or_default()
                    .push(spec.name.clone());
            }
        }

        for spec in self.specs.values_mut() {
            spec.inputs = inputs.remove(&spec.name).unwrap_or_default();
        }
        self.attachments = attachments;
    }

    pub fn get(&self, name: &str) -> Option<&TaskSpec> {
        self.specs.get(name)
    }

    /// The single start event.
    pub fn start(&self) -> Option<&TaskSpec> {
        self.specs
            .values()
            .find(|s| matches!(s.kind, SpecKind::StartEvent))
    }

    /// Boundary events attached to an activity, in name order.
    pub fn boundary_events(&self, host: &str) -> Vec<&TaskSpec> {
        self.attachments
            .get(host)
            .map(|names| names.iter().filter_map(|n| self.specs.get(n)).collect())
            .unwrap_or_default()
    }

    /// Names of processes this one invokes as sub-processes.
    pub fn subprocess_refs(&self) -> Vec<&str> {
        self.specs
            .values()
            .filter_map(|s| match &s.kind {
                SpecKind::SubProcess { process } => Some(process.as_str()),
                _ => None,
            })
            .collect()
    }

    /// SHA-256 of the canonical JSON encoding, used to detect drift
    /// between a snapshot and the graph it is restored against.
    pub fn digest(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        format!("{:x}", Sha256::digest(&canonical))
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Incrementally assembles a [`ProcessSpec`].
pub struct ProcessSpecBuilder {
    id: String,
    name: Option<String>,
    specs: Vec<TaskSpec>,
    flows: Vec<(String, Flow)>,
}

impl ProcessSpecBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            specs: Vec::new(),
            flows: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a node of any kind.
    pub fn node(mut self, name: impl Into<String>, kind: SpecKind) -> Self {
        self.specs.push(TaskSpec::new(name, kind));
        self
    }

    pub fn start(self, name: impl Into<String>) -> Self {
        self.node(name, SpecKind::StartEvent)
    }

    pub fn end(self, name: impl Into<String>) -> Self {
        self.node(name, SpecKind::EndEvent { terminate: false })
    }

    pub fn terminate_end(self, name: impl Into<String>) -> Self {
        self.node(name, SpecKind::EndEvent { terminate: true })
    }

    pub fn task(self, name: impl Into<String>) -> Self {
        self.node(name, SpecKind::Task)
    }

    pub fn script_task(self, name: impl Into<String>, script: impl Into<String>) -> Self {
        self.node(
            name,
            SpecKind::ScriptTask {
                script: script.into(),
            },
        )
    }

    pub fn user_task(self, name: impl Into<String>) -> Self {
        self.node(name, SpecKind::UserTask)
    }

    pub fn exclusive_gateway(self, name: impl Into<String>, default: Option<&str>) -> Self {
        self.node(
            name,
            SpecKind::ExclusiveGateway {
                default: default.map(str::to_string),
            },
        )
    }

    pub fn parallel_gateway(self, name: impl Into<String>) -> Self {
        self.node(name, SpecKind::ParallelGateway { merge: None })
    }

    pub fn catch_event(self, name: impl Into<String>, event: EventDefinition) -> Self {
        self.node(name, SpecKind::IntermediateCatchEvent { event })
    }

    pub fn boundary_event(
        self,
        name: impl Into<String>,
        host: impl Into<String>,
        event: EventDefinition,
        interrupting: bool,
    ) -> Self {
        self.node(
            name,
            SpecKind::BoundaryEvent {
                attached_to: host.into(),
                event,
                interrupting,
            },
        )
    }

    pub fn sub_process(self, name: impl Into<String>, process: impl Into<String>) -> Self {
        self.node(
            name,
            SpecKind::SubProcess {
                process: process.into(),
            },
        )
    }

    /// Adds an unguarded flow. Flows between unknown nodes fail at `build`.
    pub fn flow(self, from: &str, to: &str) -> Self {
        self.add_flow(from, to, None)
    }

    pub fn guarded_flow(self, from: &str, to: &str, condition: impl Into<String>) -> Self {
        self.add_flow(from, to, Some(condition.into()))
    }

    fn add_flow(mut self, from: &str, to: &str, condition: Option<String>) -> Self {
        self.flows.push((
            from.to_string(),
            Flow {
                target: to.to_string(),
                condition,
            },
        ));
        self
    }

    /// Attaches flows, then links and validates the graph.
    pub fn build(self) -> Result<ProcessSpec, SpecError> {
        let mut specs = self.specs;
        for (source, flow) in self.flows {
            let spec = specs
                .iter_mut()
                .find(|s| s.name == source)
                .ok_or_else(|| SpecError::UnknownSource {
                    from: source.clone(),
                    to: flow.target.clone(),
                })?;
            spec.outputs.push(flow);
        }

        let mut process = ProcessSpec::from_specs(self.id, specs)?;
        process.name = self.name;
        Ok(process)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn diamond() -> ProcessSpec {
        ProcessSpec::builder("diamond")
            .start("Start")
            .parallel_gateway("Split")
            .task("A")
            .task("B")
            .parallel_gateway("Join")
            .end("End")
            .flow("Start", "Split")
            .flow("Split", "A")
            .flow("Split", "B")
            .flow("A", "Join")
            .flow("B", "Join")
            .flow("Join", "End")
            .build()
            .unwrap()
    }

    #[test]
    fn test_inputs_are_derived() {
        let spec = diamond();
        let join = spec.get("Join").unwrap();
        assert_eq!(join.inputs, vec!["A".to_string(), "B".to_string()]);
        assert!(join.is_join());
        assert!(!spec.get("Split").unwrap().is_join());
        assert_eq!(spec.start().unwrap().name, "Start");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = ProcessSpec::builder("dup").start("Start").task("Start").build();
        assert_eq!(result.unwrap_err(), SpecError::DuplicateSpec("Start".to_string()));
    }

    #[test]
    fn test_boundary_attachments() {
        let spec = ProcessSpec::builder("p")
            .start("Start")
            .user_task("Work")
            .boundary_event("Timeout", "Work", EventDefinition::timer("PT1H").unwrap(), true)
            .end("End")
            .end("Escalated")
            .flow("Start", "Work")
            .flow("Work", "End")
            .flow("Timeout", "Escalated")
            .build()
            .unwrap();

        let attached: Vec<&str> = spec.boundary_events("Work").iter().map(|s| s.name.as_str()).collect();
        assert_eq!(attached, vec!["Timeout"]);
        assert!(spec.boundary_events("End").is_empty());
    }

    #[test]
    fn test_serde_roundtrip_rebuilds_links() {
        let spec = diamond();
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["specs"]["Split"]["kind"], json!("parallel_gateway"));
        assert!(json["specs"]["Join"].get("inputs").is_none());

        let back: ProcessSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back.get("Join").unwrap().inputs.len(), 2);
        assert_eq!(back.digest(), spec.digest());
    }

    #[test]
    fn test_digest_detects_changes() {
        let original = diamond();
        let mut changed = original.clone();
        changed.specs.get_mut("A").unwrap().kind = SpecKind::ScriptTask {
            script: "x = 1".to_string(),
        };
        assert_ne!(original.digest(), changed.digest());
        assert_eq!(original.digest().len(), 64);
    }

    #[test]
    fn test_merge_policies() {
        let mut target = json!({"a": 1, "b": 1}).as_object().unwrap().clone();
        let incoming = json!({"b": 2, "c": 2}).as_object().unwrap().clone();

        let mut first = target.clone();
        MergePolicy::FirstWriterWins.merge(&mut first, &incoming);
        assert_eq!(Value::Object(first), json!({"a": 1, "b": 1, "c": 2}));

        MergePolicy::LastWriterWins.merge(&mut target, &incoming);
        assert_eq!(Value::Object(target), json!({"a": 1, "b": 2, "c": 2}));
    }
}
