//! Process Graph Validation
//!
//! Provides structural validation for process graphs including:
//! - Start event presence and uniqueness
//! - Reference integrity (flow targets, boundary hosts, sub-processes)
//! - Exclusive gateway guard and default consistency
//! - Reachability from the start event
//! - Recursion between sub-processes
//!
//! Modeling errors are reported here, before any task of the graph runs.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use log::{debug, info};

use super::event::EventDefinition;
use super::model::{ProcessSpec, SpecKind, TaskSpec};
use crate::error::{ScheduleError, SpecError};
use crate::schedule::{CycleSpec, TimerOnce};

/// Validates a single process graph.
///
/// Performs the following checks:
/// 1. Exactly one start event, with no incoming flows
/// 2. Every flow targets an existing node
/// 3. Boundary events attach to existing activities and have no incoming flows
/// 4. Exclusive gateways guard every non-default flow; guards appear nowhere else
/// 5. Timer definitions are well formed
/// 6. Every node is reachable from the start event
pub fn validate_process(process: &ProcessSpec) -> Result<(), SpecError> {
    info!(
        "Validating process '{}' with {} specs",
        process.id,
        process.len()
    );

    let start = find_start(process)?;

    for spec in process.specs.values() {
        validate_spec(process, spec)?;
    }

    check_reachability(process, start)?;

    debug!("Process '{}' validated", process.id);
    Ok(())
}

/// Validates the sub-process references of a main process and its
/// sub-process library: every reference resolves and none recurse.
pub fn validate_processes(
    main: &ProcessSpec,
    subprocesses: &BTreeMap<String, Arc<ProcessSpec>>,
) -> Result<(), SpecError> {
    let mut all: Vec<&ProcessSpec> = vec![main];
    all.extend(subprocesses.values().map(Arc::as_ref));

    for process in &all {
        for spec in process.specs.values() {
            if let SpecKind::SubProcess { process: target } = &spec.kind {
                if lookup(target, main, subprocesses).is_none() {
                    return Err(SpecError::UnknownProcess {
                        spec: spec.name.clone(),
                        process: target.clone(),
                    });
                }
            }
        }
    }

    // Depth-first search for a cycle in the invocation graph
    let mut done: HashSet<&str> = HashSet::new();
    for process in &all {
        let mut path: Vec<&str> = Vec::new();
        visit(process.id.as_str(), main, subprocesses, &mut path, &mut done)?;
    }
    Ok(())
}

fn lookup<'a>(
    id: &str,
    main: &'a ProcessSpec,
    subprocesses: &'a BTreeMap<String, Arc<ProcessSpec>>,
) -> Option<&'a ProcessSpec> {
    if id == main.id {
        Some(main)
    } else {
        subprocesses.get(id).map(Arc::as_ref)
    }
}

fn visit<'a>(
    id: &'a str,
    main: &'a ProcessSpec,
    subprocesses: &'a BTreeMap<String, Arc<ProcessSpec>>,
    path: &mut Vec<&'a str>,
    done: &mut HashSet<&'a str>,
) -> Result<(), SpecError> {
    if done.contains(id) {
        return Ok(());
    }
    if path.contains(&id) {
        return Err(SpecError::RecursiveProcess(id.to_string()));
    }

    path.push(id);
    if let Some(process) = lookup(id, main, subprocesses) {
        for target in process.subprocess_refs() {
            visit(target, main, subprocesses, path, done)?;
        }
    }
    path.pop();
    done.insert(id);
    Ok(())
}

fn find_start(process: &ProcessSpec) -> Result<&TaskSpec, SpecError> {
    let mut starts = process
        .specs
        .values()
        .filter(|s| matches!(s.kind, SpecKind::StartEvent));

    let first = starts
        .next()
        .ok_or_else(|| SpecError::MissingStart(process.id.clone()))?;

    if let Some(second) = starts.next() {
        return Err(SpecError::MultipleStarts {
            process: process.id.clone(),
            first: first.name.clone(),
            second: second.name.clone(),
        });
    }
    Ok(first)
}

/// Checks a single node's fields and references.
fn validate_spec(process: &ProcessSpec, spec: &TaskSpec) -> Result<(), SpecError> {
    for flow in &spec.outputs {
        if process.get(&flow.target).is_none() {
            return Err(SpecError::UnknownTarget {
                spec: spec.name.clone(),
                target: flow.target.clone(),
            });
        }
    }

    match &spec.kind {
        SpecKind::StartEvent if !spec.inputs.is_empty() => {
            return Err(SpecError::UnexpectedIncoming(spec.name.clone()));
        }
        SpecKind::BoundaryEvent { attached_to, .. } => {
            if !spec.inputs.is_empty() {
                return Err(SpecError::UnexpectedIncoming(spec.name.clone()));
            }
            let host = process.get(attached_to).ok_or_else(|| SpecError::UnknownHost {
                spec: spec.name.clone(),
                host: attached_to.clone(),
            })?;
            if !host.kind.is_activity() {
                return Err(SpecError::InvalidHost {
                    spec: spec.name.clone(),
                    host: attached_to.clone(),
                });
            }
        }
        _ => {}
    }

    if let SpecKind::ExclusiveGateway { default } = &spec.kind {
        if let Some(target) = default {
            if !spec.outputs.iter().any(|f| &f.target == target) {
                return Err(SpecError::InvalidDefault {
                    gateway: spec.name.clone(),
                    target: target.clone(),
                });
            }
        }
        if spec.outputs.len() > 1 {
            for flow in &spec.outputs {
                let is_default = default.as_deref() == Some(flow.target.as_str());
                if flow.condition.is_none() && !is_default {
                    return Err(SpecError::UnguardedFlow {
                        gateway: spec.name.clone(),
                        target: flow.target.clone(),
                    });
                }
            }
        }
    } else if let Some(flow) = spec.outputs.iter().find(|f| f.condition.is_some()) {
        return Err(SpecError::UnexpectedGuard {
            spec: spec.name.clone(),
            target: flow.target.clone(),
        });
    }

    if let Some(event) = spec.kind.event() {
        check_event(event).map_err(|source| SpecError::InvalidEvent {
            spec: spec.name.clone(),
            source,
        })?;
    }

    Ok(())
}

/// Re-parses timer definitions so hand-assembled values obey the same
/// rules as parsed ones.
fn check_event(event: &EventDefinition) -> Result<(), ScheduleError> {
    match event {
        EventDefinition::Timer(timer) => TimerOnce::parse(&timer.to_string()).map(|_| ()),
        EventDefinition::TimerCycle(cycle) => CycleSpec::parse(&cycle.to_string()).map(|_| ()),
        EventDefinition::Message(_) => Ok(()),
    }
}

/// Breadth-first walk from the start event over flows and boundary attachments.
fn check_reachability(process: &ProcessSpec, start: &TaskSpec) -> Result<(), SpecError> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&TaskSpec> = VecDeque::new();
    seen.insert(start.name.as_str());
    queue.push_back(start);

    while let Some(spec) = queue.pop_front() {
        let successors = spec
            .outputs
            .iter()
            .filter_map(|f| process.get(&f.target))
            .chain(process.boundary_events(&spec.name));

        for next in successors {
            if seen.insert(next.name.as_str()) {
                queue.push_back(next);
            }
        }
    }

    match process.specs.keys().find(|name| !seen.contains(name.as_str())) {
        Some(name) => Err(SpecError::Unreachable(name.clone())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_valid_process() {
        let result = ProcessSpec::builder("ok")
            .start("Start")
            .task("Work")
            .end("End")
            .flow("Start", "Work")
            .flow("Work", "End")
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_missing_start() {
        let result = ProcessSpec::builder("p").task("Work").build();
        assert_eq!(result.unwrap_err(), SpecError::MissingStart("p".to_string()));
    }

    #[test]
    fn test_multiple_starts() {
        let result = ProcessSpec::builder("p").start("A").start("B").build();
        assert!(matches!(result, Err(SpecError::MultipleStarts { .. })));
    }

    #[test]
    fn test_unknown_flow_endpoints() {
        let result = ProcessSpec::builder("p")
            .start("Start")
            .flow("Start", "Nowhere")
            .build();
        assert!(matches!(result, Err(SpecError::UnknownTarget { .. })));

        let result = ProcessSpec::builder("p")
            .start("Start")
            .flow("Ghost", "Start")
            .build();
        assert!(matches!(result, Err(SpecError::UnknownSource { .. })));
    }

    #[test]
    fn test_start_with_incoming_flow() {
        let result = ProcessSpec::builder("p")
            .start("Start")
            .task("Loop")
            .flow("Start", "Loop")
            .flow("Loop", "Start")
            .build();
        assert_eq!(result.unwrap_err(), SpecError::UnexpectedIncoming("Start".to_string()));
    }

    #[test]
    fn test_exclusive_gateway_requires_guards() {
        let result = ProcessSpec::builder("p")
            .start("Start")
            .exclusive_gateway("Choose", None)
            .end("A")
            .end("B")
            .flow("Start", "Choose")
            .guarded_flow("Choose", "A", "x > 1")
            .flow("Choose", "B")
            .build();
        assert!(matches!(result, Err(SpecError::UnguardedFlow { .. })));

        let result = ProcessSpec::builder("p")
            .start("Start")
            .exclusive_gateway("Choose", Some("B"))
            .end("A")
            .end("B")
            .flow("Start", "Choose")
            .guarded_flow("Choose", "A", "x > 1")
            .flow("Choose", "B")
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_exclusive_gateway_invalid_default() {
        let result = ProcessSpec::builder("p")
            .start("Start")
            .exclusive_gateway("Choose", Some("Missing"))
            .end("A")
            .flow("Start", "Choose")
            .guarded_flow("Choose", "A", "x > 1")
            .build();
        assert!(matches!(result, Err(SpecError::InvalidDefault { .. })));
    }

    #[test]
    fn test_guards_only_on_exclusive_gateways() {
        let result = ProcessSpec::builder("p")
            .start("Start")
            .end("End")
            .guarded_flow("Start", "End", "x > 1")
            .build();
        assert!(matches!(result, Err(SpecError::UnexpectedGuard { .. })));
    }

    #[test]
    fn test_boundary_host_checks() {
        let timer = EventDefinition::timer("PT1S").unwrap();
        let result = ProcessSpec::builder("p")
            .start("Start")
            .boundary_event("Late", "Missing", timer.clone(), true)
            .flow("Start", "Late")
            .build();
        assert!(matches!(result, Err(SpecError::UnexpectedIncoming(_))));

        let result = ProcessSpec::builder("p")
            .start("Start")
            .boundary_event("Late", "Missing", timer.clone(), true)
            .build();
        assert!(matches!(result, Err(SpecError::UnknownHost { .. })));

        let result = ProcessSpec::builder("p")
            .start("Start")
            .end("End")
            .boundary_event("Late", "End", timer, true)
            .flow("Start", "End")
            .build();
        assert!(matches!(result, Err(SpecError::InvalidHost { .. })));
    }

    #[test]
    fn test_unreachable_node() {
        let result = ProcessSpec::builder("p")
            .start("Start")
            .end("End")
            .task("Island")
            .flow("Start", "End")
            .build();
        assert_eq!(result.unwrap_err(), SpecError::Unreachable("Island".to_string()));
    }

    #[test]
    fn test_hand_built_cycle_is_checked() {
        let cycle = CycleSpec {
            repeat: Some(0),
            start: None,
            interval: Duration::from_secs(1),
        };
        let result = ProcessSpec::builder("p")
            .start("Start")
            .catch_event("Wait", EventDefinition::TimerCycle(cycle))
            .flow("Start", "Wait")
            .build();
        assert!(matches!(result, Err(SpecError::InvalidEvent { .. })));
    }

    fn calls(id: &str, target: &str) -> ProcessSpec {
        ProcessSpec::builder(id)
            .start("Start")
            .sub_process("Call", target)
            .flow("Start", "Call")
            .build()
            .unwrap()
    }

    #[test]
    fn test_unknown_subprocess() {
        let main = calls("main", "missing");
        let result = validate_processes(&main, &BTreeMap::new());
        assert!(matches!(result, Err(SpecError::UnknownProcess { .. })));
    }

    #[test]
    fn test_recursive_subprocesses() {
        let main = calls("main", "a");
        let mut library = BTreeMap::new();
        library.insert("a".to_string(), Arc::new(calls("a", "b")));
        library.insert("b".to_string(), Arc::new(calls("b", "a")));
        let result = validate_processes(&main, &library);
        assert!(matches!(result, Err(SpecError::RecursiveProcess(_))));
    }

    #[test]
    fn test_subprocess_library_ok() {
        let main = calls("main", "leaf");
        let leaf = ProcessSpec::builder("leaf")
            .start("Start")
            .end("End")
            .flow("Start", "End")
            .build()
            .unwrap();
        let mut library = BTreeMap::new();
        library.insert("leaf".to_string(), Arc::new(leaf));
        assert!(validate_processes(&main, &library).is_ok());
    }
}
