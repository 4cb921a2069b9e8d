//! Joins and Sub-Process Completion
//!
//! Structural updates that depend only on the task tree, never on the
//! clock: parallel joins firing once every incoming branch has arrived,
//! exclusive joins discarding late arrivals, and sub-process tasks
//! resuming once their nested run has finished.

use std::collections::BTreeSet;

use log::{debug, info, warn};

use super::workflow::Workflow;
use crate::spec::{MergePolicy, SpecKind, TaskSpec};
use crate::task::{FailureKind, TaskData, TaskId, TaskState};

impl Workflow {
    /// Re-evaluates waiting joins and sub-processes. Returns true if any
    /// task changed state.
    pub(crate) fn update_waiting(&mut self) -> bool {
        let mut changed = false;
        for id in self.tasks.walk() {
            let Some(task) = self.tasks.get(id) else {
                continue;
            };
            if task.state != TaskState::Waiting {
                continue;
            }
            let spec = task.spec.clone();
            changed |= match &spec.kind {
                SpecKind::ParallelGateway { merge } if spec.is_join() => {
                    let policy = merge.unwrap_or(self.config.join_merge);
                    self.try_parallel_join(id, &spec, policy)
                }
                SpecKind::SubProcess { .. } => self.try_finish_subprocess(id),
                _ => false,
            };
        }
        changed
    }

    /// Fires a parallel join once one pending arrival exists per incoming
    /// flow. The earliest arrival per flow is used; the last of them
    /// continues with the merged data and the others complete silently.
    fn try_parallel_join(&mut self, id: TaskId, spec: &TaskSpec, policy: MergePolicy) -> bool {
        let Some(task) = self.tasks.get(id) else {
            return false;
        };
        let process = task.process.clone();
        let scope = self.scope_of(id);

        let mut pending: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|t| t.state == TaskState::Waiting && t.process == process && t.spec.name == spec.name)
            .map(|t| t.id)
            .filter(|t| self.scope_of(*t) == scope)
            .collect();
        pending.sort();

        let mut chosen: Vec<TaskId> = Vec::new();
        for input in &spec.inputs {
            let arrival = pending.iter().copied().find(|candidate| {
                !chosen.contains(candidate) && self.parent_spec_name(*candidate) == Some(input.as_str())
            });
            match arrival {
                Some(candidate) => chosen.push(candidate),
                None => return false,
            }
        }
        chosen.sort();

        let Some((&last, absorbed)) = chosen.split_last() else {
            return false;
        };
        let mut merged = TaskData::new();
        for arrival in &chosen {
            if let Some(t) = self.tasks.get(*arrival) {
                policy.merge(&mut merged, &t.data);
            }
        }
        for arrival in absorbed {
            self.tasks.transition(*arrival, TaskState::Completed);
            debug!("Join '{}' absorbed arrival {}", spec.name, arrival);
        }
        if let Some(task) = self.tasks.get_mut(last) {
            task.data = merged;
        }
        self.tasks.transition(last, TaskState::Ready);
        info!("Join '{}' fired with {} branches", spec.name, chosen.len());
        true
    }

    /// Exclusive joins pass the first arrival of a parallel fork and
    /// discard the rest.
    pub(crate) fn arrive_at_exclusive_join(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get(id) else {
            return;
        };
        let late = self.tasks.iter().any(|other| {
            other.id != id
                && other.spec.name == task.spec.name
                && other.process == task.process
                && matches!(other.state, TaskState::Ready | TaskState::Completed)
                && !self.tasks.is_ancestor(other.id, id)
                && self.forked_by_flows(other.id, id)
        });

        if late {
            warn!(
                "Discarding late arrival {} at exclusive join '{}'",
                id, task.spec.name
            );
            self.tasks.transition(id, TaskState::Cancelled);
        } else {
            self.tasks.transition(id, TaskState::Ready);
        }
    }

    /// True when `a` and `b` descend from the same task along two different
    /// outgoing sequence flows, as opposed to boundary or nested spawns.
    fn forked_by_flows(&self, a: TaskId, b: TaskId) -> bool {
        let lineage = self.lineage(a);
        let mut previous = None;
        let mut cursor = Some(b);

        while let Some(current) = cursor {
            if let Some(position) = lineage.iter().position(|x| *x == current) {
                let branch_a = position.checked_sub(1).map(|i| lineage[i]);
                let (Some(branch_a), Some(branch_b)) = (branch_a, previous) else {
                    return false;
                };
                return self.spawned_by_flow(current, branch_a) && self.spawned_by_flow(current, branch_b);
            }
            previous = Some(current);
            cursor = self.tasks.get(current).and_then(|t| t.parent);
        }
        false
    }

    fn spawned_by_flow(&self, parent: TaskId, child: TaskId) -> bool {
        let (Some(parent), Some(child)) = (self.tasks.get(parent), self.tasks.get(child)) else {
            return false;
        };
        parent.process == child.process
            && parent.spec.outputs.iter().any(|f| f.target == child.spec.name)
    }

    /// `id` followed by its ancestors up to the root.
    fn lineage(&self, id: TaskId) -> Vec<TaskId> {
        let mut chain = vec![id];
        let mut current = self.tasks.get(id).and_then(|t| t.parent);
        while let Some(parent) = current {
            chain.push(parent);
            current = self.tasks.get(parent).and_then(|t| t.parent);
        }
        chain
    }

    fn parent_spec_name(&self, id: TaskId) -> Option<&str> {
        let parent = self.tasks.get(id)?.parent?;
        self.tasks.get(parent).map(|p| p.spec.name.as_str())
    }

    /// The sub-process task enclosing `id`, or `None` at the top level.
    pub(crate) fn scope_of(&self, id: TaskId) -> Option<TaskId> {
        let task = self.tasks.get(id)?;
        let mut current = task.parent;
        while let Some(parent) = current {
            let ancestor = self.tasks.get(parent)?;
            if ancestor.process != task.process {
                return Some(parent);
            }
            current = ancestor.parent;
        }
        None
    }

    /// Children of a sub-process task that belong to the nested process.
    pub(crate) fn nested_roots(&self, id: TaskId) -> Vec<TaskId> {
        let Some(task) = self.tasks.get(id) else {
            return Vec::new();
        };
        task.children
            .iter()
            .copied()
            .filter(|c| self.tasks.get(*c).is_some_and(|child| child.process != task.process))
            .collect()
    }

    /// Resumes a sub-process task once nothing in its nested run is live.
    fn try_finish_subprocess(&mut self, id: TaskId) -> bool {
        let nested: Vec<TaskId> = self
            .nested_roots(id)
            .into_iter()
            .flat_map(|root| self.tasks.walk_from(root))
            .collect();
        if nested.is_empty() {
            return false;
        }
        if nested
            .iter()
            .any(|n| self.tasks.state(*n).map_or(true, |s| !s.is_finished()))
        {
            return false;
        }

        if let Some(failed) = nested
            .iter()
            .copied()
            .find(|n| self.tasks.state(*n) == Some(TaskState::Error))
        {
            let message = format!(
                "nested task {} ('{}') failed",
                failed,
                self.spec_name(failed)
            );
            self.fail(id, FailureKind::Modeling, message);
            return true;
        }

        let leaves: BTreeSet<TaskId> = nested
            .iter()
            .copied()
            .filter(|n| {
                self.tasks
                    .get(*n)
                    .is_some_and(|t| t.state == TaskState::Completed && t.children.is_empty())
            })
            .collect();
        let mut result = TaskData::new();
        for leaf in leaves {
            if let Some(t) = self.tasks.get(leaf) {
                self.config.join_merge.merge(&mut result, &t.data);
            }
        }

        if let Some(task) = self.tasks.get_mut(id) {
            MergePolicy::LastWriterWins.merge(&mut task.data, &result);
        }
        self.tasks.transition(id, TaskState::Ready);
        info!("Sub-process task {} ('{}') finished", id, self.spec_name(id));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::EngineConfig;
    use crate::error::ScriptError;
    use crate::spec::ProcessSpec;
    use crate::testing::{diamond_process, init_logging, TableEngine};
    use serde_json::json;

    fn setter(key: &'static str, value: serde_json::Value) -> impl Fn(&mut TaskData) -> Result<(), ScriptError> {
        move |d| {
            d.insert(key.to_string(), value.clone());
            Ok(())
        }
    }

    fn diamond_engine() -> Arc<dyn crate::ScriptEngine> {
        TableEngine::new()
            .script("left", setter("shared", json!("left")))
            .script("right", setter("shared", json!("right")))
            .into_shared()
    }

    #[test]
    fn test_parallel_join_waits_for_all_branches() {
        init_logging();
        let mut workflow = Workflow::new(diamond_process(), diamond_engine()).unwrap();
        workflow.do_engine_steps();

        let joins: Vec<_> = workflow
            .tasks()
            .iter()
            .filter(|t| t.spec_name() == "Join")
            .map(|t| t.state())
            .collect();
        assert_eq!(joins.len(), 2);
        assert_eq!(
            joins.iter().filter(|s| **s == TaskState::Completed).count(),
            2
        );
        let ends: Vec<_> = workflow
            .tasks()
            .iter()
            .filter(|t| t.spec_name() == "End")
            .collect();
        assert_eq!(ends.len(), 1);
        assert!(workflow.is_completed());
    }

    #[test]
    fn test_parallel_join_merges_in_arrival_order() {
        let mut workflow = Workflow::new(diamond_process(), diamond_engine()).unwrap();
        workflow.do_engine_steps();
        assert_eq!(workflow.data().get("shared"), Some(&json!("right")));

        let mut first_wins = Workflow::new(diamond_process(), diamond_engine()).unwrap();
        first_wins.set_config(EngineConfig {
            join_merge: MergePolicy::FirstWriterWins,
            ..EngineConfig::default()
        });
        first_wins.do_engine_steps();
        assert_eq!(first_wins.data().get("shared"), Some(&json!("left")));
    }

    #[test]
    fn test_parallel_join_out_of_order_arrival() {
        let spec = ProcessSpec::builder("approvals")
            .start("Start")
            .parallel_gateway("Split")
            .user_task("Legal")
            .user_task("Finance")
            .parallel_gateway("Join")
            .end("End")
            .flow("Start", "Split")
            .flow("Split", "Legal")
            .flow("Split", "Finance")
            .flow("Legal", "Join")
            .flow("Finance", "Join")
            .flow("Join", "End")
            .build()
            .unwrap();
        let mut workflow = Workflow::new(spec, TableEngine::shared()).unwrap();
        workflow.do_engine_steps();

        let finance = workflow.get_next_task("Finance").unwrap().id();
        workflow.complete_task(finance, None).unwrap();
        workflow.do_engine_steps();
        assert_eq!(workflow.get_next_task("Join").unwrap().state(), TaskState::Waiting);
        assert!(workflow.get_next_task("End").is_none());

        let legal = workflow.get_next_task("Legal").unwrap().id();
        workflow.complete_task(legal, None).unwrap();
        workflow.do_engine_steps();
        assert_eq!(workflow.get_next_task("End").unwrap().state(), TaskState::Completed);
        assert!(workflow.is_completed());
    }

    #[test]
    fn test_parallel_join_never_fires_on_failed_branch() {
        let engine = TableEngine::new()
            .script("left", |_| Err(ScriptError::new("boom")))
            .script("right", |_| Ok(()))
            .into_shared();
        let mut workflow = Workflow::new(diamond_process(), engine).unwrap();
        workflow.do_engine_steps();

        assert_eq!(workflow.get_next_task("Left").unwrap().state(), TaskState::Error);
        assert_eq!(workflow.get_next_task("Join").unwrap().state(), TaskState::Waiting);
        assert!(workflow.get_next_task("End").is_none());
        assert!(!workflow.is_completed());
    }

    #[test]
    fn test_exclusive_join_passes_first_arrival_only() {
        let spec = ProcessSpec::builder("race")
            .start("Start")
            .parallel_gateway("Split")
            .task("Fast")
            .task("Slow")
            .exclusive_gateway("Merge", None)
            .end("End")
            .flow("Start", "Split")
            .flow("Split", "Fast")
            .flow("Split", "Slow")
            .flow("Fast", "Merge")
            .flow("Slow", "Merge")
            .flow("Merge", "End")
            .build()
            .unwrap();
        let mut workflow = Workflow::new(spec, TableEngine::shared()).unwrap();
        workflow.do_engine_steps();

        let merges: Vec<TaskState> = workflow
            .tasks()
            .iter()
            .filter(|t| t.spec_name() == "Merge")
            .map(|t| t.state())
            .collect();
        assert_eq!(merges, vec![TaskState::Completed, TaskState::Cancelled]);
        let ends = workflow.get_tasks(None).into_iter().filter(|t| t.spec_name() == "End").count();
        assert_eq!(ends, 1);
    }

    #[test]
    fn test_exclusive_join_allows_loop_back() {
        let spec = ProcessSpec::builder("retry")
            .start("Start")
            .exclusive_gateway("Again", None)
            .script_task("Attempt", "attempt")
            .exclusive_gateway("Check", Some("Again"))
            .end("End")
            .flow("Start", "Again")
            .flow("Again", "Attempt")
            .flow("Attempt", "Check")
            .guarded_flow("Check", "End", "done")
            .flow("Check", "Again")
            .build()
            .unwrap();
        let engine = TableEngine::new()
            .script("attempt", |d| {
                let tries = d.get("tries").and_then(|v| v.as_u64()).unwrap_or(0) + 1;
                d.insert("tries".into(), json!(tries));
                d.insert("done".into(), json!(tries >= 3));
                Ok(())
            })
            .into_shared();
        let mut workflow = Workflow::new(spec, engine).unwrap();
        workflow.do_engine_steps();

        assert!(workflow.is_completed());
        assert_eq!(workflow.data().get("tries"), Some(&json!(3)));
        assert!(workflow.get_tasks(Some(TaskState::Cancelled)).is_empty());
    }

    #[test]
    fn test_subprocess_runs_nested_process() {
        let child = ProcessSpec::builder("pricing")
            .start("Start")
            .script_task("Price", "price")
            .end("End")
            .flow("Start", "Price")
            .flow("Price", "End")
            .build()
            .unwrap();
        let parent = ProcessSpec::builder("order")
            .start("Start")
            .sub_process("Quote", "pricing")
            .end("End")
            .flow("Start", "Quote")
            .flow("Quote", "End")
            .build()
            .unwrap();
        let engine = TableEngine::new()
            .script("price", |d| {
                let qty = d.get("qty").and_then(|v| v.as_i64()).unwrap_or(0);
                d.insert("total".into(), json!(qty * 5));
                Ok(())
            })
            .into_shared();

        let mut workflow = Workflow::with_subprocesses(parent, vec![Arc::new(child)], engine).unwrap();
        let root = workflow.tasks().root().unwrap();
        workflow
            .update_data(root, crate::testing::data(json!({"qty": 4})))
            .unwrap();
        workflow.do_engine_steps();

        assert!(workflow.is_completed());
        let quote = workflow.get_next_task("Quote").unwrap();
        assert_eq!(quote.state(), TaskState::Completed);
        assert_eq!(quote.get_data("total"), Some(&json!(20)));
        assert_eq!(workflow.data().get("total"), Some(&json!(20)));
        assert_eq!(workflow.data().get("qty"), Some(&json!(4)));
    }

    #[test]
    fn test_subprocess_nested_failure_fails_task() {
        let child = ProcessSpec::builder("inner")
            .start("Start")
            .script_task("Crash", "crash")
            .end("End")
            .flow("Start", "Crash")
            .flow("Crash", "End")
            .build()
            .unwrap();
        let parent = ProcessSpec::builder("outer")
            .start("Start")
            .sub_process("Call", "inner")
            .end("End")
            .flow("Start", "Call")
            .flow("Call", "End")
            .build()
            .unwrap();
        let engine = TableEngine::new()
            .script("crash", |_| Err(ScriptError::new("crashed")))
            .into_shared();
        let mut workflow = Workflow::with_subprocesses(parent, vec![Arc::new(child)], engine).unwrap();
        workflow.do_engine_steps();

        let call = workflow.get_next_task("Call").unwrap();
        assert_eq!(call.state(), TaskState::Error);
        assert_eq!(call.failure().unwrap().kind, FailureKind::Modeling);
        assert!(!workflow
            .get_tasks(None)
            .iter()
            .any(|t| t.spec_name() == "End" && t.process() == "outer"));
    }

    #[test]
    fn test_terminate_inside_subprocess_stays_in_scope() {
        let child = ProcessSpec::builder("inner")
            .start("Start")
            .parallel_gateway("Split")
            .user_task("Stuck")
            .terminate_end("Stop")
            .end("End")
            .flow("Start", "Split")
            .flow("Split", "Stuck")
            .flow("Split", "Stop")
            .flow("Stuck", "End")
            .build()
            .unwrap();
        let parent = ProcessSpec::builder("outer")
            .start("Start")
            .sub_process("Call", "inner")
            .end("Done")
            .flow("Start", "Call")
            .flow("Call", "Done")
            .build()
            .unwrap();
        let mut workflow =
            Workflow::with_subprocesses(parent, vec![Arc::new(child)], TableEngine::shared()).unwrap();
        workflow.do_engine_steps();

        assert_eq!(workflow.get_next_task("Stuck").unwrap().state(), TaskState::Cancelled);
        assert_eq!(workflow.get_next_task("Call").unwrap().state(), TaskState::Completed);
        assert_eq!(workflow.get_next_task("Done").unwrap().state(), TaskState::Completed);
        assert!(workflow.is_completed());
    }
}
