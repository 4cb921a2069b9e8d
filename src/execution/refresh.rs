//! Timer Polling
//!
//! Waiting timers are resolved only when the host calls
//! [`Workflow::refresh_waiting_tasks`]. A one-shot timer becomes READY once
//! due. A cyclic timer surfaces each due occurrence as its own READY task
//! and schedules the next one as a new WAITING sibling, until its repeat
//! bound is used up.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;

use super::workflow::Workflow;
use crate::schedule::{format_timestamp, CycleSpec};
use crate::spec::{EventDefinition, EventKind};
use crate::task::{FailureKind, TaskId, TaskState};

/// An event the workflow is still waiting on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaitingEvent {
    pub task_id: TaskId,
    pub spec_name: String,
    pub kind: EventKind,
    /// Message name, or the RFC 3339 due time of a timer
    pub identity: String,
    /// Due time for timers
    pub due: Option<DateTime<Utc>>,
}

impl Workflow {
    /// Moves every due timer to READY and returns the surfaced tasks in the
    /// order their occurrences became due, across all timers. Occurrences
    /// due at the same instant keep tree order.
    ///
    /// Occurrences of a cyclic timer that accumulated while the host was not
    /// polling are all surfaced, up to `max_catch_up` per timer per call.
    pub fn refresh_waiting_tasks(&mut self) -> Vec<TaskId> {
        let now = self.clock.now();
        let mut surfaced = Vec::new();

        let waiting: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|t| t.state == TaskState::Waiting && self.schedules.contains_key(&t.id))
            .map(|t| t.id)
            .collect();

        for id in waiting {
            let Some(task) = self.tasks.get(id) else {
                continue;
            };
            let spec = task.spec.clone();
            match spec.kind.event() {
                Some(EventDefinition::Timer(_)) => self.fire_once(id, now, &mut surfaced),
                Some(EventDefinition::TimerCycle(cycle)) => self.fire_cycle(id, cycle, now, &mut surfaced),
                _ => {}
            }
        }

        if !surfaced.is_empty() {
            debug!("Refresh surfaced {} timer occurrence(s)", surfaced.len());
        }
        surfaced.sort_by_key(|(due, _)| *due);
        surfaced.into_iter().map(|(_, id)| id).collect()
    }

    fn fire_once(&mut self, id: TaskId, now: DateTime<Utc>, surfaced: &mut Vec<(DateTime<Utc>, TaskId)>) {
        let Some(state) = self.schedules.get(&id).copied() else {
            return;
        };
        if state.is_due(now) && self.tasks.transition(id, TaskState::Ready) {
            self.schedules.remove(&id);
            info!("Timer '{}' fired", self.spec_name(id));
            surfaced.push((state.next_due, id));
        }
    }

    fn fire_cycle(
        &mut self,
        id: TaskId,
        cycle: &CycleSpec,
        now: DateTime<Utc>,
        surfaced: &mut Vec<(DateTime<Utc>, TaskId)>,
    ) {
        let limit = self.config.max_catch_up;
        let mut current = id;
        let mut fired_now = 0;

        while let Some(state) = self.schedules.get(&current).copied() {
            if !state.is_due(now) {
                break;
            }
            if fired_now >= limit {
                warn!(
                    "Timer '{}' is {} occurrence(s) behind the catch-up limit; resuming next refresh",
                    self.spec_name(current),
                    fired_now
                );
                break;
            }

            self.schedules.remove(&current);
            if !self.tasks.transition(current, TaskState::Ready) {
                break;
            }
            surfaced.push((state.next_due, current));
            fired_now += 1;

            let occurrence = state.fired + 1;
            info!(
                "Timer '{}' occurrence {} fired (due {})",
                self.spec_name(current),
                occurrence,
                format_timestamp(state.next_due)
            );
            if cycle.is_exhausted(occurrence) {
                debug!("Timer '{}' exhausted after {} occurrences", self.spec_name(current), occurrence);
                break;
            }

            let Some(task) = self.tasks.get(current) else {
                break;
            };
            let Some(parent) = task.parent else {
                break;
            };
            let process = task.process.clone();
            let spec = task.spec.clone();
            let data = task.data.clone();

            let sibling = self.tasks.add_child(parent, &process, spec, data, Some(current));
            self.tasks.transition(sibling, TaskState::Waiting);
            match state.next(cycle.interval) {
                Ok(next) => {
                    self.schedules.insert(sibling, next);
                    current = sibling;
                }
                Err(e) => {
                    self.fail(sibling, FailureKind::Schedule, e.to_string());
                    break;
                }
            }
        }
    }

    /// Outstanding events: WAITING tasks with a timer or message attached.
    pub fn waiting_events(&self) -> Vec<WaitingEvent> {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Waiting)
            .filter_map(|t| {
                let event = t.spec.kind.event()?;
                let due = self.schedules.get(&t.id).map(|s| s.next_due);
                let identity = match event {
                    EventDefinition::Message(message) => message.name.clone(),
                    _ => due.map(format_timestamp).unwrap_or_default(),
                };
                Some(WaitingEvent {
                    task_id: t.id,
                    spec_name: t.spec.name.clone(),
                    kind: event.kind(),
                    identity,
                    due,
                })
            })
            .collect()
    }
}
