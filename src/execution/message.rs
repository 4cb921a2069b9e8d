//! Message Delivery
//!
//! Hosts inject external messages with [`Workflow::deliver_message`]. A
//! message is matched against WAITING message events by name, by an
//! optional correlation value read from the waiting task's data, and by
//! the fields its payload must carry.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::workflow::Workflow;
use crate::spec::{EventDefinition, MergePolicy};
use crate::task::{TaskId, TaskState};

/// Addresses a message to the tasks waiting for it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CorrelationKey {
    /// Message name
    pub message: String,
    /// Must equal the waiting task's correlation property, when it has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl CorrelationKey {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// Result of a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The task that consumed the message
    Delivered(TaskId),
    /// Nothing was waiting for it; the message is dropped
    NoMatch,
}

impl Workflow {
    /// Delivers a message to the first matching waiting task in tree order.
    ///
    /// The payload is stored under the event's result variable, or merged
    /// into the task data when none is declared. The task becomes READY and
    /// is completed by the next `do_engine_steps` call.
    pub fn deliver_message(&mut self, key: &CorrelationKey, payload: Value) -> DeliveryOutcome {
        let target = self.tasks.iter().find_map(|task| {
            if task.state != TaskState::Waiting {
                return None;
            }
            let Some(EventDefinition::Message(message)) = task.spec.kind.event() else {
                return None;
            };
            if message.name != key.message || !message.accepts(&payload) {
                return None;
            }
            if let Some(property) = &message.correlation_property {
                if task.data.get(property) != key.value.as_ref() {
                    return None;
                }
            }
            Some((task.id, message.result_var.clone()))
        });

        let Some((id, result_var)) = target else {
            warn!("No task is waiting for message '{}'", key.message);
            return DeliveryOutcome::NoMatch;
        };

        if let Some(task) = self.tasks.get_mut(id) {
            match (result_var, payload) {
                (Some(var), payload) => {
                    task.data.insert(var, payload);
                }
                (None, Value::Object(fields)) => MergePolicy::LastWriterWins.merge(&mut task.data, &fields),
                (None, Value::Null) => {}
                (None, other) => {
                    task.data.insert(key.message.clone(), other);
                }
            }
        }
        self.tasks.transition(id, TaskState::Ready);
        self.messages_delivered += 1;
        info!(
            "Message '{}' delivered to task {} ('{}')",
            key.message,
            id,
            self.spec_name(id)
        );
        DeliveryOutcome::Delivered(id)
    }
}
