//! Event Definitions
//!
//! What a catching or boundary event waits for.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ScheduleError;
use crate::schedule::{CycleSpec, TimerOnce};

/// Condition a catching event waits for.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EventDefinition {
    /// Fires once at a date or after a delay
    Timer(TimerOnce),
    /// Fires on a fixed interval, optionally a bounded number of times
    TimerCycle(CycleSpec),
    /// Fires when a matching message is delivered
    Message(MessageDefinition),
}

impl EventDefinition {
    /// Builds a one-shot timer from a date or duration expression.
    pub fn timer(expression: &str) -> Result<Self, ScheduleError> {
        TimerOnce::parse(expression).map(Self::Timer)
    }

    /// Builds a cyclic timer from an `R[n]/[start/]interval` expression.
    pub fn timer_cycle(expression: &str) -> Result<Self, ScheduleError> {
        CycleSpec::parse(expression).map(Self::TimerCycle)
    }

    pub fn message(name: impl Into<String>) -> Self {
        Self::Message(MessageDefinition::new(name))
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Timer(_) => EventKind::Timer,
            Self::TimerCycle(_) => EventKind::TimerCycle,
            Self::Message(_) => EventKind::Message,
        }
    }

    /// True for events resolved by wall-clock polling.
    pub fn is_timer(&self) -> bool {
        matches!(self, Self::Timer(_) | Self::TimerCycle(_))
    }
}

/// Coarse classification of an event, reported with waiting events.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Timer,
    TimerCycle,
    Message,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timer => "timer",
            Self::TimerCycle => "timer_cycle",
            Self::Message => "message",
        })
    }
}

/// A message a catching event can be satisfied by.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MessageDefinition {
    /// Message name the sender addresses
    pub name: String,

    /// Task data key whose value must equal the delivery's correlation value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_property: Option<String>,

    /// Keys the payload object must contain
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_fields: Vec<String>,

    /// Task data key receiving the payload; merged into the data when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_var: Option<String>,
}

impl MessageDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            correlation_property: None,
            expected_fields: Vec::new(),
            result_var: None,
        }
    }

    pub fn correlated_by(mut self, property: impl Into<String>) -> Self {
        self.correlation_property = Some(property.into());
        self
    }

    pub fn expecting(mut self, field: impl Into<String>) -> Self {
        self.expected_fields.push(field.into());
        self
    }

    pub fn into_var(mut self, var: impl Into<String>) -> Self {
        self.result_var = Some(var.into());
        self
    }

    /// Checks the payload carries every expected field.
    pub fn accepts(&self, payload: &Value) -> bool {
        if self.expected_fields.is_empty() {
            return true;
        }
        match payload.as_object() {
            Some(fields) => self.expected_fields.iter().all(|f| fields.contains_key(f)),
            None => false,
        }
    }
}

impl From<MessageDefinition> for EventDefinition {
    fn from(message: MessageDefinition) -> Self {
        Self::Message(message)
    }
}
