//! Event Schedules
//!
//! Timer definitions, their occurrence state, and the clock they are
//! evaluated against.
//!
//! # Structure
//!
//! - [`duration`]: ISO-8601 duration and RFC 3339 timestamp handling
//! - [`timer`]: One-shot and cyclic timer definitions, occurrence state
//! - [`clock`]: Wall-clock sources polled by the refresh operation

pub mod clock;
pub mod duration;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use duration::{format_duration, format_timestamp, parse_duration, parse_timestamp};
pub use timer::{CycleSpec, TimerOnce, TimerState};
