//! Order lifecycle rules.
//!
//! Time-gated customer actions and the status transition table. Both are
//! pure: callers pass the order and the current time explicitly.

pub mod transitions;
pub mod window;

pub use transitions::{
	Condition, ScheduledTransition, TableDefect, TransitionError, TransitionRule, TransitionTable,
};
