//! Time source for the tracking engine.
//!
//! Nothing in the engine reads the system time directly. Pollers stamp
//! snapshots with the injected clock, and every time-window function takes
//! `now` as an argument.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Mutex, PoisonError};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
	fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
	now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
	pub fn new(now: DateTime<Utc>) -> Self {
		Self {
			now: Mutex::new(now),
		}
	}

	pub fn set(&self, now: DateTime<Utc>) {
		*self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
	}

	pub fn advance(&self, by: Duration) {
		let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
		*now += by;
	}
}

impl Clock for FixedClock {
	fn now(&self) -> DateTime<Utc> {
		*self.now.lock().unwrap_or_else(PoisonError::into_inner)
	}
}
