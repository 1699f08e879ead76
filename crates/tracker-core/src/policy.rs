//! Polling interval per order status.

use std::collections::HashMap;
use std::time::Duration;
use tracker_types::OrderStatus;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Maps a status to how often it should be polled.
///
/// Terminal statuses are never polled, whatever the configuration says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingPolicy {
	intervals: HashMap<OrderStatus, Duration>,
	default_interval: Duration,
}

impl Default for PollingPolicy {
	fn default() -> Self {
		let intervals = HashMap::from([
			(OrderStatus::Pending, Duration::from_secs(30)),
			(OrderStatus::Confirmed, Duration::from_secs(30)),
			(OrderStatus::Preparing, Duration::from_secs(20)),
			(OrderStatus::Ready, Duration::from_secs(20)),
			(OrderStatus::OutForDelivery, Duration::from_secs(15)),
		]);
		Self {
			intervals,
			default_interval: DEFAULT_INTERVAL,
		}
	}
}

impl PollingPolicy {
	/// `None` means the status is terminal and polling stops.
	pub fn interval_for(&self, status: &OrderStatus) -> Option<Duration> {
		if status.is_terminal() {
			return None;
		}
		Some(
			self.intervals
				.get(status)
				.copied()
				.unwrap_or(self.default_interval),
		)
	}

	pub fn default_interval(&self) -> Duration {
		self.default_interval
	}

	pub fn set_default_interval(&mut self, interval: Duration) {
		self.default_interval = interval;
	}

	/// Overrides the interval of one status. Terminal statuses are ignored.
	pub fn set_interval(&mut self, status: OrderStatus, interval: Duration) {
		if status.is_terminal() {
			tracing::warn!(status = %status, "Ignoring polling interval for terminal status");
			return;
		}
		self.intervals.insert(status, interval);
	}
}
