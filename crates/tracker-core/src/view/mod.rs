//! Presentation-ready projection of a tracked order.
//!
//! The projection is recomputed from scratch for every snapshot. The only
//! state kept between snapshots is the last seen status, used to report
//! status changes as side-effect hints.

pub mod labels;

pub use labels::StatusLabels;

use crate::lifecycle::{window, ScheduledTransition, TransitionTable};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracker_types::{Order, OrderSnapshot, OrderStatus};

/// What the customer sees for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingView {
	pub order_id: String,
	pub status: OrderStatus,
	pub status_label: String,
	pub progress_percent: u8,
	/// Seconds until the estimated completion, 0 when terminal or unknown.
	pub time_remaining_seconds: u64,
	pub can_edit_now: bool,
	pub can_cancel_now: bool,
	pub is_late: bool,
	pub late_by_seconds: u64,
	pub edit_window_seconds: u64,
	pub cancel_window_seconds: u64,
	pub next_automatic: Option<ScheduledTransition>,
	pub is_terminal: bool,
}

/// Status change observed between two applied snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
	pub from: OrderStatus,
	pub to: OrderStatus,
}

fn default_progress(status: &OrderStatus) -> i32 {
	match status {
		OrderStatus::Pending => 10,
		OrderStatus::Confirmed => 25,
		OrderStatus::Preparing => 50,
		OrderStatus::Ready => 80,
		OrderStatus::OutForDelivery => 85,
		OrderStatus::Delivered => 100,
		OrderStatus::Cancelled | OrderStatus::Unknown(_) => 0,
	}
}

/// When the snapshot's status was entered: the newest timeline entry for
/// that status, else the fetch time.
fn status_entered_at(snapshot: &OrderSnapshot) -> DateTime<Utc> {
	snapshot
		.timeline
		.iter()
		.filter(|entry| entry.status == snapshot.status)
		.filter_map(|entry| entry.at)
		.max()
		.unwrap_or(snapshot.fetched_at)
}

pub struct TrackingViewModel {
	transitions: Arc<TransitionTable>,
	labels: Arc<StatusLabels>,
	last_status: Option<OrderStatus>,
}

impl TrackingViewModel {
	pub fn new(transitions: Arc<TransitionTable>, labels: Arc<StatusLabels>) -> Self {
		Self {
			transitions,
			labels,
			last_status: None,
		}
	}

	/// Projects an order and its latest snapshot at `now`.
	///
	/// The snapshot replaces the order's status, progress and estimate. When
	/// the status moved on, the order's own status timestamp no longer
	/// applies and the entry time comes from the snapshot instead.
	pub fn project(
		&self,
		order: &Order,
		snapshot: Option<&OrderSnapshot>,
		now: DateTime<Utc>,
	) -> TrackingView {
		let mut current = order.clone();
		if let Some(snapshot) = snapshot {
			if snapshot.status != order.status {
				current.status_changed_at = Some(status_entered_at(snapshot));
			}
			current.status = snapshot.status.clone();
			current.progress = snapshot.progress;
			if snapshot.estimated_minutes.is_some() {
				current.estimated_minutes = snapshot.estimated_minutes;
			}
		}

		let is_terminal = current.status.is_terminal();
		let progress = current
			.progress
			.unwrap_or_else(|| default_progress(&current.status));
		let can_edit_now = window::can_edit(&current, now);
		let can_cancel_now = window::can_cancel(&current, now);
		let time_remaining_seconds = if is_terminal {
			0
		} else {
			window::seconds_remaining(window::eta(&current), now)
		};
		let is_late = !is_terminal && window::is_late(&current, now);

		TrackingView {
			order_id: current.id.clone(),
			status_label: self.labels.label(&current.status),
			progress_percent: progress.clamp(0, 100) as u8,
			time_remaining_seconds,
			can_edit_now,
			can_cancel_now,
			is_late,
			late_by_seconds: if is_late {
				window::late_by_seconds(&current, now)
			} else {
				0
			},
			edit_window_seconds: if can_edit_now {
				window::seconds_remaining(current.can_edit_until, now)
			} else {
				0
			},
			cancel_window_seconds: if can_cancel_now {
				window::seconds_remaining(current.can_cancel_until, now)
			} else {
				0
			},
			next_automatic: self.transitions.scheduled_transition(&current, now),
			is_terminal,
			status: current.status,
		}
	}

	/// Projects and reports whether the status differs from the last call.
	pub fn apply(
		&mut self,
		order: &Order,
		snapshot: Option<&OrderSnapshot>,
		now: DateTime<Utc>,
	) -> (TrackingView, Option<StatusChange>) {
		let view = self.project(order, snapshot, now);
		let change = match self.last_status.replace(view.status.clone()) {
			Some(from) if from != view.status => Some(StatusChange {
				from,
				to: view.status.clone(),
			}),
			_ => None,
		};
		(view, change)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::{Duration, TimeZone};
	use tracker_types::{DeliveryMethod, StatusUpdate, TimelineEntry};

	fn created() -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
	}

	fn order(status: OrderStatus, method: DeliveryMethod) -> Order {
		Order {
			id: "A-1".to_string(),
			status,
			created_at: created(),
			can_cancel_until: Some(created() + Duration::minutes(10)),
			can_edit_until: Some(created() + Duration::minutes(5)),
			estimated_minutes: Some(30),
			delivery_method: method,
			progress: None,
			last_updated_by: None,
			status_changed_at: None,
		}
	}

	fn snapshot(status: OrderStatus) -> OrderSnapshot {
		OrderSnapshot::from_update("A-1", StatusUpdate::new(status), created())
	}

	fn entry(status: OrderStatus, at: DateTime<Utc>) -> TimelineEntry {
		TimelineEntry {
			status,
			at: Some(at),
			note: None,
			by: None,
		}
	}

	fn view_model() -> TrackingViewModel {
		TrackingViewModel::new(
			Arc::new(TransitionTable::default()),
			Arc::new(StatusLabels::default()),
		)
	}

	#[test]
	fn test_edit_window_closes_after_five_minutes() {
		let vm = view_model();
		let order = order(OrderStatus::Pending, DeliveryMethod::Pickup);

		let open = vm.project(&order, None, created() + Duration::seconds(299));
		assert!(open.can_edit_now);
		assert_eq!(open.edit_window_seconds, 1);

		let closed = vm.project(&order, None, created() + Duration::seconds(301));
		assert!(!closed.can_edit_now);
		assert_eq!(closed.edit_window_seconds, 0);
		assert!(closed.can_cancel_now);
	}

	#[test]
	fn test_pickup_preparing_projection() {
		let vm = view_model();
		let mut order = order(OrderStatus::Confirmed, DeliveryMethod::Pickup);
		order.status_changed_at = Some(created() + Duration::minutes(2));
		let now = created() + Duration::minutes(10);
		let mut latest = snapshot(OrderStatus::Preparing);
		latest.fetched_at = now;
		latest.timeline = vec![
			entry(OrderStatus::Confirmed, created() + Duration::minutes(2)),
			entry(OrderStatus::Preparing, created() + Duration::minutes(7)),
		];

		let view = vm.project(&order, Some(&latest), now);
		assert_eq!(view.status, OrderStatus::Preparing);
		assert_eq!(view.progress_percent, 50);
		assert!(!view.can_cancel_now);
		assert_eq!(view.time_remaining_seconds, 20 * 60);
		let next = view.next_automatic.unwrap();
		assert_eq!(next.to, OrderStatus::Ready);
		assert_eq!(next.fires_at, created() + Duration::minutes(27));
	}

	#[test]
	fn test_snapshot_overrides_and_clamps() {
		let vm = view_model();
		let mut order = order(OrderStatus::Preparing, DeliveryMethod::Delivery);
		order.progress = Some(40);
		let mut latest = snapshot(OrderStatus::OutForDelivery);
		latest.progress = Some(140);
		latest.estimated_minutes = Some(45);

		let view = vm.project(&order, Some(&latest), created() + Duration::minutes(40));
		assert_eq!(view.progress_percent, 100);
		assert!(!view.is_late);
		assert_eq!(view.time_remaining_seconds, 5 * 60);

		latest.progress = None;
		let view = vm.project(&order, Some(&latest), created() + Duration::minutes(40));
		assert_eq!(view.progress_percent, 85);

		let view = vm.project(&order, None, created() + Duration::minutes(40));
		assert_eq!(view.progress_percent, 40);
	}

	#[test]
	fn test_new_status_replaces_stale_order_fields() {
		let vm = view_model();
		let mut order = order(OrderStatus::Pending, DeliveryMethod::Pickup);
		order.progress = Some(10);
		let mut latest = snapshot(OrderStatus::Preparing);
		latest.fetched_at = created() + Duration::minutes(30);

		let view = vm.project(&order, Some(&latest), created() + Duration::minutes(31));
		assert_eq!(view.progress_percent, 50);
		let next = view.next_automatic.unwrap();
		assert_eq!(next.to, OrderStatus::Ready);
		assert_eq!(next.fires_at, created() + Duration::minutes(50));
		assert!(!next.due);

		// The newest timeline entry for the current status wins
		latest.timeline = vec![
			entry(OrderStatus::Preparing, created() + Duration::minutes(12)),
			entry(OrderStatus::Pending, created() + Duration::minutes(20)),
			entry(OrderStatus::Preparing, created() + Duration::minutes(25)),
		];
		let view = vm.project(&order, Some(&latest), created() + Duration::minutes(31));
		assert_eq!(
			view.next_automatic.unwrap().fires_at,
			created() + Duration::minutes(45)
		);
	}

	#[test]
	fn test_same_status_keeps_order_entry_time() {
		let vm = view_model();
		let mut order = order(OrderStatus::Preparing, DeliveryMethod::Pickup);
		order.status_changed_at = Some(created() + Duration::minutes(4));
		let mut latest = snapshot(OrderStatus::Preparing);
		latest.fetched_at = created() + Duration::minutes(30);

		let view = vm.project(&order, Some(&latest), created() + Duration::minutes(30));
		let next = view.next_automatic.unwrap();
		assert_eq!(next.fires_at, created() + Duration::minutes(24));
		assert!(next.due);
	}

	#[test]
	fn test_late_and_terminal() {
		let vm = view_model();
		let order = order(OrderStatus::Preparing, DeliveryMethod::Pickup);
		let now = created() + Duration::minutes(33);

		let late = vm.project(&order, None, now);
		assert!(late.is_late);
		assert_eq!(late.late_by_seconds, 180);
		assert_eq!(late.time_remaining_seconds, 0);

		let done = vm.project(&order, Some(&snapshot(OrderStatus::Delivered)), now);
		assert!(done.is_terminal);
		assert!(!done.is_late);
		assert_eq!(done.progress_percent, 100);
		assert!(done.next_automatic.is_none());
	}

	#[test]
	fn test_unknown_status_is_labelled() {
		let vm = view_model();
		let order = order(OrderStatus::Pending, DeliveryMethod::Pickup);
		let view = vm.project(
			&order,
			Some(&snapshot(OrderStatus::Unknown("awaiting_courier".into()))),
			created(),
		);
		assert_eq!(view.status_label, "Unknown status (awaiting_courier)");
		assert_eq!(view.progress_percent, 0);
		assert!(!view.can_edit_now);
		assert!(!view.is_terminal);
	}

	#[test]
	fn test_apply_reports_status_changes() {
		let mut vm = view_model();
		let order = order(OrderStatus::Pending, DeliveryMethod::Pickup);

		let (_, change) = vm.apply(&order, Some(&snapshot(OrderStatus::Pending)), created());
		assert_eq!(change, None);
		let (_, change) = vm.apply(&order, Some(&snapshot(OrderStatus::Pending)), created());
		assert_eq!(change, None);
		let (view, change) = vm.apply(&order, Some(&snapshot(OrderStatus::Confirmed)), created());
		assert_eq!(view.status_label, "Order confirmed");
		assert_eq!(
			change,
			Some(StatusChange {
				from: OrderStatus::Pending,
				to: OrderStatus::Confirmed,
			})
		);
	}
}
