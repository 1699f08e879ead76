//! Time-gated customer actions.
//!
//! Edit and cancel deadlines are fixed when the order is created; only `now`
//! moves. Every function here is pure and fails closed: a missing deadline or
//! estimate means the action is not permitted and the order is not late.

use chrono::{DateTime, Duration, Utc};
use tracker_types::{Order, OrderStatus};

/// Statuses in which the customer may still edit the order.
pub const EDITABLE_STATUSES: [OrderStatus; 1] = [OrderStatus::Pending];

/// Statuses in which the customer may still cancel the order.
pub const CANCELLABLE_STATUSES: [OrderStatus; 2] = [OrderStatus::Pending, OrderStatus::Confirmed];

/// Whole seconds left until `deadline`, or 0 when absent or passed.
pub fn seconds_remaining(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u64 {
	deadline
		.map(|deadline| (deadline - now).num_milliseconds())
		.filter(|millis| *millis > 0)
		.map_or(0, |millis| (millis / 1000) as u64)
}

pub fn can_edit(order: &Order, now: DateTime<Utc>) -> bool {
	EDITABLE_STATUSES.contains(&order.status) && seconds_remaining(order.can_edit_until, now) > 0
}

pub fn can_cancel(order: &Order, now: DateTime<Utc>) -> bool {
	CANCELLABLE_STATUSES.contains(&order.status)
		&& seconds_remaining(order.can_cancel_until, now) > 0
}

/// Expected completion time, when the order carries an estimate.
pub fn eta(order: &Order) -> Option<DateTime<Utc>> {
	order
		.estimated_minutes
		.map(|minutes| order.created_at + Duration::minutes(i64::from(minutes)))
}

/// True once more time has passed since creation than the estimate allows.
pub fn is_late(order: &Order, now: DateTime<Utc>) -> bool {
	eta(order).is_some_and(|eta| now > eta)
}

/// Whole seconds past the estimate, 0 when on time or without estimate.
pub fn late_by_seconds(order: &Order, now: DateTime<Utc>) -> u64 {
	eta(order)
		.map(|eta| (now - eta).num_seconds())
		.filter(|seconds| *seconds > 0)
		.map_or(0, |seconds| seconds as u64)
}
