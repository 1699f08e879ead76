//! Order tracking types for the storefront.
//!
//! This module defines the read-only order projection held by the tracking
//! engine, the canonical status enumeration, and the snapshot types produced
//! each time the backend is queried for an order's current state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical order status.
///
/// Statuses are matched on this enumeration only, never on display text.
/// Values reported by the backend that are not part of the known set are kept
/// verbatim in `Unknown` so that a newer backend does not break older clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OrderStatus {
	/// Order placed, not yet confirmed by the shop.
	Pending,
	/// Order accepted by the shop.
	Confirmed,
	/// Order is being made.
	Preparing,
	/// Order is waiting at the counter for pickup.
	Ready,
	/// Order is with a courier.
	OutForDelivery,
	/// Order handed to the customer.
	Delivered,
	/// Order cancelled by the customer or the shop.
	Cancelled,
	/// A status string this client does not recognise.
	Unknown(String),
}

/// Statuses from which no further transition occurs.
pub const TERMINAL_STATUSES: [OrderStatus; 2] = [OrderStatus::Delivered, OrderStatus::Cancelled];

/// Every known non-terminal status, in lifecycle order.
pub const TRANSIENT_STATUSES: [OrderStatus; 5] = [
	OrderStatus::Pending,
	OrderStatus::Confirmed,
	OrderStatus::Preparing,
	OrderStatus::Ready,
	OrderStatus::OutForDelivery,
];

impl OrderStatus {
	/// Returns the canonical wire name, or the raw value for unknown statuses.
	pub fn as_str(&self) -> &str {
		match self {
			OrderStatus::Pending => "pending",
			OrderStatus::Confirmed => "confirmed",
			OrderStatus::Preparing => "preparing",
			OrderStatus::Ready => "ready",
			OrderStatus::OutForDelivery => "out_for_delivery",
			OrderStatus::Delivered => "delivered",
			OrderStatus::Cancelled => "cancelled",
			OrderStatus::Unknown(raw) => raw,
		}
	}

	/// Parses a status as reported by the backend.
	///
	/// Matching ignores case and treats `-` and spaces like `_`, so
	/// `"Out-For-Delivery"` and `"out_for_delivery"` are the same status.
	/// Anything else becomes `Unknown` carrying the original text.
	pub fn from_wire(raw: &str) -> Self {
		let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
		match normalized.as_str() {
			"pending" => OrderStatus::Pending,
			"confirmed" => OrderStatus::Confirmed,
			"preparing" => OrderStatus::Preparing,
			"ready" => OrderStatus::Ready,
			"out_for_delivery" => OrderStatus::OutForDelivery,
			"delivered" => OrderStatus::Delivered,
			"cancelled" | "canceled" => OrderStatus::Cancelled,
			_ => OrderStatus::Unknown(raw.to_string()),
		}
	}

	/// True for `delivered` and `cancelled`.
	pub fn is_terminal(&self) -> bool {
		matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
	}

	/// False only for `Unknown`.
	pub fn is_known(&self) -> bool {
		!matches!(self, OrderStatus::Unknown(_))
	}

	/// Returns every known status, transient ones first.
	pub fn all_known() -> impl Iterator<Item = OrderStatus> {
		TRANSIENT_STATUSES
			.into_iter()
			.chain(TERMINAL_STATUSES)
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl From<String> for OrderStatus {
	fn from(raw: String) -> Self {
		OrderStatus::from_wire(&raw)
	}
}

impl From<OrderStatus> for String {
	fn from(status: OrderStatus) -> Self {
		status.as_str().to_string()
	}
}

/// Strict parsing used for configuration keys: unknown names are rejected.
impl FromStr for OrderStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match OrderStatus::from_wire(s) {
			OrderStatus::Unknown(raw) => Err(format!("Unknown order status '{}'", raw)),
			status => Ok(status),
		}
	}
}

/// How the order reaches the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
	Pickup,
	Delivery,
}

impl fmt::Display for DeliveryMethod {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DeliveryMethod::Pickup => f.write_str("pickup"),
			DeliveryMethod::Delivery => f.write_str("delivery"),
		}
	}
}

/// Read-only projection of an order owned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
	/// Unique identifier for this order.
	pub id: String,
	/// Status as last stored for this order.
	pub status: OrderStatus,
	/// When the order was placed.
	pub created_at: DateTime<Utc>,
	/// Last moment the customer may cancel. Fixed at creation.
	#[serde(default, deserialize_with = "deserialize_lenient_timestamp")]
	pub can_cancel_until: Option<DateTime<Utc>>,
	/// Last moment the customer may edit. Fixed at creation.
	#[serde(default, deserialize_with = "deserialize_lenient_timestamp")]
	pub can_edit_until: Option<DateTime<Utc>>,
	/// Estimated preparation plus delivery time, in minutes.
	#[serde(default)]
	pub estimated_minutes: Option<u32>,
	/// Pickup at the counter or courier delivery.
	pub delivery_method: DeliveryMethod,
	/// Completion percentage as reported by the backend.
	#[serde(default)]
	pub progress: Option<i32>,
	/// Free-form attribution of the last change, e.g. `admin:alice`.
	#[serde(default)]
	pub last_updated_by: Option<String>,
	/// When the current status was entered, if the backend reports it.
	#[serde(default, deserialize_with = "deserialize_lenient_timestamp")]
	pub status_changed_at: Option<DateTime<Utc>>,
}

impl Order {
	/// Moment the current status was entered, falling back to creation time.
	pub fn status_entered_at(&self) -> DateTime<Utc> {
		self.status_changed_at.unwrap_or(self.created_at)
	}

	/// Builds a snapshot from the order's own fields.
	///
	/// Used to seed a poller when the order is already known, so that a
	/// terminal order never starts a polling loop.
	pub fn to_snapshot(&self, fetched_at: DateTime<Utc>) -> OrderSnapshot {
		OrderSnapshot {
			order_id: self.id.clone(),
			status: self.status.clone(),
			progress: self.progress,
			last_updated_by: self.last_updated_by.clone(),
			estimated_minutes: self.estimated_minutes,
			timeline: Vec::new(),
			fetched_at,
		}
	}
}

/// One entry of the status history reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
	pub status: OrderStatus,
	#[serde(default, deserialize_with = "deserialize_lenient_timestamp")]
	pub at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub note: Option<String>,
	#[serde(default)]
	pub by: Option<String>,
}

/// Response of the backend order-status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
	pub status: OrderStatus,
	#[serde(default)]
	pub progress: Option<i32>,
	#[serde(default)]
	pub last_updated_by: Option<String>,
	#[serde(default)]
	pub estimated_minutes: Option<u32>,
	#[serde(default)]
	pub timeline: Vec<TimelineEntry>,
}

impl StatusUpdate {
	/// Creates an update carrying only a status.
	pub fn new(status: OrderStatus) -> Self {
		Self {
			status,
			progress: None,
			last_updated_by: None,
			estimated_minutes: None,
			timeline: Vec::new(),
		}
	}
}

/// Authoritative state of an order at one point in time.
///
/// Snapshots replace one another; they are never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSnapshot {
	pub order_id: String,
	pub status: OrderStatus,
	pub progress: Option<i32>,
	pub last_updated_by: Option<String>,
	pub estimated_minutes: Option<u32>,
	pub timeline: Vec<TimelineEntry>,
	/// When the snapshot was fetched.
	pub fetched_at: DateTime<Utc>,
}

impl OrderSnapshot {
	/// Stamps a backend update with its order and fetch time.
	pub fn from_update(
		order_id: impl Into<String>,
		update: StatusUpdate,
		fetched_at: DateTime<Utc>,
	) -> Self {
		Self {
			order_id: order_id.into(),
			status: update.status,
			progress: update.progress,
			last_updated_by: update.last_updated_by,
			estimated_minutes: update.estimated_minutes,
			timeline: update.timeline,
			fetched_at,
		}
	}
}

/// Accepts RFC 3339 strings and epoch milliseconds.
///
/// Anything else, including malformed strings, becomes `None` so that
/// deadline checks fail closed instead of rejecting the whole document.
fn deserialize_lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
	D: Deserializer<'de>,
{
	let value = Option::<serde_json::Value>::deserialize(deserializer)?;
	let parsed = match &value {
		None | Some(serde_json::Value::Null) => return Ok(None),
		Some(serde_json::Value::String(text)) => DateTime::parse_from_rfc3339(text.trim())
			.ok()
			.map(|dt| dt.with_timezone(&Utc)),
		Some(serde_json::Value::Number(number)) => number
			.as_i64()
			.and_then(DateTime::<Utc>::from_timestamp_millis),
		Some(_) => None,
	};
	if parsed.is_none() {
		tracing::warn!(value = ?value, "Ignoring malformed timestamp");
	}
	Ok(parsed)
}
