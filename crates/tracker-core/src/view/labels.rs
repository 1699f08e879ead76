//! Display labels for statuses.
//!
//! Labels are presentation only; nothing matches on them.

use std::collections::HashMap;
use tracker_types::OrderStatus;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusLabels {
	overrides: HashMap<OrderStatus, String>,
}

impl StatusLabels {
	pub fn new() -> Self {
		Self::default()
	}

	/// Replaces the label of a known status.
	pub fn set(&mut self, status: OrderStatus, label: impl Into<String>) {
		self.overrides.insert(status, label.into());
	}

	pub fn label(&self, status: &OrderStatus) -> String {
		if let Some(label) = self.overrides.get(status) {
			return label.clone();
		}
		match status {
			OrderStatus::Pending => "Order received".to_string(),
			OrderStatus::Confirmed => "Order confirmed".to_string(),
			OrderStatus::Preparing => "Preparing your order".to_string(),
			OrderStatus::Ready => "Ready for pickup".to_string(),
			OrderStatus::OutForDelivery => "Out for delivery".to_string(),
			OrderStatus::Delivered => "Delivered".to_string(),
			OrderStatus::Cancelled => "Cancelled".to_string(),
			OrderStatus::Unknown(raw) => format!("Unknown status ({})", raw),
		}
	}
}
