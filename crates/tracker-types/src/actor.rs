//! Actors and callers for status transitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who a transition rule requires to trigger it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
	/// Timed transitions fired by the scheduler.
	System,
	/// Shop staff.
	Admin,
	/// The person who placed the order.
	Customer,
	/// Courier carrying a delivery order.
	DeliveryAgent,
}

impl Actor {
	/// Interprets a `lastUpdatedBy` attribution string.
	///
	/// Attribution is advisory: `system` and `auto-process` map to
	/// `System`, `admin:<name>` to `Admin`, `courier:<name>` to
	/// `DeliveryAgent`, `customer` to `Customer`. Anything else is `None`.
	pub fn from_attribution(attribution: &str) -> Option<Self> {
		let attribution = attribution.trim().to_ascii_lowercase();
		let role = attribution
			.split_once(':')
			.map_or(attribution.as_str(), |(role, _)| role);
		match role {
			"system" | "auto-process" | "auto_process" | "automated" => Some(Actor::System),
			"admin" => Some(Actor::Admin),
			"customer" => Some(Actor::Customer),
			"courier" | "delivery" | "delivery_agent" => Some(Actor::DeliveryAgent),
			_ => None,
		}
	}
}

impl fmt::Display for Actor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Actor::System => "system",
			Actor::Admin => "admin",
			Actor::Customer => "customer",
			Actor::DeliveryAgent => "delivery_agent",
		};
		f.write_str(name)
	}
}

/// Identity of whoever asks to move an order to a new status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
	Customer,
	Admin { name: String },
	DeliveryAgent { name: String },
}

impl Caller {
	/// The actor role this caller acts as.
	pub fn role(&self) -> Actor {
		match self {
			Caller::Customer => Actor::Customer,
			Caller::Admin { .. } => Actor::Admin,
			Caller::DeliveryAgent { .. } => Actor::DeliveryAgent,
		}
	}

	/// Attribution string recorded by the backend for this caller.
	pub fn attribution(&self) -> String {
		match self {
			Caller::Customer => "customer".to_string(),
			Caller::Admin { name } => format!("admin:{}", name),
			Caller::DeliveryAgent { name } => format!("courier:{}", name),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_attribution_parsing() {
		assert_eq!(Actor::from_attribution("system"), Some(Actor::System));
		assert_eq!(Actor::from_attribution("auto-process"), Some(Actor::System));
		assert_eq!(Actor::from_attribution("admin:alice"), Some(Actor::Admin));
		assert_eq!(
			Actor::from_attribution("courier:bob"),
			Some(Actor::DeliveryAgent)
		);
		assert_eq!(Actor::from_attribution("someone"), None);
	}

	#[test]
	fn test_caller_attribution_round_trips_role() {
		let caller = Caller::Admin {
			name: "alice".into(),
		};
		assert_eq!(
			Actor::from_attribution(&caller.attribution()),
			Some(caller.role())
		);
	}
}
