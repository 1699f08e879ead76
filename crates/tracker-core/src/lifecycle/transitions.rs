//! Status transition table.
//!
//! Declares which status moves are valid, who may trigger each one, and which
//! happen automatically after a delay. Several rules may share a source
//! status; they are evaluated in table order and the first rule whose
//! conditions hold wins.

use super::window;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;
use tracker_types::{
	truncate_id, Actor, Caller, DeliveryMethod, Order, OrderStatus, TRANSIENT_STATUSES,
};

/// Reasons a requested transition is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
	#[error("No transition rule from {from} to {to}")]
	NoMatchingRule { from: OrderStatus, to: OrderStatus },
	#[error("Transition from {from} to {to} only happens automatically")]
	AutomaticOnly { from: OrderStatus, to: OrderStatus },
	#[error("{actor} may not move an order from {from} to {to}")]
	Unauthorized {
		actor: Actor,
		from: OrderStatus,
		to: OrderStatus,
	},
	#[error("The cancellation window has closed")]
	WindowClosed,
}

/// Side condition a rule places on the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
	DeliveryMethod(DeliveryMethod),
}

impl Condition {
	pub fn holds(&self, method: DeliveryMethod) -> bool {
		match self {
			Condition::DeliveryMethod(required) => *required == method,
		}
	}
}

/// One valid status move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRule {
	pub from: OrderStatus,
	pub to: OrderStatus,
	/// Fired by elapsed time alone; never triggerable by an actor.
	pub automatic: bool,
	/// Delay after entering `from`. Meaningful for automatic rules only.
	pub delay_minutes: u64,
	pub required_actor: Actor,
	pub conditions: Vec<Condition>,
}

impl TransitionRule {
	pub fn automatic(from: OrderStatus, to: OrderStatus, delay_minutes: u64) -> Self {
		Self {
			from,
			to,
			automatic: true,
			delay_minutes,
			required_actor: Actor::System,
			conditions: Vec::new(),
		}
	}

	pub fn manual(from: OrderStatus, to: OrderStatus, actor: Actor) -> Self {
		Self {
			from,
			to,
			automatic: false,
			delay_minutes: 0,
			required_actor: actor,
			conditions: Vec::new(),
		}
	}

	pub fn when(mut self, condition: Condition) -> Self {
		self.conditions.push(condition);
		self
	}

	pub fn applies_to(&self, method: DeliveryMethod) -> bool {
		self.conditions.iter().all(|c| c.holds(method))
	}

	/// Whether a caller acting as `actor` satisfies this rule.
	///
	/// Admins may perform any manual move that names an admin-compatible
	/// actor, which includes the delivery agent.
	fn permits(&self, actor: Actor) -> bool {
		match actor {
			Actor::Admin => matches!(self.required_actor, Actor::Admin | Actor::DeliveryAgent),
			other => self.required_actor == other,
		}
	}
}

/// An automatic transition resolved against a concrete order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTransition {
	pub to: OrderStatus,
	pub fires_at: DateTime<Utc>,
	/// The delay has elapsed; the backend should already have moved on.
	pub due: bool,
}

/// Configuration defect found by [`TransitionTable::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableDefect {
	#[error("Transient status {0} has no outgoing rule")]
	OrphanStatus(OrderStatus),
	#[error("Rule {from} -> {to} leaves a terminal status")]
	LeavesTerminal { from: OrderStatus, to: OrderStatus },
	#[error("Status {from} has several automatic rules for {method} orders: {targets:?}")]
	AmbiguousAutomatic {
		from: OrderStatus,
		method: DeliveryMethod,
		targets: Vec<OrderStatus>,
	},
}

static DEFAULT_RULES: Lazy<Vec<TransitionRule>> = Lazy::new(|| {
	use Condition::DeliveryMethod as Method;
	use OrderStatus::*;

	vec![
		TransitionRule::automatic(Pending, Confirmed, 2),
		TransitionRule::manual(Pending, Cancelled, Actor::Customer),
		TransitionRule::manual(Pending, Cancelled, Actor::Admin),
		TransitionRule::automatic(Confirmed, Preparing, 5),
		TransitionRule::manual(Confirmed, Cancelled, Actor::Customer),
		TransitionRule::manual(Confirmed, Cancelled, Actor::Admin),
		TransitionRule::automatic(Preparing, Ready, 20).when(Method(DeliveryMethod::Pickup)),
		TransitionRule::automatic(Preparing, OutForDelivery, 15)
			.when(Method(DeliveryMethod::Delivery)),
		TransitionRule::manual(Preparing, Cancelled, Actor::Admin),
		TransitionRule::manual(Ready, Delivered, Actor::Admin).when(Method(DeliveryMethod::Pickup)),
		TransitionRule::manual(OutForDelivery, Delivered, Actor::DeliveryAgent)
			.when(Method(DeliveryMethod::Delivery)),
	]
});

/// Ordered rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionTable {
	rules: Vec<TransitionRule>,
}

impl Default for TransitionTable {
	fn default() -> Self {
		Self::new(DEFAULT_RULES.clone())
	}
}

impl TransitionTable {
	pub fn new(rules: Vec<TransitionRule>) -> Self {
		Self { rules }
	}

	pub fn rules(&self) -> &[TransitionRule] {
		&self.rules
	}

	/// Structural validity: some rule moves `from` to `to`.
	pub fn is_valid(&self, from: &OrderStatus, to: &OrderStatus) -> bool {
		self.rules.iter().any(|r| &r.from == from && &r.to == to)
	}

	/// Replaces the delay of every automatic `from -> to` rule.
	pub fn set_delay(
		&mut self,
		from: &OrderStatus,
		to: &OrderStatus,
		delay_minutes: u64,
	) -> Result<(), TransitionError> {
		let mut found = false;
		for rule in self
			.rules
			.iter_mut()
			.filter(|r| r.automatic && &r.from == from && &r.to == to)
		{
			rule.delay_minutes = delay_minutes;
			found = true;
		}
		if found {
			Ok(())
		} else {
			Err(TransitionError::NoMatchingRule {
				from: from.clone(),
				to: to.clone(),
			})
		}
	}

	/// The automatic rule that fires next for this order, if any.
	///
	/// More than one candidate is a table defect; the first one wins and a
	/// warning is logged.
	pub fn next_automatic(&self, order: &Order) -> Option<&TransitionRule> {
		let mut candidates = self.rules.iter().filter(|r| {
			r.automatic && r.from == order.status && r.applies_to(order.delivery_method)
		});
		let first = candidates.next()?;
		if candidates.next().is_some() {
			tracing::warn!(
				order_id = %truncate_id(&order.id),
				status = %order.status,
				chosen = %first.to,
				"Several automatic transitions apply; using the first"
			);
		}
		Some(first)
	}

	/// Resolves when the next automatic transition fires for this order.
	pub fn scheduled_transition(
		&self,
		order: &Order,
		now: DateTime<Utc>,
	) -> Option<ScheduledTransition> {
		let rule = self.next_automatic(order)?;
		let fires_at = i64::try_from(rule.delay_minutes)
			.ok()
			.and_then(Duration::try_minutes)
			.and_then(|delay| order.status_entered_at().checked_add_signed(delay))?;
		Some(ScheduledTransition {
			to: rule.to.clone(),
			fires_at,
			due: now >= fires_at,
		})
	}

	/// Checks whether `caller` may move `order` to `to` right now.
	pub fn authorize(
		&self,
		order: &Order,
		to: &OrderStatus,
		caller: &Caller,
		now: DateTime<Utc>,
	) -> Result<&TransitionRule, TransitionError> {
		let from = &order.status;
		let candidates: Vec<&TransitionRule> = self
			.rules
			.iter()
			.filter(|r| &r.from == from && &r.to == to && r.applies_to(order.delivery_method))
			.collect();

		if candidates.is_empty() {
			tracing::warn!(
				order_id = %truncate_id(&order.id),
				from = %from,
				to = %to,
				method = %order.delivery_method,
				"No transition rule matches the requested move"
			);
			return Err(TransitionError::NoMatchingRule {
				from: from.clone(),
				to: to.clone(),
			});
		}
		if candidates.iter().all(|r| r.automatic) {
			return Err(TransitionError::AutomaticOnly {
				from: from.clone(),
				to: to.clone(),
			});
		}

		let actor = caller.role();
		let unauthorized = || TransitionError::Unauthorized {
			actor,
			from: from.clone(),
			to: to.clone(),
		};
		let rule = candidates
			.into_iter()
			.find(|r| !r.automatic && r.permits(actor))
			.ok_or_else(unauthorized)?;

		if actor == Actor::Customer {
			if *to != OrderStatus::Cancelled {
				return Err(unauthorized());
			}
			if !window::can_cancel(order, now) {
				return Err(TransitionError::WindowClosed);
			}
		}
		Ok(rule)
	}

	/// Reports configuration defects. Never fails; callers decide whether to
	/// log or reject.
	pub fn validate(&self) -> Vec<TableDefect> {
		let mut defects = Vec::new();

		for status in TRANSIENT_STATUSES {
			if !self.rules.iter().any(|r| r.from == status) {
				defects.push(TableDefect::OrphanStatus(status));
			}
		}

		for rule in self.rules.iter().filter(|r| r.from.is_terminal()) {
			defects.push(TableDefect::LeavesTerminal {
				from: rule.from.clone(),
				to: rule.to.clone(),
			});
		}

		let mut sources = HashSet::new();
		for rule in self.rules.iter().filter(|r| r.automatic) {
			if !sources.insert(rule.from.clone()) {
				continue;
			}
			for method in [DeliveryMethod::Pickup, DeliveryMethod::Delivery] {
				let targets: Vec<OrderStatus> = self
					.rules
					.iter()
					.filter(|r| r.automatic && r.from == rule.from && r.applies_to(method))
					.map(|r| r.to.clone())
					.collect();
				if targets.len() > 1 {
					defects.push(TableDefect::AmbiguousAutomatic {
						from: rule.from.clone(),
						method,
						targets,
					});
				}
			}
		}

		defects
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;
	use std::sync::{Arc, Mutex};
	use tracing_subscriber::fmt::MakeWriter;

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

	/// Collects formatted log output of one test.
	#[derive(Clone, Default)]
	struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

	impl CapturedLogs {
		fn text(&self) -> String {
			String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
		}
	}

	impl std::io::Write for CapturedLogs {
		fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
			self.0.lock().unwrap().extend_from_slice(buf);
			Ok(buf.len())
		}

		fn flush(&mut self) -> std::io::Result<()> {
			Ok(())
		}
	}

	impl<'a> MakeWriter<'a> for CapturedLogs {
		type Writer = CapturedLogs;

		fn make_writer(&'a self) -> Self::Writer {
			self.clone()
		}
	}

	fn admin() -> Caller {
		Caller::Admin {
			name: "alice".to_string(),
		}
	}

	#[test]
	fn test_default_table_is_consistent() {
		let table = TransitionTable::default();
		assert!(table.validate().is_empty());
		assert!(table.is_valid(&OrderStatus::Ready, &OrderStatus::Delivered));
		assert!(!table.is_valid(&OrderStatus::Delivered, &OrderStatus::Pending));
	}

	#[test]
	fn test_pickup_preparing_goes_to_ready() {
		let table = TransitionTable::default();
		let mut order = order(OrderStatus::Preparing, DeliveryMethod::Pickup);
		order.status_changed_at = Some(created() + Duration::minutes(7));

		let rule = table.next_automatic(&order).unwrap();
		assert_eq!(rule.to, OrderStatus::Ready);
		assert_eq!(rule.delay_minutes, 20);

		let early = table
			.scheduled_transition(&order, created() + Duration::minutes(20))
			.unwrap();
		assert_eq!(early.fires_at, created() + Duration::minutes(27));
		assert!(!early.due);
		assert!(
			table
				.scheduled_transition(&order, created() + Duration::minutes(27))
				.unwrap()
				.due
		);
	}

	#[test]
	fn test_delivery_preparing_goes_out_for_delivery() {
		let table = TransitionTable::default();
		let order = order(OrderStatus::Preparing, DeliveryMethod::Delivery);
		let rule = table.next_automatic(&order).unwrap();
		assert_eq!(rule.to, OrderStatus::OutForDelivery);
		assert_eq!(rule.delay_minutes, 15);
	}

	#[test]
	fn test_terminal_and_manual_only_statuses_have_no_automatic_next() {
		let table = TransitionTable::default();
		for status in [
			OrderStatus::Ready,
			OrderStatus::Delivered,
			OrderStatus::Cancelled,
			OrderStatus::Unknown("refunded".into()),
		] {
			assert!(table
				.next_automatic(&order(status, DeliveryMethod::Pickup))
				.is_none());
		}
	}

	#[test]
	fn test_customer_cancels_inside_window_only() {
		let table = TransitionTable::default();
		let order = order(OrderStatus::Confirmed, DeliveryMethod::Pickup);

		let inside = created() + Duration::minutes(3);
		let rule = table
			.authorize(&order, &OrderStatus::Cancelled, &Caller::Customer, inside)
			.unwrap();
		assert_eq!(rule.required_actor, Actor::Customer);

		let outside = created() + Duration::minutes(11);
		assert_eq!(
			table.authorize(&order, &OrderStatus::Cancelled, &Caller::Customer, outside),
			Err(TransitionError::WindowClosed)
		);
		// Admins are not bound by the customer window
		assert!(table
			.authorize(&order, &OrderStatus::Cancelled, &admin(), outside)
			.is_ok());
	}

	#[test]
	fn test_automatic_rules_cannot_be_triggered() {
		let table = TransitionTable::default();
		let order = order(OrderStatus::Pending, DeliveryMethod::Pickup);
		assert!(matches!(
			table.authorize(&order, &OrderStatus::Confirmed, &admin(), created()),
			Err(TransitionError::AutomaticOnly { .. })
		));
	}

	#[test]
	fn test_unmatched_move_is_logged() {
		let table = TransitionTable::default();
		let logs = CapturedLogs::default();
		let subscriber = tracing_subscriber::fmt()
			.with_writer(logs.clone())
			.with_ansi(false)
			.finish();

		let pickup = order(OrderStatus::Ready, DeliveryMethod::Pickup);
		let result = tracing::subscriber::with_default(subscriber, || {
			table
				.authorize(&pickup, &OrderStatus::Preparing, &admin(), created())
				.map(|rule| rule.to.clone())
		});

		assert!(matches!(result, Err(TransitionError::NoMatchingRule { .. })));
		let output = logs.text();
		assert!(output.contains("WARN"));
		assert!(output.contains("No transition rule matches the requested move"));
		assert!(output.contains("from=ready"));
		assert!(output.contains("to=preparing"));
	}

	#[test]
	fn test_unmatched_and_unauthorized() {
		let table = TransitionTable::default();
		let now = created();

		let pickup = order(OrderStatus::Ready, DeliveryMethod::Pickup);
		assert!(matches!(
			table.authorize(&pickup, &OrderStatus::Preparing, &admin(), now),
			Err(TransitionError::NoMatchingRule { .. })
		));
		assert!(matches!(
			table.authorize(&pickup, &OrderStatus::Delivered, &Caller::Customer, now),
			Err(TransitionError::Unauthorized {
				actor: Actor::Customer,
				..
			})
		));

		// Condition excludes the rule for delivery orders
		let delivery = order(OrderStatus::Ready, DeliveryMethod::Delivery);
		assert!(matches!(
			table.authorize(&delivery, &OrderStatus::Delivered, &admin(), now),
			Err(TransitionError::NoMatchingRule { .. })
		));

		let preparing = order(OrderStatus::Preparing, DeliveryMethod::Pickup);
		assert!(matches!(
			table.authorize(&preparing, &OrderStatus::Cancelled, &Caller::Customer, now),
			Err(TransitionError::Unauthorized { .. })
		));
	}

	#[test]
	fn test_courier_and_admin_may_complete_delivery() {
		let table = TransitionTable::default();
		let order = order(OrderStatus::OutForDelivery, DeliveryMethod::Delivery);
		let courier = Caller::DeliveryAgent {
			name: "bob".to_string(),
		};

		assert!(table
			.authorize(&order, &OrderStatus::Delivered, &courier, created())
			.is_ok());
		assert!(table
			.authorize(&order, &OrderStatus::Delivered, &admin(), created())
			.is_ok());
		assert!(table
			.authorize(&order, &OrderStatus::Delivered, &Caller::Customer, created())
			.is_err());
	}

	#[test]
	fn test_set_delay() {
		let mut table = TransitionTable::default();
		table
			.set_delay(&OrderStatus::Pending, &OrderStatus::Confirmed, 1)
			.unwrap();
		let order = order(OrderStatus::Pending, DeliveryMethod::Pickup);
		assert_eq!(table.next_automatic(&order).unwrap().delay_minutes, 1);

		assert!(table
			.set_delay(&OrderStatus::Ready, &OrderStatus::Delivered, 5)
			.is_err());
	}

	#[test]
	fn test_validate_reports_defects() {
		let table = TransitionTable::new(vec![
			TransitionRule::automatic(OrderStatus::Pending, OrderStatus::Confirmed, 2),
			TransitionRule::automatic(OrderStatus::Pending, OrderStatus::Cancelled, 60),
			TransitionRule::manual(OrderStatus::Delivered, OrderStatus::Pending, Actor::Admin),
		]);
		let defects = table.validate();

		assert!(defects.contains(&TableDefect::OrphanStatus(OrderStatus::Confirmed)));
		assert!(defects.contains(&TableDefect::LeavesTerminal {
			from: OrderStatus::Delivered,
			to: OrderStatus::Pending,
		}));
		assert!(defects.iter().any(|d| matches!(
			d,
			TableDefect::AmbiguousAutomatic { from: OrderStatus::Pending, targets, .. }
				if targets.len() == 2
		)));

		// Ambiguity resolves to the first rule
		let order = order(OrderStatus::Pending, DeliveryMethod::Pickup);
		assert_eq!(
			table.next_automatic(&order).unwrap().to,
			OrderStatus::Confirmed
		);
	}
}
