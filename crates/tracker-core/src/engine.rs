//! Assembled tracking engine.

use crate::clock::Clock;
use crate::lifecycle::{TransitionError, TransitionRule, TransitionTable};
use crate::poller::{PollerHandle, PollerRegistry};
use crate::view::{StatusLabels, TrackingViewModel};
use std::sync::Arc;
use tracker_config::Config;
use tracker_provider::ProviderService;
use tracker_types::{Caller, Order, OrderStatus};

/// Everything needed to track orders: the poller registry, the lifecycle
/// tables and the provider they share.
pub struct TrackerEngine {
	config: Config,
	provider: Arc<ProviderService>,
	registry: PollerRegistry,
	transitions: Arc<TransitionTable>,
	labels: Arc<StatusLabels>,
	clock: Arc<dyn Clock>,
}

impl TrackerEngine {
	pub(crate) fn new(
		config: Config,
		provider: Arc<ProviderService>,
		registry: PollerRegistry,
		transitions: Arc<TransitionTable>,
		labels: Arc<StatusLabels>,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self {
			config,
			provider,
			registry,
			transitions,
			labels,
			clock,
		}
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn provider(&self) -> &Arc<ProviderService> {
		&self.provider
	}

	pub fn registry(&self) -> &PollerRegistry {
		&self.registry
	}

	pub fn transitions(&self) -> &TransitionTable {
		&self.transitions
	}

	pub fn labels(&self) -> &StatusLabels {
		&self.labels
	}

	pub fn clock(&self) -> Arc<dyn Clock> {
		self.clock.clone()
	}

	/// The poller for an order id.
	pub fn poller(&self, order_id: &str) -> PollerHandle {
		self.registry.get_instance(order_id)
	}

	/// The poller for a known order, seeded with the order's own state so a
	/// terminal order never starts polling.
	pub fn poller_for(&self, order: &Order) -> PollerHandle {
		self.registry
			.get_instance_seeded(&order.id, order.to_snapshot(self.clock.now()))
	}

	/// A fresh view model sharing the engine's tables.
	pub fn view_model(&self) -> TrackingViewModel {
		TrackingViewModel::new(self.transitions.clone(), self.labels.clone())
	}

	/// Checks whether `caller` may move `order` to `to` at the current time.
	pub fn authorize(
		&self,
		order: &Order,
		to: &OrderStatus,
		caller: &Caller,
	) -> Result<&TransitionRule, TransitionError> {
		self.transitions
			.authorize(order, to, caller, self.clock.now())
	}
}
