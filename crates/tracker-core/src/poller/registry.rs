//! Singleton-per-order poller registry.

use super::{Poller, PollerContext, PollerHandle};
use crate::clock::Clock;
use crate::policy::PollingPolicy;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracker_provider::ProviderService;
use tracker_types::{truncate_id, OrderSnapshot};

pub(crate) struct RegistryInner {
	pollers: DashMap<String, Arc<Poller>>,
	context: Arc<PollerContext>,
}

impl RegistryInner {
	/// Returns the live poller for `order_id`, creating it if missing, with
	/// its handle count already incremented.
	///
	/// Lookup, creation and the handle increment happen under one map entry
	/// lock, so they cannot interleave with an eviction of the same id.
	pub(super) fn attach(self: &Arc<Self>, order_id: &str, seed: Option<OrderSnapshot>) -> Arc<Poller> {
		match self.pollers.entry(order_id.to_string()) {
			Entry::Occupied(entry) => {
				let poller = entry.get().clone();
				if let Some(seed) = seed {
					poller.seed(seed);
				}
				poller.handles.fetch_add(1, Ordering::SeqCst);
				poller
			},
			Entry::Vacant(entry) => {
				let poller = Arc::new(Poller::new(
					order_id.to_string(),
					self.context.clone(),
					Arc::downgrade(self),
					seed,
				));
				poller.handles.fetch_add(1, Ordering::SeqCst);
				entry.insert(poller.clone());
				tracing::debug!(order_id = %truncate_id(order_id), "Created poller");
				poller
			},
		}
	}

	/// Removes `poller` if it is still the registered instance and unused.
	pub(super) fn evict(&self, poller: &Arc<Poller>, require_no_handles: bool) {
		let removed = self.pollers.remove_if(poller.order_id(), |_, current| {
			Arc::ptr_eq(current, poller) && poller.retire_if_unused(require_no_handles)
		});
		if removed.is_some() {
			tracing::debug!(order_id = %truncate_id(poller.order_id()), "Evicted poller");
		}
	}
}

/// Owns the live poller of every tracked order.
///
/// At most one poller exists per order id. Clones share the same map.
#[derive(Clone)]
pub struct PollerRegistry {
	inner: Arc<RegistryInner>,
}

impl PollerRegistry {
	pub fn new(
		provider: Arc<ProviderService>,
		policy: PollingPolicy,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self {
			inner: Arc::new(RegistryInner {
				pollers: DashMap::new(),
				context: Arc::new(PollerContext {
					provider,
					policy,
					clock,
				}),
			}),
		}
	}

	/// The live poller for an order, created on first request.
	pub fn get_instance(&self, order_id: &str) -> PollerHandle {
		PollerHandle::from_attached(self.inner.attach(order_id, None))
	}

	/// Like [`get_instance`](Self::get_instance), seeding a new poller with
	/// a known snapshot.
	///
	/// A poller seeded with a terminal status never starts a loop. An
	/// existing poller keeps the snapshot it already holds.
	pub fn get_instance_seeded(&self, order_id: &str, snapshot: OrderSnapshot) -> PollerHandle {
		PollerHandle::from_attached(self.inner.attach(order_id, Some(snapshot)))
	}

	pub fn contains(&self, order_id: &str) -> bool {
		self.inner.pollers.contains_key(order_id)
	}

	/// Number of live pollers.
	pub fn len(&self) -> usize {
		self.inner.pollers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.pollers.is_empty()
	}

	pub fn policy(&self) -> &PollingPolicy {
		&self.inner.context.policy
	}
}
