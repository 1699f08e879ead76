//! Live order polling.
//!
//! Every tracked order has at most one live poller, owned by the
//! [`PollerRegistry`]. A poller runs one background loop while it has
//! subscribers, fans each fetched snapshot out to them, and folds concurrent
//! refresh requests into a single backend call. The loop ends on its own once
//! the order reaches a terminal status, and the poller is evicted from the
//! registry as soon as its last subscriber leaves.

mod registry;
mod subscribers;

pub use registry::PollerRegistry;
pub use subscribers::SnapshotCallback;

use crate::clock::Clock;
use crate::policy::PollingPolicy;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use registry::RegistryInner;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use subscribers::SubscriberList;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracker_provider::{ProviderError, ProviderService};
use tracker_types::{truncate_id, OrderSnapshot};

/// Errors returned to callers of [`PollerHandle::refresh`].
///
/// Cloneable so every caller sharing one in-flight fetch receives the same
/// failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollerError {
	#[error("Fetch failed: {0}")]
	Fetch(String),
	#[error("Fetch timed out after {0:?}")]
	Timeout(Duration),
}

impl From<ProviderError> for PollerError {
	fn from(err: ProviderError) -> Self {
		match err {
			ProviderError::Timeout(after) => PollerError::Timeout(after),
			other => PollerError::Fetch(other.to_string()),
		}
	}
}

type FetchResult = Result<OrderSnapshot, PollerError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Collaborators shared by all pollers of one registry.
pub(crate) struct PollerContext {
	pub provider: Arc<ProviderService>,
	pub policy: PollingPolicy,
	pub clock: Arc<dyn Clock>,
}

/// Background fetch health of one poller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollerHealth {
	/// Failed fetches since the last success.
	pub consecutive_failures: u32,
	pub last_error: Option<String>,
	/// Fetch time of the snapshot currently held.
	pub last_snapshot_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct PollerState {
	last_snapshot: Option<OrderSnapshot>,
	in_flight: Option<(u64, SharedFetch)>,
	fetch_generation: u64,
	task: Option<JoinHandle<()>>,
	/// Set once evicted. A retired poller never starts a loop again.
	retired: bool,
	consecutive_failures: u32,
	last_error: Option<String>,
}

pub(crate) struct Poller {
	order_id: String,
	context: Arc<PollerContext>,
	registry: Weak<RegistryInner>,
	subscribers: SubscriberList,
	/// Live `PollerHandle`s pointing at this instance.
	handles: AtomicUsize,
	state: Mutex<PollerState>,
}

impl Poller {
	fn new(
		order_id: String,
		context: Arc<PollerContext>,
		registry: Weak<RegistryInner>,
		seed: Option<OrderSnapshot>,
	) -> Self {
		Self {
			order_id,
			context,
			registry,
			subscribers: SubscriberList::default(),
			handles: AtomicUsize::new(0),
			state: Mutex::new(PollerState {
				last_snapshot: seed,
				..PollerState::default()
			}),
		}
	}

	fn state(&self) -> MutexGuard<'_, PollerState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn order_id(&self) -> &str {
		&self.order_id
	}

	/// Installs a known snapshot unless one is already held.
	fn seed(&self, snapshot: OrderSnapshot) {
		let mut state = self.state();
		if state.last_snapshot.is_none() {
			state.last_snapshot = Some(snapshot);
		}
	}

	fn is_retired(&self) -> bool {
		self.state().retired
	}

	fn try_subscribe(self: &Arc<Self>, callback: Arc<SnapshotCallback>) -> Option<Subscription> {
		let mut state = self.state();
		if state.retired {
			return None;
		}

		let slot = self.subscribers.add(callback);
		tracing::debug!(
			order_id = %truncate_id(&self.order_id),
			subscribers = self.subscribers.len(),
			"Subscribed"
		);
		if state.task.is_none() {
			self.start_loop(&mut state);
		}

		Some(Subscription {
			poller: Some(self.clone()),
			slot,
		})
	}

	/// Starts the background loop unless the order is known to be terminal.
	///
	/// Without a snapshot the first fetch happens immediately; otherwise the
	/// first tick waits one interval.
	fn start_loop(self: &Arc<Self>, state: &mut PollerState) {
		let first_delay = match &state.last_snapshot {
			None => Duration::ZERO,
			Some(snapshot) => match self.context.policy.interval_for(&snapshot.status) {
				Some(interval) => interval,
				None => return,
			},
		};

		match tokio::runtime::Handle::try_current() {
			Ok(runtime) => {
				state.task = Some(runtime.spawn(run_loop(Arc::downgrade(self), first_delay)));
				tracing::debug!(
					order_id = %truncate_id(&self.order_id),
					first_tick = ?first_delay,
					"Started polling"
				);
			},
			Err(_) => tracing::warn!(
				order_id = %truncate_id(&self.order_id),
				"No async runtime available, polling not started"
			),
		}
	}

	fn unsubscribe(self: &Arc<Self>, slot: u64) {
		let remaining = self.subscribers.remove(slot);
		tracing::debug!(
			order_id = %truncate_id(&self.order_id),
			subscribers = remaining,
			"Unsubscribed"
		);
		if remaining == 0 {
			self.evict(false);
		}
	}

	fn release_handle(self: &Arc<Self>) {
		if self.handles.fetch_sub(1, Ordering::SeqCst) == 1 && self.subscribers.is_empty() {
			self.evict(true);
		}
	}

	fn evict(self: &Arc<Self>, require_no_handles: bool) {
		match self.registry.upgrade() {
			Some(registry) => registry.evict(self, require_no_handles),
			None => {
				self.retire_if_unused(require_no_handles);
			},
		}
	}

	/// Retires this instance and stops its loop if nothing uses it.
	///
	/// Runs inside the registry's removal so the check and the removal are
	/// one atomic step.
	fn retire_if_unused(&self, require_no_handles: bool) -> bool {
		let mut state = self.state();
		if state.retired || !self.subscribers.is_empty() {
			return false;
		}
		if require_no_handles && self.handles.load(Ordering::SeqCst) > 0 {
			return false;
		}

		state.retired = true;
		if let Some(task) = state.task.take() {
			task.abort();
		}
		true
	}

	/// Joins the in-flight fetch, or starts one.
	fn join_or_start_fetch(self: &Arc<Self>) -> SharedFetch {
		let mut state = self.state();
		if let Some((_, fetch)) = &state.in_flight {
			return fetch.clone();
		}

		state.fetch_generation += 1;
		let generation = state.fetch_generation;
		let fetch = fetch_and_apply(
			Arc::downgrade(self),
			self.context.clone(),
			self.order_id.clone(),
			generation,
		)
		.boxed()
		.shared();
		state.in_flight = Some((generation, fetch.clone()));
		fetch
	}

	/// Records a fetch outcome and delivers successful snapshots.
	///
	/// The in-flight slot is released only after delivery, so deliveries of
	/// one poller never overlap.
	fn complete_fetch(&self, generation: u64, outcome: &FetchResult) {
		let delivery = {
			let mut state = self.state();
			match outcome {
				Ok(snapshot) => {
					let previous = state
						.last_snapshot
						.replace(snapshot.clone())
						.map(|previous| previous.status);
					state.consecutive_failures = 0;
					state.last_error = None;

					if !snapshot.status.is_known() {
						tracing::warn!(
							order_id = %truncate_id(&self.order_id),
							status = %snapshot.status,
							"Backend reported an unknown status"
						);
					}
					let changed = previous
						.as_ref()
						.is_some_and(|previous| *previous != snapshot.status);
					if let (true, Some(previous)) = (changed, &previous) {
						tracing::info!(
							order_id = %truncate_id(&self.order_id),
							from = %previous,
							to = %snapshot.status,
							"Order status changed"
						);
					}
					if snapshot.status.is_terminal() {
						if let Some(task) = state.task.take() {
							task.abort();
							tracing::info!(
								order_id = %truncate_id(&self.order_id),
								status = %snapshot.status,
								"Order reached terminal status, polling stopped"
							);
						}
					}
					(!state.retired).then_some(changed)
				},
				Err(error) => {
					state.consecutive_failures += 1;
					state.last_error = Some(error.to_string());
					tracing::warn!(
						order_id = %truncate_id(&self.order_id),
						error = %error,
						consecutive_failures = state.consecutive_failures,
						"Order status fetch failed, keeping last snapshot"
					);
					None
				},
			}
		};

		if let (Ok(snapshot), Some(changed)) = (outcome, delivery) {
			self.subscribers.deliver(&self.order_id, snapshot, changed);
		}

		let mut state = self.state();
		if state
			.in_flight
			.as_ref()
			.is_some_and(|(current, _)| *current == generation)
		{
			state.in_flight = None;
		}
	}

	/// Interval until the next tick, based on the latest known status.
	fn next_interval(&self) -> Option<Duration> {
		let state = self.state();
		if state.retired {
			return None;
		}
		match &state.last_snapshot {
			Some(snapshot) => self.context.policy.interval_for(&snapshot.status),
			None => Some(self.context.policy.default_interval()),
		}
	}
}

impl Drop for Poller {
	fn drop(&mut self) {
		let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
		if let Some(task) = state.task.take() {
			task.abort();
		}
	}
}

async fn fetch_and_apply(
	poller: Weak<Poller>,
	context: Arc<PollerContext>,
	order_id: String,
	generation: u64,
) -> FetchResult {
	let outcome = context
		.provider
		.fetch_status(&order_id)
		.await
		.map(|update| OrderSnapshot::from_update(order_id.clone(), update, context.clock.now()))
		.map_err(PollerError::from);

	if let Some(poller) = poller.upgrade() {
		poller.complete_fetch(generation, &outcome);
	}
	outcome
}

async fn run_loop(poller: Weak<Poller>, first_delay: Duration) {
	let mut delay = first_delay;
	loop {
		tokio::time::sleep(delay).await;

		let Some(fetch) = poller.upgrade().map(|p| p.join_or_start_fetch()) else {
			return;
		};
		// Failures are recorded by the fetch itself and retried next tick
		let _ = fetch.await;

		match poller.upgrade().and_then(|p| p.next_interval()) {
			Some(next) => delay = next,
			None => return,
		}
	}
}

/// Handle to the live poller of one order.
///
/// Once the underlying instance has been evicted, the handle resolves the
/// current instance through the registry again.
pub struct PollerHandle {
	order_id: String,
	poller: Mutex<Arc<Poller>>,
}

impl PollerHandle {
	/// Wraps a poller whose handle count already includes this handle.
	fn from_attached(poller: Arc<Poller>) -> Self {
		Self {
			order_id: poller.order_id().to_string(),
			poller: Mutex::new(poller),
		}
	}

	fn current(&self) -> Arc<Poller> {
		let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
		if poller.is_retired() {
			if let Some(registry) = poller.registry.upgrade() {
				let fresh = registry.attach(&self.order_id, None);
				let retired = std::mem::replace(&mut *poller, fresh);
				retired.release_handle();
			}
		}
		poller.clone()
	}

	pub fn order_id(&self) -> &str {
		&self.order_id
	}

	/// True when both handles refer to the same live instance.
	pub fn same_instance(&self, other: &PollerHandle) -> bool {
		Arc::ptr_eq(&self.current(), &other.current())
	}

	/// Registers a callback for every fetched snapshot.
	///
	/// The first subscriber starts the polling loop unless the last known
	/// status is terminal.
	pub fn subscribe<F>(&self, callback: F) -> Subscription
	where
		F: Fn(&OrderSnapshot, bool) + Send + Sync + 'static,
	{
		let callback: Arc<SnapshotCallback> = Arc::new(callback);
		loop {
			let poller = self.current();
			if let Some(subscription) = poller.try_subscribe(callback.clone()) {
				return subscription;
			}
			if poller.registry.strong_count() == 0 {
				tracing::warn!(
					order_id = %truncate_id(&self.order_id),
					"Poller registry is gone, subscription inactive"
				);
				return Subscription {
					poller: None,
					slot: 0,
				};
			}
		}
	}

	/// Fetches now, sharing any fetch already in flight.
	pub async fn refresh(&self) -> Result<OrderSnapshot, PollerError> {
		let fetch = self.current().join_or_start_fetch();
		fetch.await
	}

	pub fn last_snapshot(&self) -> Option<OrderSnapshot> {
		self.current().state().last_snapshot.clone()
	}

	pub fn subscriber_count(&self) -> usize {
		self.current().subscribers.len()
	}

	/// True while a background loop is scheduled.
	pub fn is_polling(&self) -> bool {
		self.current().state().task.is_some()
	}

	pub fn health(&self) -> PollerHealth {
		let poller = self.current();
		let state = poller.state();
		PollerHealth {
			consecutive_failures: state.consecutive_failures,
			last_error: state.last_error.clone(),
			last_snapshot_at: state.last_snapshot.as_ref().map(|s| s.fetched_at),
		}
	}
}

impl Clone for PollerHandle {
	fn clone(&self) -> Self {
		let poller = self.current();
		poller.handles.fetch_add(1, Ordering::SeqCst);
		Self::from_attached(poller)
	}
}

impl Drop for PollerHandle {
	fn drop(&mut self) {
		let poller = self
			.poller
			.get_mut()
			.unwrap_or_else(PoisonError::into_inner)
			.clone();
		poller.release_handle();
	}
}

/// Registration of one callback with a poller.
///
/// Unsubscribing is synchronous: once `unsubscribe` returns, or the
/// subscription is dropped, the callback is never invoked again. When done
/// from inside a snapshot callback, a delivery already running on another
/// thread is not waited for.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
	poller: Option<Arc<Poller>>,
	slot: u64,
}

impl Subscription {
	pub fn unsubscribe(mut self) {
		self.release();
	}

	pub fn is_active(&self) -> bool {
		self.poller.is_some()
	}

	fn release(&mut self) {
		if let Some(poller) = self.poller.take() {
			poller.unsubscribe(self.slot);
		}
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.release();
	}
}
