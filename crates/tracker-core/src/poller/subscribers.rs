//! Observer list for one poller.
//!
//! Each subscriber owns a slot with its own delivery gate. Removing a slot
//! waits for a delivery in progress on another thread to finish, so once
//! removal returns the callback is never invoked again. Removal from inside
//! a callback never waits: a callback may remove its own slot or any other,
//! and only deliveries that have not started yet are suppressed.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracker_types::{truncate_id, OrderSnapshot};

/// Callback receiving every snapshot and whether its status changed.
pub type SnapshotCallback = dyn Fn(&OrderSnapshot, bool) + Send + Sync;

static NEXT_SLOT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
	/// Slots whose callback is running on this thread.
	static DELIVERING: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

struct Slot {
	id: u64,
	active: AtomicBool,
	gate: Mutex<()>,
	callback: Arc<SnapshotCallback>,
}

impl Slot {
	fn deliver(&self, order_id: &str, snapshot: &OrderSnapshot, changed: bool) {
		if !self.active.load(Ordering::Acquire) {
			return;
		}
		let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
		if !self.active.load(Ordering::Acquire) {
			return;
		}

		DELIVERING.with(|slots| slots.borrow_mut().push(self.id));
		let result = catch_unwind(AssertUnwindSafe(|| (self.callback)(snapshot, changed)));
		DELIVERING.with(|slots| {
			slots.borrow_mut().pop();
		});

		if let Err(panic) = result {
			tracing::error!(
				order_id = %truncate_id(order_id),
				subscriber = self.id,
				panic = %panic_message(&*panic),
				"Subscriber callback panicked"
			);
		}
	}
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
	if let Some(message) = panic.downcast_ref::<&str>() {
		message
	} else if let Some(message) = panic.downcast_ref::<String>() {
		message
	} else {
		"non-string panic payload"
	}
}

/// Registration-ordered subscriber slots.
#[derive(Default)]
pub(crate) struct SubscriberList {
	slots: Mutex<Vec<Arc<Slot>>>,
}

impl SubscriberList {
	fn slots(&self) -> std::sync::MutexGuard<'_, Vec<Arc<Slot>>> {
		self.slots.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Registers a callback and returns its slot id.
	pub fn add(&self, callback: Arc<SnapshotCallback>) -> u64 {
		let id = NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed);
		self.slots().push(Arc::new(Slot {
			id,
			active: AtomicBool::new(true),
			gate: Mutex::new(()),
			callback,
		}));
		id
	}

	/// Removes a slot and returns how many remain.
	///
	/// Blocks until a delivery of this slot running on another thread has
	/// returned, unless called from inside a delivery on this thread.
	pub fn remove(&self, id: u64) -> usize {
		let (removed, remaining) = {
			let mut slots = self.slots();
			let removed = slots
				.iter()
				.position(|slot| slot.id == id)
				.map(|index| slots.remove(index));
			(removed, slots.len())
		};

		if let Some(slot) = removed {
			slot.active.store(false, Ordering::Release);
			// A delivering thread already holds a gate; never wait on another
			let delivering = DELIVERING.with(|slots| !slots.borrow().is_empty());
			if !delivering {
				drop(slot.gate.lock().unwrap_or_else(PoisonError::into_inner));
			}
		}
		remaining
	}

	pub fn len(&self) -> usize {
		self.slots().len()
	}

	pub fn is_empty(&self) -> bool {
		self.slots().is_empty()
	}

	/// Invokes every registered callback in registration order.
	///
	/// A panicking callback is logged and does not affect the others.
	pub fn deliver(&self, order_id: &str, snapshot: &OrderSnapshot, changed: bool) {
		let slots: Vec<Arc<Slot>> = self.slots().clone();
		for slot in slots {
			slot.deliver(order_id, snapshot, changed);
		}
	}
}
