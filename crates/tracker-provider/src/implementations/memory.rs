//! In-memory order status provider.
//!
//! Holds orders and their current status in process memory. Useful for tests
//! and demos: statuses can be changed at any time, failures injected and
//! latency added, and every fetch is counted.

use crate::{OrderStatusProvider, ProviderError, ProviderFactory, ProviderRegistry};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracker_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Order, Schema, StatusUpdate,
	ValidationError,
};

#[derive(Default)]
struct MemoryState {
	orders: HashMap<String, Order>,
	statuses: HashMap<String, StatusUpdate>,
	pending_failures: u32,
	latency: Duration,
}

/// In-memory provider. Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryProvider {
	state: Arc<RwLock<MemoryState>>,
	fetches: Arc<AtomicUsize>,
}

impl MemoryProvider {
	pub fn new() -> Self {
		Self::default()
	}

	/// Stores an order; its fields also become the current status.
	pub async fn insert_order(&self, order: Order) {
		let mut state = self.state.write().await;
		state.statuses.remove(&order.id);
		state.orders.insert(order.id.clone(), order);
	}

	/// Replaces the current status of an order.
	pub async fn set_status(&self, order_id: &str, update: StatusUpdate) {
		let mut state = self.state.write().await;
		if let Some(order) = state.orders.get_mut(order_id) {
			order.status = update.status.clone();
			order.progress = update.progress;
			if update.estimated_minutes.is_some() {
				order.estimated_minutes = update.estimated_minutes;
			}
			order.last_updated_by = update.last_updated_by.clone();
		}
		state.statuses.insert(order_id.to_string(), update);
	}

	/// Makes the next `count` status fetches fail with a network error.
	pub async fn fail_next(&self, count: u32) {
		self.state.write().await.pending_failures = count;
	}

	/// Delays every response by `latency`.
	pub async fn set_latency(&self, latency: Duration) {
		self.state.write().await.latency = latency;
	}

	/// Number of status fetches received so far.
	pub fn fetch_count(&self) -> usize {
		self.fetches.load(Ordering::SeqCst)
	}

	async fn delay(&self) {
		let latency = self.state.read().await.latency;
		if !latency.is_zero() {
			tokio::time::sleep(latency).await;
		}
	}
}

#[async_trait]
impl OrderStatusProvider for MemoryProvider {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryProviderSchema)
	}

	async fn fetch_order_status(&self, order_id: &str) -> Result<StatusUpdate, ProviderError> {
		self.fetches.fetch_add(1, Ordering::SeqCst);
		self.delay().await;

		let mut state = self.state.write().await;
		if state.pending_failures > 0 {
			state.pending_failures -= 1;
			return Err(ProviderError::Network("injected failure".to_string()));
		}

		if let Some(update) = state.statuses.get(order_id) {
			return Ok(update.clone());
		}
		state
			.orders
			.get(order_id)
			.map(|order| StatusUpdate {
				status: order.status.clone(),
				progress: order.progress,
				last_updated_by: order.last_updated_by.clone(),
				estimated_minutes: order.estimated_minutes,
				timeline: Vec::new(),
			})
			.ok_or_else(|| ProviderError::NotFound(order_id.to_string()))
	}

	async fn fetch_order(&self, order_id: &str) -> Result<Order, ProviderError> {
		self.delay().await;
		self.state
			.read()
			.await
			.orders
			.get(order_id)
			.cloned()
			.ok_or_else(|| ProviderError::NotFound(order_id.to_string()))
	}
}

/// Configuration schema for the memory provider.
pub struct MemoryProviderSchema;

impl ConfigSchema for MemoryProviderSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new(
					"latency_ms",
					FieldType::Integer {
						min: Some(0),
						max: Some(60_000),
					},
				),
				Field::new("orders_file", FieldType::String),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create a memory provider from configuration.
///
/// Configuration parameters:
/// - `latency_ms` (optional): artificial delay added to every response
/// - `orders_file` (optional): JSON array of orders to preload
pub fn create_provider(
	config: &toml::Value,
) -> Result<Box<dyn OrderStatusProvider>, ProviderError> {
	MemoryProviderSchema
		.validate(config)
		.map_err(|e| ProviderError::Configuration(e.to_string()))?;

	let latency = Duration::from_millis(
		config
			.get("latency_ms")
			.and_then(|v| v.as_integer())
			.unwrap_or(0) as u64,
	);

	let mut orders = HashMap::new();
	if let Some(path) = config.get("orders_file").and_then(|v| v.as_str()) {
		let content = std::fs::read_to_string(path).map_err(|e| {
			ProviderError::Configuration(format!("Cannot read orders file {}: {}", path, e))
		})?;
		let loaded: Vec<Order> = serde_json::from_str(&content)
			.map_err(|e| ProviderError::Configuration(format!("Invalid orders file: {}", e)))?;
		orders.extend(loaded.into_iter().map(|order| (order.id.clone(), order)));
		tracing::info!(count = orders.len(), "Preloaded orders into memory provider");
	}

	let state = MemoryState {
		orders,
		latency,
		..MemoryState::default()
	};
	Ok(Box::new(MemoryProvider {
		state: Arc::new(RwLock::new(state)),
		fetches: Arc::new(AtomicUsize::new(0)),
	}))
}

/// Registry for the memory provider implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = ProviderFactory;

	fn factory() -> Self::Factory {
		create_provider
	}
}

impl ProviderRegistry for Registry {}
