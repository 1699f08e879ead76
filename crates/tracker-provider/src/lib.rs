//! Order status provider module for the tracking engine.
//!
//! This module defines the interface to the backend that owns order state.
//! The tracking engine never implements that backend; it only asks it, on
//! demand, for the current status of an order. Implementations cover a real
//! HTTP/JSON backend and an in-memory backend for tests and demos.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;
use tracker_types::{truncate_id, ConfigSchema, ImplementationRegistry, Order, StatusUpdate};

/// Re-export implementations
pub mod implementations {
	pub mod http;
	pub mod memory;
}

/// Errors that can occur while querying the backend.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
	/// Connection-level failure.
	#[error("Network error: {0}")]
	Network(String),
	/// The backend did not answer within the allowed time.
	#[error("Request timed out after {0:?}")]
	Timeout(Duration),
	/// The backend does not know this order.
	#[error("Order not found: {0}")]
	NotFound(String),
	/// The backend answered with a non-success status.
	#[error("HTTP {status}: {message}")]
	Http { status: u16, message: String },
	/// The response body could not be decoded.
	#[error("Decode error: {0}")]
	Decode(String),
	/// The implementation configuration is invalid.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the interface to the backend order-status endpoint.
#[async_trait]
pub trait OrderStatusProvider: Send + Sync {
	/// Returns the configuration schema for this implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Fetches the current status of an order.
	async fn fetch_order_status(&self, order_id: &str) -> Result<StatusUpdate, ProviderError>;

	/// Fetches the full order projection.
	async fn fetch_order(&self, order_id: &str) -> Result<Order, ProviderError>;
}

/// Type alias for provider factory functions.
pub type ProviderFactory = fn(&toml::Value) -> Result<Box<dyn OrderStatusProvider>, ProviderError>;

/// Registry trait for provider implementations.
pub trait ProviderRegistry: ImplementationRegistry<Factory = ProviderFactory> {}

/// Get all registered provider implementations.
pub fn get_all_implementations() -> Vec<(&'static str, ProviderFactory)> {
	use implementations::{http, memory};

	vec![
		(http::Registry::NAME, http::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// Service wrapping the primary provider.
///
/// Every call is bounded by the configured fetch timeout, so a hung backend
/// surfaces as `ProviderError::Timeout` instead of stalling the caller.
pub struct ProviderService {
	backend: Box<dyn OrderStatusProvider>,
	fetch_timeout: Duration,
}

impl ProviderService {
	pub fn new(backend: Box<dyn OrderStatusProvider>, fetch_timeout: Duration) -> Self {
		Self {
			backend,
			fetch_timeout,
		}
	}

	pub fn fetch_timeout(&self) -> Duration {
		self.fetch_timeout
	}

	/// Fetches the current status of an order within the fetch timeout.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn fetch_status(&self, order_id: &str) -> Result<StatusUpdate, ProviderError> {
		let result =
			tokio::time::timeout(self.fetch_timeout, self.backend.fetch_order_status(order_id))
				.await
				.unwrap_or(Err(ProviderError::Timeout(self.fetch_timeout)));

		match &result {
			Ok(update) => tracing::debug!(status = %update.status, "Fetched order status"),
			Err(e) => tracing::debug!(error = %e, "Order status fetch failed"),
		}
		result
	}

	/// Fetches the full order within the fetch timeout.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn fetch_order(&self, order_id: &str) -> Result<Order, ProviderError> {
		tokio::time::timeout(self.fetch_timeout, self.backend.fetch_order(order_id))
			.await
			.unwrap_or(Err(ProviderError::Timeout(self.fetch_timeout)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use implementations::memory::MemoryProvider;
	use tracker_types::OrderStatus;

	#[tokio::test(start_paused = true)]
	async fn test_fetch_is_bounded_by_timeout() {
		let provider = MemoryProvider::new();
		provider
			.set_status("A-1", StatusUpdate::new(OrderStatus::Preparing))
			.await;
		provider.set_latency(Duration::from_secs(60)).await;

		let service = ProviderService::new(Box::new(provider.clone()), Duration::from_secs(5));
		let result = service.fetch_status("A-1").await;
		assert!(matches!(result, Err(ProviderError::Timeout(d)) if d == Duration::from_secs(5)));
		assert_eq!(provider.fetch_count(), 1);
	}

	#[tokio::test]
	async fn test_fetch_passes_through() {
		let provider = MemoryProvider::new();
		provider
			.set_status("A-1", StatusUpdate::new(OrderStatus::Ready))
			.await;

		let service = ProviderService::new(Box::new(provider), Duration::from_secs(5));
		let update = service.fetch_status("A-1").await.unwrap();
		assert_eq!(update.status, OrderStatus::Ready);
	}

	#[test]
	fn test_all_implementations_registered() {
		let names: Vec<_> = get_all_implementations()
			.into_iter()
			.map(|(name, _)| name)
			.collect();
		assert_eq!(names, vec!["http", "memory"]);
	}
}
