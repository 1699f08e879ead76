//! Builder pattern for constructing tracker engines.
//!
//! Composes a [`TrackerEngine`] from configuration: provider implementations
//! are created through factory functions, and the polling policy, transition
//! delays and status labels are taken from their configuration sections.

use crate::clock::{Clock, SystemClock};
use crate::engine::TrackerEngine;
use crate::lifecycle::TransitionTable;
use crate::poller::PollerRegistry;
use crate::policy::PollingPolicy;
use crate::view::StatusLabels;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracker_config::Config;
use tracker_provider::{OrderStatusProvider, ProviderError, ProviderService};
use tracker_types::OrderStatus;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions for every provider implementation the binary ships.
pub struct TrackerFactories<PF> {
	pub provider_factories: HashMap<String, PF>,
}

/// Builder for constructing a TrackerEngine with pluggable implementations.
pub struct TrackerBuilder {
	config: Config,
	clock: Arc<dyn Clock>,
}

impl TrackerBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			clock: Arc::new(SystemClock),
		}
	}

	/// Replaces the system clock.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;
		self
	}

	pub fn build<PF>(self, factories: TrackerFactories<PF>) -> Result<TrackerEngine, BuilderError>
	where
		PF: Fn(&toml::Value) -> Result<Box<dyn OrderStatusProvider>, ProviderError>,
	{
		let provider_config = &self.config.provider;

		// Create provider implementations
		let mut providers = HashMap::new();
		for (name, config) in &provider_config.implementations {
			let Some(factory) = factories.provider_factories.get(name) else {
				tracing::warn!(
					component = "provider",
					implementation = %name,
					"No factory registered, skipping"
				);
				continue;
			};
			match factory(config) {
				Ok(implementation) => {
					let is_primary = &provider_config.primary == name;
					tracing::info!(component = "provider", implementation = %name, enabled = %is_primary, "Loaded");
					providers.insert(name.clone(), implementation);
				},
				Err(e) => {
					tracing::error!(
						component = "provider",
						implementation = %name,
						error = %e,
						"Failed to create provider implementation"
					);
					return Err(BuilderError::Config(format!(
						"Failed to create provider implementation '{}': {}",
						name, e
					)));
				},
			}
		}

		let backend = providers.remove(&provider_config.primary).ok_or_else(|| {
			BuilderError::MissingComponent(format!(
				"Primary provider '{}' has no registered implementation",
				provider_config.primary
			))
		})?;
		let provider = Arc::new(ProviderService::new(
			backend,
			self.config.tracker.fetch_timeout(),
		));

		let policy = self.polling_policy()?;
		let transitions = Arc::new(self.transition_table()?);
		let labels = Arc::new(self.status_labels()?);

		for defect in transitions.validate() {
			tracing::warn!(component = "transitions", defect = %defect, "Transition table defect");
		}

		let registry = PollerRegistry::new(provider.clone(), policy, self.clock.clone());
		tracing::info!(
			tracker_id = %self.config.tracker.id,
			fetch_timeout = ?self.config.tracker.fetch_timeout(),
			"Built tracker engine"
		);

		Ok(TrackerEngine::new(
			self.config,
			provider,
			registry,
			transitions,
			labels,
			self.clock,
		))
	}

	fn polling_policy(&self) -> Result<PollingPolicy, BuilderError> {
		let polling = &self.config.polling;
		let mut policy = PollingPolicy::default();
		policy.set_default_interval(Duration::from_millis(polling.default_interval_ms));
		let intervals = polling
			.parsed_intervals()
			.map_err(|e| BuilderError::Config(e.to_string()))?;
		for (status, interval) in intervals {
			policy.set_interval(status, interval);
		}
		Ok(policy)
	}

	fn transition_table(&self) -> Result<TransitionTable, BuilderError> {
		let mut table = TransitionTable::default();
		let delays = self
			.config
			.transitions
			.parsed_delays()
			.map_err(|e| BuilderError::Config(e.to_string()))?;
		for (from, to, minutes) in delays {
			table
				.set_delay(&from, &to, minutes)
				.map_err(|e| BuilderError::Config(format!("transitions.delays: {}", e)))?;
		}
		Ok(table)
	}

	fn status_labels(&self) -> Result<StatusLabels, BuilderError> {
		let mut labels = StatusLabels::new();
		for (key, label) in &self.config.labels {
			let status = key
				.parse::<OrderStatus>()
				.map_err(|e| BuilderError::Config(format!("labels: {}", e)))?;
			labels.set(status, label.as_str());
		}
		Ok(labels)
	}
}
