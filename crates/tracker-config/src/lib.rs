//! Configuration module for the order tracking engine.
//!
//! Configuration is loaded from a TOML file. `${VAR}` and `${VAR:-default}`
//! references are resolved from the environment before parsing, and the
//! parsed configuration is validated before it is handed to the builder.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracker_types::OrderStatus;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message only, not the full input dump
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the tracker.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Settings for this tracker instance.
	pub tracker: TrackerConfig,
	/// Polling interval overrides.
	#[serde(default)]
	pub polling: PollingConfig,
	/// Automatic transition delay overrides.
	#[serde(default)]
	pub transitions: TransitionsConfig,
	/// Display label overrides keyed by canonical status name.
	#[serde(default)]
	pub labels: HashMap<String, String>,
	/// Backend order-status provider selection.
	pub provider: ProviderConfig,
}

/// Settings for this tracker instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackerConfig {
	/// Identifier used in logs.
	pub id: String,
	/// Upper bound for a single backend fetch, in seconds.
	/// Defaults to 10 seconds if not specified.
	#[serde(default = "default_fetch_timeout_seconds")]
	pub fetch_timeout_seconds: u64,
}

fn default_fetch_timeout_seconds() -> u64 {
	10
}

impl TrackerConfig {
	pub fn fetch_timeout(&self) -> Duration {
		Duration::from_secs(self.fetch_timeout_seconds)
	}
}

/// Polling interval configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingConfig {
	/// Interval for statuses without an explicit entry, in milliseconds.
	#[serde(default = "default_interval_ms")]
	pub default_interval_ms: u64,
	/// Per-status intervals in milliseconds, keyed by canonical status name.
	#[serde(default)]
	pub intervals: HashMap<String, u64>,
}

fn default_interval_ms() -> u64 {
	30_000
}

impl Default for PollingConfig {
	fn default() -> Self {
		Self {
			default_interval_ms: default_interval_ms(),
			intervals: HashMap::new(),
		}
	}
}

impl PollingConfig {
	/// Interval overrides with their keys parsed into statuses.
	pub fn parsed_intervals(&self) -> Result<Vec<(OrderStatus, Duration)>, ConfigError> {
		self.intervals
			.iter()
			.map(|(key, ms)| {
				let status = key
					.parse::<OrderStatus>()
					.map_err(|e| ConfigError::Validation(format!("polling.intervals: {}", e)))?;
				Ok((status, Duration::from_millis(*ms)))
			})
			.collect()
	}
}

/// Automatic transition configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TransitionsConfig {
	/// Delay overrides in minutes, keyed by `"from->to"`.
	#[serde(default)]
	pub delays: HashMap<String, u64>,
}

impl TransitionsConfig {
	/// Delay overrides with their keys parsed into status pairs.
	pub fn parsed_delays(&self) -> Result<Vec<(OrderStatus, OrderStatus, u64)>, ConfigError> {
		self.delays
			.iter()
			.map(|(key, minutes)| {
				let (from, to) = parse_transition_key(key)?;
				Ok((from, to, *minutes))
			})
			.collect()
	}
}

/// Parses a `"from->to"` transition key.
pub fn parse_transition_key(key: &str) -> Result<(OrderStatus, OrderStatus), ConfigError> {
	let (from, to) = key.split_once("->").ok_or_else(|| {
		ConfigError::Validation(format!(
			"Transition key '{}' must have the form \"from->to\"",
			key
		))
	})?;
	let parse = |name: &str| {
		name.trim()
			.parse::<OrderStatus>()
			.map_err(|e| ConfigError::Validation(format!("transitions.delays: {}", e)))
	};
	Ok((parse(from)?, parse(to)?))
}

/// Backend provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of provider implementation names to their raw configuration.
	pub implementations: HashMap<String, toml::Value>,
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut missing = None;
	let resolved = re.replace_all(input, |cap: &regex::Captures<'_>| {
		let var_name = &cap[1];
		match (std::env::var(var_name), cap.get(2)) {
			(Ok(value), _) => value,
			(Err(_), Some(default)) => default.as_str().to_string(),
			(Err(_), None) => {
				missing.get_or_insert_with(|| var_name.to_string());
				String::new()
			},
		}
	});

	match missing {
		Some(var_name) => Err(ConfigError::Validation(format!(
			"Environment variable '{}' not found",
			var_name
		))),
		None => Ok(resolved.into_owned()),
	}
}

impl Config {
	/// Loads configuration from a file.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let content = tokio::fs::read_to_string(path).await?;
		content.parse()
	}

	/// Validates the configuration.
	///
	/// Checks the tracker id and fetch timeout, every status name used as a
	/// key in `polling`, `transitions` and `labels`, and that the primary
	/// provider is one of the configured implementations.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.tracker.id.is_empty() {
			return Err(ConfigError::Validation("Tracker ID cannot be empty".into()));
		}
		if self.tracker.fetch_timeout_seconds == 0 || self.tracker.fetch_timeout_seconds > 300 {
			return Err(ConfigError::Validation(
				"tracker.fetch_timeout_seconds must be between 1 and 300".into(),
			));
		}

		if self.polling.default_interval_ms == 0 {
			return Err(ConfigError::Validation(
				"polling.default_interval_ms must be greater than 0".into(),
			));
		}
		for (status, interval) in self.polling.parsed_intervals()? {
			if status.is_terminal() {
				return Err(ConfigError::Validation(format!(
					"polling.intervals cannot set an interval for terminal status '{}'",
					status
				)));
			}
			if interval.is_zero() {
				return Err(ConfigError::Validation(format!(
					"polling.intervals.{} must be greater than 0",
					status
				)));
			}
		}

		self.transitions.parsed_delays()?;

		for key in self.labels.keys() {
			key.parse::<OrderStatus>()
				.map_err(|e| ConfigError::Validation(format!("labels: {}", e)))?;
		}

		if self.provider.primary.is_empty() {
			return Err(ConfigError::Validation(
				"Provider primary implementation cannot be empty".into(),
			));
		}
		if !self
			.provider
			.implementations
			.contains_key(&self.provider.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary provider '{}' not found in implementations",
				self.provider.primary
			)));
		}

		Ok(())
	}
}

/// Parses configuration from TOML text.
///
/// Environment variables are resolved and the configuration is validated
/// after parsing.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
