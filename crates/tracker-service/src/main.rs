//! Main entry point for the order tracking service.
//!
//! Loads the configuration, builds the tracking engine and watches the order
//! ids given on the command line, logging every projected view until each
//! order reaches a terminal status or the process is interrupted.

use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tracker_config::Config;
use tracker_core::{
	PollerHandle, Subscription, TrackerBuilder, TrackerEngine, TrackerFactories, TrackingView,
};
use tracker_provider::implementations::http::create_provider as create_http_provider;
use tracker_provider::implementations::memory::create_provider as create_memory_provider;
use tracker_types::{truncate_id, OrderSnapshot};

/// Command-line arguments for the tracking service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,

	/// Order ids to track
	#[arg(required = true)]
	orders: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let default_directive = args.log_level.to_string();
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started tracker");

	let config = Config::from_file(&args.config.to_string_lossy()).await?;
	tracing::info!("Loaded configuration [{}]", config.tracker.id);

	let engine = build_tracker(config)?;

	let (done_tx, mut done_rx) = mpsc::unbounded_channel();
	let mut watches = start_watching(&engine, &args.orders, &done_tx).await;
	drop(done_tx);

	let shutdown = tokio::signal::ctrl_c();
	tokio::pin!(shutdown);

	while !watches.is_empty() {
		tokio::select! {
			_ = &mut shutdown => {
				tracing::info!(remaining = watches.len(), "Interrupted");
				break;
			}
			Some(order_id) = done_rx.recv() => {
				if let Some(watch) = watches.remove(&order_id) {
					watch.subscription.unsubscribe();
					tracing::info!(
						order_id = %truncate_id(&order_id),
						remaining = watches.len(),
						"Order reached a terminal status"
					);
				}
			}
		}
	}

	tracing::info!("Stopped tracker");
	Ok(())
}

/// Macro to create a factory HashMap with the appropriate type aliases
macro_rules! create_factory_map {
    ($interface:path, $error:path, $( $name:literal => $factory:expr ),* $(,)?) => {{
        let mut factories = std::collections::HashMap::new();
        $(
            factories.insert(
                $name.to_string(),
                $factory as fn(&toml::Value) -> Result<Box<dyn $interface>, $error>
            );
        )*
        factories
    }};
}

/// Builds the tracking engine with every shipped provider implementation.
fn build_tracker(config: Config) -> Result<TrackerEngine, Box<dyn std::error::Error>> {
	let builder = TrackerBuilder::new(config);

	let provider_factories = create_factory_map!(
		tracker_provider::OrderStatusProvider,
		tracker_provider::ProviderError,
		"http" => create_http_provider,
		"memory" => create_memory_provider,
	);

	Ok(builder.build(TrackerFactories { provider_factories })?)
}

/// A tracked order. Dropping it stops the updates.
struct OrderWatch {
	subscription: Subscription,
	_handle: PollerHandle,
}

/// Fetches each order, logs its current view and subscribes to the
/// non-terminal ones.
///
/// The id of an order is sent on `done` once its view turns terminal.
/// Orders that cannot be fetched are logged and skipped.
async fn start_watching(
	engine: &TrackerEngine,
	order_ids: &[String],
	done: &mpsc::UnboundedSender<String>,
) -> HashMap<String, OrderWatch> {
	let mut watches = HashMap::new();

	for order_id in order_ids {
		if watches.contains_key(order_id) {
			continue;
		}
		let order = match engine.provider().fetch_order(order_id).await {
			Ok(order) => order,
			Err(e) => {
				tracing::error!(
					order_id = %truncate_id(order_id),
					error = %e,
					"Failed to load order, skipping"
				);
				continue;
			},
		};

		let mut view_model = engine.view_model();
		let (view, _) = view_model.apply(&order, None, engine.clock().now());
		log_view(&view, false);
		if view.is_terminal {
			tracing::info!(order_id = %truncate_id(order_id), "Order already terminal");
			continue;
		}

		let handle = engine.poller_for(&order);
		let view_model = Mutex::new(view_model);
		let clock = engine.clock();
		let done = done.clone();
		let subscription = handle.subscribe(move |snapshot: &OrderSnapshot, changed: bool| {
			let (view, change) = view_model
				.lock()
				.unwrap_or_else(PoisonError::into_inner)
				.apply(&order, Some(snapshot), clock.now());
			if let Some(change) = change {
				tracing::info!(
					order_id = %truncate_id(&view.order_id),
					from = %change.from,
					to = %change.to,
					"Status changed"
				);
			}
			log_view(&view, changed);
			if view.is_terminal {
				let _ = done.send(view.order_id.clone());
			}
		});

		watches.insert(
			order_id.clone(),
			OrderWatch {
				subscription,
				_handle: handle,
			},
		);
	}

	watches
}

fn log_view(view: &TrackingView, changed: bool) {
	tracing::info!(
		order_id = %truncate_id(&view.order_id),
		status = %view.status_label,
		progress = view.progress_percent,
		remaining_seconds = view.time_remaining_seconds,
		can_edit = view.can_edit_now,
		can_cancel = view.can_cancel_now,
		late = view.is_late,
		changed,
		"Tracking view"
	);
	match serde_json::to_string(view) {
		Ok(json) => tracing::debug!(view = %json, "Tracking view detail"),
		Err(e) => tracing::warn!(error = %e, "Failed to serialize tracking view"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::{Duration, Utc};
	use tempfile::tempdir;

	fn write_orders(dir: &std::path::Path) -> PathBuf {
		let created = Utc::now() - Duration::minutes(2);
		let orders = serde_json::json!([
			{
				"id": "ORD-PENDING",
				"status": "pending",
				"createdAt": created,
				"canCancelUntil": created + Duration::minutes(10),
				"canEditUntil": created + Duration::minutes(5),
				"estimatedMinutes": 30,
				"deliveryMethod": "pickup"
			},
			{
				"id": "ORD-DONE",
				"status": "delivered",
				"createdAt": created,
				"deliveryMethod": "delivery"
			}
		]);
		let path = dir.join("orders.json");
		std::fs::write(&path, orders.to_string()).unwrap();
		path
	}

	fn config_for(orders_file: &std::path::Path) -> Config {
		format!(
			r#"
[tracker]
id = "service-test"

[provider]
primary = "memory"
[provider.implementations.memory]
orders_file = "{}"
"#,
			orders_file.display()
		)
		.parse()
		.unwrap()
	}

	#[tokio::test]
	async fn test_config_file_builds_engine() {
		let dir = tempdir().unwrap();
		let orders_file = write_orders(dir.path());
		let config_path = dir.path().join("config.toml");
		std::fs::write(
			&config_path,
			format!(
				r#"
[tracker]
id = "file-test"

[polling.intervals]
preparing = 5000

[provider]
primary = "memory"
[provider.implementations.memory]
orders_file = "{}"
"#,
				orders_file.display()
			),
		)
		.unwrap();

		let config = Config::from_file(config_path.to_str().unwrap())
			.await
			.unwrap();
		let engine = build_tracker(config).unwrap();
		assert_eq!(engine.config().tracker.id, "file-test");
		assert!(engine.registry().is_empty());
		assert!(engine.provider().fetch_order("ORD-DONE").await.is_ok());
	}

	#[tokio::test]
	async fn test_watches_only_live_orders() {
		let dir = tempdir().unwrap();
		let engine = build_tracker(config_for(&write_orders(dir.path()))).unwrap();
		let (done_tx, _done_rx) = mpsc::unbounded_channel();

		let ids = vec![
			"ORD-PENDING".to_string(),
			"ORD-DONE".to_string(),
			"ORD-MISSING".to_string(),
			"ORD-PENDING".to_string(),
		];
		let watches = start_watching(&engine, &ids, &done_tx).await;

		assert_eq!(watches.len(), 1);
		let watch = &watches["ORD-PENDING"];
		assert!(watch.subscription.is_active());
		assert!(watch._handle.is_polling());
		assert!(engine.registry().contains("ORD-PENDING"));
		assert!(!engine.registry().contains("ORD-DONE"));

		drop(watches);
		assert!(engine.registry().is_empty());
	}
}
