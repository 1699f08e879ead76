//! HTTP/JSON order status provider.
//!
//! Queries the storefront backend over HTTP. Both endpoints are addressed by
//! path templates relative to `base_url` in which `{id}` stands for the
//! order identifier.
//!
//! ## Configuration
//!
//! ```toml
//! [provider.implementations.http]
//! base_url = "https://shop.example.com/api"   # required
//! status_path = "/orders/{id}/status"         # optional
//! order_path = "/orders/{id}"                 # optional
//! auth_token = "${BACKEND_TOKEN}"             # optional, sent as bearer token
//! request_timeout_seconds = 10                # optional
//! ```

use crate::{OrderStatusProvider, ProviderError, ProviderFactory, ProviderRegistry};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracker_types::{
	truncate_id, ConfigSchema, Field, FieldType, ImplementationRegistry, Order, Schema,
	SecretString, StatusUpdate, ValidationError,
};

const DEFAULT_STATUS_PATH: &str = "/orders/{id}/status";
const DEFAULT_ORDER_PATH: &str = "/orders/{id}";
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 10;

/// Provider backed by the storefront HTTP API.
pub struct HttpOrderProvider {
	client: reqwest::Client,
	base_url: Url,
	status_path: String,
	order_path: String,
	auth_token: Option<SecretString>,
	request_timeout: Duration,
}

impl HttpOrderProvider {
	pub fn new(
		base_url: &str,
		status_path: String,
		order_path: String,
		auth_token: Option<SecretString>,
		request_timeout: Duration,
	) -> Result<Self, ProviderError> {
		let base_url = Url::parse(base_url)
			.map_err(|e| ProviderError::Configuration(format!("Invalid base_url: {}", e)))?;
		if base_url.cannot_be_a_base() {
			return Err(ProviderError::Configuration(format!(
				"base_url '{}' cannot be used as a base",
				base_url
			)));
		}

		let client = reqwest::Client::builder()
			.timeout(request_timeout)
			.build()
			.map_err(|e| ProviderError::Configuration(format!("HTTP client error: {}", e)))?;

		Ok(Self {
			client,
			base_url,
			status_path,
			order_path,
			auth_token,
			request_timeout,
		})
	}

	/// Expands a path template for one order.
	///
	/// Each template segment is appended separately so that the order id is
	/// percent-encoded as a single path segment.
	fn url_for(&self, template: &str, order_id: &str) -> Url {
		let mut url = self.base_url.clone();
		if let Ok(mut segments) = url.path_segments_mut() {
			segments.pop_if_empty();
			for segment in template.split('/').filter(|s| !s.is_empty()) {
				if segment == "{id}" {
					segments.push(order_id);
				} else {
					segments.push(segment);
				}
			}
		}
		url
	}

	async fn get_json<T: DeserializeOwned>(
		&self,
		url: Url,
		order_id: &str,
	) -> Result<T, ProviderError> {
		let mut request = self.client.get(url);
		if let Some(token) = &self.auth_token {
			request = request.bearer_auth(token.expose_secret());
		}

		let response = request.send().await.map_err(|e| {
			if e.is_timeout() {
				ProviderError::Timeout(self.request_timeout)
			} else {
				ProviderError::Network(e.to_string())
			}
		})?;

		let status = response.status();
		if status == StatusCode::NOT_FOUND {
			return Err(ProviderError::NotFound(order_id.to_string()));
		}
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			let message: String = body.chars().take(200).collect();
			tracing::warn!(
				order_id = %truncate_id(order_id),
				status = status.as_u16(),
				"Backend returned an error status"
			);
			return Err(ProviderError::Http {
				status: status.as_u16(),
				message,
			});
		}

		response
			.json::<T>()
			.await
			.map_err(|e| ProviderError::Decode(e.to_string()))
	}
}

#[async_trait]
impl OrderStatusProvider for HttpOrderProvider {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(HttpProviderSchema)
	}

	async fn fetch_order_status(&self, order_id: &str) -> Result<StatusUpdate, ProviderError> {
		let url = self.url_for(&self.status_path, order_id);
		self.get_json(url, order_id).await
	}

	async fn fetch_order(&self, order_id: &str) -> Result<Order, ProviderError> {
		let url = self.url_for(&self.order_path, order_id);
		self.get_json(url, order_id).await
	}
}

fn validate_path_template(value: &toml::Value) -> Result<(), String> {
	match value.as_str() {
		Some(path) if path.contains("{id}") => Ok(()),
		Some(_) => Err("path template must contain {id}".to_string()),
		None => Err("Expected string value".to_string()),
	}
}

/// Configuration schema for the HTTP provider.
pub struct HttpProviderSchema;

impl ConfigSchema for HttpProviderSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![
				Field::new("base_url", FieldType::String).with_validator(|value| {
					match value.as_str() {
						Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
							Ok(())
						},
						Some(_) => Err("base_url must start with http:// or https://".to_string()),
						None => Err("Expected string value for base_url".to_string()),
					}
				}),
			],
			vec![
				Field::new("status_path", FieldType::String).with_validator(validate_path_template),
				Field::new("order_path", FieldType::String).with_validator(validate_path_template),
				Field::new("auth_token", FieldType::String),
				Field::new(
					"request_timeout_seconds",
					FieldType::Integer {
						min: Some(1),
						max: Some(300),
					},
				),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create an HTTP provider from configuration.
pub fn create_provider(
	config: &toml::Value,
) -> Result<Box<dyn OrderStatusProvider>, ProviderError> {
	HttpProviderSchema
		.validate(config)
		.map_err(|e| ProviderError::Configuration(e.to_string()))?;

	let text = |key: &str| config.get(key).and_then(|v| v.as_str());

	let base_url = text("base_url")
		.ok_or_else(|| ProviderError::Configuration("base_url is required".to_string()))?;
	let status_path = text("status_path").unwrap_or(DEFAULT_STATUS_PATH).to_string();
	let order_path = text("order_path").unwrap_or(DEFAULT_ORDER_PATH).to_string();
	let auth_token = text("auth_token")
		.filter(|token| !token.is_empty())
		.map(SecretString::from);
	let request_timeout = Duration::from_secs(
		config
			.get("request_timeout_seconds")
			.and_then(|v| v.as_integer())
			.map_or(DEFAULT_REQUEST_TIMEOUT_SECONDS, |secs| secs as u64),
	);

	let provider =
		HttpOrderProvider::new(base_url, status_path, order_path, auth_token, request_timeout)?;
	Ok(Box::new(provider))
}

/// Registry for the HTTP provider implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "http";
	type Factory = ProviderFactory;

	fn factory() -> Self::Factory {
		create_provider
	}
}

impl ProviderRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::{
		extract::Path,
		http::{HeaderMap, StatusCode as AxumStatus},
		response::IntoResponse,
		routing::get,
		Json, Router,
	};
	use tracker_types::OrderStatus;

	fn http_provider(base_url: &str, token: Option<&str>) -> HttpOrderProvider {
		HttpOrderProvider::new(
			base_url,
			DEFAULT_STATUS_PATH.to_string(),
			DEFAULT_ORDER_PATH.to_string(),
			token.map(SecretString::from),
			Duration::from_secs(5),
		)
		.unwrap()
	}

	async fn status_handler(Path(id): Path<String>, headers: HeaderMap) -> impl IntoResponse {
		let authorized = headers
			.get("authorization")
			.and_then(|v| v.to_str().ok())
			.is_some_and(|v| v == "Bearer secret");
		match id.as_str() {
			_ if !authorized => AxumStatus::UNAUTHORIZED.into_response(),
			"A-1" => Json(serde_json::json!({
				"status": "out_for_delivery",
				"progress": 85,
				"lastUpdatedBy": "courier:bob",
				"timeline": [{"status": "pending", "at": "2024-05-01T12:00:00Z"}]
			}))
			.into_response(),
			"garbled" => "not json".into_response(),
			_ => AxumStatus::NOT_FOUND.into_response(),
		}
	}

	async fn order_handler(Path(id): Path<String>) -> impl IntoResponse {
		Json(serde_json::json!({
			"id": id,
			"status": "pending",
			"createdAt": "2024-05-01T12:00:00Z",
			"canEditUntil": "2024-05-01T12:05:00Z",
			"deliveryMethod": "pickup"
		}))
	}

	async fn spawn_backend() -> String {
		let app = Router::new()
			.route("/api/orders/{id}/status", get(status_handler))
			.route("/api/orders/{id}", get(order_handler));
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			axum::serve(listener, app).await.unwrap();
		});
		format!("http://{}/api", addr)
	}

	#[test]
	fn test_url_templates_encode_order_id() {
		let provider = http_provider("http://localhost:3000/api/", None);
		assert_eq!(
			provider.url_for(DEFAULT_STATUS_PATH, "A-1").as_str(),
			"http://localhost:3000/api/orders/A-1/status"
		);
		assert_eq!(
			provider.url_for(DEFAULT_ORDER_PATH, "a/b c").as_str(),
			"http://localhost:3000/api/orders/a%2Fb%20c"
		);
	}

	#[tokio::test]
	async fn test_fetch_status_and_order() {
		let base = spawn_backend().await;
		let provider = http_provider(&base, Some("secret"));

		let update = provider.fetch_order_status("A-1").await.unwrap();
		assert_eq!(update.status, OrderStatus::OutForDelivery);
		assert_eq!(update.progress, Some(85));
		assert_eq!(update.timeline.len(), 1);

		let order = provider.fetch_order("A-9").await.unwrap();
		assert_eq!(order.id, "A-9");
		assert!(order.can_edit_until.is_some());
	}

	#[tokio::test]
	async fn test_error_mapping() {
		let base = spawn_backend().await;

		let provider = http_provider(&base, Some("secret"));
		assert!(matches!(
			provider.fetch_order_status("missing").await,
			Err(ProviderError::NotFound(id)) if id == "missing"
		));
		assert!(matches!(
			provider.fetch_order_status("garbled").await,
			Err(ProviderError::Decode(_))
		));

		let anonymous = http_provider(&base, None);
		assert!(matches!(
			anonymous.fetch_order_status("A-1").await,
			Err(ProviderError::Http { status: 401, .. })
		));
	}

	#[test]
	fn test_factory_validates_config() {
		let config: toml::Value = toml::from_str("base_url = \"localhost\"").unwrap();
		assert!(matches!(
			create_provider(&config),
			Err(ProviderError::Configuration(_))
		));

		let config: toml::Value =
			toml::from_str("base_url = \"http://localhost\"\nstatus_path = \"/status\"").unwrap();
		assert!(create_provider(&config).is_err());

		let config: toml::Value =
			toml::from_str("base_url = \"http://localhost\"\nauth_token = \"t\"").unwrap();
		assert!(create_provider(&config).is_ok());
	}
}
