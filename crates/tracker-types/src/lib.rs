//! Common types module for the order tracking system.
//!
//! This module defines the core data types shared by every tracker crate:
//! the read-only order projection, the canonical status enumeration, status
//! snapshots returned by the backend, and the configuration validation
//! primitives used by pluggable implementations.

/// Actors that may trigger status transitions, and callers requesting them.
pub mod actor;
/// Order projection, status enumeration and snapshot types.
pub mod order;
/// Registry trait for self-registering implementations.
pub mod registry;
/// Redacted string type for tokens and other secrets.
pub mod secret_string;
/// Utility functions for display formatting.
pub mod utils;
/// Configuration validation types for implementation-specific settings.
pub mod validation;

pub use actor::{Actor, Caller};
pub use order::{
	DeliveryMethod, Order, OrderSnapshot, OrderStatus, StatusUpdate, TimelineEntry,
	TERMINAL_STATUSES, TRANSIENT_STATUSES,
};
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use utils::truncate_id;
pub use validation::{ConfigSchema, Field, FieldType, Schema, ValidationError};
