//! Registry trait for self-registering implementations.

/// Base trait for implementation registries.
///
/// Each pluggable implementation module provides a `Registry` struct that
/// declares the name used for it in configuration files together with its
/// factory function.
pub trait ImplementationRegistry {
	/// The key under `[provider.implementations]`, e.g. `"http"` or `"memory"`.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Returns the factory that builds this implementation from its config.
	fn factory() -> Self::Factory;
}
