//! Order lifecycle and live tracking engine.
//!
//! This crate holds the tracking logic of the storefront: the time-gated
//! customer actions and status transition rules, the polling policy, the
//! per-order pollers that keep subscribers in sync with the backend, and the
//! view model that projects an order for display. The builder wires these
//! together from configuration.

pub mod builder;
pub mod clock;
pub mod engine;
pub mod lifecycle;
pub mod poller;
pub mod policy;
pub mod view;

pub use builder::{BuilderError, TrackerBuilder, TrackerFactories};
pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::TrackerEngine;
pub use lifecycle::{ScheduledTransition, TransitionError, TransitionRule, TransitionTable};
pub use poller::{PollerError, PollerHandle, PollerHealth, PollerRegistry, Subscription};
pub use policy::PollingPolicy;
pub use view::{StatusChange, StatusLabels, TrackingView, TrackingViewModel};
