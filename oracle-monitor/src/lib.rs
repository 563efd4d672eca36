//! # Oracle Monitor
//! State-synchronisation engine behind a live price-oracle dashboard.
//!
//! It keeps a dashboard consistent with a remote oracle service that aggregates one asset's
//! price across several exchanges and a USDT/KRW conversion rate:
//! * A push channel ([`connection`]) with bounded reconnection, falling back to REST polling
//!   and probing its way back to push.
//! * Tunable aggregation [`params`] persisted locally and pushed to the oracle ([`sync`]).
//! * Per-source manual price [`overrides`].
//! * A pure [`reducer`] merging feed, parameters and overrides into a [`ViewModel`], plus a
//!   bounded [`chart`] window.
//!
//! The [`app::Dashboard`] ties everything together and publishes immutable
//! [`DashboardFrame`]s for a renderer to draw.

/// Typed REST client of the oracle service.
pub mod api;

/// Application-state object driving the dashboard.
pub mod app;

/// Bounded, aligned price-history window.
pub mod chart;

/// Monitor configuration and environment loading.
pub mod config;

/// Push channel, reconnection and polling fallback.
pub mod connection;

/// All [`Error`](std::error::Error)s generated in the monitor.
pub mod error;

pub mod overrides;

/// Aggregation parameters and their local persistence.
pub mod params;

/// Key-value storage backing persisted preferences.
pub mod persist;

pub mod reducer;

/// Debounced, retrying push of parameters to the oracle.
pub mod sync;

/// Wire and domain types shared by every module.
pub mod types;

pub use app::{Dashboard, DashboardFrame, DashboardHandle, UiCommand, launch};
pub use config::MonitorConfig;
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState, FeedTransport};
pub use error::MonitorError;
pub use reducer::ViewModel;
pub use types::{AggregationMethod, FeedBundle, SourceId, WeightCategory};
