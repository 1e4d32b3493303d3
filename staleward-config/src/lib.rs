//! Configuration for Staleward jobs.
//!
//! Values come from a `.env` file, an optional `staleward.toml`, and the
//! process environment, in increasing precedence. [`ConfigLoader`] composes
//! them into a [`Config`] and runs the guard rails, which reject settings a
//! job cannot run with and collect warnings for the rest.

pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{
    ConfigLoad, ConfigLoader, ConfigLoaderOptions, error::ConfigLoadError,
};
pub use models::{
    BusConfig, Config, ConfigMetadata, DatabaseConfig, DeltaDurations,
    JobsConfig, MetricsConfig, StalenessConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
