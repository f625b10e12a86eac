//! Workload launcher process
//!
//! Loads [`LauncherConfig`] from the environment, initialises telemetry and
//! wires a [`Launcher`]: one launch pipeline shared by a default and a
//! high-priority [`LaunchQueue`](workload_engine::LaunchQueue) per dataplane
//! group, gated by the worker pool controller. Launches go to the execution
//! substrate over HTTP and flags are read from the database.

pub mod config;
pub mod launcher;
pub mod substrate;
pub mod telemetry;

pub use config::{ConfigError, LauncherConfig};
pub use launcher::{Launcher, LauncherDeps};
pub use substrate::HttpSubstrate;
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
