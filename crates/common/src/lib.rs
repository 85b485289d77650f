//! Shared configuration, error types, IDs, and metrics for bsj crates.
//!
//! Architecture role:
//! - defines the join pipeline configuration passed across layers
//! - provides the common [`BsjError`] / [`Result`] contracts
//! - hosts the prometheus metrics registry
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;

pub use config::{JoinConfig, JoinMode, OversizedGroupPolicy};
pub use error::{BsjError, ErrorKind, PartitionFailure, Result};
pub use ids::*;
pub use metrics::{global_metrics, MetricsRegistry};
