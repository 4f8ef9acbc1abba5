//! Core types for the shard-churn load generator.
//!
//! This crate provides the foundational types shared by the document
//! generator, the backend drivers and the CLI:
//!
//! - [`CollectionConfig`] - One (document size, id mode) pair of the churn enumeration
//! - [`StopFlag`] - One-way cooperative shutdown flag
//! - [`ThroughputCounter`] - Shared operation counter with exact drain-and-reset
//! - [`WorkloadMetrics`] - Per-cycle insert/delete accounting
//! - [`ServerVersion`] - Parsed backend version and the capabilities derived from it
//!
//! # Architecture
//!
//! ```text
//! churn-core (this crate)
//!    │
//!    ├─── churn-generator  (documents and legacy mutations)
//!    │
//!    └─── churn-mongodb    (backend, churn driver, worker pool)
//! ```

pub mod config;
pub mod counter;
pub mod metrics;
pub mod stop;
pub mod version;

// Re-exports for convenience
pub use config::{CollectionConfig, IdMode, DEFAULT_DOC_SIZES, DEFAULT_ID_MODES};
pub use counter::ThroughputCounter;
pub use metrics::WorkloadMetrics;
pub use stop::StopFlag;
pub use version::{ServerVersion, VersionError};
