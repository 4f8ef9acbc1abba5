//! shard-churn
//!
//! Synthetic load for sharded MongoDB clusters. Two engines:
//!
//! - `churn`: cycles over collections of 500, 1000 and 2000 byte documents,
//!   each with custom random or server-assigned ids, inserting a batch,
//!   mutating a random sample and deleting back down to the starting count
//! - `workers`: many concurrent workers hammering one collection with either
//!   broadcast `$sampleRate` updates or sampled bulk updates, reporting ops/sec
//!
//! `prepare` creates and shards the churn collections ahead of a run, and
//! `load` fills them to their shard-derived size.
//!
//! # CLI Usage
//!
//! ```bash
//! # Churn until SIGUSR2
//! shard-churn churn --uri mongodb://mongos:27017 --database test
//!
//! # 200 bulk-mode workers, reporting every 5 seconds
//! shard-churn workers --workers 200 --mode bulk --report-interval 5s
//! ```
//!
//! The drivers live in the `churn-mongodb` crate; this crate carries the
//! process plumbing shared by the subcommands.

pub mod config;
pub mod reporter;
pub mod shutdown;

pub use config::{parse_duration, parse_interval};
pub use reporter::{ReporterHandle, ThroughputReporter};
pub use shutdown::install_stop_handler;
