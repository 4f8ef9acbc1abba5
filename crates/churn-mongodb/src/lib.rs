//! MongoDB drivers for the shard-churn load generator.
//!
//! Two engines share one backend abstraction:
//!
//! - [`ChurnDriver`] - Sequential insert/update/delete cycles over a fixed set
//!   of collections, pruning each back to its baseline population
//! - [`WorkerPool`] - Many concurrent workers updating one collection and
//!   feeding a shared [`churn_core::ThroughputCounter`]
//!
//! [`InitialLoader`] fills the churn collections to their shard-derived
//! size before a run.
//!
//! All of them talk to the server through [`ChurnBackend`]. [`MongoBackend`] is the
//! real implementation; [`testing::MemoryBackend`] runs the drivers in-process.
//!
//! # Write strategies
//!
//! Servers from 4.4 on evaluate update pipelines and `$sampleRate`, so the
//! churn driver updates and deletes with single statements. Older servers get
//! the legacy strategy: `$sample` a batch of ids, then target them explicitly.
//! The choice is made once at startup by [`WriteStrategy::select`].

pub mod args;
pub mod backend;
pub mod baseline;
pub mod capability;
pub mod churn;
pub mod error;
pub mod insert;
pub mod load;
pub mod mongo;
pub mod shard;
pub mod testing;
pub mod update;
pub mod workers;

pub use args::{ConnectionArgs, WorkersArgs};
pub use backend::{BatchWriteOptions, ChurnBackend, CommandTarget, IdUpdate, UpdateSpec};
pub use baseline::BaselineRegistry;
pub use capability::{detect_server_version, DeleteRound, WriteStrategy};
pub use churn::{ChurnConfig, ChurnDriver, ChurnSummary, CycleOutcome};
pub use error::ChurnError;
pub use load::{InitialLoader, LoadConfig, LoadSummary};
pub use mongo::MongoBackend;
pub use shard::{prepare_collections, shard_names, DataSizing, SplitPlan};
pub use workers::{WorkerMode, WorkerPool, WorkerPoolConfig, WorkerPoolSummary};
