//! Massively parallel throughput load against a single collection.

use crate::backend::{BatchWriteOptions, ChurnBackend, IdUpdate, UpdateSpec};
use crate::error::ChurnError;
use crate::update::touch_update;
use bson::doc;
use churn_core::{StopFlag, ThroughputCounter};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Update strategy shared by every worker.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// One broadcast update matching a random fraction of the collection.
    SampleRate,
    /// Sample ids, then one unordered update-by-id batch.
    Bulk,
}

impl std::fmt::Display for WorkerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerMode::SampleRate => write!(f, "sample-rate"),
            WorkerMode::Bulk => write!(f, "bulk"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub mode: WorkerMode,
    pub collection: String,
    pub sample_rate: f64,
    pub bulk_size: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 100,
            mode: WorkerMode::SampleRate,
            collection: "churn".to_string(),
            sample_rate: 0.001,
            bulk_size: 1000,
        }
    }
}

impl WorkerPoolConfig {
    pub fn validate(&self) -> Result<(), ChurnError> {
        if self.workers == 0 {
            return Err(ChurnError::Config("at least one worker is required".to_string()));
        }
        if self.collection.is_empty() {
            return Err(ChurnError::Config("collection name is empty".to_string()));
        }
        if !(self.sample_rate > 0.0 && self.sample_rate <= 1.0) {
            return Err(ChurnError::Config(format!(
                "sample rate must be in (0, 1], got {}",
                self.sample_rate
            )));
        }
        if self.bulk_size == 0 {
            return Err(ChurnError::Config("bulk size must be positive".to_string()));
        }
        Ok(())
    }
}

/// Totals after every worker has exited.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerPoolSummary {
    pub modified: u64,
    pub elapsed: Duration,
}

impl WorkerPoolSummary {
    pub fn ops_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.modified as f64 / secs
        } else {
            0.0
        }
    }
}

/// Pool of identical workers feeding one [`ThroughputCounter`].
pub struct WorkerPool<B> {
    backend: Arc<B>,
    config: WorkerPoolConfig,
    counter: ThroughputCounter,
    stop: StopFlag,
    process_id: u32,
}

impl<B: ChurnBackend + 'static> WorkerPool<B> {
    pub fn new(
        backend: Arc<B>,
        config: WorkerPoolConfig,
        counter: ThroughputCounter,
        stop: StopFlag,
    ) -> Self {
        Self {
            backend,
            config,
            counter,
            stop,
            process_id: std::process::id(),
        }
    }

    /// Run every worker until a stop is requested, then wait for each to
    /// finish its current iteration.
    pub async fn run(self) -> Result<WorkerPoolSummary, ChurnError> {
        self.config.validate()?;
        info!(
            "Starting {} workers in {} mode against {}",
            self.config.workers, self.config.mode, self.config.collection
        );

        let start = Instant::now();
        let mut workers = JoinSet::new();
        for _ in 0..self.config.workers {
            let worker = Worker {
                backend: self.backend.clone(),
                mode: self.config.mode,
                collection: self.config.collection.clone(),
                sample_rate: self.config.sample_rate,
                bulk_size: self.config.bulk_size,
                process_id: self.process_id,
                counter: self.counter.clone(),
                stop: self.stop.clone(),
            };
            workers.spawn(worker.run());
        }

        let mut modified = 0;
        while let Some(result) = workers.join_next().await {
            match result {
                Ok(count) => modified += count,
                Err(e) => warn!("Worker task failed: {}", e),
            }
        }

        let summary = WorkerPoolSummary {
            modified,
            elapsed: start.elapsed(),
        };
        info!(
            "Workers stopped: {} documents modified in {:.2} secs ({:.1} ops/sec)",
            summary.modified,
            summary.elapsed.as_secs_f64(),
            summary.ops_per_second()
        );
        Ok(summary)
    }
}

struct Worker<B> {
    backend: Arc<B>,
    mode: WorkerMode,
    collection: String,
    sample_rate: f64,
    bulk_size: u64,
    process_id: u32,
    counter: ThroughputCounter,
    stop: StopFlag,
}

impl<B: ChurnBackend> Worker<B> {
    /// Loop until stopped. Returns the documents this worker modified.
    async fn run(self) -> u64 {
        let mut modified = 0;

        while !self.stop.is_requested() {
            match self.iteration().await {
                Ok(n) => {
                    self.counter.add(n);
                    modified += n;
                }
                // Dropped silently; failures are expected noise here
                Err(_) => tokio::task::yield_now().await,
            }
        }

        modified
    }

    async fn iteration(&self) -> Result<u64, ChurnError> {
        let touch = touch_update(self.process_id);
        match self.mode {
            WorkerMode::SampleRate => {
                self.backend
                    .update_matching(
                        &self.collection,
                        doc! { "$sampleRate": self.sample_rate },
                        UpdateSpec::Document(touch),
                    )
                    .await
            }
            WorkerMode::Bulk => {
                let ids = self
                    .backend
                    .sample_ids(&self.collection, self.bulk_size)
                    .await?;
                if ids.is_empty() {
                    return Ok(0);
                }
                let updates = ids
                    .into_iter()
                    .map(|id| IdUpdate {
                        id,
                        update: touch.clone(),
                    })
                    .collect();
                self.backend
                    .update_by_ids(&self.collection, updates, BatchWriteOptions::unordered())
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryBackend, OpKind};

    fn config(mode: WorkerMode) -> WorkerPoolConfig {
        WorkerPoolConfig {
            workers: 8,
            mode,
            collection: "churn".to_string(),
            sample_rate: 0.5,
            bulk_size: 10,
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(WorkerPoolConfig::default().validate().is_ok());

        let mut invalid = WorkerPoolConfig::default();
        invalid.workers = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = WorkerPoolConfig::default();
        invalid.sample_rate = 1.5;
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_ops_per_second() {
        let summary = WorkerPoolSummary {
            modified: 500,
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(summary.ops_per_second(), 250.0);

        let empty = WorkerPoolSummary {
            modified: 0,
            elapsed: Duration::ZERO,
        };
        assert_eq!(empty.ops_per_second(), 0.0);
    }

    #[tokio::test]
    async fn test_bulk_workers_feed_counter() {
        let backend = Arc::new(MemoryBackend::new("6.0.0"));
        backend.seed_collection("churn", 100);
        let counter = ThroughputCounter::new();
        let stop = StopFlag::new();
        backend.trip_stop_on(OpKind::UpdateByIds, stop.clone());

        let pool = WorkerPool::new(backend.clone(), config(WorkerMode::Bulk), counter.clone(), stop);
        let summary = pool.run().await.unwrap();

        assert!(summary.modified >= 10);
        assert_eq!(counter.peek(), summary.modified);
        assert_eq!(backend.last_batch_options(), Some(BatchWriteOptions::unordered()));
        assert!(!backend.op_kinds().contains(&OpKind::UpdateMatching));
    }

    #[tokio::test]
    async fn test_sample_rate_workers_use_broadcast_update() {
        let backend = Arc::new(MemoryBackend::new("6.0.0"));
        backend.seed_collection("churn", 100);
        let counter = ThroughputCounter::new();
        let stop = StopFlag::new();
        backend.trip_stop_on(OpKind::UpdateMatching, stop.clone());

        let pool =
            WorkerPool::new(backend.clone(), config(WorkerMode::SampleRate), counter.clone(), stop);
        let summary = pool.run().await.unwrap();

        assert_eq!(counter.peek(), summary.modified);
        let kinds = backend.op_kinds();
        assert!(kinds.iter().all(|k| *k == OpKind::UpdateMatching));

        let touched = backend
            .documents("churn")
            .iter()
            .filter(|d| d.contains_key("touchedByProcess"))
            .count() as u64;
        assert!(touched <= summary.modified);
    }

    #[tokio::test]
    async fn test_failures_are_silent_and_retried() {
        let backend = Arc::new(MemoryBackend::new("6.0.0"));
        backend.seed_collection("churn", 50);
        backend.fail_next(OpKind::SampleIds, 20);
        let counter = ThroughputCounter::new();
        let stop = StopFlag::new();
        backend.trip_stop_on(OpKind::UpdateByIds, stop.clone());

        let pool = WorkerPool::new(backend.clone(), config(WorkerMode::Bulk), counter.clone(), stop);
        let summary = pool.run().await.unwrap();

        assert!(summary.modified > 0);
        assert_eq!(counter.peek(), summary.modified);
    }

    #[tokio::test]
    async fn test_invalid_config_spawns_nothing() {
        let backend = Arc::new(MemoryBackend::new("6.0.0"));
        let mut cfg = config(WorkerMode::Bulk);
        cfg.bulk_size = 0;

        let pool = WorkerPool::new(backend.clone(), cfg, ThroughputCounter::new(), StopFlag::new());
        assert!(pool.run().await.is_err());
        assert!(backend.op_kinds().is_empty());
    }
}
