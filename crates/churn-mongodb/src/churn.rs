//! Cyclic multi-collection churn driver.
//!
//! Each cycle visits one collection configuration and runs three phases:
//!
//! ```text
//! INSERT ──► UPDATE ──► DELETE (rounds until back at baseline) ──► next collection
//!    ▲                                                                  │
//!    └──────────────────── wrap after the last configuration ◄──────────┘
//! ```
//!
//! The stop flag is polled at the start of every cycle and every delete round,
//! so a phase that has started always runs to completion.

use crate::backend::ChurnBackend;
use crate::baseline::BaselineRegistry;
use crate::capability::{detect_server_version, DeleteRound, WriteStrategy};
use crate::error::ChurnError;
use crate::insert::batch_to_documents;
use crate::shard::{shard_names, DataSizing};
use churn_core::{CollectionConfig, StopFlag, WorkloadMetrics};
use churn_generator::{DocumentGenerator, MutationGenerator, DEFAULT_BATCH_SIZE};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Tuning constants for the churn driver.
#[derive(Debug, Clone, PartialEq)]
pub struct ChurnConfig {
    /// Collection configurations, visited in order.
    pub collections: Vec<CollectionConfig>,
    /// Documents inserted per cycle.
    pub batch_size: usize,
    /// `$sampleRate` of the pipeline update statement.
    pub update_sample_rate: f64,
    /// `$sampleRate` of each pipeline delete round.
    pub delete_sample_rate: f64,
    /// Ids fetched per legacy update or delete round.
    pub legacy_sample_size: u64,
    /// Pause after an abandoned insert or update phase.
    pub cooldown: Duration,
}

impl Default for ChurnConfig {
    fn default() -> Self {
        Self {
            collections: CollectionConfig::default_set(),
            batch_size: DEFAULT_BATCH_SIZE,
            update_sample_rate: 0.001,
            delete_sample_rate: 0.0001,
            legacy_sample_size: DEFAULT_BATCH_SIZE as u64,
            cooldown: Duration::from_secs(3),
        }
    }
}

impl ChurnConfig {
    pub fn validate(&self) -> Result<(), ChurnError> {
        if self.collections.is_empty() {
            return Err(ChurnError::Config("no collections configured".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ChurnError::Config("batch size must be positive".to_string()));
        }
        for (name, rate) in [
            ("update sample rate", self.update_sample_rate),
            ("delete sample rate", self.delete_sample_rate),
        ] {
            if !(rate > 0.0 && rate <= 1.0) {
                return Err(ChurnError::Config(format!(
                    "{name} must be in (0, 1], got {rate}"
                )));
            }
        }
        if self.legacy_sample_size == 0 {
            return Err(ChurnError::Config(
                "legacy sample size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// How a single collection cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed(WorkloadMetrics),
    /// The baseline read or the insert failed; the cycle was skipped.
    Abandoned,
}

/// Totals over a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChurnSummary {
    pub cycles_completed: u64,
    pub cycles_abandoned: u64,
    pub inserted: u64,
    pub deleted: u64,
}

/// Sequential churn driver over a fixed set of collections.
pub struct ChurnDriver<B> {
    backend: Arc<B>,
    config: ChurnConfig,
    strategy: WriteStrategy,
    baselines: BaselineRegistry,
    documents: DocumentGenerator,
    mutations: MutationGenerator,
    stop: StopFlag,
}

impl<B: ChurnBackend> ChurnDriver<B> {
    /// Run the startup checks and pick the write strategy.
    ///
    /// Fails on an unreachable backend, a failed shard listing, zero shards or
    /// an unparseable server version. Callers treat every error as fatal.
    pub async fn initialize(
        backend: Arc<B>,
        config: ChurnConfig,
        stop: StopFlag,
    ) -> Result<Self, ChurnError> {
        config.validate()?;

        let shards = shard_names(backend.as_ref()).await?;
        let sizing = DataSizing::new(shards.len(), config.collections.len())?;
        info!(
            "{} shards, {} bytes total, {} bytes per collection",
            sizing.shard_count, sizing.total_bytes, sizing.collection_bytes
        );
        for collection in &config.collections {
            debug!(
                "{}: target size {} documents",
                collection,
                sizing.target_docs(collection.doc_size)
            );
        }

        let version = detect_server_version(backend.as_ref()).await?;
        let mutations = MutationGenerator::from_entropy();
        let strategy = WriteStrategy::select(
            &version,
            config.update_sample_rate,
            config.delete_sample_rate,
            config.legacy_sample_size,
            mutations.process_id(),
        );
        info!("Using {} write strategy", strategy.name());

        Ok(Self {
            backend,
            config,
            strategy,
            baselines: BaselineRegistry::new(),
            documents: DocumentGenerator::from_entropy(),
            mutations,
            stop,
        })
    }

    /// Build a driver with an explicit strategy, skipping the shard and
    /// version checks. The configuration is still validated.
    pub fn with_strategy(
        backend: Arc<B>,
        config: ChurnConfig,
        strategy: WriteStrategy,
        stop: StopFlag,
    ) -> Result<Self, ChurnError> {
        config.validate()?;

        Ok(Self {
            backend,
            config,
            strategy,
            baselines: BaselineRegistry::new(),
            documents: DocumentGenerator::from_entropy(),
            mutations: MutationGenerator::from_entropy(),
            stop,
        })
    }

    /// Reseed the document and mutation generators.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.documents = DocumentGenerator::new(seed);
        self.mutations = MutationGenerator::new(seed, self.mutations.process_id());
        self
    }

    pub fn strategy(&self) -> &WriteStrategy {
        &self.strategy
    }

    pub fn baselines(&self) -> &BaselineRegistry {
        &self.baselines
    }

    /// Cycle through the collections until a stop is requested.
    pub async fn run(&mut self) -> ChurnSummary {
        let mut summary = ChurnSummary::default();
        let mut next = 0;

        while !self.stop.is_requested() {
            let Some(collection) = self.config.collections.get(next).copied() else {
                break;
            };
            next = (next + 1) % self.config.collections.len();

            match self.run_cycle(&collection).await {
                CycleOutcome::Completed(metrics) => {
                    summary.cycles_completed += 1;
                    summary.inserted += metrics.plain_inserts;
                    summary.deleted += metrics.plain_deletes;
                }
                CycleOutcome::Abandoned => summary.cycles_abandoned += 1,
            }
        }

        info!("Stop requested, exiting main loop.");
        summary
    }

    /// Run INSERT, UPDATE and DELETE against one collection.
    pub async fn run_cycle(&mut self, collection: &CollectionConfig) -> CycleOutcome {
        let name = collection.collection_name();
        let start = Instant::now();
        let mut metrics = WorkloadMetrics::default();

        let backend = &self.backend;
        let baseline = match self
            .baselines
            .get_or_init(&name, || backend.estimated_count(&name))
            .await
        {
            Ok(baseline) => baseline,
            Err(e) => {
                warn!("{}: Failed to estimate document count: {}", name, e);
                return CycleOutcome::Abandoned;
            }
        };

        let batch = self.documents.batch(collection, self.config.batch_size);
        info!("{}: Inserting {} documents …", name, batch.len());
        match self
            .backend
            .insert_unordered(&name, batch_to_documents(batch))
            .await
        {
            Ok(inserted) => metrics.plain_inserts = inserted,
            Err(e) => {
                warn!("{}: Failed to insert: {}", name, e);
                self.cool_down().await;
                return CycleOutcome::Abandoned;
            }
        }

        match self
            .strategy
            .update_phase(self.backend.as_ref(), &name, &mut self.mutations)
            .await
        {
            Ok(modified) => debug!("{}: {} documents modified", name, modified),
            Err(e) => {
                warn!("{}: Failed to update: {}", name, e);
                self.cool_down().await;
            }
        }

        metrics.plain_deletes = self.delete_to_baseline(&name, baseline).await;
        metrics.elapsed = start.elapsed();

        info!(
            "{}: Writes sent over {:.2} secs: {}",
            name,
            metrics.elapsed_secs(),
            metrics.writes_json()
        );
        CycleOutcome::Completed(metrics)
    }

    /// Delete rounds until the estimated count is back at `baseline`.
    ///
    /// Any estimate or delete error ends the phase.
    async fn delete_to_baseline(&self, name: &str, baseline: u64) -> u64 {
        let mut deleted = 0;

        while !self.stop.is_requested() {
            let current = match self.backend.estimated_count(name).await {
                Ok(current) => current,
                Err(e) => {
                    warn!("{}: Failed to estimate count before delete: {}", name, e);
                    break;
                }
            };
            if current <= baseline {
                break;
            }

            match self
                .strategy
                .delete_round(self.backend.as_ref(), name)
                .await
            {
                Ok(DeleteRound::Deleted(n)) => deleted += n,
                Ok(DeleteRound::NothingToTarget) => break,
                Err(e) => {
                    warn!("{}: Failed to delete: {}", name, e);
                    break;
                }
            }
        }

        deleted
    }

    async fn cool_down(&self) {
        if !self.config.cooldown.is_zero() {
            tokio::time::sleep(self.config.cooldown).await;
        }
    }
}
