//! Initial population of the churn collections.
//!
//! Each collection is filled up to its shard-derived target size. The loader
//! visits the collections round-robin, one unordered batch per collection per
//! round, so they grow together. A failed batch is retried on the next round.

use crate::backend::ChurnBackend;
use crate::error::ChurnError;
use crate::insert::batch_to_documents;
use crate::shard::DataSizing;
use churn_core::{CollectionConfig, StopFlag};
use churn_generator::DocumentGenerator;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Documents per insert during the initial load.
pub const DEFAULT_LOAD_BATCH_SIZE: usize = 100_000;

#[derive(Debug, Clone, PartialEq)]
pub struct LoadConfig {
    pub collections: Vec<CollectionConfig>,
    pub batch_size: usize,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            collections: CollectionConfig::default_set(),
            batch_size: DEFAULT_LOAD_BATCH_SIZE,
        }
    }
}

impl LoadConfig {
    pub fn validate(&self) -> Result<(), ChurnError> {
        if self.collections.is_empty() {
            return Err(ChurnError::Config("no collections configured".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ChurnError::Config("batch size must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub inserted: u64,
    pub batches: u64,
    pub failed_batches: u64,
    /// Every collection reached its target.
    pub complete: bool,
}

pub struct InitialLoader<B> {
    backend: Arc<B>,
    config: LoadConfig,
    sizing: DataSizing,
    documents: DocumentGenerator,
    stop: StopFlag,
}

impl<B: ChurnBackend> InitialLoader<B> {
    pub fn new(
        backend: Arc<B>,
        config: LoadConfig,
        sizing: DataSizing,
        stop: StopFlag,
    ) -> Result<Self, ChurnError> {
        config.validate()?;

        Ok(Self {
            backend,
            config,
            sizing,
            documents: DocumentGenerator::from_entropy(),
            stop,
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.documents = DocumentGenerator::new(seed);
        self
    }

    /// Documents each collection still needs. Fails if a count cannot be read.
    pub async fn remaining(&self) -> Result<Vec<u64>, ChurnError> {
        let mut remaining = Vec::with_capacity(self.config.collections.len());
        for collection in &self.config.collections {
            let target = self.sizing.target_docs(collection.doc_size);
            let present = self
                .backend
                .estimated_count(&collection.collection_name())
                .await?;
            let missing = target.saturating_sub(present);
            info!(
                "{}: {} of {} documents present, {} to load",
                collection, present, target, missing
            );
            remaining.push(missing);
        }
        Ok(remaining)
    }

    /// Insert until every collection reaches its target or a stop is requested.
    pub async fn run(&mut self) -> Result<LoadSummary, ChurnError> {
        let mut remaining = self.remaining().await?;
        let mut summary = LoadSummary::default();
        let batch_size = self.config.batch_size as u64;

        while !self.stop.is_requested() {
            if remaining.iter().all(|missing| *missing == 0) {
                summary.complete = true;
                info!("All collections loaded");
                break;
            }

            for (collection, missing) in self.config.collections.iter().zip(remaining.iter_mut()) {
                if self.stop.is_requested() {
                    break;
                }
                if *missing == 0 {
                    continue;
                }

                let count = (*missing).min(batch_size) as usize;
                let name = collection.collection_name();
                let documents = batch_to_documents(self.documents.batch(collection, count));

                match self.backend.insert_unordered(&name, documents).await {
                    Ok(inserted) => {
                        *missing = missing.saturating_sub(inserted);
                        summary.inserted += inserted;
                        summary.batches += 1;
                        debug!("{}: inserted {}, {} to go", name, inserted, missing);
                    }
                    Err(e) => {
                        summary.failed_batches += 1;
                        warn!("{}: load batch failed, retrying next round: {}", name, e);
                    }
                }
            }
        }

        if !summary.complete {
            info!("Stop requested, initial load interrupted.");
        }
        Ok(summary)
    }
}
