//! Server capability detection and write-strategy selection.

use crate::backend::{BatchWriteOptions, ChurnBackend, CommandTarget, IdUpdate, UpdateSpec};
use crate::error::ChurnError;
use crate::insert::ids_filter;
use crate::update::{mutation_to_update, update_pipeline};
use bson::{doc, Document};
use churn_core::ServerVersion;
use churn_generator::MutationGenerator;
use tracing::info;

/// Fetch and parse the server version. Callers treat any error as fatal.
pub async fn detect_server_version<B: ChurnBackend + ?Sized>(
    backend: &B,
) -> Result<ServerVersion, ChurnError> {
    let reply = backend
        .run_command(CommandTarget::Workload, doc! { "buildInfo": 1 })
        .await?;
    let version = reply
        .get_str("version")
        .map_err(|_| ChurnError::MissingField {
            command: "buildInfo",
            field: "version",
        })?;

    let parsed = ServerVersion::parse(version)?;
    info!(
        "Server version {} (pipeline updates: {}, timeseries: {}, timeseries delete without meta: {})",
        version,
        parsed.can_update_with_pipeline(),
        parsed.can_timeseries(),
        parsed.ts_can_delete_without_meta()
    );
    Ok(parsed)
}

/// Result of one delete round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteRound {
    Deleted(u64),
    /// The sample came back empty; there is nothing left to target.
    NothingToTarget,
}

/// How the churn driver updates and deletes, chosen once from the server
/// capabilities and never re-evaluated per call.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteStrategy {
    /// Sampling predicates evaluated by the backend in a single statement.
    Pipeline {
        update_sample_rate: f64,
        delete_sample_rate: f64,
        pipeline: Vec<Document>,
    },
    /// Fetch a random sample of ids, then target them explicitly.
    Legacy { sample_size: u64 },
}

impl WriteStrategy {
    /// Pick the strategy for a server version.
    pub fn select(
        version: &ServerVersion,
        update_sample_rate: f64,
        delete_sample_rate: f64,
        legacy_sample_size: u64,
        process_id: u32,
    ) -> Self {
        if version.can_update_with_pipeline() {
            WriteStrategy::Pipeline {
                update_sample_rate,
                delete_sample_rate,
                pipeline: update_pipeline(process_id),
            }
        } else {
            WriteStrategy::Legacy {
                sample_size: legacy_sample_size,
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WriteStrategy::Pipeline { .. } => "pipeline",
            WriteStrategy::Legacy { .. } => "legacy",
        }
    }

    /// Apply randomized mutations to a sample of the collection. Returns the
    /// modified count.
    pub async fn update_phase<B: ChurnBackend + ?Sized>(
        &self,
        backend: &B,
        collection: &str,
        mutations: &mut MutationGenerator,
    ) -> Result<u64, ChurnError> {
        match self {
            WriteStrategy::Pipeline {
                update_sample_rate,
                pipeline,
                ..
            } => {
                info!("{}: Updating random documents via pipeline …", collection);
                backend
                    .update_matching(
                        collection,
                        doc! { "$sampleRate": *update_sample_rate },
                        UpdateSpec::Pipeline(pipeline.clone()),
                    )
                    .await
            }
            WriteStrategy::Legacy { sample_size } => {
                info!(
                    "{}: Fetching {} random document IDs …",
                    collection, sample_size
                );
                let ids = backend.sample_ids(collection, *sample_size).await?;

                info!("{}: Updating those randomly …", collection);
                let updates = ids
                    .into_iter()
                    .map(|id| IdUpdate {
                        id,
                        update: mutation_to_update(&mutations.next_mutation()),
                    })
                    .collect();
                backend
                    .update_by_ids(collection, updates, BatchWriteOptions::durable())
                    .await
            }
        }
    }

    /// Delete one round of random documents.
    pub async fn delete_round<B: ChurnBackend + ?Sized>(
        &self,
        backend: &B,
        collection: &str,
    ) -> Result<DeleteRound, ChurnError> {
        match self {
            WriteStrategy::Pipeline {
                delete_sample_rate, ..
            } => {
                info!("{}: Deleting random documents …", collection);
                let deleted = backend
                    .delete_matching(collection, doc! { "$sampleRate": *delete_sample_rate })
                    .await?;
                Ok(DeleteRound::Deleted(deleted))
            }
            WriteStrategy::Legacy { sample_size } => {
                info!(
                    "{}: Fetching {} random document IDs …",
                    collection, sample_size
                );
                let ids = backend.sample_ids(collection, *sample_size).await?;
                if ids.is_empty() {
                    return Ok(DeleteRound::NothingToTarget);
                }

                info!("{}: Deleting those {} documents …", collection, ids.len());
                let deleted = backend.delete_matching(collection, ids_filter(ids)).await?;
                Ok(DeleteRound::Deleted(deleted))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryBackend, OpKind};

    #[test]
    fn test_select_by_version() {
        let pipeline = WriteStrategy::select(&ServerVersion::new(4, 4), 0.001, 0.0001, 100, 1);
        assert_eq!(pipeline.name(), "pipeline");

        let legacy = WriteStrategy::select(&ServerVersion::new(4, 2), 0.001, 0.0001, 100, 1);
        assert_eq!(legacy, WriteStrategy::Legacy { sample_size: 100 });
    }

    #[tokio::test]
    async fn test_detect_version() {
        let backend = MemoryBackend::new("4.4.10");
        let version = detect_server_version(&backend).await.unwrap();
        assert_eq!(version, ServerVersion::new(4, 4));
    }

    #[tokio::test]
    async fn test_detect_malformed_version_is_error() {
        let backend = MemoryBackend::new("banana");
        let err = detect_server_version(&backend).await.unwrap_err();
        assert!(matches!(err, ChurnError::Version(_)));
    }

    #[tokio::test]
    async fn test_legacy_update_targets_sampled_ids() {
        let backend = MemoryBackend::new("4.2.0");
        backend.seed_collection("c", 50);
        let strategy = WriteStrategy::Legacy { sample_size: 10 };
        let mut mutations = MutationGenerator::new(1, 1);

        let modified = strategy
            .update_phase(&backend, "c", &mut mutations)
            .await
            .unwrap();

        assert_eq!(modified, 10);
        assert_eq!(
            backend.op_kinds(),
            vec![OpKind::SampleIds, OpKind::UpdateByIds]
        );
        assert_eq!(backend.last_batch_options(), Some(BatchWriteOptions::durable()));
    }

    #[tokio::test]
    async fn test_pipeline_update_is_one_statement() {
        let backend = MemoryBackend::new("5.0.0");
        backend.seed_collection("c", 100);
        let strategy = WriteStrategy::select(&ServerVersion::new(5, 0), 1.0, 0.5, 10, 1);
        let mut mutations = MutationGenerator::new(1, 1);

        let modified = strategy
            .update_phase(&backend, "c", &mut mutations)
            .await
            .unwrap();

        assert_eq!(modified, 100);
        assert_eq!(backend.op_kinds(), vec![OpKind::UpdateMatching]);
    }

    #[tokio::test]
    async fn test_legacy_delete_on_empty_collection() {
        let backend = MemoryBackend::new("4.2.0");
        let strategy = WriteStrategy::Legacy { sample_size: 10 };

        let round = strategy.delete_round(&backend, "empty").await.unwrap();
        assert_eq!(round, DeleteRound::NothingToTarget);
    }
}
