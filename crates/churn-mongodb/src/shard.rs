//! Shard enumeration, shard-derived sizing and cluster preparation.

use crate::backend::{ChurnBackend, CommandTarget};
use crate::error::ChurnError;
use bson::{doc, Bson, Document};
use churn_core::{CollectionConfig, IdMode};
use tracing::{info, warn};

/// Data each shard is expected to hold.
pub const BYTES_PER_SHARD: u64 = 1 << 40;

/// Names of the cluster's shards, from `listShards` on the admin database.
pub async fn shard_names<B: ChurnBackend + ?Sized>(backend: &B) -> Result<Vec<String>, ChurnError> {
    let reply = backend
        .run_command(CommandTarget::Admin, doc! { "listShards": 1 })
        .await?;
    let shards = reply
        .get_array("shards")
        .map_err(|_| ChurnError::MissingField {
            command: "listShards",
            field: "shards",
        })?;

    Ok(shards
        .iter()
        .filter_map(|s| s.as_document())
        .filter_map(|s| s.get_str("_id").ok())
        .map(str::to_string)
        .collect())
}

/// Collection sizing derived from the shard count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSizing {
    pub shard_count: u64,
    pub total_bytes: u64,
    pub collection_bytes: u64,
}

impl DataSizing {
    /// Spread `BYTES_PER_SHARD` per shard evenly across the collections.
    pub fn new(shard_count: usize, collection_count: usize) -> Result<Self, ChurnError> {
        let total_bytes = BYTES_PER_SHARD * shard_count as u64;
        if total_bytes == 0 {
            return Err(ChurnError::NoShards);
        }
        if collection_count == 0 {
            return Err(ChurnError::Config("no collections configured".to_string()));
        }

        Ok(Self {
            shard_count: shard_count as u64,
            total_bytes,
            collection_bytes: total_bytes / collection_count as u64,
        })
    }

    /// Approximate number of documents a collection of `doc_size` holds.
    pub fn target_docs(&self, doc_size: usize) -> u64 {
        if doc_size == 0 {
            return 0;
        }
        self.collection_bytes / doc_size as u64
    }
}

/// Split points and chunk midpoints for pre-splitting a ranged key.
///
/// For `n` shards over `[min, max)`, the range is cut at `n - 1` evenly spaced
/// boundaries and chunk `i` is located by the midpoint of its interval.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitPlan {
    pub boundaries: Vec<f64>,
    pub midpoints: Vec<f64>,
}

impl SplitPlan {
    pub fn new(min: f64, max: f64, shard_count: usize) -> Result<Self, ChurnError> {
        if shard_count == 0 {
            return Err(ChurnError::NoShards);
        }

        let n = shard_count as f64;
        let at = |fraction: f64| min + (max - min) * fraction;

        let boundaries = (1..shard_count).map(|i| at(i as f64 / n)).collect();
        let midpoints = (0..shard_count)
            .map(|i| (at(i as f64 / n) + at((i + 1) as f64 / n)) / 2.0)
            .collect();

        Ok(Self {
            boundaries,
            midpoints,
        })
    }
}

/// Create the churn collections and, on a sharded cluster, shard and pre-split them.
///
/// Existing collections are left alone. Split and chunk-move failures are
/// reported and skipped.
pub async fn prepare_collections<B: ChurnBackend + ?Sized>(
    backend: &B,
    database: &str,
    configs: &[CollectionConfig],
) -> Result<(), ChurnError> {
    let shards = match shard_names(backend).await {
        Ok(shards) if !shards.is_empty() => {
            info!("Cluster is sharded ({} shards).", shards.len());
            Some(shards)
        }
        Ok(_) => None,
        Err(e) => {
            info!("Sharding commands failed … I guess this isn't a sharded cluster? ({e})");
            None
        }
    };

    if shards.is_some() {
        if let Err(e) = backend
            .run_command(CommandTarget::Admin, doc! { "balancerStop": 1 })
            .await
        {
            warn!("Failed to stop the balancer: {e}");
        }
    }

    let sizing = shards
        .as_ref()
        .map(|s| DataSizing::new(s.len(), configs.len()))
        .transpose()?;

    // Creation order: id modes outer, sizes inner
    let mut ordered = configs.to_vec();
    ordered.sort_by_key(|c| (c.id_mode != IdMode::CustomRandom, c.doc_size));

    for config in &ordered {
        let name = config.collection_name();
        match sizing {
            Some(sizing) => info!(
                "Creating collection: {} (approx docs count: {})",
                name,
                sizing.target_docs(config.doc_size)
            ),
            None => info!("Creating collection: {}", name),
        }

        match backend
            .run_command(CommandTarget::Workload, doc! { "create": name.as_str() })
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_namespace_exists() => {
                info!("Collection \"{}\" already exists.", name);
                continue;
            }
            Err(e) => return Err(e),
        }

        if let Some(shards) = &shards {
            shard_collection(backend, database, config, shards).await?;
        }
    }

    Ok(())
}

async fn shard_collection<B: ChurnBackend + ?Sized>(
    backend: &B,
    database: &str,
    config: &CollectionConfig,
    shards: &[String],
) -> Result<(), ChurnError> {
    let name = config.collection_name();
    let ns = format!("{database}.{name}");

    backend
        .run_command(CommandTarget::Admin, doc! { "enableSharding": database })
        .await?;

    let key: Document = match config.id_mode {
        IdMode::CustomRandom => doc! { "_id": 1 },
        IdMode::Auto => {
            backend
                .run_command(
                    CommandTarget::Workload,
                    doc! {
                        "createIndexes": name.as_str(),
                        "indexes": [{ "key": { "_id": "hashed" }, "name": "_id_hashed" }],
                    },
                )
                .await?;
            doc! { "_id": "hashed" }
        }
    };

    info!("Sharding collection {} …", name);
    backend
        .run_command(
            CommandTarget::Admin,
            doc! { "shardCollection": ns.as_str(), "key": key },
        )
        .await?;

    match config.id_mode {
        IdMode::CustomRandom => {
            info!("Pre-splitting {} …", name);
            split_and_distribute(backend, &ns, shards).await?;
        }
        IdMode::Auto => {
            verify_chunk_spread(backend, &ns, shards).await?;
            info!("Forgoing split of {}; already split.", name);
        }
    }

    Ok(())
}

/// `cursor.firstBatch` of a `find` or `aggregate` reply.
fn first_batch<'a>(reply: &'a Document, command: &'static str) -> Result<&'a bson::Array, ChurnError> {
    reply
        .get_document("cursor")
        .and_then(|cursor| cursor.get_array("firstBatch"))
        .map_err(|_| ChurnError::MissingField {
            command,
            field: "cursor.firstBatch",
        })
}

/// Shards holding at least one chunk of `ns`, read from the config database.
///
/// Chunks are keyed by namespace on older servers and by collection uuid on
/// newer ones, so both are matched.
pub async fn chunk_shards<B: ChurnBackend + ?Sized>(
    backend: &B,
    ns: &str,
) -> Result<Vec<String>, ChurnError> {
    let reply = backend
        .run_command(
            CommandTarget::Config,
            doc! { "find": "collections", "filter": { "_id": ns }, "limit": 1 },
        )
        .await?;
    let uuid = first_batch(&reply, "find")?
        .first()
        .and_then(Bson::as_document)
        .and_then(|collection| collection.get("uuid"))
        .cloned();

    let mut owners = vec![Bson::Document(doc! { "ns": ns })];
    if let Some(uuid) = uuid {
        owners.push(Bson::Document(doc! { "uuid": uuid }));
    }

    let reply = backend
        .run_command(
            CommandTarget::Config,
            doc! {
                "aggregate": "chunks",
                "pipeline": [
                    { "$match": { "$or": owners } },
                    { "$group": { "_id": "$shard" } },
                ],
                "cursor": {},
            },
        )
        .await?;

    let mut shards: Vec<String> = first_batch(&reply, "aggregate")?
        .iter()
        .filter_map(Bson::as_document)
        .filter_map(|group| group.get_str("_id").ok())
        .map(str::to_string)
        .collect();
    shards.sort();
    Ok(shards)
}

/// Fail unless every shard owns a chunk of `ns`. Hashed collections are
/// split by the server when sharded, so a gap means the sharding went wrong.
pub async fn verify_chunk_spread<B: ChurnBackend + ?Sized>(
    backend: &B,
    ns: &str,
    shards: &[String],
) -> Result<(), ChurnError> {
    let with_chunks = chunk_shards(backend, ns).await?;
    if shards.iter().all(|shard| with_chunks.contains(shard)) {
        return Ok(());
    }

    Err(ChurnError::UnevenChunks {
        ns: ns.to_string(),
        shards: shards.to_vec(),
        with_chunks,
    })
}

/// Pre-split a float `_id` range `[0, 1)` into one chunk per shard.
async fn split_and_distribute<B: ChurnBackend + ?Sized>(
    backend: &B,
    ns: &str,
    shards: &[String],
) -> Result<(), ChurnError> {
    let plan = SplitPlan::new(0.0, 1.0, shards.len())?;

    for boundary in &plan.boundaries {
        match backend
            .run_command(
                CommandTarget::Admin,
                doc! { "split": ns, "middle": { "_id": *boundary } },
            )
            .await
        {
            Ok(_) => info!("Split at {} succeeded.", boundary),
            Err(e) => warn!("Split at {} failed: {}", boundary, e),
        }
    }

    for (mid, shard) in plan.midpoints.iter().zip(shards) {
        info!("Moving chunk containing _id ≈ {} to shard {} …", mid, shard);
        match backend
            .run_command(
                CommandTarget::Admin,
                doc! {
                    "moveChunk": ns,
                    "find": { "_id": *mid },
                    "to": shard.as_str(),
                    "_waitForDelete": true,
                    "_secondaryThrottle": true,
                    "writeConcern": { "w": "majority", "j": true },
                },
            )
            .await
        {
            Ok(_) => info!("moveChunk to {} succeeded.", shard),
            Err(e) => warn!("moveChunk to {} failed: {}", shard, e),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBackend;

    #[test]
    fn test_sizing() {
        let sizing = DataSizing::new(2, 6).unwrap();
        assert_eq!(sizing.total_bytes, 2 << 40);
        assert_eq!(sizing.collection_bytes, (2u64 << 40) / 6);
        assert_eq!(sizing.target_docs(500), (2u64 << 40) / 6 / 500);
        assert_eq!(sizing.target_docs(0), 0);
    }

    #[test]
    fn test_sizing_zero_shards() {
        assert!(matches!(DataSizing::new(0, 6), Err(ChurnError::NoShards)));
    }

    #[test]
    fn test_split_plan_four_shards() {
        let plan = SplitPlan::new(0.0, 1.0, 4).unwrap();
        assert_eq!(plan.boundaries, vec![0.25, 0.5, 0.75]);
        assert_eq!(plan.midpoints, vec![0.125, 0.375, 0.625, 0.875]);
    }

    #[test]
    fn test_split_plan_single_shard() {
        let plan = SplitPlan::new(0.0, 1.0, 1).unwrap();
        assert!(plan.boundaries.is_empty());
        assert_eq!(plan.midpoints, vec![0.5]);
    }

    #[test]
    fn test_split_plan_scaled_range() {
        let plan = SplitPlan::new(0.0, 800.0, 4).unwrap();
        assert_eq!(plan.boundaries, vec![200.0, 400.0, 600.0]);
        assert_eq!(plan.midpoints, vec![100.0, 300.0, 500.0, 700.0]);
    }

    #[tokio::test]
    async fn test_shard_names() {
        let backend = MemoryBackend::new("6.0.0").with_shards(&["rs0", "rs1"]);
        assert_eq!(shard_names(&backend).await.unwrap(), vec!["rs0", "rs1"]);
    }

    #[tokio::test]
    async fn test_prepare_sharded_cluster() {
        let backend = MemoryBackend::new("6.0.0").with_shards(&["rs0", "rs1"]);
        let configs = vec![
            CollectionConfig::new(500, IdMode::CustomRandom),
            CollectionConfig::new(500, IdMode::Auto),
        ];

        prepare_collections(&backend, "test", &configs).await.unwrap();

        let commands = backend.command_names();
        assert!(commands.contains(&"balancerStop".to_string()));
        assert_eq!(commands.iter().filter(|c| *c == "create").count(), 2);
        assert_eq!(commands.iter().filter(|c| *c == "shardCollection").count(), 2);
        assert_eq!(commands.iter().filter(|c| *c == "createIndexes").count(), 1);
        // Only the custom-id collection is pre-split: one split, one move per shard
        assert_eq!(commands.iter().filter(|c| *c == "split").count(), 1);
        assert_eq!(commands.iter().filter(|c| *c == "moveChunk").count(), 2);
    }

    #[tokio::test]
    async fn test_prepare_checks_hashed_chunk_spread() {
        let backend = MemoryBackend::new("6.0.0").with_shards(&["rs0", "rs1"]);
        let configs = vec![CollectionConfig::new(1000, IdMode::Auto)];

        prepare_collections(&backend, "test", &configs).await.unwrap();

        let commands = backend.command_names();
        assert!(commands.contains(&"find".to_string()));
        assert!(commands.contains(&"aggregate".to_string()));
    }

    #[tokio::test]
    async fn test_prepare_fails_on_missing_chunks() {
        let backend = MemoryBackend::new("6.0.0")
            .with_shards(&["rs0", "rs1", "rs2"])
            .with_chunk_shards(&["rs0", "rs2"]);
        let configs = vec![CollectionConfig::new(1000, IdMode::Auto)];

        let err = prepare_collections(&backend, "test", &configs)
            .await
            .unwrap_err();

        match err {
            ChurnError::UnevenChunks { ns, with_chunks, .. } => {
                assert_eq!(ns, "test.sequentialID_1000");
                assert_eq!(with_chunks, vec!["rs0", "rs2"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_chunk_shards_sorted_and_distinct() {
        let backend = MemoryBackend::new("6.0.0")
            .with_shards(&["rs0", "rs1"])
            .with_chunk_shards(&["rs1", "rs0"]);

        let shards = chunk_shards(&backend, "test.c").await.unwrap();
        assert_eq!(shards, vec!["rs0", "rs1"]);
    }

    #[tokio::test]
    async fn test_prepare_skips_existing_collections() {
        let backend = MemoryBackend::new("6.0.0").with_shards(&["rs0"]);
        backend.seed_collection("customID_500", 1);
        let configs = vec![CollectionConfig::new(500, IdMode::CustomRandom)];

        prepare_collections(&backend, "test", &configs).await.unwrap();

        assert!(!backend
            .command_names()
            .contains(&"shardCollection".to_string()));
    }

    #[tokio::test]
    async fn test_prepare_unsharded() {
        let backend = MemoryBackend::new("6.0.0");
        let configs = CollectionConfig::default_set();

        prepare_collections(&backend, "test", &configs).await.unwrap();

        let commands = backend.command_names();
        assert_eq!(commands.iter().filter(|c| *c == "create").count(), 6);
        assert!(!commands.contains(&"enableSharding".to_string()));
        assert!(backend.has_collection("sequentialID_2000"));
    }
}
