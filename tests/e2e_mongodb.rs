//! End-to-end run against a live server.
//!
//! Run with `MONGODB_URI=mongodb://... cargo test --test e2e_mongodb -- --ignored`.

use churn_core::{CollectionConfig, IdMode, StopFlag};
use churn_mongodb::{
    detect_server_version, ChurnBackend, ChurnConfig, ChurnDriver, CycleOutcome, MongoBackend,
    WriteStrategy,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
#[ignore = "requires a running MongoDB server"]
async fn test_churn_cycle_against_mongodb() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("shard_churn=debug,churn_mongodb=debug")
        .try_init()
        .ok(); // Ignore if already initialized

    let uri = std::env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".into());
    let backend = Arc::new(MongoBackend::connect(&uri, "shard_churn_e2e").await?);

    let version = detect_server_version(backend.as_ref()).await?;
    let collection = CollectionConfig::new(500, IdMode::CustomRandom);
    let config = ChurnConfig {
        collections: vec![collection],
        batch_size: 2_000,
        cooldown: Duration::ZERO,
        legacy_sample_size: 2_000,
        // High rates keep the delete phase short on a small collection
        update_sample_rate: 0.5,
        delete_sample_rate: 0.5,
    };
    let strategy = WriteStrategy::select(
        &version,
        config.update_sample_rate,
        config.delete_sample_rate,
        config.legacy_sample_size,
        std::process::id(),
    );

    let before = backend.estimated_count("customID_500").await?;
    let mut driver =
        ChurnDriver::with_strategy(backend.clone(), config, strategy, StopFlag::new())?;
    let outcome = driver.run_cycle(&collection).await;

    assert!(matches!(outcome, CycleOutcome::Completed(_)));
    let after = backend.estimated_count("customID_500").await?;
    assert!(after <= before, "count {after} above baseline {before}");
    Ok(())
}
