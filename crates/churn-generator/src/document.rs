//! Batch generation of churn documents.

use crate::payload::{repeat_unit, PAYLOAD_UNIT};
use churn_core::{CollectionConfig, IdMode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Number of documents inserted per churn cycle.
pub const DEFAULT_BATCH_SIZE: usize = 50_000;

/// A document waiting to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedDocument {
    /// Uniform random float in `[0, 1)` for custom ids; `None` lets the backend assign one.
    pub id: Option<f64>,
    pub rand: f64,
    /// Exactly `doc_size` bytes.
    pub payload: String,
    /// Provenance marker, always `true` for churn inserts.
    pub from_updates: bool,
}

/// Generates document batches from its own RNG.
///
/// Each driver task owns a generator; nothing here is shared.
pub struct DocumentGenerator {
    rng: StdRng,
}

impl DocumentGenerator {
    /// Create a generator with a fixed seed (reproducible batches).
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Create a generator seeded from the operating system.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Generate `count` documents for the given collection configuration.
    pub fn batch(&mut self, config: &CollectionConfig, count: usize) -> Vec<GeneratedDocument> {
        let payload = repeat_unit(PAYLOAD_UNIT, config.doc_size);

        (0..count)
            .map(|_| {
                let rand = self.rng.random::<f64>();
                let id = match config.id_mode {
                    IdMode::CustomRandom => Some(self.rng.random::<f64>()),
                    IdMode::Auto => None,
                };
                GeneratedDocument {
                    id,
                    rand,
                    payload: payload.clone(),
                    from_updates: true,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_ids() {
        let mut generator = DocumentGenerator::new(42);
        let docs = generator.batch(&CollectionConfig::new(500, IdMode::CustomRandom), 1_000);

        assert_eq!(docs.len(), 1_000);
        for doc in &docs {
            let id = doc.id.expect("custom mode assigns ids");
            assert!((0.0..1.0).contains(&id));
            assert!((0.0..1.0).contains(&doc.rand));
            assert_eq!(doc.payload.len(), 500);
            assert!(doc.from_updates);
        }
    }

    #[test]
    fn test_auto_ids_are_absent() {
        let mut generator = DocumentGenerator::new(7);
        let docs = generator.batch(&CollectionConfig::new(2000, IdMode::Auto), 10);

        assert!(docs.iter().all(|d| d.id.is_none()));
        assert!(docs.iter().all(|d| d.payload.len() == 2000));
    }

    #[test]
    fn test_same_seed_same_batch() {
        let config = CollectionConfig::new(1000, IdMode::CustomRandom);
        let a = DocumentGenerator::new(1).batch(&config, 100);
        let b = DocumentGenerator::new(1).batch(&config, 100);
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_size_documents() {
        let mut generator = DocumentGenerator::from_entropy();
        let docs = generator.batch(&CollectionConfig::new(0, IdMode::Auto), 3);
        assert!(docs.iter().all(|d| d.payload.is_empty()));
    }
}
