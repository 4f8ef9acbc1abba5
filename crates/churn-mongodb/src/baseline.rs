//! Per-collection baseline document counts.

use crate::error::ChurnError;
use std::collections::HashMap;
use std::future::Future;

/// Steady-state document counts, established once per collection.
///
/// The first successful read for a collection is kept for the rest of the
/// run and never refreshed, even though concurrent churn moves the true count.
#[derive(Debug, Default)]
pub struct BaselineRegistry {
    counts: HashMap<String, u64>,
}

impl BaselineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the baseline for `collection`, reading it with `read` on first use.
    ///
    /// A failed read records nothing, so the next visit tries again.
    pub async fn get_or_init<F, Fut>(&mut self, collection: &str, read: F) -> Result<u64, ChurnError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<u64, ChurnError>>,
    {
        if let Some(count) = self.counts.get(collection) {
            return Ok(*count);
        }

        let count = read().await?;
        self.counts.insert(collection.to_string(), count);
        Ok(count)
    }

    pub fn get(&self, collection: &str) -> Option<u64> {
        self.counts.get(collection).copied()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn test_initialized_once() {
        let mut registry = BaselineRegistry::new();
        let reads = Cell::new(0);

        for round in 0..100u64 {
            let count = registry
                .get_or_init("customID_500", || async {
                    reads.set(reads.get() + 1);
                    Ok(1_000 + round)
                })
                .await
                .unwrap();
            assert_eq!(count, 1_000);
        }

        assert_eq!(reads.get(), 1);
        assert_eq!(registry.get("customID_500"), Some(1_000));
    }

    #[tokio::test]
    async fn test_zero_baseline_is_kept() {
        let mut registry = BaselineRegistry::new();
        let reads = Cell::new(0);

        for _ in 0..3 {
            let count = registry
                .get_or_init("empty", || async {
                    reads.set(reads.get() + 1);
                    Ok(0)
                })
                .await
                .unwrap();
            assert_eq!(count, 0);
        }

        assert_eq!(reads.get(), 1);
    }

    #[tokio::test]
    async fn test_failed_read_is_retried() {
        let mut registry = BaselineRegistry::new();

        let err = registry
            .get_or_init("c", || async { Err(ChurnError::NoShards) })
            .await;
        assert!(err.is_err());
        assert!(registry.is_empty());

        let count = registry.get_or_init("c", || async { Ok(5) }).await.unwrap();
        assert_eq!(count, 5);
        assert_eq!(registry.len(), 1);
    }
}
