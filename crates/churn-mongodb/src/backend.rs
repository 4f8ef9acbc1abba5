//! Backend abstraction used by the churn driver and the worker pool.

use crate::error::ChurnError;
use async_trait::async_trait;
use bson::{Bson, Document};

/// Database a command runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTarget {
    /// The workload database.
    Workload,
    /// The `admin` database.
    Admin,
    /// The cluster metadata (`config`) database.
    Config,
}

/// Update applied by a filter-based update statement.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateSpec {
    /// Operator document such as `{ $set: {...} }`.
    Document(Document),
    /// Aggregation pipeline evaluated by the backend per matched document.
    Pipeline(Vec<Document>),
}

/// One statement of a batched update-by-id.
#[derive(Debug, Clone, PartialEq)]
pub struct IdUpdate {
    pub id: Bson,
    pub update: Document,
}

/// Write options for a batched update-by-id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchWriteOptions {
    /// Stop at the first failed statement.
    pub ordered: bool,
    /// Majority, journaled write concern.
    pub durable: bool,
}

impl BatchWriteOptions {
    /// Ordered with a majority, journaled write concern.
    pub fn durable() -> Self {
        Self {
            ordered: true,
            durable: true,
        }
    }

    /// Unordered with the default write concern.
    pub fn unordered() -> Self {
        Self {
            ordered: false,
            durable: false,
        }
    }
}

/// Operations the drivers need from a document database.
///
/// Every call blocks its caller until the backend answers; nothing here is
/// cancelled mid-flight.
#[async_trait]
pub trait ChurnBackend: Send + Sync {
    /// Run a raw command and return the reply document.
    async fn run_command(
        &self,
        target: CommandTarget,
        command: Document,
    ) -> Result<Document, ChurnError>;

    /// Approximate document count from collection metadata.
    async fn estimated_count(&self, collection: &str) -> Result<u64, ChurnError>;

    /// Unordered bulk insert. Returns the number of acknowledged documents;
    /// partial per-document failures are not an error.
    async fn insert_unordered(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<u64, ChurnError>;

    /// Update every document matching `filter`. Returns the modified count.
    async fn update_matching(
        &self,
        collection: &str,
        filter: Document,
        update: UpdateSpec,
    ) -> Result<u64, ChurnError>;

    /// One multi-statement update carrying one statement per id. Returns the
    /// modified count.
    async fn update_by_ids(
        &self,
        collection: &str,
        updates: Vec<IdUpdate>,
        options: BatchWriteOptions,
    ) -> Result<u64, ChurnError>;

    /// `_id` values of a random sample of `size` documents.
    async fn sample_ids(&self, collection: &str, size: u64) -> Result<Vec<Bson>, ChurnError>;

    /// Delete every document matching `filter`. Returns the deleted count.
    async fn delete_matching(&self, collection: &str, filter: Document)
        -> Result<u64, ChurnError>;
}

/// Read a numeric count field from a command reply.
pub fn reply_count(reply: &Document, field: &str) -> u64 {
    match reply.get(field) {
        Some(Bson::Int32(n)) => (*n).max(0) as u64,
        Some(Bson::Int64(n)) => (*n).max(0) as u64,
        Some(Bson::Double(n)) if *n > 0.0 => *n as u64,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_reply_count() {
        let reply = doc! { "n": 10, "nModified": 7_i64, "ok": 1.0 };
        assert_eq!(reply_count(&reply, "n"), 10);
        assert_eq!(reply_count(&reply, "nModified"), 7);
        assert_eq!(reply_count(&reply, "ok"), 1);
        assert_eq!(reply_count(&reply, "missing"), 0);
    }

    #[test]
    fn test_negative_counts_clamp() {
        assert_eq!(reply_count(&doc! { "n": -3 }, "n"), 0);
    }
}
