//! MongoDB implementation of [`ChurnBackend`].

use crate::backend::{
    reply_count, BatchWriteOptions, ChurnBackend, CommandTarget, IdUpdate, UpdateSpec,
};
use crate::error::ChurnError;
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::error::ErrorKind;
use mongodb::options::UpdateModifications;
use mongodb::{Client, Collection, Database};
use tracing::{debug, warn};

/// Backend talking to a MongoDB deployment over its native protocol.
#[derive(Clone)]
pub struct MongoBackend {
    client: Client,
    database: Database,
}

impl MongoBackend {
    /// Connect and verify the deployment answers.
    ///
    /// # Arguments
    ///
    /// * `connection_string` - MongoDB connection string (e.g., "mongodb://localhost:27017")
    /// * `database_name` - Database holding the churned collections
    pub async fn connect(connection_string: &str, database_name: &str) -> Result<Self, ChurnError> {
        let client = Client::with_uri_str(connection_string).await?;
        let database = client.database(database_name);

        // Test connection
        database.run_command(doc! { "ping": 1 }).await?;

        Ok(Self { client, database })
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection(name)
    }
}

/// Documents an unordered insert of `total` applied when `failed` of them
/// reported write errors. A write concern error alone does not undo writes.
fn applied_despite_errors(total: u64, failed: u64) -> Option<u64> {
    (failed < total).then(|| total - failed)
}

impl From<UpdateSpec> for UpdateModifications {
    fn from(spec: UpdateSpec) -> Self {
        match spec {
            UpdateSpec::Document(update) => UpdateModifications::Document(update),
            UpdateSpec::Pipeline(pipeline) => UpdateModifications::Pipeline(pipeline),
        }
    }
}

#[async_trait]
impl ChurnBackend for MongoBackend {
    async fn run_command(
        &self,
        target: CommandTarget,
        command: Document,
    ) -> Result<Document, ChurnError> {
        let reply = match target {
            CommandTarget::Workload => self.database.run_command(command).await?,
            CommandTarget::Admin => self.client.database("admin").run_command(command).await?,
            CommandTarget::Config => self.client.database("config").run_command(command).await?,
        };
        Ok(reply)
    }

    async fn estimated_count(&self, collection: &str) -> Result<u64, ChurnError> {
        Ok(self.collection(collection).estimated_document_count().await?)
    }

    async fn insert_unordered(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<u64, ChurnError> {
        let total = documents.len() as u64;
        if total == 0 {
            return Ok(0);
        }

        match self
            .collection(collection)
            .insert_many(documents)
            .ordered(false)
            .await
        {
            Ok(result) => Ok(result.inserted_ids.len() as u64),
            Err(e) => {
                let failed = match e.kind.as_ref() {
                    ErrorKind::InsertMany(failure) => {
                        if let Some(concern) = &failure.write_concern_error {
                            warn!(
                                "{}: insert applied without write concern: {}",
                                collection, concern.message
                            );
                        }
                        Some(failure.write_errors.as_ref().map_or(0, |errors| errors.len() as u64))
                    }
                    _ => None,
                };

                match failed.and_then(|failed| applied_despite_errors(total, failed)) {
                    Some(applied) => {
                        if applied < total {
                            warn!(
                                "{}: {} of {} documents failed to insert",
                                collection,
                                total - applied,
                                total
                            );
                        }
                        Ok(applied)
                    }
                    None => Err(e.into()),
                }
            }
        }
    }

    async fn update_matching(
        &self,
        collection: &str,
        filter: Document,
        update: UpdateSpec,
    ) -> Result<u64, ChurnError> {
        let result = self
            .collection(collection)
            .update_many(filter, UpdateModifications::from(update))
            .await?;
        Ok(result.modified_count)
    }

    async fn update_by_ids(
        &self,
        collection: &str,
        updates: Vec<IdUpdate>,
        options: BatchWriteOptions,
    ) -> Result<u64, ChurnError> {
        if updates.is_empty() {
            return Ok(0);
        }

        let statements: Vec<Document> = updates
            .into_iter()
            .map(|u| doc! { "q": { "_id": u.id }, "u": u.update })
            .collect();

        let mut command = doc! {
            "update": collection,
            "updates": statements,
            "ordered": options.ordered,
        };
        if options.durable {
            command.insert("writeConcern", doc! { "w": "majority", "j": true });
        }

        let reply = self.database.run_command(command).await?;
        if let Ok(write_errors) = reply.get_array("writeErrors") {
            debug!(
                "{}: update command reported {} write errors",
                collection,
                write_errors.len()
            );
        }

        Ok(reply_count(&reply, "nModified"))
    }

    async fn sample_ids(&self, collection: &str, size: u64) -> Result<Vec<Bson>, ChurnError> {
        let pipeline = vec![
            doc! { "$sample": { "size": size as i64 } },
            doc! { "$project": { "_id": 1 } },
        ];

        let docs: Vec<Document> = self
            .collection(collection)
            .aggregate(pipeline)
            .await?
            .try_collect()
            .await?;

        Ok(docs
            .into_iter()
            .filter_map(|mut d| d.remove("_id"))
            .collect())
    }

    async fn delete_matching(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<u64, ChurnError> {
        let result = self.collection(collection).delete_many(filter).await?;
        Ok(result.deleted_count)
    }
}
