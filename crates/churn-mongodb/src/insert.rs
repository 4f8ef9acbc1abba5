//! Conversion of generated documents to BSON for insertion.

use bson::{doc, Document};
use churn_generator::GeneratedDocument;

/// Convert a generated document to BSON. Documents without an id leave `_id`
/// out so the backend assigns one.
pub fn generated_to_document(generated: GeneratedDocument) -> Document {
    let mut doc = Document::new();

    if let Some(id) = generated.id {
        doc.insert("_id", id);
    }
    doc.insert("rand", generated.rand);
    doc.insert("str", generated.payload);
    doc.insert("fromUpdates", generated.from_updates);

    doc
}

/// Convert a whole batch.
pub fn batch_to_documents(batch: Vec<GeneratedDocument>) -> Vec<Document> {
    batch.into_iter().map(generated_to_document).collect()
}

/// Filter selecting documents by a list of ids.
pub fn ids_filter(ids: Vec<bson::Bson>) -> Document {
    doc! { "_id": { "$in": ids } }
}
