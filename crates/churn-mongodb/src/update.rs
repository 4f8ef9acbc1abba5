//! Update expressions in both execution forms.
//!
//! The legacy form is an operator document built on the client for one
//! document at a time. The pipeline form draws the same uniform value inside
//! the backend and applies the same five-way split with `$cond`, so both paths
//! share category boundaries taken from [`MutationCategory::range`].

use bson::{doc, Bson, Document};
use chrono::Utc;
use churn_generator::{Mutation, MutationCategory};

/// Temporary field holding the per-document draw inside the pipeline.
const DRAW_FIELD: &str = "randVal";

/// Operator document for one legacy mutation.
pub fn mutation_to_update(mutation: &Mutation) -> Document {
    match mutation {
        Mutation::Touch { process_id, at } => doc! {
            "$set": {
                "touchedByProcess": *process_id as i64,
                "updatedAt": bson::DateTime::from_chrono(*at),
            }
        },
        Mutation::SetFlag(flag) => doc! { "$set": { "flag": *flag } },
        Mutation::SetScore(score) => doc! { "$set": { "score": *score } },
        Mutation::IncrementVisits => doc! { "$inc": { "visitCount": 1 } },
        Mutation::Archive => doc! { "$rename": { "oldField": "archivedField" } },
    }
}

/// Field-touch mutation used by the worker pool.
pub fn touch_update(process_id: u32) -> Document {
    mutation_to_update(&Mutation::Touch {
        process_id,
        at: Utc::now(),
    })
}

/// `{ $and: [ lower <= $randVal, $randVal < upper ] }` for a category.
fn draw_in(category: MutationCategory) -> Document {
    let (lower, upper) = category.range();
    let draw = format!("${DRAW_FIELD}");
    doc! {
        "$and": [
            { "$gte": [draw.as_str(), lower] },
            { "$lt": [draw.as_str(), upper] },
        ]
    }
}

fn keep(field: &str) -> Bson {
    Bson::String(format!("${field}"))
}

fn cond(condition: Document, then: impl Into<Bson>, otherwise: impl Into<Bson>) -> Document {
    doc! { "$cond": [condition, then.into(), otherwise.into()] }
}

fn is_missing(field: &str) -> Document {
    doc! { "$eq": [{ "$type": format!("${field}") }, "missing"] }
}

/// Backend-evaluated update pipeline equivalent to [`mutation_to_update`].
pub fn update_pipeline(process_id: u32) -> Vec<Document> {
    let touch = draw_in(MutationCategory::Touch);
    let flag = draw_in(MutationCategory::Flag);
    let score = draw_in(MutationCategory::Score);
    let visit = draw_in(MutationCategory::Visit);
    let archive = draw_in(MutationCategory::Archive);

    let archive_present = doc! {
        "$and": [archive.clone(), { "$not": [is_missing("oldField")] }]
    };

    vec![
        doc! { "$addFields": { DRAW_FIELD: { "$rand": {} } } },
        doc! {
            "$addFields": {
                "touchedByProcess": cond(touch.clone(), process_id as i64, keep("touchedByProcess")),
                "updatedAt": cond(touch, "$$NOW", keep("updatedAt")),
                "flag": cond(flag, doc! { "$lt": [{ "$rand": {} }, 0.5] }, keep("flag")),
                "score": cond(
                    score,
                    doc! { "$multiply": [{ "$rand": {} }, 1000] },
                    keep("score"),
                ),
                "visitCount": cond(
                    visit,
                    cond(is_missing("visitCount"), 1, doc! { "$add": ["$visitCount", 1] }),
                    keep("visitCount"),
                ),
                "archivedField": cond(archive_present, keep("oldField"), keep("archivedField")),
                "oldField": cond(archive, "$$REMOVE", keep("oldField")),
                DRAW_FIELD: "$$REMOVE",
            }
        },
    ]
}
