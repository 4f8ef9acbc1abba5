//! Document and mutation generator for the shard-churn load generator.
//!
//! This crate produces the ephemeral documents inserted by the churn driver
//! and the client-side (legacy) mutations applied to sampled documents. It is
//! backend-neutral; the MongoDB crate converts its output to BSON.
//!
//! # Architecture
//!
//! ```text
//! CollectionConfig (size, id mode)
//!        │
//!        ▼
//! ┌───────────────────┐      ┌────────────────────┐
//! │ DocumentGenerator │      │ MutationGenerator  │
//! │  - rng (StdRng)   │      │  - rng (StdRng)    │
//! └────────┬──────────┘      │  - process id      │
//!          │                 └─────────┬──────────┘
//!          ▼                           ▼
//!  GeneratedDocument {id, rand,    Mutation (one of five
//!   payload, from_updates}          categories per draw)
//! ```
//!
//! # Example
//!
//! ```rust
//! use churn_core::{CollectionConfig, IdMode};
//! use churn_generator::DocumentGenerator;
//!
//! let mut generator = DocumentGenerator::new(42);
//! let docs = generator.batch(&CollectionConfig::new(500, IdMode::CustomRandom), 10);
//! assert_eq!(docs.len(), 10);
//! assert_eq!(docs[0].payload.len(), 500);
//! ```

pub mod document;
pub mod mutation;
pub mod payload;

// Re-exports for convenience
pub use document::{DocumentGenerator, GeneratedDocument, DEFAULT_BATCH_SIZE};
pub use mutation::{GeneratorError, Mutation, MutationCategory, MutationGenerator};
pub use payload::{repeat_unit, PAYLOAD_UNIT};
