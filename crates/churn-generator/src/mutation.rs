//! Client-side mutations applied to individual documents.
//!
//! A single uniform draw `r` in `[0, 1)` selects one of five categories. The
//! half-open ranges below are shared with the backend-evaluated pipeline so
//! both update paths split documents identically.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Error type for generator operations.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GeneratorError {
    /// Draw outside `[0, 1)`
    #[error("Draw {0} is outside [0, 1)")]
    DrawOutOfRange(f64),
}

/// The five mutually exclusive mutation categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationCategory {
    /// `[0.0, 0.2)` set `touchedByProcess` and `updatedAt`
    Touch,
    /// `[0.2, 0.4)` set `flag` from an independent coin flip
    Flag,
    /// `[0.4, 0.6)` set `score` to `uniform * 1000`
    Score,
    /// `[0.6, 0.8)` increment `visitCount`
    Visit,
    /// `[0.8, 1.0)` move `oldField` to `archivedField`
    Archive,
}

impl MutationCategory {
    pub const ALL: [MutationCategory; 5] = [
        MutationCategory::Touch,
        MutationCategory::Flag,
        MutationCategory::Score,
        MutationCategory::Visit,
        MutationCategory::Archive,
    ];

    /// Half-open `[lower, upper)` range of draws selecting this category.
    pub fn range(&self) -> (f64, f64) {
        match self {
            MutationCategory::Touch => (0.0, 0.2),
            MutationCategory::Flag => (0.2, 0.4),
            MutationCategory::Score => (0.4, 0.6),
            MutationCategory::Visit => (0.6, 0.8),
            MutationCategory::Archive => (0.8, 1.0),
        }
    }

    /// Select the category for a draw in `[0, 1)`.
    pub fn from_draw(r: f64) -> Result<Self, GeneratorError> {
        Self::ALL
            .into_iter()
            .find(|category| {
                let (lower, upper) = category.range();
                r >= lower && r < upper
            })
            .ok_or(GeneratorError::DrawOutOfRange(r))
    }
}

/// One legacy mutation, chosen per document on the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Touch {
        process_id: u32,
        at: DateTime<Utc>,
    },
    SetFlag(bool),
    SetScore(f64),
    IncrementVisits,
    Archive,
}

impl Mutation {
    pub fn category(&self) -> MutationCategory {
        match self {
            Mutation::Touch { .. } => MutationCategory::Touch,
            Mutation::SetFlag(_) => MutationCategory::Flag,
            Mutation::SetScore(_) => MutationCategory::Score,
            Mutation::IncrementVisits => MutationCategory::Visit,
            Mutation::Archive => MutationCategory::Archive,
        }
    }
}

/// Draws legacy mutations.
pub struct MutationGenerator {
    rng: StdRng,
    process_id: u32,
}

impl MutationGenerator {
    pub fn new(seed: u64, process_id: u32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            process_id,
        }
    }

    /// Seeded from the operating system, tagged with the current process id.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
            process_id: std::process::id(),
        }
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// Draw one mutation.
    pub fn next_mutation(&mut self) -> Mutation {
        let r = self.rng.random::<f64>();
        // `random::<f64>()` is always in [0, 1)
        let category = MutationCategory::from_draw(r).unwrap_or(MutationCategory::Archive);
        self.mutation_for(category)
    }

    /// Build a mutation of the given category, drawing any values it needs.
    pub fn mutation_for(&mut self, category: MutationCategory) -> Mutation {
        match category {
            MutationCategory::Touch => Mutation::Touch {
                process_id: self.process_id,
                at: Utc::now(),
            },
            MutationCategory::Flag => Mutation::SetFlag(self.rng.random_bool(0.5)),
            MutationCategory::Score => Mutation::SetScore(self.rng.random::<f64>() * 1000.0),
            MutationCategory::Visit => Mutation::IncrementVisits,
            MutationCategory::Archive => Mutation::Archive,
        }
    }
}
