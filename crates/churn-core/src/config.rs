//! Collection configurations visited by the churn driver.

use std::fmt;

/// Document sizes (in bytes of payload) churned by default.
pub const DEFAULT_DOC_SIZES: [usize; 3] = [500, 1000, 2000];

/// Identity modes churned by default, custom ids first.
pub const DEFAULT_ID_MODES: [IdMode; 2] = [IdMode::CustomRandom, IdMode::Auto];

/// How inserted documents get their `_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdMode {
    /// Client assigns a uniformly random float in `[0, 1)`.
    CustomRandom,
    /// No `_id` is sent; the backend assigns one.
    Auto,
}

impl IdMode {
    /// Prefix used in collection names for this mode.
    pub fn collection_prefix(&self) -> &'static str {
        match self {
            IdMode::CustomRandom => "customID",
            IdMode::Auto => "sequentialID",
        }
    }
}

/// One entry of the fixed churn enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectionConfig {
    pub doc_size: usize,
    pub id_mode: IdMode,
}

impl CollectionConfig {
    pub fn new(doc_size: usize, id_mode: IdMode) -> Self {
        Self { doc_size, id_mode }
    }

    /// Collection name, e.g. `customID_500` or `sequentialID_2000`.
    pub fn collection_name(&self) -> String {
        format!("{}_{}", self.id_mode.collection_prefix(), self.doc_size)
    }

    /// Build the enumeration in visiting order: for each size, for each id mode.
    pub fn enumerate(doc_sizes: &[usize], id_modes: &[IdMode]) -> Vec<CollectionConfig> {
        doc_sizes
            .iter()
            .flat_map(|&size| id_modes.iter().map(move |&mode| Self::new(size, mode)))
            .collect()
    }

    /// The default 3 sizes x 2 id modes enumeration.
    pub fn default_set() -> Vec<CollectionConfig> {
        Self::enumerate(&DEFAULT_DOC_SIZES, &DEFAULT_ID_MODES)
    }
}

impl fmt::Display for CollectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.collection_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_names() {
        assert_eq!(
            CollectionConfig::new(500, IdMode::CustomRandom).collection_name(),
            "customID_500"
        );
        assert_eq!(
            CollectionConfig::new(2000, IdMode::Auto).collection_name(),
            "sequentialID_2000"
        );
    }

    #[test]
    fn test_default_set_order() {
        let names: Vec<String> = CollectionConfig::default_set()
            .iter()
            .map(|c| c.collection_name())
            .collect();

        assert_eq!(
            names,
            vec![
                "customID_500",
                "sequentialID_500",
                "customID_1000",
                "sequentialID_1000",
                "customID_2000",
                "sequentialID_2000",
            ]
        );
    }

    #[test]
    fn test_enumerate_empty() {
        assert!(CollectionConfig::enumerate(&[], &DEFAULT_ID_MODES).is_empty());
    }
}
