/// Signature cache for deduplication and correlation
pub mod correlator;

/// Levenshtein and word-overlap similarity
pub mod similarity;

pub use correlator::{CorrelationOutcome, Correlator, CorrelatorStats};
