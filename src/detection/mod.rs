/// Keyword, weight and special-pattern tables
pub mod rules;
pub mod classifier;

/// Event identifiers and content normalization
pub mod identity;

pub use classifier::{Classification, Classifier};
pub use identity::{content_hash, normalize_content, sha256_hex, IdentityResolver};
pub use rules::{PatternClass, RuleSet, TriggerKind};
