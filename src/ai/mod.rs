/// AI analyzer and backend implementations
pub mod analyzer;
pub mod backends;

pub use analyzer::AIAnalyzer;
pub use backends::{ChatCompletionBackend, DisabledBackend, MockBackend, Summarizer};
