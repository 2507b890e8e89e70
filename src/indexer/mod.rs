/// Search index records and writers
pub mod client;
pub mod record;

pub use client::{ElasticsearchIndexer, Indexer};
pub use record::IndexRecord;
