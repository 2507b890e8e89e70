/// Concurrent incremental reader for growing log files
pub mod file_tailer;

/// Persistent per-file read cursors
pub mod offset_store;

/// Multi-line event segmentation
pub mod segmenter;

pub use file_tailer::{ScanReport, Tailer, TailerConfig};
pub use offset_store::{FileOffsetStore, OffsetStore};
pub use segmenter::Segmenter;
