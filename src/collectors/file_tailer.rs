use crate::collectors::offset_store::OffsetStore;
use crate::collectors::segmenter::Segmenter;
use crate::detection::RuleSet;
use crate::error::CollectorError;
use crate::events::LogEvent;
use log::{debug, info, warn};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Tuning knobs for one scan cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailerConfig {
    /// Upper bound on files read concurrently
    pub max_workers: usize,
    /// Context lines captured on each side of an event
    pub context_lines: usize,
    /// Deadline for a whole scan cycle
    pub scan_timeout: Duration,
    /// Capacity of the per-file result channel
    pub buffer_size: usize,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            context_lines: 5,
            scan_timeout: Duration::from_secs(30),
            buffer_size: 1000,
        }
    }
}

/// Outcome of a scan over a set of files
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Events from every file that produced any, in per-file order
    pub events: Vec<LogEvent>,
    /// Per-file failures plus the timeout, if one fired
    pub errors: Vec<CollectorError>,
    /// Whether the scan deadline cancelled in-flight work
    pub timed_out: bool,
    /// Files whose scan completed (possibly cut short by cancellation)
    pub files_scanned: usize,
}

/// Bytes appended to a file since its cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendedChunk {
    /// Decoded lines without their terminators
    pub lines: Vec<String>,
    /// Offset where reading started (0 after a rotation reset)
    pub start_offset: u64,
    /// Offset just past the last line read
    pub end_offset: u64,
}

/// Result of scanning a single file
#[derive(Debug)]
pub struct FileScan {
    pub events: Vec<LogEvent>,
    /// Cursor after the scan
    pub offset: u64,
    /// Set when the new cursor could not be persisted
    pub persist_error: Option<CollectorError>,
}

/// Incrementally reads appended lines from many files at once
///
/// Each scan hands the paths to a bounded pool of tokio tasks. A task loads the file's
/// cursor, reads what was appended since (blocking I/O runs on the blocking pool),
/// segments the lines into events and persists the new cursor. A per-scan deadline
/// cancels outstanding reads; whatever was read before that point is still reported.
pub struct Tailer {
    config: TailerConfig,
    segmenter: Arc<Segmenter>,
    store: Arc<dyn OffsetStore>,
}

impl Tailer {
    /// Create a tailer
    ///
    /// # Arguments
    ///
    /// * `config` - Worker, context and deadline settings
    /// * `rules` - Shared detection tables used for segmentation
    /// * `host` - Host name stamped on emitted events
    /// * `store` - Cursor persistence
    pub fn new(
        config: TailerConfig,
        rules: Arc<RuleSet>,
        host: impl Into<String>,
        store: Arc<dyn OffsetStore>,
    ) -> Self {
        let segmenter = Arc::new(Segmenter::new(rules, host, config.context_lines));
        Self {
            config,
            segmenter,
            store,
        }
    }

    pub fn config(&self) -> &TailerConfig {
        &self.config
    }

    /// Scan the files once with a fresh cancellation scope
    pub async fn scan(&self, paths: &[PathBuf]) -> ScanReport {
        self.scan_until(paths, &CancellationToken::new()).await
    }

    /// Scan the files once, also stopping early when `shutdown` is cancelled
    ///
    /// When the scan deadline fires, files already being read stop at their next line
    /// and their partial results are still collected, so the call returns once those
    /// reads notice the cancellation. A read stuck inside the filesystem or the offset
    /// store delays the return past the deadline. The reported
    /// [`CollectorError::Timeout`] carries the time at which the deadline fired.
    pub async fn scan_until(&self, paths: &[PathBuf], shutdown: &CancellationToken) -> ScanReport {
        let started = Instant::now();
        let mut report = ScanReport::default();
        if paths.is_empty() {
            return report;
        }

        let cancel = shutdown.child_token();

        let (work_tx, work_rx) = mpsc::channel(paths.len());
        for path in paths {
            // Capacity equals the number of paths, so this cannot fail
            let _ = work_tx.try_send(path.clone());
        }
        drop(work_tx);
        let work_rx = Arc::new(Mutex::new(work_rx));

        let (result_tx, mut result_rx) = mpsc::channel(self.config.buffer_size.max(1));
        let worker_count = self.config.max_workers.max(1).min(paths.len());
        let mut workers = JoinSet::new();

        for worker_id in 0..worker_count {
            let work_rx = Arc::clone(&work_rx);
            let result_tx = result_tx.clone();
            let store = Arc::clone(&self.store);
            let segmenter = Arc::clone(&self.segmenter);
            let cancel = cancel.clone();

            workers.spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let next = work_rx.lock().await.recv().await;
                    let Some(path) = next else { break };

                    debug!("Worker {} scanning {}", worker_id, path.display());
                    let outcome = {
                        let store = Arc::clone(&store);
                        let segmenter = Arc::clone(&segmenter);
                        let cancel = cancel.clone();
                        let path = path.clone();
                        tokio::task::spawn_blocking(move || {
                            scan_file(&path, store.as_ref(), &segmenter, &cancel)
                        })
                        .await
                        .unwrap_or_else(|e| Err(CollectorError::Worker(e.to_string())))
                    };

                    if result_tx.send((path, outcome)).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut finished = 0usize;
        let collect = async {
            while let Some((path, outcome)) = result_rx.recv().await {
                finished += 1;
                absorb(&mut report, &path, outcome);
            }
        };

        if tokio::time::timeout(self.config.scan_timeout, collect).await.is_err() {
            let elapsed_ms = started.elapsed().as_millis();
            let pending = paths.len().saturating_sub(finished);
            warn!(
                "Scan deadline of {:?} reached with {} file(s) unfinished, cancelling",
                self.config.scan_timeout, pending
            );
            cancel.cancel();

            while let Some((path, outcome)) = result_rx.recv().await {
                absorb(&mut report, &path, outcome);
            }
            report.timed_out = true;
            debug!(
                "Drained in-flight reads {:?} after the deadline",
                started.elapsed().saturating_sub(self.config.scan_timeout)
            );
            report.errors.push(CollectorError::Timeout { elapsed_ms, pending });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                report.errors.push(CollectorError::Worker(e.to_string()));
            }
        }

        info!(
            "Scanned {} of {} file(s): {} event(s), {} error(s) in {:?}",
            report.files_scanned,
            paths.len(),
            report.events.len(),
            report.errors.len(),
            started.elapsed()
        );
        report
    }
}

fn absorb(report: &mut ScanReport, path: &Path, outcome: Result<FileScan, CollectorError>) {
    match outcome {
        Ok(scan) => {
            report.files_scanned += 1;
            report.events.extend(scan.events);
            if let Some(e) = scan.persist_error {
                report.errors.push(e);
            }
        }
        Err(e) => {
            warn!("Failed to scan {}: {}", path.display(), e);
            report.errors.push(e);
        }
    }
}

/// Scan one file: load its cursor, read appended lines, segment, persist
///
/// A cursor that cannot be loaded is treated as 0. A cursor that cannot be saved is
/// returned in [`FileScan::persist_error`] without discarding the events.
///
/// # Errors
///
/// Returns `CollectorError::Read` when the file cannot be opened or read.
pub fn scan_file(
    path: &Path,
    store: &dyn OffsetStore,
    segmenter: &Segmenter,
    cancel: &CancellationToken,
) -> Result<FileScan, CollectorError> {
    let offset = store.load(path).unwrap_or_else(|e| {
        warn!("Could not load offset for {}: {}, reading from start", path.display(), e);
        0
    });

    let chunk = read_appended(path, offset, cancel)?;
    if chunk.end_offset == offset {
        return Ok(FileScan {
            events: Vec::new(),
            offset,
            persist_error: None,
        });
    }

    let events = segmenter.segment(&path.to_string_lossy(), &chunk.lines);

    let persist_error = match store.save(path, chunk.end_offset) {
        Ok(()) => None,
        Err(e) => {
            warn!("{}", e);
            Some(e)
        }
    };

    Ok(FileScan {
        events,
        offset: chunk.end_offset,
        persist_error,
    })
}

/// Read the complete lines appended to `path` after `offset`
///
/// When the file is smaller than `offset` it was truncated or rotated and reading
/// restarts at 0. A trailing line without a terminator is still being written and is
/// left for the next scan. Cancellation is checked before every line; the returned
/// end offset always sits just past the last complete line read.
///
/// # Errors
///
/// Returns `CollectorError::Read` when the file cannot be opened, sized or read.
pub fn read_appended(
    path: &Path,
    offset: u64,
    cancel: &CancellationToken,
) -> Result<AppendedChunk, CollectorError> {
    let read_err = |source: std::io::Error| CollectorError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(read_err)?;
    let size = file.metadata().map_err(read_err)?.len();

    let start = if size < offset {
        warn!(
            "{} shrank from {} to {} bytes, assuming rotation and reading from the start",
            path.display(),
            offset,
            size
        );
        0
    } else {
        offset
    };

    let mut chunk = AppendedChunk {
        lines: Vec::new(),
        start_offset: start,
        end_offset: start,
    };
    if size == start {
        return Ok(chunk);
    }

    file.seek(SeekFrom::Start(start)).map_err(read_err)?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();

    loop {
        if cancel.is_cancelled() {
            debug!("Read of {} cancelled at offset {}", path.display(), chunk.end_offset);
            break;
        }
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).map_err(read_err)?;
        if n == 0 {
            break;
        }
        if buf.last() != Some(&b'\n') {
            debug!(
                "{} ends with a partial line of {} byte(s), leaving it for the next scan",
                path.display(),
                n
            );
            break;
        }
        chunk.end_offset += n as u64;

        let mut line = String::from_utf8_lossy(&buf[..n - 1]).into_owned();
        if line.ends_with('\r') {
            line.pop();
        }
        chunk.lines.push(line);
    }

    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::offset_store::{FileOffsetStore, MockOffsetStore};
    use std::fs;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn write_log(contents: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    fn segmenter() -> Segmenter {
        Segmenter::new(Arc::new(RuleSet::with_defaults()), "test-host", 1)
    }

    fn tailer(store: Arc<dyn OffsetStore>) -> Tailer {
        Tailer::new(
            TailerConfig {
                max_workers: 2,
                context_lines: 1,
                scan_timeout: Duration::from_secs(10),
                buffer_size: 4,
            },
            Arc::new(RuleSet::with_defaults()),
            "test-host",
            store,
        )
    }

    #[test]
    fn test_read_appended_from_offset() {
        let file = write_log(b"first\nsecond\nthird\n");
        let cancel = CancellationToken::new();

        let chunk = read_appended(file.path(), 6, &cancel).unwrap();
        assert_eq!(chunk.lines, vec!["second", "third"]);
        assert_eq!(chunk.start_offset, 6);
        assert_eq!(chunk.end_offset, 19);
    }

    #[test]
    fn test_read_appended_no_new_bytes() {
        let file = write_log(b"only\n");
        let chunk = read_appended(file.path(), 5, &CancellationToken::new()).unwrap();
        assert!(chunk.lines.is_empty());
        assert_eq!(chunk.end_offset, 5);
    }

    #[test]
    fn test_read_appended_resets_after_rotation() {
        let file = write_log(b"fresh\n");
        let chunk = read_appended(file.path(), 500, &CancellationToken::new()).unwrap();
        assert_eq!(chunk.start_offset, 0);
        assert_eq!(chunk.lines, vec!["fresh"]);
        assert_eq!(chunk.end_offset, 6);
    }

    #[test]
    fn test_read_appended_leaves_partial_line_and_trims_crlf() {
        let mut file = write_log(b"one\r\ntw");
        let cancel = CancellationToken::new();

        let chunk = read_appended(file.path(), 0, &cancel).unwrap();
        assert_eq!(chunk.lines, vec!["one"]);
        assert_eq!(chunk.end_offset, 5);

        // The writer finishes the line
        file.write_all(b"o\n").unwrap();
        file.flush().unwrap();
        let chunk = read_appended(file.path(), chunk.end_offset, &cancel).unwrap();
        assert_eq!(chunk.lines, vec!["two"]);
        assert_eq!(chunk.end_offset, 9);
    }

    #[test]
    fn test_read_appended_decodes_lossily() {
        let file = write_log(b"bad \xff byte\n");
        let chunk = read_appended(file.path(), 0, &CancellationToken::new()).unwrap();
        assert_eq!(chunk.lines.len(), 1);
        assert!(chunk.lines[0].starts_with("bad "));
        assert!(chunk.lines[0].ends_with(" byte"));
    }

    #[test]
    fn test_read_appended_cancelled_reads_nothing() {
        let file = write_log(b"ERROR a\nERROR b\n");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let chunk = read_appended(file.path(), 0, &cancel).unwrap();
        assert!(chunk.lines.is_empty());
        assert_eq!(chunk.end_offset, 0);
    }

    #[test]
    fn test_read_appended_missing_file() {
        let result = read_appended(Path::new("/nonexistent/x.log"), 0, &CancellationToken::new());
        assert!(matches!(result, Err(CollectorError::Read { .. })));
    }

    #[test]
    fn test_scan_file_persists_end_offset() {
        let file = write_log(b"ERROR boom\nok\n");
        let mut store = MockOffsetStore::new();
        store.expect_load().times(1).returning(|_| Ok(0));
        store
            .expect_save()
            .withf(|_, offset| *offset == 14)
            .times(1)
            .returning(|_, _| Ok(()));

        let scan = scan_file(file.path(), &store, &segmenter(), &CancellationToken::new()).unwrap();
        assert_eq!(scan.events.len(), 1);
        assert_eq!(scan.offset, 14);
        assert!(scan.persist_error.is_none());
    }

    #[test]
    fn test_scan_file_without_new_bytes_skips_save() {
        let file = write_log(b"ERROR boom\n");
        let mut store = MockOffsetStore::new();
        store.expect_load().returning(|_| Ok(11));
        store.expect_save().times(0);

        let scan = scan_file(file.path(), &store, &segmenter(), &CancellationToken::new()).unwrap();
        assert!(scan.events.is_empty());
        assert_eq!(scan.offset, 11);
    }

    #[test]
    fn test_scan_file_load_failure_reads_from_start() {
        let file = write_log(b"FATAL down\n");
        let mut store = MockOffsetStore::new();
        store
            .expect_load()
            .returning(|_| Err(CollectorError::Worker("offset backend unavailable".to_string())));
        store.expect_save().returning(|_, _| Ok(()));

        let scan = scan_file(file.path(), &store, &segmenter(), &CancellationToken::new()).unwrap();
        assert_eq!(scan.events.len(), 1);
        assert_eq!(scan.events[0].severity_score, 10);
    }

    #[test]
    fn test_scan_file_keeps_events_when_save_fails() {
        let file = write_log(b"ERROR boom\n");
        let mut store = MockOffsetStore::new();
        store.expect_load().returning(|_| Ok(0));
        store.expect_save().returning(|path, _| {
            Err(CollectorError::OffsetPersist {
                path: path.to_path_buf(),
                reason: "read-only filesystem".to_string(),
            })
        });

        let scan = scan_file(file.path(), &store, &segmenter(), &CancellationToken::new()).unwrap();
        assert_eq!(scan.events.len(), 1);
        assert!(matches!(
            scan.persist_error,
            Some(CollectorError::OffsetPersist { .. })
        ));
    }

    #[tokio::test]
    async fn test_scan_multiple_files_then_rescan_is_empty() {
        let offsets = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        let paths: Vec<PathBuf> = (0..3)
            .map(|i| {
                let path = logs.path().join(format!("svc{}.log", i));
                fs::write(&path, format!("started\nERROR worker {} crashed\nok\n", i)).unwrap();
                path
            })
            .collect();

        let tailer = tailer(Arc::new(FileOffsetStore::new(offsets.path())));

        let first = tailer.scan(&paths).await;
        assert_eq!(first.files_scanned, 3);
        assert_eq!(first.events.len(), 3);
        assert!(first.errors.is_empty());
        assert!(!first.timed_out);
        for event in &first.events {
            assert_eq!(event.line_number, 2);
            assert_eq!(event.context_lines, vec!["started", "ok"]);
        }

        let second = tailer.scan(&paths).await;
        assert!(second.events.is_empty());
        assert!(second.errors.is_empty());
    }

    #[tokio::test]
    async fn test_scan_reads_only_appended_lines() {
        let offsets = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        let path = logs.path().join("app.log");
        fs::write(&path, "ERROR first\n").unwrap();

        let tailer = tailer(Arc::new(FileOffsetStore::new(offsets.path())));
        assert_eq!(tailer.scan(&[path.clone()]).await.events.len(), 1);

        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "Exception in worker").unwrap();

        let report = tailer.scan(&[path]).await;
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].raw_lines, vec!["Exception in worker"]);
        assert_eq!(report.events[0].line_number, 1);
    }

    #[tokio::test]
    async fn test_missing_file_does_not_discard_others() {
        let offsets = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        let good = logs.path().join("good.log");
        fs::write(&good, "Panic: stack overflow\n").unwrap();
        let missing = logs.path().join("missing.log");

        let tailer = tailer(Arc::new(FileOffsetStore::new(offsets.path())));
        let report = tailer.scan(&[missing, good]).await;

        assert_eq!(report.events.len(), 1);
        assert_eq!(report.files_scanned, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], CollectorError::Read { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_shutdown_scans_nothing() {
        let offsets = TempDir::new().unwrap();
        let file = write_log(b"ERROR boom\n");
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let tailer = tailer(Arc::new(FileOffsetStore::new(offsets.path())));
        let report = tailer.scan_until(&[file.path().to_path_buf()], &shutdown).await;

        assert!(report.events.is_empty());
        assert!(!report.timed_out);
    }

    /// Offset store whose loads block for files named `slow*`
    #[derive(Default)]
    struct SlowStore {
        saved: std::sync::Mutex<Vec<(PathBuf, u64)>>,
    }

    impl OffsetStore for SlowStore {
        fn load(&self, path: &Path) -> Result<u64, CollectorError> {
            let slow = path
                .file_name()
                .map_or(false, |name| name.to_string_lossy().starts_with("slow"));
            if slow {
                std::thread::sleep(Duration::from_millis(400));
            }
            Ok(0)
        }

        fn save(&self, path: &Path, offset: u64) -> Result<(), CollectorError> {
            self.saved.lock().unwrap().push((path.to_path_buf(), offset));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_scan_deadline_returns_partial_results() {
        let logs = TempDir::new().unwrap();
        let fast = logs.path().join("fast.log");
        let slow = logs.path().join("slow.log");
        fs::write(&fast, "ERROR fast path failed\n").unwrap();
        fs::write(&slow, "ERROR slow path failed\n").unwrap();

        let store = Arc::new(SlowStore::default());
        let tailer = Tailer::new(
            TailerConfig {
                max_workers: 2,
                context_lines: 1,
                scan_timeout: Duration::from_millis(150),
                buffer_size: 4,
            },
            Arc::new(RuleSet::with_defaults()),
            "test-host",
            Arc::clone(&store) as Arc<dyn OffsetStore>,
        );

        let report = tailer.scan(&[fast.clone(), slow]).await;

        assert!(report.timed_out);
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].raw_lines, vec!["ERROR fast path failed"]);

        let timeouts: Vec<_> = report
            .errors
            .iter()
            .filter_map(|e| match e {
                CollectorError::Timeout { elapsed_ms, pending } => Some((*elapsed_ms, *pending)),
                _ => None,
            })
            .collect();
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].1, 1);
        assert!(timeouts[0].0 >= 150 && timeouts[0].0 < 400);

        // Only the file that finished moved its cursor
        let saved = store.saved.lock().unwrap();
        assert_eq!(saved.as_slice(), &[(fast, 23)]);
    }

    #[tokio::test]
    async fn test_empty_path_list() {
        let offsets = TempDir::new().unwrap();
        let tailer = tailer(Arc::new(FileOffsetStore::new(offsets.path())));
        let report = tailer.scan(&[]).await;
        assert_eq!(report.files_scanned, 0);
        assert!(report.events.is_empty());
    }
}
