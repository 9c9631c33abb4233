//! Incremental tailing of the server log file.
//!
//! [`LogTailer`] is a synchronous cursor over one path: each call to
//! [`LogTailer::next_line`] hands out at most one complete line and only then
//! commits the cursor past it. Rotation (the path now names a different file)
//! and truncation (the file shrank below the cursor) restart reading at
//! offset 0. [`run_tailer`] drives a tailer on a poll interval, woken early by
//! filesystem notifications, and pushes lines into a bounded channel.
//!
//! Reads use `std::fs` since they are quick local operations.

use std::collections::VecDeque;
use std::fs::{self, File, Metadata};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Lines longer than this are skipped without being held in memory.
const MAX_LINE_LEN: usize = 1_048_576;

/// Upper bound on lines read from disk in one go.
const MAX_BATCH_LINES: usize = 1024;

/// Result of asking the tailer for the next line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailItem {
    /// A complete line, without its line terminator.
    Line(String),
    /// No complete line is available yet.
    Pending,
    /// The file was replaced or truncated; reading restarts at offset 0.
    Rotated,
}

/// Where to start reading the first time the file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Read the existing content too.
    Beginning,
    /// Only read lines appended after opening.
    End,
}

/// Transient tailing failure. The driver retries these with backoff.
#[derive(Debug, thiserror::Error)]
pub enum TailError {
    /// The log file exists but could not be read.
    #[error("failed to read log file {path}: {source}")]
    Io {
        /// Path being tailed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Identity of the file behind a path, used to detect rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
    #[cfg(not(unix))]
    created: Option<std::time::SystemTime>,
}

impl FileIdentity {
    /// Fingerprint the file described by `meta`.
    pub fn of(meta: &Metadata) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            Self {
                dev: meta.dev(),
                ino: meta.ino(),
            }
        }
        #[cfg(not(unix))]
        {
            Self {
                created: meta.created().ok(),
            }
        }
    }
}

/// Committed read position: everything before `offset` has been handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TailCursor {
    /// Byte offset just past the last returned line.
    pub offset: u64,
    /// Identity of the file the offset refers to, once it has been seen.
    pub identity: Option<FileIdentity>,
}

#[derive(Debug)]
struct BufferedLine {
    text: String,
    end: u64,
}

/// Cursor-based reader over a growing, rotating log file.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    cursor: TailCursor,
    buffered: VecDeque<BufferedLine>,
    scanned_to: u64,
    /// Inside an oversized line whose newline has not been read yet.
    skipping: bool,
}

impl LogTailer {
    /// Start tailing `path`.
    ///
    /// A missing file is not an error: the tailer reports
    /// [`TailItem::Pending`] until it appears and then reads it from the start.
    pub fn open(path: impl Into<PathBuf>, start: StartPosition) -> Self {
        let path = path.into();
        let mut cursor = TailCursor::default();
        match fs::metadata(&path) {
            Ok(meta) => {
                cursor.identity = Some(FileIdentity::of(&meta));
                if start == StartPosition::End {
                    cursor.offset = meta.len();
                }
            }
            Err(e) => debug!(path = %path.display(), error = %e, "log file not readable yet"),
        }
        Self {
            path,
            cursor,
            buffered: VecDeque::new(),
            scanned_to: cursor.offset,
            skipping: false,
        }
    }

    /// Resume from a previously committed cursor.
    pub fn resume(path: impl Into<PathBuf>, cursor: TailCursor) -> Self {
        Self {
            path: path.into(),
            cursor,
            buffered: VecDeque::new(),
            scanned_to: cursor.offset,
            skipping: false,
        }
    }

    /// Path being tailed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Committed cursor.
    pub fn cursor(&self) -> TailCursor {
        self.cursor
    }

    /// Return the next complete line, [`TailItem::Pending`] or
    /// [`TailItem::Rotated`].
    ///
    /// # Errors
    ///
    /// Returns [`TailError::Io`] if the file exists but cannot be inspected
    /// or read. The cursor is left untouched, so retrying is safe.
    pub fn next_line(&mut self) -> Result<TailItem, TailError> {
        if let Some(line) = self.take_buffered() {
            return Ok(TailItem::Line(line));
        }

        let meta = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(TailItem::Pending),
            Err(e) => return Err(self.io_error(e)),
        };
        let identity = FileIdentity::of(&meta);

        match self.cursor.identity {
            None => {
                // The file appeared after we started; all of it is new.
                self.reset(Some(identity));
            }
            Some(known) if known != identity => {
                info!(path = %self.path.display(), "log file replaced, reading from start");
                self.reset(Some(identity));
                return Ok(TailItem::Rotated);
            }
            Some(_) if meta.len() < self.cursor.offset => {
                info!(
                    path = %self.path.display(),
                    size = meta.len(),
                    offset = self.cursor.offset,
                    "log file truncated, reading from start"
                );
                self.reset(Some(identity));
                return Ok(TailItem::Rotated);
            }
            Some(_) => {}
        }

        if meta.len() == self.cursor.offset {
            return Ok(TailItem::Pending);
        }

        self.fill_buffer(identity)?;
        Ok(self
            .take_buffered()
            .map_or(TailItem::Pending, TailItem::Line))
    }

    fn take_buffered(&mut self) -> Option<String> {
        let line = self.buffered.pop_front()?;
        self.cursor.offset = if self.buffered.is_empty() {
            // Anything between the last line and `scanned_to` was skipped.
            self.scanned_to.max(line.end)
        } else {
            line.end
        };
        Some(line.text)
    }

    fn reset(&mut self, identity: Option<FileIdentity>) {
        self.buffered.clear();
        self.cursor = TailCursor {
            offset: 0,
            identity,
        };
        self.scanned_to = 0;
        self.skipping = false;
    }

    fn fill_buffer(&mut self, expected: FileIdentity) -> Result<(), TailError> {
        let file = File::open(&self.path).map_err(|e| self.io_error(e))?;
        let meta = file.metadata().map_err(|e| self.io_error(e))?;
        if FileIdentity::of(&meta) != expected {
            // Swapped between stat and open; the next call sees the new file.
            return Ok(());
        }

        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(self.cursor.offset))
            .map_err(|e| self.io_error(e))?;

        let mut position = self.cursor.offset;
        let scanned = self.scan_lines(&mut reader, &mut position);

        // Bytes before `position` were consumed even if a later read failed.
        self.scanned_to = position;
        if self.buffered.is_empty() {
            self.cursor.offset = position;
        }
        scanned.map_err(|e| self.io_error(e))
    }

    fn scan_lines(&mut self, reader: &mut impl BufRead, position: &mut u64) -> std::io::Result<()> {
        let line_limit = u64::try_from(MAX_LINE_LEN)
            .unwrap_or(u64::MAX)
            .saturating_add(1);
        let mut bytes = Vec::new();
        let mut lines_read: usize = 0;

        while lines_read < MAX_BATCH_LINES {
            if self.skipping {
                let (consumed, found) = discard_line(reader)?;
                *position = position.saturating_add(consumed);
                if !found {
                    break;
                }
                self.skipping = false;
                lines_read = lines_read.saturating_add(1);
                continue;
            }

            bytes.clear();
            let read = Read::take(&mut *reader, line_limit).read_until(b'\n', &mut bytes)?;
            if read > MAX_LINE_LEN {
                warn!(path = %self.path.display(), "skipping oversized log line");
                *position = position.saturating_add(u64::try_from(read).unwrap_or(u64::MAX));
                self.skipping = bytes.last() != Some(&b'\n');
                if !self.skipping {
                    lines_read = lines_read.saturating_add(1);
                }
                continue;
            }
            if read == 0 || bytes.last() != Some(&b'\n') {
                // End of data or a partial line still being written.
                break;
            }
            *position = position.saturating_add(u64::try_from(read).unwrap_or(u64::MAX));
            lines_read = lines_read.saturating_add(1);

            let text = String::from_utf8_lossy(&bytes);
            let text = text.trim_end_matches(['\r', '\n']);
            if text.trim().is_empty() {
                continue;
            }
            self.buffered.push_back(BufferedLine {
                text: text.to_owned(),
                end: *position,
            });
        }
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> TailError {
        TailError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Consume bytes up to and including the next newline. Returns the bytes
/// consumed and whether the newline was found.
fn discard_line(reader: &mut impl BufRead) -> std::io::Result<(u64, bool)> {
    let mut consumed: u64 = 0;
    loop {
        let chunk = reader.fill_buf()?;
        if chunk.is_empty() {
            return Ok((consumed, false));
        }
        let (used, found) = match chunk.iter().position(|b| *b == b'\n') {
            Some(index) => (index.saturating_add(1), true),
            None => (chunk.len(), false),
        };
        reader.consume(used);
        consumed = consumed.saturating_add(u64::try_from(used).unwrap_or(u64::MAX));
        if found {
            return Ok((consumed, true));
        }
    }
}

/// Timing for [`run_tailer`].
#[derive(Debug, Clone, Copy)]
pub struct TailerOptions {
    /// Sleep between polls when no new data is available.
    pub poll_interval: Duration,
    /// Ceiling for the backoff applied after read errors.
    pub max_backoff: Duration,
}

impl Default for TailerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Drive `tailer` until shutdown, sending every new line to `lines_tx`.
///
/// Read errors are logged and retried with capped exponential backoff; they
/// never end the loop. Returns the final cursor so a caller can resume.
pub async fn run_tailer(
    mut tailer: LogTailer,
    options: TailerOptions,
    lines_tx: mpsc::Sender<String>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> TailCursor {
    // The local sender keeps `wake_rx` open when no watcher could be started.
    let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
    let _watcher = watch_log_dir(tailer.path(), wake_tx.clone());
    let mut backoff = options.poll_interval;

    info!(path = %tailer.path().display(), "log tailer started");

    loop {
        let wait = match tailer.next_line() {
            Ok(TailItem::Line(line)) => {
                backoff = options.poll_interval;
                tokio::select! {
                    sent = lines_tx.send(line) => {
                        if sent.is_err() {
                            debug!("line consumer gone, stopping tailer");
                            break;
                        }
                    }
                    () = crate::shutdown::requested(&mut shutdown_rx) => break,
                }
                continue;
            }
            Ok(TailItem::Rotated) => continue,
            Ok(TailItem::Pending) => {
                backoff = options.poll_interval;
                options.poll_interval
            }
            Err(e) => {
                let wait = backoff;
                warn!(
                    error = %e,
                    retry_in_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    "log read failed, retrying"
                );
                backoff = backoff.saturating_mul(2).min(options.max_backoff);
                wait
            }
        };

        tokio::select! {
            () = tokio::time::sleep(wait) => {}
            _ = wake_rx.recv() => {}
            () = crate::shutdown::requested(&mut shutdown_rx) => break,
        }
    }

    info!(offset = tailer.cursor().offset, "log tailer stopped");
    tailer.cursor()
}

/// Watch the log's directory so appends wake the tailer before the next poll.
///
/// Falls back to pure polling (returns `None`) if the watcher cannot start.
fn watch_log_dir(path: &Path, wake_tx: mpsc::Sender<()>) -> Option<RecommendedWatcher> {
    let dir = path.parent().filter(|p| p.is_dir())?;
    let watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        if event.is_ok() {
            // A full channel already holds a pending wake-up.
            let _ = wake_tx.try_send(());
        }
    });
    let mut watcher = match watcher {
        Ok(watcher) => watcher,
        Err(e) => {
            warn!(error = %e, "file watcher unavailable, polling only");
            return None;
        }
    };
    if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
        warn!(dir = %dir.display(), error = %e, "failed to watch log directory, polling only");
        return None;
    }
    Some(watcher)
}
