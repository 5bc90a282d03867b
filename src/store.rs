//! Persisted delegation log: a single JSON document with a fixed-width cursor header and a newest-first record array
// src/store.rs
use crate::constants::{
    ARTIFACT_CLOSING, BODY_OPENING, BODY_SEAM_OFFSET, EMPTY_ARTIFACT, HEADER_PREFIX, TEMP_SUFFIX,
    TIMESTAMP_LEN, TIMESTAMP_OFFSET, ZERO_TIMESTAMP,
};
use crate::delegation::Delegation;
use crate::error::StoreError;
use chrono::DateTime;
use log::{debug, info, warn};
use serde::Deserialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

/// Capability the ingestion engine and the read endpoint need from a log
///
/// There is exactly one writer. Readers only ever get a copy of the bytes.
pub trait DelegationStore: Send + Sync {
    /// Timestamp of the newest record, or [`ZERO_TIMESTAMP`] for an empty log
    fn cursor(&self) -> String;

    /// Prepends a batch that is already sorted newest-first
    ///
    /// Every record must be at least as new as the current cursor. An empty
    /// batch is a no-op.
    fn append_newest_batch(&self, batch: &[Delegation]) -> Result<(), StoreError>;

    /// Full artifact bytes (header and body)
    fn read_all(&self) -> Result<Vec<u8>, StoreError>;

    /// Releases the underlying resources; calling it twice is harmless
    fn close(&self);
}

/// Decoded view of an artifact, for readers that need the records
#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "lastTimestamp")]
    pub last_timestamp: String,
    pub data: Vec<Delegation>,
}

impl Snapshot {
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

struct LogState {
    file: Option<File>,
    cursor: String,
}

/// File-backed log using the legacy `{"lastTimestamp":"…","data":[…]}` layout
///
/// The cursor lives at a fixed byte offset, so opening the log only reads the
/// header. Every commit writes the new document to a scratch file, syncs it,
/// and renames it over the artifact; a crash leaves either the old or the new
/// document, never a mix.
///
/// The scratch file holds the new records followed by a streamed copy of the
/// old body, so a commit costs time and disk I/O proportional to the whole log,
/// not just to the batch.
///
/// A log opened with [`FileLog::open_read_only`] never writes. It leaves the
/// scratch file of another process alone and re-reads the cursor from the
/// header on every call.
pub struct FileLog {
    path: PathBuf,
    temp_path: PathBuf,
    read_only: bool,
    state: RwLock<LogState>,
}

impl FileLog {
    /// Opens the artifact at `path`, creating an empty log if it is missing
    pub fn open_or_initialize(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let temp_path = temp_path_for(&path);

        // A scratch file only survives a crash mid-commit; it was never renamed, so drop it
        match fs::remove_file(&temp_path) {
            Ok(()) => warn!("removed incomplete commit {}", temp_path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(unavailable(&temp_path, e)),
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| unavailable(&path, e))?;

        let len = file.metadata().map_err(|e| unavailable(&path, e))?.len();

        let cursor = if len == 0 {
            file.write_all(EMPTY_ARTIFACT.as_bytes())
                .and_then(|_| file.sync_all())
                .map_err(|e| unavailable(&path, e))?;
            info!("initialized empty delegation log at {}", path.display());
            ZERO_TIMESTAMP.to_string()
        } else {
            let cursor = read_header(&mut file, len, &path)?;
            debug!("recovered cursor {} from {}", cursor, path.display());
            cursor
        };

        Ok(Self {
            path,
            temp_path,
            read_only: false,
            state: RwLock::new(LogState {
                file: Some(file),
                cursor,
            }),
        })
    }

    /// Opens an existing artifact for reading while another process owns the writes
    ///
    /// The artifact is never created and a scratch file is never removed.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let temp_path = temp_path_for(&path);
        let cursor = load_cursor(&path)?;
        debug!("opened {} read-only at cursor {}", path.display(), cursor);

        let file = File::open(&path).map_err(|e| unavailable(&path, e))?;
        Ok(Self {
            path,
            temp_path,
            read_only: true,
            state: RwLock::new(LogState {
                file: Some(file),
                cursor,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.read_state().file.is_none()
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, LogState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, LogState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Writes header, new records, and the old body into the scratch file
    ///
    /// Returns the scratch file handle, synced and ready to be renamed.
    fn write_spliced(&self, current: &File, head: &str, records: &[u8]) -> io::Result<File> {
        let mut source = current;
        let mut seam = [0u8; 1];
        source.seek(SeekFrom::Start(BODY_SEAM_OFFSET as u64))?;
        source.read_exact(&mut seam)?;
        let body_is_empty = seam[0] == b']';

        let scratch = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.temp_path)?;
        let mut writer = BufWriter::new(scratch);

        writer.write_all(HEADER_PREFIX.as_bytes())?;
        writer.write_all(head.as_bytes())?;
        writer.write_all(BODY_OPENING.as_bytes())?;
        writer.write_all(records)?;
        if !body_is_empty {
            writer.write_all(b",")?;
        }

        source.seek(SeekFrom::Start(BODY_SEAM_OFFSET as u64))?;
        io::copy(&mut source, &mut writer)?;

        let scratch = writer.into_inner().map_err(|e| e.into_error())?;
        scratch.sync_all()?;
        Ok(scratch)
    }
}

impl DelegationStore for FileLog {
    fn cursor(&self) -> String {
        if !self.read_only {
            return self.read_state().cursor.clone();
        }

        let mut state = self.write_state();
        if state.file.is_none() {
            return state.cursor.clone();
        }
        // Another process commits by renaming, so follow the path, not the handle
        match load_cursor(&self.path) {
            Ok(cursor) => state.cursor = cursor,
            Err(e) => warn!("keeping last known cursor {}: {}", state.cursor, e),
        }
        state.cursor.clone()
    }

    fn append_newest_batch(&self, batch: &[Delegation]) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let Some(newest) = batch.first() else {
            return Ok(());
        };
        validate_timestamp(&newest.timestamp)
            .map_err(|_| StoreError::InvalidTimestamp(newest.timestamp.clone()))?;

        let records = encode_records(batch)?;

        let mut state = self.write_state();
        let current = state.file.as_ref().ok_or(StoreError::Closed)?;

        let replacement = match self.write_spliced(current, &newest.timestamp, &records) {
            Ok(file) => file,
            Err(e) => {
                let _ = fs::remove_file(&self.temp_path);
                return Err(StoreError::persistence(format!(
                    "could not write {}: {}",
                    self.temp_path.display(),
                    e
                )));
            }
        };

        if let Err(e) = fs::rename(&self.temp_path, &self.path) {
            let _ = fs::remove_file(&self.temp_path);
            return Err(StoreError::persistence(format!(
                "could not replace {}: {}",
                self.path.display(),
                e
            )));
        }
        if let Err(e) = sync_parent_dir(&self.path) {
            warn!(
                "committed {} but could not sync its directory: {}",
                self.path.display(),
                e
            );
        }

        // The scratch handle now points at the live artifact
        state.file = Some(replacement);
        state.cursor = newest.timestamp.clone();

        debug!("{} new delegations have been added to the log", batch.len());
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<u8>, StoreError> {
        // Holding the read lock keeps a commit from swapping the file mid-read
        let state = self.read_state();
        if state.file.is_none() {
            return Err(StoreError::Closed);
        }
        fs::read(&self.path).map_err(|e| unavailable(&self.path, e))
    }

    fn close(&self) {
        let mut state = self.write_state();
        if state.file.take().is_some() {
            debug!("closed delegation log {}", self.path.display());
        }
    }
}

/// In-memory log with the same observable behavior as [`FileLog`]
///
/// Used by tests and by anything that wants to run the engine without disk I/O.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    cursor: Option<String>,
    records: Vec<Delegation>,
    batches: Vec<Vec<Delegation>>,
    fail_writes: bool,
    closed: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing newest-first log
    pub fn with_records(records: Vec<Delegation>) -> Self {
        let store = Self::default();
        {
            let mut inner = store.lock();
            inner.cursor = records.first().map(|d| d.timestamp.clone());
            inner.records = records;
        }
        store
    }

    /// Makes subsequent commits fail with `PersistenceWrite`
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Every committed batch, in commit order
    pub fn batches(&self) -> Vec<Vec<Delegation>> {
        self.lock().batches.clone()
    }

    /// Current log contents, newest first
    pub fn records(&self) -> Vec<Delegation> {
        self.lock().records.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DelegationStore for MemoryStore {
    fn cursor(&self) -> String {
        self.lock()
            .cursor
            .clone()
            .unwrap_or_else(|| ZERO_TIMESTAMP.to_string())
    }

    fn append_newest_batch(&self, batch: &[Delegation]) -> Result<(), StoreError> {
        let Some(newest) = batch.first() else {
            return Ok(());
        };
        let mut inner = self.lock();
        if inner.closed {
            return Err(StoreError::Closed);
        }
        if inner.fail_writes {
            return Err(StoreError::persistence("simulated write failure"));
        }
        inner.cursor = Some(newest.timestamp.clone());
        let mut records = batch.to_vec();
        records.append(&mut inner.records);
        inner.records = records;
        inner.batches.push(batch.to_vec());
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<u8>, StoreError> {
        let inner = self.lock();
        if inner.closed {
            return Err(StoreError::Closed);
        }
        let cursor = inner.cursor.as_deref().unwrap_or(ZERO_TIMESTAMP);
        let records = encode_records(&inner.records)?;
        let mut out = Vec::with_capacity(BODY_SEAM_OFFSET + records.len() + ARTIFACT_CLOSING.len());
        out.extend_from_slice(HEADER_PREFIX.as_bytes());
        out.extend_from_slice(cursor.as_bytes());
        out.extend_from_slice(BODY_OPENING.as_bytes());
        out.extend_from_slice(&records);
        out.extend_from_slice(ARTIFACT_CLOSING.as_bytes());
        Ok(out)
    }

    fn close(&self) {
        self.lock().closed = true;
    }
}

/// Serializes records as the comma-separated interior of a JSON array
fn encode_records(batch: &[Delegation]) -> Result<Vec<u8>, StoreError> {
    let mut encoded = serde_json::to_vec(batch)
        .map_err(|e| StoreError::persistence(format!("could not encode delegations: {}", e)))?;
    // Strip the enclosing brackets; the artifact provides its own
    encoded.pop();
    encoded.remove(0);
    Ok(encoded)
}

fn read_header(file: &mut File, len: u64, path: &Path) -> Result<String, StoreError> {
    let minimum = (BODY_SEAM_OFFSET + ARTIFACT_CLOSING.len()) as u64;
    if len < minimum {
        return Err(StoreError::malformed(
            path,
            format!("artifact is {} bytes, shorter than the {} byte header", len, minimum),
        ));
    }

    let mut header = [0u8; BODY_SEAM_OFFSET];
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_exact(&mut header))
        .map_err(|e| unavailable(path, e))?;

    if &header[..TIMESTAMP_OFFSET] != HEADER_PREFIX.as_bytes() {
        return Err(StoreError::malformed(path, "missing lastTimestamp header"));
    }
    if &header[TIMESTAMP_OFFSET + TIMESTAMP_LEN..] != BODY_OPENING.as_bytes() {
        return Err(StoreError::malformed(path, "missing data array after cursor"));
    }

    let cursor = std::str::from_utf8(&header[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + TIMESTAMP_LEN])
        .map_err(|_| StoreError::malformed(path, "cursor is not valid UTF-8"))?;
    validate_timestamp(cursor)
        .map_err(|reason| StoreError::malformed(path, format!("bad cursor {:?}: {}", cursor, reason)))?;

    let mut closing = [0u8; 2];
    file.seek(SeekFrom::End(-(ARTIFACT_CLOSING.len() as i64)))
        .and_then(|_| file.read_exact(&mut closing))
        .map_err(|e| unavailable(path, e))?;
    if closing != ARTIFACT_CLOSING.as_bytes() {
        return Err(StoreError::malformed(path, "data array is not terminated"));
    }

    Ok(cursor.to_string())
}

fn validate_timestamp(ts: &str) -> Result<(), String> {
    if ts.len() != TIMESTAMP_LEN {
        return Err(format!("expected {} characters, got {}", TIMESTAMP_LEN, ts.len()));
    }
    DateTime::parse_from_rfc3339(ts)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}

/// Reads and validates the header of the artifact at `path`
fn load_cursor(path: &Path) -> Result<String, StoreError> {
    let mut file = File::open(path).map_err(|e| unavailable(path, e))?;
    let len = file.metadata().map_err(|e| unavailable(path, e))?.len();
    read_header(&mut file, len, path)
}

/// Makes the rename durable
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()
}

fn unavailable(path: &Path, source: io::Error) -> StoreError {
    StoreError::StorageUnavailable {
        path: path.to_path_buf(),
        source,
    }
}
