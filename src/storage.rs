/// File persistence: measurement log, alert state, single-instance lock.
///
/// - `MeasurementLog` — append-only CSV (`time,raw_distance,derived_level`)
/// - `JsonStateStore` — versioned JSON record holding `last_alert_time`
/// - `InstanceLock`   — lock file guarding the state against overlapping runs
///
/// Each measurement row is written with one `write_all` on an append-mode
/// handle and synced, so a crash never leaves half a row behind. The state
/// record is replaced atomically via write-to-temp + rename.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::model::{ALERT_STATE_VERSION, AlertState, Measurement, PersistenceError};

/// Header written to a fresh measurement log.
pub const CSV_HEADER: &str = "time,raw_distance,derived_level";

// ---------------------------------------------------------------------------
// Measurement log
// ---------------------------------------------------------------------------

/// Append-only CSV log of measurements, in chronological order.
#[derive(Debug, Clone)]
pub struct MeasurementLog {
    path: PathBuf,
}

impl MeasurementLog {
    /// Opens the log, creating it (and its parent directory) with the header
    /// if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        ensure_parent(&path)?;

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(format!("{}\n", CSV_HEADER).as_bytes())
                    .and_then(|_| file.sync_all())
                    .map_err(|e| PersistenceError::io(&path, e))?;
                tracing::info!(path = %path.display(), "created measurement log");
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let contents = fs::read_to_string(&path).map_err(|e| PersistenceError::io(&path, e))?;
                match contents.lines().next() {
                    None => {
                        // Empty file (e.g. created with touch): add the header.
                        append_line(&path, CSV_HEADER)?;
                    }
                    Some(first) if first.trim() == CSV_HEADER => {}
                    Some(first) => {
                        return Err(PersistenceError::Corrupt {
                            path,
                            reason: format!("unexpected header {:?}", first),
                        });
                    }
                }
            }
            Err(e) => return Err(PersistenceError::io(&path, e)),
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record.
    pub fn append(&self, measurement: &Measurement) -> Result<(), PersistenceError> {
        append_line(&self.path, &format_row(measurement))
    }

    /// Returns up to `limit` most recent records, oldest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<Measurement>, PersistenceError> {
        read_recent(&self.path, limit)
    }
}

fn append_line(path: &Path, line: &str) -> Result<(), PersistenceError> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| PersistenceError::io(path, e))?;

    let mut row = String::with_capacity(line.len() + 1);
    row.push_str(line);
    row.push('\n');

    file.write_all(row.as_bytes())
        .and_then(|_| file.sync_data())
        .map_err(|e| PersistenceError::io(path, e))
}

/// Formats a measurement as one CSV row (no trailing newline).
pub fn format_row(measurement: &Measurement) -> String {
    format!(
        "{},{},{}",
        measurement.time.to_rfc3339_opts(SecondsFormat::Millis, true),
        measurement.raw_distance_cm,
        measurement.level_cm.map(|l| l.to_string()).unwrap_or_default()
    )
}

/// Parses one CSV row produced by `format_row`.
pub fn parse_row(line: &str) -> Result<Measurement, String> {
    let fields: Vec<&str> = line.trim_end().split(',').collect();
    if fields.len() != 3 {
        return Err(format!("expected 3 fields, found {}", fields.len()));
    }

    let time = DateTime::parse_from_rfc3339(fields[0])
        .map_err(|e| format!("bad time {:?}: {}", fields[0], e))?
        .with_timezone(&Utc);
    let raw_distance_cm: f64 = fields[1]
        .parse()
        .map_err(|_| format!("bad raw_distance {:?}", fields[1]))?;
    let level_cm = if fields[2].is_empty() {
        None
    } else {
        Some(
            fields[2]
                .parse::<f64>()
                .map_err(|_| format!("bad derived_level {:?}", fields[2]))?,
        )
    };

    Ok(Measurement {
        time,
        raw_distance_cm,
        level_cm,
    })
}

/// Reads the last `limit` records of a measurement log without opening it
/// for writing. A missing file yields an empty list.
pub fn read_recent(path: &Path, limit: usize) -> Result<Vec<Measurement>, PersistenceError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PersistenceError::io(path, e)),
    };

    let rows: Vec<&str> = contents
        .lines()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .collect();
    let start = rows.len().saturating_sub(limit);

    rows[start..]
        .iter()
        .map(|line| {
            parse_row(line).map_err(|reason| PersistenceError::Corrupt {
                path: path.to_path_buf(),
                reason,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Alert state
// ---------------------------------------------------------------------------

/// Persistence for the single alert-state record.
pub trait StateStore {
    /// Reads the record, creating it with the far-past sentinel if absent.
    fn load_or_init(&self) -> Result<AlertState, PersistenceError>;

    /// Replaces the record.
    fn save(&self, state: &AlertState) -> Result<(), PersistenceError>;
}

/// `StateStore` backed by a small JSON file.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the record without creating it.
    pub fn load(&self) -> Result<Option<AlertState>, PersistenceError> {
        read_state(&self.path)
    }
}

impl StateStore for JsonStateStore {
    fn load_or_init(&self) -> Result<AlertState, PersistenceError> {
        if let Some(state) = read_state(&self.path)? {
            return Ok(state);
        }

        let state = AlertState::sentinel();
        self.save(&state)?;
        tracing::info!(path = %self.path.display(), "initialized alert state");
        Ok(state)
    }

    fn save(&self, state: &AlertState) -> Result<(), PersistenceError> {
        ensure_parent(&self.path)?;

        let json = serde_json::to_string_pretty(state).map_err(|e| PersistenceError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let tmp = sibling(&self.path, "tmp");
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };

        write().map_err(|e| {
            let _ = fs::remove_file(&tmp);
            PersistenceError::io(&self.path, e)
        })
    }
}

/// Reads a state record; `Ok(None)` when the file does not exist.
pub fn read_state(path: &Path) -> Result<Option<AlertState>, PersistenceError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistenceError::io(path, e)),
    };

    let state: AlertState = serde_json::from_str(&contents).map_err(|e| PersistenceError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if state.version != ALERT_STATE_VERSION {
        return Err(PersistenceError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: state.version,
            expected: ALERT_STATE_VERSION,
        });
    }

    Ok(Some(state))
}

// ---------------------------------------------------------------------------
// Single-instance lock
// ---------------------------------------------------------------------------

/// Held for the lifetime of the process so that overlapping invocations
/// (e.g. a slow cron run) never race on `last_alert_time`.
///
/// An exclusive, non-blocking `flock` on `<state file>.lock`. The kernel drops
/// the lock when the holder exits, so a crashed run never blocks the next
/// one. The file itself stays on disk and records the holder's PID for the
/// error message; it is never deleted, so two processes can't end up locking
/// different inodes.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Takes the lock next to `state_path` (`<state file>.lock`).
    pub fn acquire(state_path: &Path) -> Result<Self, PersistenceError> {
        let path = sibling(state_path, "lock");
        ensure_parent(&path)?;

        // Not truncated on open: the current holder's PID must survive until
        // we own the lock.
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| PersistenceError::io(&path, e))?;

        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == ErrorKind::WouldBlock {
                let holder = fs::read_to_string(&path).unwrap_or_default().trim().to_string();
                return Err(PersistenceError::Locked { path, pid: holder });
            }
            return Err(PersistenceError::io(&path, err));
        }

        file.set_len(0)
            .and_then(|_| write!(file, "{}", std::process::id()))
            .and_then(|_| file.sync_data())
            .map_err(|e| PersistenceError::io(&path, e))?;

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // Closing the file would release it too
        let ret = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        if ret != 0 {
            tracing::warn!(
                path = %self.path.display(),
                error = %std::io::Error::last_os_error(),
                "failed to release lock"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `state.json` + `lock` → `state.json.lock`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

fn ensure_parent(path: &Path) -> Result<(), PersistenceError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))
        }
        _ => Ok(()),
    }
}
