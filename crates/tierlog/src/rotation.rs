//! Size-capped rotating file writer

use crate::retention::{list_backups, BackupFile, RetentionPolicy, BACKUP_TIME_LAYOUT};
use crate::Result;
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing_subscriber::fmt::MakeWriter;

/// A writer that rotates its file before a write would push it past the size cap.
///
/// Clones share the same file and lock; size checks, rotation and writes are
/// serialized so concurrent writers never interleave an entry with a rotation.
pub struct RotatingFileWriter {
    shared: Arc<Shared>,
}

struct Shared {
    log_dir: PathBuf,
    active_path: PathBuf,
    /// Leading part shared by the active file and its backups, e.g. `info_`
    backup_prefix: String,
    max_size_bytes: u64,
    retention: RetentionPolicy,
    state: Mutex<WriterState>,
}

struct WriterState {
    file: Option<File>,
    size: u64,
}

impl RotatingFileWriter {
    /// Create a writer for `<log_dir>/<base_name>_<YYYYMMDDHH>.log` and open it.
    ///
    /// The hour qualifier is fixed when the writer is built.
    pub fn new(
        log_dir: PathBuf,
        base_name: &str,
        max_size_bytes: u64,
        retention: RetentionPolicy,
    ) -> Result<Self> {
        let hour = Local::now().format("%Y%m%d%H");
        let active_path = log_dir.join(format!("{}_{}.log", base_name, hour));

        let shared = Shared {
            log_dir,
            active_path,
            backup_prefix: format!("{}_", base_name),
            max_size_bytes,
            retention,
            state: Mutex::new(WriterState {
                file: None,
                size: 0,
            }),
        };

        shared.ensure_file_open(&mut shared.lock())?;

        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Path of the active file
    pub fn path(&self) -> &Path {
        &self.shared.active_path
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.shared.max_size_bytes
    }

    /// Bytes in the active file
    pub fn current_size(&self) -> u64 {
        self.shared.lock().size
    }

    /// Append one complete entry, rotating first if it would not fit
    pub fn append(&self, buf: &[u8]) -> io::Result<()> {
        let len = buf.len() as u64;
        if len > self.shared.max_size_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "entry of {} bytes exceeds the {} byte file size cap",
                    len, self.shared.max_size_bytes
                ),
            ));
        }

        let mut state = self.shared.lock();

        // Reopening restores the on-disk size after a failed rotation
        self.shared.ensure_file_open(&mut state)?;
        if state.size > 0 && state.size + len > self.shared.max_size_bytes {
            self.shared.rotate(&mut state)?;
            self.shared.ensure_file_open(&mut state)?;
        }

        if let Some(file) = state.file.as_mut() {
            file.write_all(buf)?;
        }
        state.size += len;

        Ok(())
    }

    /// Force a rotation of the active file
    pub fn rotate(&self) -> io::Result<()> {
        let mut state = self.shared.lock();
        self.shared.rotate(&mut state)?;
        self.shared.ensure_file_open(&mut state)
    }

    /// Backups of this writer, newest first
    pub fn backups(&self) -> io::Result<Vec<BackupFile>> {
        list_backups(&self.shared.log_dir, &self.shared.backup_prefix)
    }

    /// Apply the retention policy without rotating
    pub fn sweep(&self) -> io::Result<crate::retention::SweepReport> {
        let _state = self.shared.lock();
        self.shared
            .retention
            .sweep(&self.shared.log_dir, &self.shared.backup_prefix)
    }

    /// Flush and fsync the active file
    pub fn sync(&self) -> io::Result<()> {
        let mut state = self.shared.lock();
        if let Some(file) = state.file.as_mut() {
            file.flush()?;
            file.sync_data()?;
        }
        Ok(())
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_file_open(&self, state: &mut WriterState) -> io::Result<()> {
        if state.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.active_path)?;

            state.size = file.metadata()?.len();
            state.file = Some(file);

            tracing::debug!(
                tierlog.event = "log_file_opened",
                file_path = %self.active_path.display(),
                current_size = state.size,
                "Log file opened"
            );
        }

        Ok(())
    }

    /// Close the active file, archive it as a backup and apply retention.
    /// The next write reopens a fresh active file.
    fn rotate(&self, state: &mut WriterState) -> io::Result<()> {
        if let Some(mut file) = state.file.take() {
            file.flush()?;
        }
        state.size = 0;

        if !self.active_path.exists() {
            return Ok(());
        }

        let backup_path = self.next_backup_path();
        std::fs::rename(&self.active_path, &backup_path)?;

        tracing::debug!(
            tierlog.event = "log_rotated",
            old_file = %self.active_path.display(),
            new_file = %backup_path.display(),
            "Log file rotated"
        );

        if let Err(e) = self.retention.sweep(&self.log_dir, &self.backup_prefix) {
            tracing::warn!(
                tierlog.event = "retention_sweep_failed",
                log_dir = %self.log_dir.display(),
                error = %e,
                "Failed to apply retention after rotation"
            );
        }

        Ok(())
    }

    fn next_backup_path(&self) -> PathBuf {
        let stem = self
            .active_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let timestamp = Local::now().format(BACKUP_TIME_LAYOUT).to_string();

        let mut sequence = 0u32;
        loop {
            let name = match sequence {
                0 => format!("{}-{}.log", stem, timestamp),
                n => format!("{}-{}-{}.log", stem, timestamp, n),
            };
            let candidate = self.log_dir.join(&name);
            let compressed = self.log_dir.join(format!("{}.gz", name));

            if !candidate.exists() && !compressed.exists() {
                return candidate;
            }
            sequence += 1;
        }
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.shared.lock();
        if let Some(file) = state.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

impl Clone for RotatingFileWriter {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

// Lets a sink back a plain tracing-subscriber fmt layer
impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl std::fmt::Debug for RotatingFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingFileWriter")
            .field("path", &self.shared.active_path)
            .field("max_size_bytes", &self.shared.max_size_bytes)
            .field("retention", &self.shared.retention)
            .finish()
    }
}
