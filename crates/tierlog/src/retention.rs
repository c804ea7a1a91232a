//! Backup retention: count and age limits, compression, periodic sweeps

use crate::router::LevelRouter;
use chrono::{Local, NaiveDateTime};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

/// Layout of the rotation timestamp embedded in backup names
pub(crate) const BACKUP_TIME_LAYOUT: &str = "%Y%m%dT%H%M%S%.3f";

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Limits applied to the backups of one sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Maximum number of backups kept (0 keeps all)
    pub max_backups: u32,
    /// Maximum backup age (`None` keeps backups regardless of age)
    pub max_age: Option<Duration>,
    /// Gzip uncompressed backups found during a sweep
    pub compress: bool,
}

impl RetentionPolicy {
    pub fn new(max_backups: u32, retention_days: u32, compress: bool) -> Self {
        let max_age = (retention_days > 0)
            .then(|| Duration::from_secs(u64::from(retention_days) * SECONDS_PER_DAY));

        Self {
            max_backups,
            max_age,
            compress,
        }
    }

    /// Apply the policy to every backup in `dir` whose name starts with `prefix`.
    ///
    /// Backups past the age window go first, then the oldest ones beyond the
    /// count limit.
    pub fn sweep(&self, dir: &Path, prefix: &str) -> io::Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut backups = list_backups(dir, prefix)?;

        let cutoff = self
            .max_age
            .and_then(|age| chrono::Duration::from_std(age).ok())
            .and_then(|age| Local::now().naive_local().checked_sub_signed(age));

        if let Some(cutoff) = cutoff {
            let (expired, kept): (Vec<_>, Vec<_>) =
                backups.into_iter().partition(|b| b.rotated_at < cutoff);
            backups = kept;

            for backup in expired {
                if remove_backup(&backup, "age") {
                    report.removed_by_age += 1;
                }
            }
        }

        if self.max_backups > 0 && backups.len() > self.max_backups as usize {
            // Newest first, so everything past the limit is the oldest
            for backup in backups.split_off(self.max_backups as usize) {
                if remove_backup(&backup, "count") {
                    report.removed_by_count += 1;
                }
            }
        }

        if self.compress {
            for backup in backups.iter().filter(|b| !b.compressed) {
                match compress_backup(&backup.path) {
                    Ok(_) => report.compressed += 1,
                    Err(e) => warn!(
                        tierlog.event = "compression_failed",
                        file = %backup.path.display(),
                        error = %e,
                        "Failed to compress backup"
                    ),
                }
            }
        }

        report.remaining = backups.len();
        Ok(report)
    }
}

fn remove_backup(backup: &BackupFile, reason: &'static str) -> bool {
    match std::fs::remove_file(&backup.path) {
        Ok(()) => {
            info!(
                tierlog.event = "backup_removed",
                file = %backup.path.display(),
                reason,
                "Removed log backup"
            );
            true
        }
        Err(e) => {
            warn!(
                tierlog.event = "backup_removal_failed",
                file = %backup.path.display(),
                error = %e,
                "Failed to remove log backup"
            );
            false
        }
    }
}

/// Outcome of one retention pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub removed_by_age: u32,
    pub removed_by_count: u32,
    pub compressed: u32,
    pub remaining: usize,
}

impl SweepReport {
    pub fn total_removed(&self) -> u32 {
        self.removed_by_age + self.removed_by_count
    }

    pub(crate) fn merge(&mut self, other: &SweepReport) {
        self.removed_by_age += other.removed_by_age;
        self.removed_by_count += other.removed_by_count;
        self.compressed += other.compressed;
        self.remaining += other.remaining;
    }
}

/// A rotated backup on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupFile {
    pub path: PathBuf,
    pub rotated_at: NaiveDateTime,
    /// Disambiguator for backups rotated within the same millisecond
    pub sequence: u32,
    pub compressed: bool,
}

/// Find the backups of one sink, newest first.
///
/// Backups are named `<prefix><stem>-<timestamp>[-n].log[.gz]`; active files
/// and unrelated files are skipped.
pub fn list_backups(dir: &Path, prefix: &str) -> io::Result<Vec<BackupFile>> {
    let mut backups = Vec::new();

    if !dir.exists() {
        return Ok(backups);
    }

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if let Some((rotated_at, sequence, compressed)) = parse_backup_name(file_name, prefix) {
            backups.push(BackupFile {
                path,
                rotated_at,
                sequence,
                compressed,
            });
        }
    }

    backups.sort_by(|a, b| (b.rotated_at, b.sequence).cmp(&(a.rotated_at, a.sequence)));
    Ok(backups)
}

fn parse_backup_name(file_name: &str, prefix: &str) -> Option<(NaiveDateTime, u32, bool)> {
    let rest = file_name.strip_prefix(prefix)?;
    let (stem, compressed) = match rest.strip_suffix(".log.gz") {
        Some(stem) => (stem, true),
        None => (rest.strip_suffix(".log")?, false),
    };

    let mut parts = stem.split('-').skip(1);
    let timestamp = parts.next()?;
    let rotated_at = NaiveDateTime::parse_from_str(timestamp, BACKUP_TIME_LAYOUT).ok()?;

    let sequence = match parts.next() {
        None => 0,
        Some(counter) => counter.parse::<u32>().ok()?,
    };

    parts.next().is_none().then_some((rotated_at, sequence, compressed))
}

/// Gzip a backup next to itself and remove the original
pub fn compress_backup(file_path: &Path) -> io::Result<PathBuf> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs::File;
    use std::io::copy;

    let compressed_path = file_path.with_extension("log.gz");

    let input_file = File::open(file_path)?;
    let output_file = File::create(&compressed_path)?;
    let mut encoder = GzEncoder::new(output_file, Compression::default());

    let mut reader = io::BufReader::new(input_file);
    copy(&mut reader, &mut encoder)?;
    encoder.finish()?;

    std::fs::remove_file(file_path)?;

    tracing::debug!(
        tierlog.event = "backup_compressed",
        original_file = %file_path.display(),
        compressed_file = %compressed_path.display(),
        "Log backup compressed"
    );

    Ok(compressed_path)
}

/// Periodically applies retention to every sink of a router.
///
/// Rotation already sweeps its own sink; this catches idle levels whose
/// backups age out without any new rotation.
pub struct RetentionSweeper;

impl RetentionSweeper {
    /// Spawn the sweep loop on the current tokio runtime
    pub fn spawn(router: LevelRouter, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                match router.sweep() {
                    Ok(report) => {
                        if report.total_removed() > 0 {
                            info!(
                                tierlog.event = "retention_sweep_completed",
                                removed_by_age = report.removed_by_age,
                                removed_by_count = report.removed_by_count,
                                remaining = report.remaining,
                                "Retention sweep completed"
                            );
                        }
                    }
                    Err(e) => warn!(
                        tierlog.event = "retention_sweep_failed",
                        error = %e,
                        "Retention sweep failed"
                    ),
                }
            }
        })
    }
}
