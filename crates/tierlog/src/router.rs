//! Exact-match fan-out of entries to per-level sinks

use crate::{
    config::LoggingSettings,
    level::Level,
    retention::{RetentionPolicy, SweepReport},
    rotation::RotatingFileWriter,
    Result,
};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// A rotating file bound to exactly one severity
#[derive(Debug, Clone)]
pub struct LevelSink {
    level: Level,
    writer: RotatingFileWriter,
}

impl LevelSink {
    /// Open `<directory>/<level>_<YYYYMMDDHH>.log` with the configured limits
    pub fn open(level: Level, settings: &LoggingSettings) -> Result<Self> {
        let retention = RetentionPolicy::new(
            settings.rotation.max_backups,
            settings.retention_day,
            settings.rotation.compress,
        );
        let writer = RotatingFileWriter::new(
            settings.directory.clone(),
            level.as_str(),
            settings.max_size_bytes(),
            retention,
        )?;

        Ok(Self { level, writer })
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Exact match: a sink never accepts entries of another level
    pub fn accepts(&self, level: Level) -> bool {
        level == self.level
    }

    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    pub fn writer(&self) -> &RotatingFileWriter {
        &self.writer
    }
}

type ConsoleTarget = Mutex<Box<dyn Write + Send>>;

/// One sink per supported severity, composed into a single write target
#[derive(Clone)]
pub struct LevelRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    sinks: Vec<LevelSink>,
    console: Option<ConsoleTarget>,
}

impl LevelRouter {
    /// Build one sink per level, mirroring to stdout when the settings ask for it.
    ///
    /// Fails without exposing a router if any sink cannot be opened.
    pub fn build(settings: &LoggingSettings, levels: &[Level]) -> Result<Self> {
        let console: Option<Box<dyn Write + Send>> = if settings.log_in_console {
            Some(Box::new(io::stdout()))
        } else {
            None
        };
        Self::build_with_console(settings, levels, console)
    }

    /// Same as [`LevelRouter::build`] with an explicit console target
    pub fn build_with_console(
        settings: &LoggingSettings,
        levels: &[Level],
        console: Option<Box<dyn Write + Send>>,
    ) -> Result<Self> {
        let sinks = levels
            .iter()
            .map(|level| LevelSink::open(*level, settings))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            tierlog.event = "router_built",
            directory = %settings.directory.display(),
            sinks = sinks.len(),
            console = console.is_some(),
            "Level router built"
        );

        Ok(Self {
            inner: Arc::new(RouterInner {
                sinks,
                console: console.map(Mutex::new),
            }),
        })
    }

    /// Write an encoded entry to every sink accepting `level`, plus the
    /// console mirror. Returns how many sinks took the entry.
    pub fn dispatch(&self, level: Level, entry: &[u8]) -> Result<usize> {
        let mut written = 0;
        for sink in self.inner.sinks.iter().filter(|s| s.accepts(level)) {
            sink.writer.append(entry)?;
            written += 1;
        }

        if let Some(console) = &self.inner.console {
            let mut console = console.lock().unwrap_or_else(PoisonError::into_inner);
            console.write_all(entry)?;
        }

        Ok(written)
    }

    pub fn sink(&self, level: Level) -> Option<&LevelSink> {
        self.inner.sinks.iter().find(|s| s.accepts(level))
    }

    pub fn sinks(&self) -> &[LevelSink] {
        &self.inner.sinks
    }

    /// Flush every sink and the console mirror
    pub fn sync(&self) -> Result<()> {
        for sink in &self.inner.sinks {
            sink.writer.sync()?;
        }
        if let Some(console) = &self.inner.console {
            console
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .flush()?;
        }
        Ok(())
    }

    /// Apply retention to every sink
    pub fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        for sink in &self.inner.sinks {
            report.merge(&sink.writer.sweep()?);
        }
        Ok(report)
    }
}

impl std::fmt::Debug for LevelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelRouter")
            .field("sinks", &self.inner.sinks)
            .field("console", &self.inner.console.is_some())
            .finish()
    }
}
