//! The logger handle

use crate::{
    config::{LoggingSettings, SettingsSource},
    encoding::{Caller, EncodingProfile, Entry, Field},
    level::Level,
    router::LevelRouter,
    Result,
};
use chrono::Local;
use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::fmt;
use std::io::Write;
use std::panic::Location;
use std::path::Path;
use std::sync::Arc;

/// Cloneable handle owning the encoding profile and the per-level sinks.
///
/// Pass it down from the composition root; [`crate::facade`] can additionally
/// install one as the process-wide handle.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

struct LoggerInner {
    settings: LoggingSettings,
    source: SettingsSource,
    profile: EncodingProfile,
    router: LevelRouter,
}

impl Logger {
    /// Build a logger from already resolved settings
    pub fn build(settings: LoggingSettings) -> Result<Self> {
        Self::build_from(settings, SettingsSource::Explicit)
    }

    /// Build a logger whose console mirror writes to `console` instead of stdout
    pub fn build_with_console(
        settings: LoggingSettings,
        console: Option<Box<dyn Write + Send>>,
    ) -> Result<Self> {
        settings.validate()?;
        let router = LevelRouter::build_with_console(&settings, &Level::ALL, console)?;
        Ok(Self::assemble(settings, SettingsSource::Explicit, router))
    }

    /// Build a logger from a configuration file.
    ///
    /// A missing or unreadable file falls back to [`LoggingSettings::default`]
    /// and the fallback is recorded once as a warning entry. A file that is
    /// present but does not decode is an error.
    pub async fn from_config_file(path: &Path) -> Result<Self> {
        let (settings, source) = LoggingSettings::resolve(path).await?;
        let logger = Self::build_from(settings, source)?;

        if logger.source() == &SettingsSource::Fallback {
            tracing::warn!(
                tierlog.event = "config_fallback",
                path = %path.display(),
                "Logging configuration unavailable, using defaults"
            );
            logger.log_at(
                Level::Warn,
                None,
                "logging configuration unavailable, using default settings",
                &[Field::new("config_path", path.display().to_string())],
            )?;
        }

        Ok(logger)
    }

    pub(crate) fn build_from(settings: LoggingSettings, source: SettingsSource) -> Result<Self> {
        settings.validate()?;
        let router = LevelRouter::build(&settings, &Level::ALL)?;
        Ok(Self::assemble(settings, source, router))
    }

    fn assemble(settings: LoggingSettings, source: SettingsSource, router: LevelRouter) -> Self {
        let profile = EncodingProfile::new(&settings);

        tracing::info!(
            tierlog.event = "logger_initialized",
            tierlog.version = env!("CARGO_PKG_VERSION"),
            level = %settings.level,
            format = ?settings.format,
            directory = %settings.directory.display(),
            source = ?source,
            "Logger initialized"
        );

        Self {
            inner: Arc::new(LoggerInner {
                settings,
                source,
                profile,
                router,
            }),
        }
    }

    pub fn settings(&self) -> &LoggingSettings {
        &self.inner.settings
    }

    pub fn source(&self) -> &SettingsSource {
        &self.inner.source
    }

    pub fn profile(&self) -> &EncodingProfile {
        &self.inner.profile
    }

    pub fn router(&self) -> &LevelRouter {
        &self.inner.router
    }

    /// Whether entries at `level` pass the minimum level
    pub fn enabled(&self, level: Level) -> bool {
        level >= self.inner.settings.level
    }

    /// Encode and route one entry attributed to `caller`
    pub fn log_at(
        &self,
        level: Level,
        caller: Option<Caller>,
        message: &str,
        fields: &[Field],
    ) -> Result<()> {
        if !self.enabled(level) {
            return Ok(());
        }

        let profile = &self.inner.profile;
        let stacktrace = profile
            .wants_stacktrace(level)
            .then(|| Backtrace::force_capture().to_string());

        let entry = Entry {
            level,
            time: Local::now(),
            message,
            caller,
            stacktrace,
            fields,
        };
        let line = profile.encode(&entry)?;

        if let Err(e) = self.inner.router.dispatch(level, &line) {
            tracing::warn!(
                tierlog.event = "sink_write_failed",
                level = %level,
                error = %e,
                "Failed to write log entry"
            );
            return Err(e);
        }

        Ok(())
    }

    /// Log a formatted message at `level`
    #[track_caller]
    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) -> Result<()> {
        let message = render_message(args);
        self.log_at(level, Some(Location::caller().into()), &message, &[])
    }

    /// Log a message with structured fields at `level`
    #[track_caller]
    pub fn log_fields(&self, level: Level, message: &str, fields: &[Field]) -> Result<()> {
        self.log_at(level, Some(Location::caller().into()), message, fields)
    }

    #[track_caller]
    pub fn debug(&self, args: fmt::Arguments<'_>) -> Result<()> {
        self.log(Level::Debug, args)
    }

    #[track_caller]
    pub fn info(&self, args: fmt::Arguments<'_>) -> Result<()> {
        self.log(Level::Info, args)
    }

    #[track_caller]
    pub fn warn(&self, args: fmt::Arguments<'_>) -> Result<()> {
        self.log(Level::Warn, args)
    }

    #[track_caller]
    pub fn error(&self, args: fmt::Arguments<'_>) -> Result<()> {
        self.log(Level::Error, args)
    }

    /// Logged with a stacktrace, never escalates
    #[track_caller]
    pub fn dpanic(&self, args: fmt::Arguments<'_>) -> Result<()> {
        self.log(Level::DPanic, args)
    }

    /// Emit a panic entry. The caller must follow up with
    /// [`Escalation::terminate`], which unwinds.
    #[track_caller]
    pub fn panic(&self, args: fmt::Arguments<'_>) -> Result<Escalation> {
        self.escalate(Level::Panic, Location::caller().into(), args)
    }

    /// Emit a fatal entry and sync every sink. The caller must follow up with
    /// [`Escalation::terminate`], which exits the process.
    #[track_caller]
    pub fn fatal(&self, args: fmt::Arguments<'_>) -> Result<Escalation> {
        self.escalate(Level::Fatal, Location::caller().into(), args)
    }

    pub(crate) fn escalate(
        &self,
        level: Level,
        caller: Caller,
        args: fmt::Arguments<'_>,
    ) -> Result<Escalation> {
        let message = render_message(args).into_owned();
        self.log_at(level, Some(caller), &message, &[])?;
        self.sync()?;
        Ok(Escalation { level, message })
    }

    /// Flush every sink
    pub fn sync(&self) -> Result<()> {
        self.inner.router.sync()
    }
}

fn render_message(args: fmt::Arguments<'_>) -> Cow<'static, str> {
    match args.as_str() {
        Some(s) => Cow::Borrowed(s),
        None => Cow::Owned(args.to_string()),
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("settings", &self.inner.settings)
            .field("source", &self.inner.source)
            .field("router", &self.inner.router)
            .finish()
    }
}

/// Termination owed after a successful panic or fatal emission
#[must_use = "panic and fatal entries must be followed by `terminate`"]
#[derive(Debug)]
pub struct Escalation {
    level: Level,
    message: String,
}

impl Escalation {
    pub fn level(&self) -> Level {
        self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Unwind for `Panic`, exit with status 1 for `Fatal`
    pub fn terminate(self) -> ! {
        match self.level {
            Level::Fatal => std::process::exit(1),
            _ => std::panic::panic_any(self.message),
        }
    }
}
