//! Process-wide logger handle.
//!
//! Prefer passing a [`Logger`] down explicitly; the facade exists for call
//! sites that cannot take one. Writing through the facade before a handle is
//! installed is a programming error: debug builds panic, release builds
//! drop the entry.
//!
//! Re-initializing replaces the handle without draining writes that are
//! still in flight on the previous one, so avoid initializing while other
//! threads are logging.

use crate::{
    config::LoggingSettings,
    encoding::{Caller, Field},
    level::Level,
    logger::Logger,
    Error, Result,
};
use std::fmt;
use std::panic::Location;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

static CURRENT: RwLock<Option<Logger>> = RwLock::new(None);

/// Build a logger from `settings` and install it as the process-wide handle
pub fn init(settings: LoggingSettings) -> Result<Logger> {
    let logger = Logger::build(settings)?;
    install(logger.clone());
    Ok(logger)
}

/// Build a logger from a configuration file, falling back to the defaults
/// when the file cannot be read, and install it
pub async fn init_from_file(path: &Path) -> Result<Logger> {
    let logger = Logger::from_config_file(path).await?;
    install(logger.clone());
    Ok(logger)
}

/// Install `logger` as the process-wide handle, returning the previous one
pub fn install(logger: Logger) -> Option<Logger> {
    let mut current = CURRENT.write().unwrap_or_else(PoisonError::into_inner);
    current.replace(logger)
}

/// Remove the process-wide handle
pub fn uninstall() -> Option<Logger> {
    let mut current = CURRENT.write().unwrap_or_else(PoisonError::into_inner);
    current.take()
}

/// The installed handle, if any
pub fn current() -> Option<Logger> {
    CURRENT
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// The installed handle, or [`Error::NotInitialized`]
pub fn handle() -> Result<Logger> {
    current().ok_or(Error::NotInitialized)
}

/// Business call site when the logger skips the facade frame, the facade
/// itself otherwise
#[track_caller]
fn caller_for(logger: &Logger) -> Caller {
    if logger.settings().caller_skip {
        Location::caller().into()
    } else {
        facade_frame()
    }
}

fn facade_frame() -> Caller {
    Location::caller().into()
}

fn missing_logger(level: Level) {
    if cfg!(debug_assertions) {
        std::panic!(
            "tierlog: {} entry written before a logger was initialized",
            level
        );
    }
}

/// Log a formatted message through the installed handle
#[track_caller]
pub fn log(level: Level, args: fmt::Arguments<'_>) -> Result<()> {
    match current() {
        Some(logger) => {
            let caller = caller_for(&logger);
            let message = args.to_string();
            logger.log_at(level, Some(caller), &message, &[])
        }
        None => {
            missing_logger(level);
            Ok(())
        }
    }
}

/// Log a message with structured fields through the installed handle
#[track_caller]
pub fn log_fields(level: Level, message: &str, fields: &[Field]) -> Result<()> {
    match current() {
        Some(logger) => {
            let caller = caller_for(&logger);
            logger.log_at(level, Some(caller), message, fields)
        }
        None => {
            missing_logger(level);
            Ok(())
        }
    }
}

/// Emit a panic or fatal entry, then terminate.
///
/// Termination happens even when emission fails; the failure is reported on
/// stderr first.
#[track_caller]
pub fn escalate(level: Level, args: fmt::Arguments<'_>) -> ! {
    let Some(logger) = current() else {
        missing_logger(level);
        terminate_without_entry(level, args.to_string())
    };

    let caller = caller_for(&logger);
    match logger.escalate(level, caller, args) {
        Ok(escalation) => escalation.terminate(),
        Err(e) => {
            eprintln!("tierlog: failed to write {} entry: {}", level, e);
            terminate_without_entry(level, args.to_string())
        }
    }
}

fn terminate_without_entry(level: Level, message: String) -> ! {
    match level {
        Level::Fatal => std::process::exit(1),
        _ => std::panic::panic_any(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use serial_test::serial;
    use tempfile::TempDir;

    fn settings_in(dir: &Path) -> LoggingSettings {
        let mut settings = LoggingSettings::default();
        settings.directory = dir.to_path_buf();
        settings.level = Level::Debug;
        settings.log_in_console = false;
        settings
    }

    fn last_entry(logger: &Logger, level: Level) -> Value {
        let path = logger.router().sink(level).unwrap().path();
        let content = std::fs::read_to_string(path).unwrap();
        serde_json::from_str(content.lines().last().unwrap()).unwrap()
    }

    #[test]
    #[serial]
    fn test_init_installs_handle() {
        let temp_dir = TempDir::new().unwrap();
        let logger = init(settings_in(temp_dir.path())).unwrap();

        crate::info!("hello {}", "facade").unwrap();
        crate::warn!("careful").unwrap();

        assert_eq!(last_entry(&logger, Level::Info)["msg"], "hello facade");
        assert_eq!(last_entry(&logger, Level::Warn)["msg"], "careful");
        uninstall();
    }

    #[test]
    #[serial]
    fn test_reinit_replaces_handle() {
        let first_dir = TempDir::new().unwrap();
        let second_dir = TempDir::new().unwrap();

        let first = init(settings_in(first_dir.path())).unwrap();
        let second = init(settings_in(second_dir.path())).unwrap();

        crate::error!("after replace").unwrap();

        let first_path = first.router().sink(Level::Error).unwrap().path();
        let first_errors = std::fs::read_to_string(first_path).unwrap();
        assert!(first_errors.is_empty());
        assert_eq!(last_entry(&second, Level::Error)["msg"], "after replace");
        uninstall();
    }

    #[test]
    #[serial]
    fn test_caller_skip_attributes_business_code() {
        let temp_dir = TempDir::new().unwrap();
        let logger = init(settings_in(temp_dir.path())).unwrap();

        let line = line!() + 1;
        crate::info!("attributed").unwrap();

        assert_eq!(
            last_entry(&logger, Level::Info)["caller"],
            format!("src/facade.rs:{}", line)
        );
        uninstall();
    }

    #[test]
    #[serial]
    fn test_without_caller_skip_attributes_facade() {
        let temp_dir = TempDir::new().unwrap();
        let mut settings = settings_in(temp_dir.path());
        settings.caller_skip = false;
        let logger = init(settings).unwrap();

        let call_line = line!() + 1;
        crate::info!("attributed").unwrap();

        let caller = last_entry(&logger, Level::Info)["caller"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(caller.starts_with("src/facade.rs:"));
        assert_ne!(caller, format!("src/facade.rs:{}", call_line));
        uninstall();
    }

    #[test]
    #[serial]
    fn test_structured_facade_write() {
        let temp_dir = TempDir::new().unwrap();
        let logger = init(settings_in(temp_dir.path())).unwrap();

        log_fields(Level::Debug, "cache stats", &[Field::new("hits", 12)]).unwrap();

        let entry = last_entry(&logger, Level::Debug);
        assert_eq!(entry["msg"], "cache stats");
        assert_eq!(entry["hits"], 12);
        uninstall();
    }

    #[test]
    #[serial]
    fn test_handle_reports_missing_logger() {
        uninstall();
        assert!(matches!(handle(), Err(Error::NotInitialized)));
    }

    #[test]
    #[serial]
    #[cfg(debug_assertions)]
    fn test_write_without_logger_fails_loudly() {
        uninstall();
        let result = std::panic::catch_unwind(|| {
            let _ = log(Level::Info, format_args!("too early"));
        });
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_escalation_without_logger_still_unwinds() {
        uninstall();
        let result = std::panic::catch_unwind(|| {
            escalate(Level::Panic, format_args!("no handle"));
        });
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_panic_macro_emits_then_unwinds() {
        let temp_dir = TempDir::new().unwrap();
        let logger = init(settings_in(temp_dir.path())).unwrap();

        let result = std::panic::catch_unwind(|| {
            crate::panic!("replica {} diverged", 3);
        });

        let payload = result.unwrap_err();
        assert_eq!(
            payload.downcast_ref::<String>().map(String::as_str),
            Some("replica 3 diverged")
        );
        assert_eq!(last_entry(&logger, Level::Panic)["msg"], "replica 3 diverged");
        uninstall();
    }
}
