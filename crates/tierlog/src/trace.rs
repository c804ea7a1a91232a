//! Query tracing hook for persistence layers.
//!
//! A data-access layer reports every executed query through [`QueryLogger`];
//! [`QueryTraceAdapter`] classifies the query as failed, slow or normal and
//! re-emits it through a [`Logger`] at the matching level.

use crate::{
    encoding::{Caller, Field},
    level::Level,
    logger::Logger,
};
use std::error::Error as StdError;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Per-call context passed along by the persistence layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryContext {
    pub correlation_id: Option<String>,
    pub operation: Option<String>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context with a fresh random correlation id
    pub fn correlated() -> Self {
        Self {
            correlation_id: Some(Uuid::new_v4().to_string()),
            operation: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    fn fields(&self) -> Vec<Field> {
        let mut fields = Vec::new();
        if let Some(id) = &self.correlation_id {
            fields.push(Field::new("correlation_id", id.clone()));
        }
        if let Some(operation) = &self.operation {
            fields.push(Field::new("operation", operation.clone()));
        }
        fields
    }
}

/// Verbosity of the query hook, least verbose first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryLogLevel {
    /// Nothing is logged, `trace` returns immediately
    Silent = 1,
    Error,
    Warn,
    Info,
}

/// The capability set a persistence layer expects from its logging hook
pub trait QueryLogger {
    /// Copy of this logger with a different verbosity
    fn log_mode(&self, level: QueryLogLevel) -> Self
    where
        Self: Sized;

    fn info(&self, ctx: &QueryContext, args: fmt::Arguments<'_>);

    fn warn(&self, ctx: &QueryContext, args: fmt::Arguments<'_>);

    fn error(&self, ctx: &QueryContext, args: fmt::Arguments<'_>);

    /// Called once per executed query. `query` renders the statement and
    /// the affected row count (-1 when unknown) and is only invoked when
    /// tracing is enabled.
    fn trace(
        &self,
        ctx: &QueryContext,
        begin: Instant,
        query: &dyn Fn() -> (String, i64),
        err: Option<&(dyn StdError + 'static)>,
    );
}

/// Error a persistence layer reports when a lookup matched no rows
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("record not found")]
pub struct RecordNotFound;

/// Knobs of the query hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTraceConfig {
    /// Successful queries slower than this log at warn; zero disables
    pub slow_threshold: Duration,
    pub level: QueryLogLevel,
    /// Treat not-found errors as successful queries
    pub ignore_record_not_found: bool,
}

impl Default for QueryTraceConfig {
    fn default() -> Self {
        Self {
            slow_threshold: Duration::from_millis(200),
            level: QueryLogLevel::Warn,
            ignore_record_not_found: false,
        }
    }
}

/// How a traced query is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryClass {
    Failed,
    Slow,
    Normal,
}

impl QueryClass {
    pub fn level(self) -> Level {
        match self {
            QueryClass::Failed => Level::Error,
            QueryClass::Slow => Level::Warn,
            QueryClass::Normal => Level::Debug,
        }
    }
}

type NotFoundClassifier = Arc<dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync>;

/// [`QueryLogger`] that writes through a [`Logger`]
#[derive(Clone)]
pub struct QueryTraceAdapter {
    logger: Logger,
    config: QueryTraceConfig,
    is_not_found: NotFoundClassifier,
}

impl QueryTraceAdapter {
    pub fn new(logger: Logger) -> Self {
        Self::with_config(logger, QueryTraceConfig::default())
    }

    pub fn with_config(logger: Logger, config: QueryTraceConfig) -> Self {
        Self {
            logger,
            config,
            is_not_found: Arc::new(default_not_found),
        }
    }

    /// Replace how errors are recognized as not-found
    pub fn with_not_found_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static,
    {
        self.is_not_found = Arc::new(classifier);
        self
    }

    pub fn config(&self) -> &QueryTraceConfig {
        &self.config
    }

    pub fn set_level(&mut self, level: QueryLogLevel) {
        self.config.level = level;
    }

    /// Classify a finished query. Errors win over slowness unless they are
    /// not-found errors and those are ignored.
    pub fn classify(
        &self,
        elapsed: Duration,
        err: Option<&(dyn StdError + 'static)>,
    ) -> QueryClass {
        let failed = match err {
            Some(e) => !(self.config.ignore_record_not_found && (self.is_not_found)(e)),
            None => false,
        };

        let threshold = self.config.slow_threshold;
        if failed {
            QueryClass::Failed
        } else if !threshold.is_zero()
            && elapsed > threshold
            && self.config.level >= QueryLogLevel::Warn
        {
            QueryClass::Slow
        } else {
            QueryClass::Normal
        }
    }

    fn trace_elapsed(
        &self,
        ctx: &QueryContext,
        caller: Caller,
        elapsed: Duration,
        query: &dyn Fn() -> (String, i64),
        err: Option<&(dyn StdError + 'static)>,
    ) {
        let (sql, rows) = query();
        let class = self.classify(elapsed, err);

        let shape = format!(
            "[{:.3}ms] [rows:{}] {}",
            elapsed.as_secs_f64() * 1000.0,
            render_rows(rows),
            sql
        );
        let message = match (class, err) {
            (QueryClass::Failed, Some(e)) => format!("{} {}", e, shape),
            (QueryClass::Slow, _) => {
                format!("SLOW SQL >= {:?} {}", self.config.slow_threshold, shape)
            }
            _ => shape,
        };

        let mut fields = ctx.fields();
        fields.push(Field::duration("elapsed", elapsed));
        fields.push(Field::new("rows", rows));

        self.emit(class.level(), caller, &message, &fields);
    }

    fn emit(&self, level: Level, caller: Caller, message: &str, fields: &[Field]) {
        if let Err(e) = self.logger.log_at(level, Some(caller), message, fields) {
            tracing::warn!(
                tierlog.event = "query_log_failed",
                level = %level,
                error = %e,
                "Failed to write query log entry"
            );
        }
    }
}

impl QueryLogger for QueryTraceAdapter {
    fn log_mode(&self, level: QueryLogLevel) -> Self {
        let mut adapter = self.clone();
        adapter.set_level(level);
        adapter
    }

    #[track_caller]
    fn info(&self, ctx: &QueryContext, args: fmt::Arguments<'_>) {
        if self.config.level >= QueryLogLevel::Info {
            self.emit(Level::Info, Location::caller().into(), &args.to_string(), &ctx.fields());
        }
    }

    #[track_caller]
    fn warn(&self, ctx: &QueryContext, args: fmt::Arguments<'_>) {
        if self.config.level >= QueryLogLevel::Warn {
            self.emit(Level::Warn, Location::caller().into(), &args.to_string(), &ctx.fields());
        }
    }

    #[track_caller]
    fn error(&self, ctx: &QueryContext, args: fmt::Arguments<'_>) {
        if self.config.level >= QueryLogLevel::Error {
            self.emit(Level::Error, Location::caller().into(), &args.to_string(), &ctx.fields());
        }
    }

    #[track_caller]
    fn trace(
        &self,
        ctx: &QueryContext,
        begin: Instant,
        query: &dyn Fn() -> (String, i64),
        err: Option<&(dyn StdError + 'static)>,
    ) {
        if self.config.level <= QueryLogLevel::Silent {
            return;
        }

        let caller = Location::caller().into();
        self.trace_elapsed(ctx, caller, begin.elapsed(), query, err);
    }
}

impl fmt::Debug for QueryTraceAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryTraceAdapter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn default_not_found(err: &(dyn StdError + 'static)) -> bool {
    err.downcast_ref::<RecordNotFound>().is_some() || err.to_string() == "record not found"
}

fn render_rows(rows: i64) -> String {
    if rows == -1 {
        "-".to_string()
    } else {
        rows.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoggingSettings;
    use serde_json::Value;
    use std::cell::Cell;
    use std::io;
    use tempfile::TempDir;

    fn test_adapter(dir: &std::path::Path, config: QueryTraceConfig) -> QueryTraceAdapter {
        let mut settings = LoggingSettings::default();
        settings.directory = dir.to_path_buf();
        settings.level = Level::Debug;
        settings.log_in_console = false;
        QueryTraceAdapter::with_config(Logger::build(settings).unwrap(), config)
    }

    fn entries(adapter: &QueryTraceAdapter, level: Level) -> Vec<Value> {
        let path = adapter.logger.router().sink(level).unwrap().path();
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn started(ago: Duration) -> Instant {
        Instant::now().checked_sub(ago).unwrap()
    }

    fn select_users() -> (String, i64) {
        ("SELECT * FROM users WHERE id = 1".to_string(), 1)
    }

    #[test]
    fn test_classification_table() {
        let temp_dir = TempDir::new().unwrap();
        let mut adapter = test_adapter(temp_dir.path(), QueryTraceConfig::default());
        let failure = io::Error::new(io::ErrorKind::Other, "connection reset");

        assert_eq!(adapter.classify(Duration::from_millis(50), None), QueryClass::Normal);
        assert_eq!(adapter.classify(Duration::from_millis(300), None), QueryClass::Slow);
        assert_eq!(
            adapter.classify(Duration::from_millis(5), Some(&failure)),
            QueryClass::Failed
        );
        assert_eq!(
            adapter.classify(Duration::from_millis(5), Some(&RecordNotFound)),
            QueryClass::Failed
        );

        adapter.config.ignore_record_not_found = true;
        assert_eq!(
            adapter.classify(Duration::from_millis(5), Some(&RecordNotFound)),
            QueryClass::Normal
        );
        assert_eq!(
            adapter.classify(Duration::from_millis(300), Some(&RecordNotFound)),
            QueryClass::Slow
        );
        assert_eq!(
            adapter.classify(Duration::from_millis(5), Some(&failure)),
            QueryClass::Failed
        );
    }

    #[test]
    fn test_zero_threshold_disables_slow_detection() {
        let temp_dir = TempDir::new().unwrap();
        let config = QueryTraceConfig {
            slow_threshold: Duration::ZERO,
            ..QueryTraceConfig::default()
        };
        let adapter = test_adapter(temp_dir.path(), config);

        assert_eq!(adapter.classify(Duration::from_secs(30), None), QueryClass::Normal);
    }

    #[test]
    fn test_slow_requires_warn_level() {
        let temp_dir = TempDir::new().unwrap();
        let config = QueryTraceConfig {
            level: QueryLogLevel::Error,
            ..QueryTraceConfig::default()
        };
        let adapter = test_adapter(temp_dir.path(), config);

        assert_eq!(adapter.classify(Duration::from_millis(300), None), QueryClass::Normal);
    }

    #[test]
    fn test_fast_query_logs_debug() {
        let temp_dir = TempDir::new().unwrap();
        let adapter = test_adapter(temp_dir.path(), QueryTraceConfig::default());

        adapter.trace(
            &QueryContext::new(),
            started(Duration::from_millis(50)),
            &select_users,
            None,
        );

        let debug = entries(&adapter, Level::Debug);
        assert_eq!(debug.len(), 1);
        let msg = debug[0]["msg"].as_str().unwrap();
        assert!(msg.starts_with('['));
        assert!(msg.ends_with("ms] [rows:1] SELECT * FROM users WHERE id = 1"));
        assert!(entries(&adapter, Level::Warn).is_empty());
    }

    #[test]
    fn test_slow_query_logs_warn() {
        let temp_dir = TempDir::new().unwrap();
        let adapter = test_adapter(temp_dir.path(), QueryTraceConfig::default());

        adapter.trace(
            &QueryContext::new().with_operation("load_user"),
            started(Duration::from_millis(300)),
            &select_users,
            None,
        );

        let warn = entries(&adapter, Level::Warn);
        assert_eq!(warn.len(), 1);
        assert!(warn[0]["msg"].as_str().unwrap().starts_with("SLOW SQL >= 200ms ["));
        assert_eq!(warn[0]["operation"], "load_user");
        assert_eq!(warn[0]["rows"], 1);
        assert!(warn[0]["elapsed"].as_f64().unwrap() >= 0.3);
        assert!(entries(&adapter, Level::Debug).is_empty());
    }

    #[test]
    fn test_failed_query_logs_error() {
        let temp_dir = TempDir::new().unwrap();
        let adapter = test_adapter(temp_dir.path(), QueryTraceConfig::default());
        let failure = io::Error::new(io::ErrorKind::Other, "duplicate key");
        let ctx = QueryContext::correlated();

        adapter.trace(
            &ctx,
            started(Duration::from_millis(1)),
            &|| ("INSERT INTO users VALUES (1)".to_string(), -1),
            Some(&failure),
        );

        let errors = entries(&adapter, Level::Error);
        assert_eq!(errors.len(), 1);
        let msg = errors[0]["msg"].as_str().unwrap();
        assert!(msg.starts_with("duplicate key ["));
        assert!(msg.ends_with("ms] [rows:-] INSERT INTO users VALUES (1)"));
        assert_eq!(
            errors[0]["correlation_id"].as_str(),
            ctx.correlation_id.as_deref()
        );
    }

    #[test]
    fn test_silent_skips_query_rendering() {
        let temp_dir = TempDir::new().unwrap();
        let adapter = test_adapter(temp_dir.path(), QueryTraceConfig::default())
            .log_mode(QueryLogLevel::Silent);
        let rendered = Cell::new(false);

        adapter.trace(
            &QueryContext::new(),
            Instant::now(),
            &|| {
                rendered.set(true);
                select_users()
            },
            None,
        );

        assert!(!rendered.get());
        assert!(entries(&adapter, Level::Debug).is_empty());
    }

    #[test]
    fn test_message_methods_respect_level() {
        let temp_dir = TempDir::new().unwrap();
        let adapter = test_adapter(temp_dir.path(), QueryTraceConfig::default());
        let ctx = QueryContext::new();

        adapter.info(&ctx, format_args!("migrated {} tables", 4));
        adapter.warn(&ctx, format_args!("pool at {}%", 90));
        adapter.error(&ctx, format_args!("lost connection"));

        assert!(entries(&adapter, Level::Info).is_empty());
        assert_eq!(entries(&adapter, Level::Warn)[0]["msg"], "pool at 90%");
        assert_eq!(entries(&adapter, Level::Error)[0]["msg"], "lost connection");

        let verbose = adapter.log_mode(QueryLogLevel::Info);
        verbose.info(&ctx, format_args!("migrated {} tables", 4));
        assert_eq!(entries(&verbose, Level::Info)[0]["msg"], "migrated 4 tables");
    }

    #[test]
    fn test_custom_not_found_classifier() {
        let temp_dir = TempDir::new().unwrap();
        let config = QueryTraceConfig {
            ignore_record_not_found: true,
            ..QueryTraceConfig::default()
        };
        let adapter = test_adapter(temp_dir.path(), config)
            .with_not_found_classifier(|e| e.to_string().contains("no rows"));
        let no_rows = io::Error::new(io::ErrorKind::NotFound, "no rows in result set");

        assert_eq!(
            adapter.classify(Duration::from_millis(1), Some(&no_rows)),
            QueryClass::Normal
        );
        assert_eq!(
            adapter.classify(Duration::from_millis(1), Some(&RecordNotFound)),
            QueryClass::Failed
        );
    }
}
