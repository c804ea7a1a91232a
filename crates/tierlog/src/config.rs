//! Logging settings and how they are resolved

use crate::{level::Level, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Resolved logging configuration.
///
/// Immutable once a [`crate::Logger`] is built from it; changing settings means
/// building a new logger. Keys missing from a configuration file take their
/// [`Default`] value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoggingSettings {
    /// Minimum level written anywhere
    pub level: Level,

    /// Logger name placed in the `logger` field of every entry
    pub prefix: String,

    /// Output format (json or text)
    pub format: LogFormat,

    /// Directory holding the per-level files
    #[serde(alias = "director")]
    pub directory: PathBuf,

    /// Level text style
    pub encode_level: LevelEncoding,

    /// Key under which stacktraces are written; empty disables them
    pub stacktrace_key: String,

    /// Include the caller (`file:line`) in entries
    pub show_line: bool,

    /// Mirror entries to stdout
    pub log_in_console: bool,

    /// Maximum age of rotated backups, in days (0 keeps them regardless of age)
    pub retention_day: u32,

    /// Render levels as `[LEVEL]`, overriding `encode_level`
    pub custom_level_encoder: bool,

    /// Attribute facade calls to the business call site instead of the facade frame
    pub caller_skip: bool,

    /// Size and count limits of each sink
    pub rotation: RotationSettings,
}

/// Rotation limits applied to every per-level sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RotationSettings {
    /// Size cap of the active file, in MB. Kept deliberately small so busy
    /// levels rotate often.
    pub max_size_mb: u64,

    /// Maximum number of backups per level (0 keeps all)
    pub max_backups: u32,

    /// Gzip backups after rotation
    pub compress: bool,
}

/// Entry serialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Tab-separated console line
    #[serde(alias = "console")]
    Text,
}

/// Level text style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LevelEncoding {
    Lowercase,
    Capital,
    LowercaseColor,
    CapitalColor,
}

impl LevelEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            LevelEncoding::Lowercase => "lowercase",
            LevelEncoding::Capital => "capital",
            LevelEncoding::LowercaseColor => "lowercaseColor",
            LevelEncoding::CapitalColor => "capitalColor",
        }
    }
}

// Unrecognized styles fall back to capital.
impl From<String> for LevelEncoding {
    fn from(value: String) -> Self {
        match value.as_str() {
            "lowercase" => LevelEncoding::Lowercase,
            "lowercaseColor" => LevelEncoding::LowercaseColor,
            "capitalColor" => LevelEncoding::CapitalColor,
            _ => LevelEncoding::Capital,
        }
    }
}

impl From<LevelEncoding> for String {
    fn from(value: LevelEncoding) -> Self {
        value.as_str().to_string()
    }
}

/// Where the settings of a logger came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsSource {
    /// Decoded from a configuration file
    File(PathBuf),
    /// Built-in defaults used because no readable configuration existed
    Fallback,
    /// Supplied directly by the caller
    Explicit,
}

/// On-disk document layout: settings live under `[logging]`
#[derive(Debug, Deserialize, Serialize)]
struct SettingsDocument {
    #[serde(default)]
    logging: LoggingSettings,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            max_size_mb: 1,
            max_backups: 24,
            compress: true,
        }
    }
}

impl Default for LoggingSettings {
    /// Fallback configuration used when no configuration file can be read
    fn default() -> Self {
        Self {
            level: Level::Info,
            prefix: "[LOGGER]".to_string(),
            format: LogFormat::Json,
            directory: PathBuf::from("./logs"),
            encode_level: LevelEncoding::Capital,
            stacktrace_key: "stacktrace".to_string(),
            show_line: true,
            log_in_console: true,
            retention_day: 7,
            custom_level_encoder: false,
            caller_skip: true,
            rotation: RotationSettings::default(),
        }
    }
}

impl LoggingSettings {
    /// Load settings from a TOML file.
    ///
    /// Returns `Ok(None)` when the file is missing, unreadable or not valid
    /// TOML, which callers treat as "use the fallback". A syntactically valid
    /// file whose `[logging]` table does not decode is a hard error.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(
                    tierlog.event = "config_unreadable",
                    path = %path.display(),
                    error = %e,
                    "Logging configuration could not be read"
                );
                return Ok(None);
            }
        };

        let table = match content.parse::<toml::Table>() {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!(
                    tierlog.event = "config_unparseable",
                    path = %path.display(),
                    error = %e,
                    "Logging configuration is not valid TOML"
                );
                return Ok(None);
            }
        };

        let document: SettingsDocument = toml::Value::Table(table).try_into()?;
        Ok(Some(document.logging))
    }

    /// Resolve settings for `path`, falling back to the defaults when the
    /// file cannot be read. Environment overrides apply to both outcomes.
    pub async fn resolve(path: &Path) -> Result<(Self, SettingsSource)> {
        let (mut settings, source) = match Self::load(path).await? {
            Some(settings) => (settings, SettingsSource::File(path.to_path_buf())),
            None => (Self::default(), SettingsSource::Fallback),
        };

        settings.load_env_overrides();
        Ok((settings, source))
    }

    /// Serialize these settings as a `[logging]` TOML document
    pub fn to_toml(&self) -> Result<String> {
        let document = SettingsDocument {
            logging: self.clone(),
        };
        toml::to_string_pretty(&document).map_err(|e| Error::Config {
            message: format!("Failed to serialize logging settings: {}", e),
        })
    }

    /// Load environment variable overrides
    pub fn load_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("TIERLOG_LEVEL") {
            self.level = level.parse().unwrap_or(self.level);
        }

        if let Ok(format) = std::env::var("TIERLOG_FORMAT") {
            self.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" | "console" => LogFormat::Text,
                _ => self.format,
            };
        }

        if let Ok(dir) = std::env::var("TIERLOG_DIR") {
            self.directory = PathBuf::from(dir);
        }

        if let Ok(enabled) = std::env::var("TIERLOG_CONSOLE") {
            self.log_in_console = enabled.parse().unwrap_or(self.log_in_console);
        }
    }

    /// Validate settings and make sure the destination directory exists
    pub fn validate(&self) -> Result<()> {
        if self.rotation.max_size_mb == 0 {
            return Err(Error::Config {
                message: "rotation.max-size-mb must be greater than 0".to_string(),
            });
        }

        if self.directory.as_os_str().is_empty() {
            return Err(Error::Config {
                message: "directory must not be empty".to_string(),
            });
        }

        if !self.directory.exists() {
            std::fs::create_dir_all(&self.directory)?;
            tracing::info!(
                tierlog.event = "log_dir_created",
                directory = %self.directory.display(),
                "Created log directory"
            );
        }

        Ok(())
    }

    /// Size cap of each sink in bytes
    pub fn max_size_bytes(&self) -> u64 {
        self.rotation.max_size_mb * 1024 * 1024
    }
}
