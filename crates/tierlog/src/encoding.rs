//! Entry rendering rules derived from [`LoggingSettings`]

use crate::{
    config::{LevelEncoding, LogFormat, LoggingSettings},
    level::Level,
    Result,
};
use chrono::{DateTime, Local};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::time::Duration;

const TIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const ANSI_RESET: &str = "\x1b[0m";

/// Keys used for the built-in fields of an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldKeys {
    pub time: String,
    pub level: String,
    pub name: String,
    pub caller: String,
    pub message: String,
    pub stacktrace: String,
}

impl FieldKeys {
    fn from_settings(settings: &LoggingSettings) -> Self {
        Self {
            time: "time".to_string(),
            level: "level".to_string(),
            name: "logger".to_string(),
            caller: "caller".to_string(),
            message: "msg".to_string(),
            stacktrace: settings.stacktrace_key.clone(),
        }
    }

    /// Whether `key` names a built-in field
    pub fn is_reserved(&self, key: &str) -> bool {
        [
            &self.time,
            &self.level,
            &self.name,
            &self.caller,
            &self.message,
            &self.stacktrace,
        ]
        .into_iter()
        .any(|reserved| !reserved.is_empty() && reserved == key)
    }

    /// Key a structured field is written under. Fields colliding with a
    /// built-in key move to `fields.<key>`.
    pub fn field_key<'k>(&self, key: &'k str) -> Cow<'k, str> {
        if self.is_reserved(key) {
            Cow::Owned(format!("fields.{}", key))
        } else {
            Cow::Borrowed(key)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LevelStyle {
    Named(LevelEncoding),
    Bracketed,
}

/// Source location an entry is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub file: &'static str,
    pub line: u32,
}

impl Caller {
    pub fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }
}

impl From<&'static std::panic::Location<'static>> for Caller {
    fn from(location: &'static std::panic::Location<'static>) -> Self {
        Self::new(location.file(), location.line())
    }
}

/// Value of a structured field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Json(Value),
    Duration(Duration),
}

/// A structured key/value attached to an entry
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub key: String,
    pub value: FieldValue,
}

impl Field {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: FieldValue::Json(value.into()),
        }
    }

    pub fn duration(key: impl Into<String>, value: Duration) -> Self {
        Self {
            key: key.into(),
            value: FieldValue::Duration(value),
        }
    }
}

/// A single log entry ready to be encoded
#[derive(Debug, Clone)]
pub struct Entry<'a> {
    pub level: Level,
    pub time: DateTime<Local>,
    pub message: &'a str,
    pub caller: Option<Caller>,
    pub stacktrace: Option<String>,
    pub fields: &'a [Field],
}

/// Rendering rules shared by every sink of a logger.
///
/// Computed once from the settings; nothing downstream re-derives them.
#[derive(Debug, Clone)]
pub struct EncodingProfile {
    keys: FieldKeys,
    format: LogFormat,
    level_style: LevelStyle,
    show_caller: bool,
    name: String,
}

impl EncodingProfile {
    pub fn new(settings: &LoggingSettings) -> Self {
        // The bracketed override wins over the named style
        let level_style = if settings.custom_level_encoder {
            LevelStyle::Bracketed
        } else {
            LevelStyle::Named(settings.encode_level)
        };

        Self {
            keys: FieldKeys::from_settings(settings),
            format: settings.format,
            level_style,
            show_caller: settings.show_line,
            name: settings.prefix.clone(),
        }
    }

    pub fn keys(&self) -> &FieldKeys {
        &self.keys
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    pub fn shows_caller(&self) -> bool {
        self.show_caller
    }

    /// Whether entries at `level` get a stacktrace field
    pub fn wants_stacktrace(&self, level: Level) -> bool {
        level.is_panic_class() && !self.keys.stacktrace.is_empty()
    }

    pub fn render_level(&self, level: Level) -> String {
        match self.level_style {
            LevelStyle::Bracketed => format!("[{}]", level.capital_str()),
            LevelStyle::Named(LevelEncoding::Lowercase) => level.as_str().to_string(),
            LevelStyle::Named(LevelEncoding::Capital) => level.capital_str().to_string(),
            LevelStyle::Named(LevelEncoding::LowercaseColor) => colorize(level, level.as_str()),
            LevelStyle::Named(LevelEncoding::CapitalColor) => colorize(level, level.capital_str()),
        }
    }

    pub fn render_time(&self, time: &DateTime<Local>) -> String {
        time.format(TIME_LAYOUT).to_string()
    }

    /// `dir/file.rs:line`, keeping only the last directory of the path
    pub fn render_caller(&self, caller: &Caller) -> String {
        format!("{}:{}", trim_path(caller.file), caller.line)
    }

    /// Durations render as fractional seconds
    pub fn render_duration(&self, duration: Duration) -> f64 {
        duration.as_secs_f64()
    }

    fn render_field(&self, value: &FieldValue) -> Value {
        match value {
            FieldValue::Json(value) => value.clone(),
            FieldValue::Duration(duration) => Value::from(self.render_duration(*duration)),
        }
    }

    /// Encode an entry into one newline-terminated line
    pub fn encode(&self, entry: &Entry<'_>) -> Result<Vec<u8>> {
        match self.format {
            LogFormat::Json => self.encode_json(entry),
            LogFormat::Text => self.encode_text(entry),
        }
    }

    fn stacktrace_of<'e>(&self, entry: &'e Entry<'_>) -> Option<&'e str> {
        entry
            .stacktrace
            .as_deref()
            .filter(|_| self.wants_stacktrace(entry.level))
    }

    fn insert_fields(&self, object: &mut Map<String, Value>, fields: &[Field]) {
        for field in fields {
            let key = self.keys.field_key(&field.key).into_owned();
            object.insert(key, self.render_field(&field.value));
        }
    }

    fn encode_json(&self, entry: &Entry<'_>) -> Result<Vec<u8>> {
        let mut object = Map::new();
        object.insert(
            self.keys.time.clone(),
            Value::String(self.render_time(&entry.time)),
        );
        object.insert(
            self.keys.level.clone(),
            Value::String(self.render_level(entry.level)),
        );
        if !self.name.is_empty() {
            object.insert(self.keys.name.clone(), Value::String(self.name.clone()));
        }
        if let Some(caller) = entry.caller.filter(|_| self.show_caller) {
            object.insert(
                self.keys.caller.clone(),
                Value::String(self.render_caller(&caller)),
            );
        }
        object.insert(
            self.keys.message.clone(),
            Value::String(entry.message.to_string()),
        );
        if let Some(stacktrace) = self.stacktrace_of(entry) {
            object.insert(
                self.keys.stacktrace.clone(),
                Value::String(stacktrace.to_string()),
            );
        }
        self.insert_fields(&mut object, entry.fields);

        let mut line = serde_json::to_vec(&Value::Object(object))?;
        line.push(b'\n');
        Ok(line)
    }

    fn encode_text(&self, entry: &Entry<'_>) -> Result<Vec<u8>> {
        let mut parts = vec![self.render_time(&entry.time), self.render_level(entry.level)];
        if !self.name.is_empty() {
            parts.push(self.name.clone());
        }
        if let Some(caller) = entry.caller.filter(|_| self.show_caller) {
            parts.push(self.render_caller(&caller));
        }
        parts.push(entry.message.to_string());

        if !entry.fields.is_empty() {
            let mut object = Map::new();
            self.insert_fields(&mut object, entry.fields);
            parts.push(serde_json::to_string(&Value::Object(object))?);
        }

        let mut line = parts.join("\t");
        if let Some(stacktrace) = self.stacktrace_of(entry) {
            line.push('\n');
            line.push_str(stacktrace.trim_end());
        }
        line.push('\n');
        Ok(line.into_bytes())
    }
}

fn colorize(level: Level, text: &str) -> String {
    let color = match level {
        Level::Debug => "\x1b[35m",
        Level::Info => "\x1b[34m",
        Level::Warn => "\x1b[33m",
        _ => "\x1b[31m",
    };
    format!("{}{}{}", color, text, ANSI_RESET)
}

fn trim_path(path: &str) -> &str {
    let is_separator = |c: char| c == '/' || c == '\\';
    match path.rfind(is_separator) {
        Some(last) => match path[..last].rfind(is_separator) {
            Some(previous) => &path[previous + 1..],
            None => path,
        },
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry_at<'a>(level: Level, message: &'a str, fields: &'a [Field]) -> Entry<'a> {
        Entry {
            level,
            time: Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
                + chrono::Duration::milliseconds(42),
            message,
            caller: Some(Caller::new("/home/dev/app/src/handlers/user.rs", 88)),
            stacktrace: None,
            fields,
        }
    }

    #[test]
    fn test_level_styles() {
        let mut settings = LoggingSettings::default();

        settings.encode_level = LevelEncoding::Lowercase;
        assert_eq!(EncodingProfile::new(&settings).render_level(Level::Warn), "warn");

        settings.encode_level = LevelEncoding::Capital;
        assert_eq!(EncodingProfile::new(&settings).render_level(Level::DPanic), "DPANIC");

        settings.encode_level = LevelEncoding::CapitalColor;
        assert_eq!(
            EncodingProfile::new(&settings).render_level(Level::Info),
            "\x1b[34mINFO\x1b[0m"
        );

        settings.encode_level = LevelEncoding::LowercaseColor;
        assert_eq!(
            EncodingProfile::new(&settings).render_level(Level::Fatal),
            "\x1b[31mfatal\x1b[0m"
        );
    }

    #[test]
    fn test_bracketed_override_wins() {
        let mut settings = LoggingSettings::default();
        settings.encode_level = LevelEncoding::LowercaseColor;
        settings.custom_level_encoder = true;

        let profile = EncodingProfile::new(&settings);
        assert_eq!(profile.render_level(Level::Error), "[ERROR]");
    }

    #[test]
    fn test_time_layout() {
        let profile = EncodingProfile::new(&LoggingSettings::default());
        let entry = entry_at(Level::Info, "", &[]);
        assert_eq!(profile.render_time(&entry.time), "2024-03-09 14:05:07.042");
    }

    #[test]
    fn test_caller_is_trimmed() {
        let profile = EncodingProfile::new(&LoggingSettings::default());
        assert_eq!(
            profile.render_caller(&Caller::new("/home/dev/app/src/handlers/user.rs", 88)),
            "handlers/user.rs:88"
        );
        assert_eq!(profile.render_caller(&Caller::new("main.rs", 3)), "main.rs:3");
        assert_eq!(
            profile.render_caller(&Caller::new("C:\\work\\src\\lib.rs", 9)),
            "src\\lib.rs:9"
        );
    }

    #[test]
    fn test_json_entry_shape() {
        let profile = EncodingProfile::new(&LoggingSettings::default());
        let fields = vec![
            Field::new("user_id", 7),
            Field::duration("elapsed", Duration::from_millis(1500)),
        ];
        let line = profile
            .encode(&entry_at(Level::Info, "user created", &fields))
            .unwrap();

        assert_eq!(line.last(), Some(&b'\n'));
        let text = String::from_utf8(line).unwrap();
        assert!(text.starts_with(concat!(
            r#"{"time":"2024-03-09 14:05:07.042","level":"INFO","logger":"[LOGGER]","#,
            r#""caller":"handlers/user.rs:88","msg":"user created""#
        )));

        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["user_id"], 7);
        assert_eq!(value["elapsed"], 1.5);
        assert!(value.get("stacktrace").is_none());
    }

    #[test]
    fn test_fields_never_replace_built_in_keys() {
        let profile = EncodingProfile::new(&LoggingSettings::default());
        let fields = vec![
            Field::new("msg", "shadow"),
            Field::new("level", "DEBUG"),
            Field::new("time", "yesterday"),
            Field::new("logger", "other"),
            Field::new("caller", "elsewhere.rs:1"),
            Field::new("stacktrace", "fake"),
            Field::new("user_id", 7),
        ];
        let line = profile
            .encode(&entry_at(Level::Info, "user created", &fields))
            .unwrap();

        let value: Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["msg"], "user created");
        assert_eq!(value["level"], "INFO");
        assert_eq!(value["time"], "2024-03-09 14:05:07.042");
        assert_eq!(value["logger"], "[LOGGER]");
        assert_eq!(value["caller"], "handlers/user.rs:88");
        assert!(value.get("stacktrace").is_none());
        assert_eq!(value["fields.msg"], "shadow");
        assert_eq!(value["fields.level"], "DEBUG");
        assert_eq!(value["fields.stacktrace"], "fake");
        assert_eq!(value["user_id"], 7);
    }

    #[test]
    fn test_text_fields_use_the_same_keys() {
        let mut settings = LoggingSettings::default();
        settings.format = LogFormat::Text;
        let profile = EncodingProfile::new(&settings);

        let fields = vec![Field::new("msg", "shadow"), Field::new("level", "DEBUG")];
        let line = profile
            .encode(&entry_at(Level::Warn, "retrying", &fields))
            .unwrap();
        let line = String::from_utf8(line).unwrap();

        let columns: Vec<&str> = line.trim_end().split('\t').collect();
        assert_eq!(columns[1], "WARN");
        assert_eq!(columns[4], "retrying");
        assert_eq!(columns[5], r#"{"fields.msg":"shadow","fields.level":"DEBUG"}"#);
    }

    #[test]
    fn test_empty_stacktrace_key_is_not_reserved() {
        let mut settings = LoggingSettings::default();
        settings.stacktrace_key = String::new();
        let keys = EncodingProfile::new(&settings).keys().clone();

        assert!(keys.is_reserved("msg"));
        assert!(!keys.is_reserved(""));
        assert_eq!(keys.field_key("stacktrace"), "stacktrace");
        assert_eq!(keys.field_key("caller"), "fields.caller");
    }

    #[test]
    fn test_stacktrace_only_for_panic_class() {
        let profile = EncodingProfile::new(&LoggingSettings::default());

        let mut entry = entry_at(Level::Error, "boom", &[]);
        entry.stacktrace = Some("frame 0".to_string());
        let value: Value = serde_json::from_slice(&profile.encode(&entry).unwrap()).unwrap();
        assert!(value.get("stacktrace").is_none());

        entry.level = Level::DPanic;
        let value: Value = serde_json::from_slice(&profile.encode(&entry).unwrap()).unwrap();
        assert_eq!(value["stacktrace"], "frame 0");
    }

    #[test]
    fn test_text_entry_shape() {
        let mut settings = LoggingSettings::default();
        settings.format = LogFormat::Text;
        settings.prefix = String::new();
        let profile = EncodingProfile::new(&settings);

        let fields = vec![Field::new("attempt", 2)];
        let line = profile
            .encode(&entry_at(Level::Warn, "retrying", &fields))
            .unwrap();
        assert_eq!(
            String::from_utf8(line).unwrap(),
            "2024-03-09 14:05:07.042\tWARN\thandlers/user.rs:88\tretrying\t{\"attempt\":2}\n"
        );
    }

    #[test]
    fn test_hidden_caller() {
        let mut settings = LoggingSettings::default();
        settings.show_line = false;
        let profile = EncodingProfile::new(&settings);

        let value: Value =
            serde_json::from_slice(&profile.encode(&entry_at(Level::Info, "x", &[])).unwrap())
                .unwrap();
        assert!(value.get("caller").is_none());
    }
}
