//! Configuration for the file input operator.
//!
//! [`FileInputConfig`] is the user-facing, deserializable shape. Calling
//! [`FileInputConfig::build`] validates it without touching the filesystem
//! and produces [`InputSettings`], the compiled form the engine runs on.

use crate::decoder::Decoder;
use crate::error::{Error, Result};
use crate::fingerprint::DEFAULT_FINGERPRINT_SIZE;
use crate::split::{SplitMode, Splitter};
use glob::Pattern;
use regex::bytes::Regex;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_MAX_LOG_SIZE: usize = 1024 * 1024;
const DEFAULT_MAX_CONCURRENT_FILES: usize = 1024;
const MIN_FINGERPRINT_SIZE: usize = 16;

/// Where to start reading a file the first time it is seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartAt {
    /// Read the file from its first byte.
    Beginning,
    /// Skip existing content and only read what is appended.
    #[default]
    End,
}

/// Multi-line record boundaries. Exactly one pattern must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MultilineConfig {
    #[serde(default)]
    pub line_start_pattern: Option<String>,
    #[serde(default)]
    pub line_end_pattern: Option<String>,
}

/// Configuration of a file input operator.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileInputConfig {
    /// Operator identifier; scopes this operator's persisted offsets.
    #[serde(default = "default_id")]
    pub id: String,

    /// Glob patterns for files to tail.
    #[serde(default)]
    pub include: Vec<String>,

    /// Glob patterns for files to skip even if included.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// How often to rescan globs and poll open files.
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_interval: Duration,

    /// How often changed offsets are written to the offset database.
    #[serde(
        default = "default_checkpoint_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub checkpoint_interval: Duration,

    #[serde(default)]
    pub multiline: Option<MultilineConfig>,

    #[serde(default)]
    pub start_at: StartAt,

    /// Records longer than this many bytes are cut.
    #[serde(
        default = "default_max_log_size",
        deserialize_with = "deserialize_byte_size"
    )]
    pub max_log_size: usize,

    /// Upper bound on simultaneously open files.
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,

    /// Number of leading bytes used to identify a file.
    #[serde(default = "default_fingerprint_size")]
    pub fingerprint_size: usize,

    /// Charset of the files; empty or `nop` passes bytes through.
    #[serde(default)]
    pub encoding: String,

    #[serde(default = "default_true")]
    pub include_file_name: bool,

    #[serde(default)]
    pub include_file_path: bool,
}

fn default_id() -> String {
    "file_input".to_string()
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_checkpoint_interval() -> Duration {
    DEFAULT_CHECKPOINT_INTERVAL
}

fn default_max_log_size() -> usize {
    DEFAULT_MAX_LOG_SIZE
}

fn default_max_concurrent_files() -> usize {
    DEFAULT_MAX_CONCURRENT_FILES
}

fn default_fingerprint_size() -> usize {
    DEFAULT_FINGERPRINT_SIZE
}

fn default_true() -> bool {
    true
}

impl Default for FileInputConfig {
    fn default() -> Self {
        Self {
            id: default_id(),
            include: Vec::new(),
            exclude: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            multiline: None,
            start_at: StartAt::default(),
            max_log_size: DEFAULT_MAX_LOG_SIZE,
            max_concurrent_files: DEFAULT_MAX_CONCURRENT_FILES,
            fingerprint_size: DEFAULT_FINGERPRINT_SIZE,
            encoding: String::new(),
            include_file_name: true,
            include_file_path: false,
        }
    }
}

/// Validated, compiled configuration.
#[derive(Debug, Clone)]
pub struct InputSettings {
    pub id: String,
    pub include: Vec<Pattern>,
    pub exclude: Vec<Pattern>,
    pub poll_interval: Duration,
    pub checkpoint_interval: Duration,
    pub start_at: StartAt,
    pub max_concurrent_files: usize,
    pub fingerprint_size: usize,
    pub splitter: Splitter,
    pub decoder: Decoder,
    pub include_file_name: bool,
    pub include_file_path: bool,
}

impl FileInputConfig {
    /// Config tailing the given globs with every other option at its default.
    pub fn with_include<I, S>(include: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include: include.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Validates the configuration and compiles globs, patterns and the
    /// decoder. Performs no I/O.
    pub fn build(&self) -> Result<InputSettings> {
        if self.include.is_empty() {
            return Err(Error::config("required argument `include` is empty"));
        }

        let include = self
            .include
            .iter()
            .map(|p| compile_glob(p))
            .collect::<Result<Vec<_>>>()?;
        let exclude = self
            .exclude
            .iter()
            .map(|p| compile_glob(p))
            .collect::<Result<Vec<_>>>()?;

        if self.poll_interval.is_zero() {
            return Err(Error::config("`poll_interval` must be positive"));
        }
        if self.checkpoint_interval.is_zero() {
            return Err(Error::config("`checkpoint_interval` must be positive"));
        }
        if self.max_log_size == 0 {
            return Err(Error::config("`max_log_size` must be positive"));
        }
        if self.max_concurrent_files == 0 {
            return Err(Error::config("`max_concurrent_files` must be positive"));
        }
        if self.fingerprint_size < MIN_FINGERPRINT_SIZE {
            return Err(Error::config(format!(
                "`fingerprint_size` must be at least {} bytes",
                MIN_FINGERPRINT_SIZE
            )));
        }

        let decoder = Decoder::lookup(&self.encoding)?;
        let mode = self.split_mode(&decoder)?;

        Ok(InputSettings {
            id: self.id.clone(),
            include,
            exclude,
            poll_interval: self.poll_interval,
            checkpoint_interval: self.checkpoint_interval,
            start_at: self.start_at,
            max_concurrent_files: self.max_concurrent_files,
            fingerprint_size: self.fingerprint_size,
            splitter: Splitter::new(mode, self.max_log_size),
            decoder,
            include_file_name: self.include_file_name,
            include_file_path: self.include_file_path,
        })
    }

    fn split_mode(&self, decoder: &Decoder) -> Result<SplitMode> {
        let Some(multiline) = &self.multiline else {
            return Ok(SplitMode::Line(decoder.line_ending()));
        };

        let start = multiline.line_start_pattern.as_deref().filter(|p| !p.is_empty());
        let end = multiline.line_end_pattern.as_deref().filter(|p| !p.is_empty());

        match (start, end) {
            (Some(_), Some(_)) => Err(Error::config(
                "only one of `line_start_pattern` or `line_end_pattern` can be set",
            )),
            (None, None) => Err(Error::config(
                "one of `line_start_pattern` or `line_end_pattern` must be set",
            )),
            (Some(start), None) => Ok(SplitMode::LineStart(Regex::new(&format!("(?m){}", start))?)),
            (None, Some(end)) => Ok(SplitMode::LineEnd(Regex::new(&format!("(?m){}", end))?)),
        }
    }
}

fn compile_glob(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern).map_err(|e| Error::InvalidGlob {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Parses byte sizes such as `1048576`, `"64KB"`, `"1MiB"`.
pub fn parse_byte_size(value: &str) -> Option<usize> {
    let value = value.trim();
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: f64 = number.parse().ok()?;

    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "kb" => 1_000.0,
        "kib" => 1_024.0,
        "mb" => 1_000_000.0,
        "mib" => 1_048_576.0,
        "gb" => 1_000_000_000.0,
        "gib" => 1_073_741_824.0,
        _ => return None,
    };

    let bytes = number * multiplier;
    (bytes.is_finite() && bytes >= 0.0).then_some(bytes as usize)
}

// Durations and sizes may be written as numbers or as strings with units.
fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let parsed = match &value {
        serde_json::Value::Number(n) => n.as_f64().and_then(|s| Duration::try_from_secs_f64(s).ok()),
        serde_json::Value::String(s) => humantime::parse_duration(s.trim()).ok(),
        _ => None,
    };
    parsed.ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {}", value)))
}

fn deserialize_byte_size<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let parsed = match &value {
        serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize),
        serde_json::Value::String(s) => parse_byte_size(s),
        _ => None,
    };
    parsed.ok_or_else(|| serde::de::Error::custom(format!("invalid byte size: {}", value)))
}
