//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Deserializer};
use siphon_store::Backend;

/// Global configuration for siphon. CLI flags override every value.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub queue: QueueConfig,
    pub report: ReportConfig,
    pub store: StoreConfig,
    pub scan: ScanConfig,
    pub extract: ExtractConfig,
    pub output: OutputConfig,
    pub workers: WorkersConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    #[serde(rename = "type")]
    pub backend: Backend,
    pub name: String,
    /// Capacity
    pub buffer: usize,
    /// Drainer poll timeout
    #[serde(deserialize_with = "deserialize_duration")]
    pub poll: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            name: "siphon".to_string(),
            buffer: siphon_core::DEFAULT_CAPACITY,
            poll: Duration::ZERO,
        }
    }
}

/// Where outcomes are recorded, if anywhere
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    #[default]
    None,
    Memory,
    Journal,
}

impl ReportKind {
    pub fn backend(self) -> Option<Backend> {
        match self {
            Self::None => None,
            Self::Memory => Some(Backend::Memory),
            Self::Journal => Some(Backend::Journal),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    #[serde(rename = "type")]
    pub kind: ReportKind,
    pub name: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            kind: ReportKind::None,
            name: "siphon".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding journal queues and reports
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./.siphon"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub include_pattern: Option<String>,
    pub exclude_pattern: Option<String>,
    pub follow_symlinks: bool,
    pub include_hidden_files: bool,
    pub include_os_files: bool,
    pub path_base: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Relative queued paths are resolved against this
    pub working_directory: Option<PathBuf>,
    /// Larger files are skipped; accepts `512K`, `10M`, `1G`
    #[serde(deserialize_with = "deserialize_size")]
    pub max_file_size: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// One text file (and metadata file) per input
    File,
    #[default]
    Stdout,
    /// A single parquet file
    Parquet,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    #[serde(rename = "type")]
    pub kind: OutputKind,
    pub directory: PathBuf,
    pub metadata: bool,
    pub compression_level: i32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            kind: OutputKind::Stdout,
            directory: PathBuf::from("./extracted"),
            metadata: true,
            compression_level: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Parallel extractions; hardware concurrency when unset
    pub jobs: Option<usize>,
}

/// Parse `250ms`, `5s`, `1m`, `2h`, `1d`. A bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{s}'"))?;
    let secs = match unit.trim() {
        "ms" => return Ok(Duration::from_millis(n)),
        "" | "s" => n,
        "m" => n * 60,
        "h" => n * 60 * 60,
        "d" => n * 24 * 60 * 60,
        other => return Err(format!("unknown duration unit '{other}' in '{s}'")),
    };
    Ok(Duration::from_secs(secs))
}

/// Parse a byte count with an optional `K`, `M` or `G` suffix (powers of 1024)
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, shift) = match s.char_indices().last() {
        Some((i, 'k' | 'K')) => (&s[..i], 10),
        Some((i, 'm' | 'M')) => (&s[..i], 20),
        Some((i, 'g' | 'G')) => (&s[..i], 30),
        _ => (s, 0),
    };
    let n: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid size '{s}'"))?;
    n.checked_shl(shift)
        .filter(|v| v >> shift == n)
        .ok_or_else(|| format!("size '{s}' is too large"))
}

/// Parse a `name=value` tag
pub fn parse_tag(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("tag '{s}' is not of the form name=value")),
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

fn deserialize_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Bytes(u64),
        Text(String),
    }
    match Option::<Size>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Size::Bytes(n)) => Ok(Some(n)),
        Some(Size::Text(s)) => parse_size(&s).map(Some).map_err(serde::de::Error::custom),
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./siphon.toml (current directory)
    /// 2. ~/.config/siphon/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("siphon.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "siphon") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.queue.backend, Backend::Memory);
        assert_eq!(config.queue.buffer, siphon_core::DEFAULT_CAPACITY);
        assert_eq!(config.queue.poll, Duration::ZERO);
        assert_eq!(config.report.kind, ReportKind::None);
        assert_eq!(config.output.kind, OutputKind::Stdout);
        assert!(config.output.metadata);
        assert!(config.workers.jobs.is_none());
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[queue]
type = "journal"
name = "inbox"
buffer = 64
poll = "5s"

[report]
type = "journal"

[scan]
include_pattern = "**/*.txt"
include_hidden_files = true

[extract]
max_file_size = "10M"

[output]
type = "parquet"
directory = "/tmp/out"

[workers]
jobs = 3
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.queue.backend, Backend::Journal);
        assert_eq!(config.queue.name, "inbox");
        assert_eq!(config.queue.buffer, 64);
        assert_eq!(config.queue.poll, Duration::from_secs(5));
        assert_eq!(config.report.kind, ReportKind::Journal);
        assert_eq!(config.report.name, "siphon");
        assert_eq!(config.scan.include_pattern.as_deref(), Some("**/*.txt"));
        assert!(config.scan.include_hidden_files);
        assert_eq!(config.extract.max_file_size, Some(10 << 20));
        assert_eq!(config.output.kind, OutputKind::Parquet);
        assert_eq!(config.output.directory, PathBuf::from("/tmp/out"));
        assert_eq!(config.workers.jobs, Some(3));
    }

    #[test]
    fn size_may_be_plain_bytes() {
        let config: Config = toml::from_str("[extract]\nmax_file_size = 2048\n").unwrap();
        assert_eq!(config.extract.max_file_size, Some(2048));
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
        assert!(parse_duration("5 weeks").is_err());
        assert!(parse_duration("s").is_err());
    }

    #[test]
    fn sizes() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("4k").unwrap(), 4096);
        assert_eq!(parse_size("10M").unwrap(), 10 << 20);
        assert_eq!(parse_size("1G").unwrap(), 1 << 30);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("99999999999999G").is_err());
    }

    #[test]
    fn tags() {
        assert_eq!(
            parse_tag("batch=7").unwrap(),
            ("batch".to_string(), "7".to_string())
        );
        assert_eq!(parse_tag("note=a=b").unwrap().1, "a=b");
        assert!(parse_tag("novalue").is_err());
        assert!(parse_tag("=x").is_err());
    }
}
