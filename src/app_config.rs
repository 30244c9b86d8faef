//! Configuration file loading for CLI defaults.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use language101_core::paths;

/// `key = value` file configuration; every value may be overridden on the command line.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Site account user name.
    pub username: Option<String>,
    /// Site account password.
    pub password: Option<String>,
    /// Directory receiving the pathway folders.
    pub output_dir: Option<PathBuf>,
    /// Minimum pause between lessons in seconds.
    pub min_delay_secs: Option<i64>,
    /// Maximum pause between lessons in seconds.
    pub max_delay_secs: Option<i64>,
    /// Build flashcard decks.
    pub flashcards: Option<bool>,
    /// Course language name.
    pub language: Option<String>,
    /// Response header that marks a successful login.
    pub auth_marker_header: Option<String>,
    /// Default verbosity mode.
    pub verbosity: Option<VerbositySetting>,
}

impl std::fmt::Debug for FileConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("output_dir", &self.output_dir)
            .field("min_delay_secs", &self.min_delay_secs)
            .field("max_delay_secs", &self.max_delay_secs)
            .field("flashcards", &self.flashcards)
            .field("language", &self.language)
            .field("auth_marker_header", &self.auth_marker_header)
            .field("verbosity", &self.verbosity)
            .finish()
    }
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Log filter used when neither `RUST_LOG` nor a CLI flag says otherwise.
    #[must_use]
    pub fn default_filter(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Loads config from the default path if present.
///
/// A missing config directory or file is not an error.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let Ok(path) = paths::config_file_path() else {
        return Ok(LoadedConfig {
            path: None,
            config: None,
        });
    };

    if !path.exists() {
        return Ok(LoadedConfig {
            path: Some(path),
            config: None,
        });
    }

    let config = load_file_config(&path)?;
    Ok(LoadedConfig {
        path: Some(path),
        config: Some(config),
    })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!(
                "Invalid config syntax on line {}: expected key = value",
                line_index + 1
            );
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {}", line_index + 1);

        match key {
            "username" => cfg.username = Some(parse_string_literal(value).with_context(invalid)?),
            "password" => cfg.password = Some(parse_string_literal(value).with_context(invalid)?),
            "output_dir" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.output_dir = Some(PathBuf::from(parsed));
            }
            "min_delay" | "min_delay_secs" => {
                cfg.min_delay_secs = Some(parse_integer_i64(value).with_context(invalid)?);
            }
            "max_delay" | "max_delay_secs" => {
                cfg.max_delay_secs = Some(parse_integer_i64(value).with_context(invalid)?);
            }
            "flashcards" => cfg.flashcards = Some(parse_boolean(value).with_context(invalid)?),
            "language" => cfg.language = Some(parse_string_literal(value).with_context(invalid)?),
            "auth_marker_header" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                if parsed.trim().is_empty() {
                    bail!("{}: header name must not be empty", invalid());
                }
                cfg.auth_marker_header = Some(parsed.trim().to_ascii_lowercase());
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!(
                        "Invalid `verbosity` value '{}' on line {}",
                        parsed,
                        line_index + 1
                    )
                })?);
            }
            unknown => {
                bail!(
                    "Unknown configuration key: '{}' on line {}",
                    unknown,
                    line_index + 1
                );
            }
        }
    }
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_i64(raw_value: &str) -> Result<i64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    i64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for i64"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}

/// Accepts `true/false/yes/no/y/n/1/0`, case-insensitive, optionally quoted.
pub(crate) fn parse_boolean(raw_value: &str) -> Result<bool> {
    let token = raw_value.trim();
    let token = token
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(token);
    match token.to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Ok(true),
        "false" | "no" | "n" | "0" => Ok(false),
        _ => bail!("Expected one of: true, false, yes, no, y, n, 1, 0"),
    }
}
