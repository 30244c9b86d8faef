//! Merges CLI flags, environment, and the config file into one run configuration.

use std::env;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use language101_core::session::DEFAULT_AUTH_MARKER_HEADER;
use language101_core::{CredentialPrompt, Credentials, DelayWindow, SupportedLanguage};
use tracing::warn;

use crate::app_config::{FileConfig, VerbositySetting};
use crate::cli::Args;

/// Environment variable holding the account user name.
pub(crate) const USERNAME_ENV: &str = "LANGUAGE101_USERNAME";
/// Environment variable holding the account password.
pub(crate) const PASSWORD_ENV: &str = "LANGUAGE101_PASSWORD";

const DEFAULT_MIN_DELAY_SECS: i64 = 5;
const DEFAULT_MAX_DELAY_SECS: i64 = 15;

/// Everything a run needs, after CLI > environment > config file > defaults.
pub(crate) struct Settings {
    pub(crate) start_url: Option<String>,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) output_dir: PathBuf,
    pub(crate) delay: DelayWindow,
    pub(crate) flashcards: bool,
    pub(crate) language: SupportedLanguage,
    pub(crate) auth_marker_header: String,
    pub(crate) fresh_login: bool,
    pub(crate) accept_stale_stack: bool,
    pub(crate) quiet: bool,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("start_url", &self.start_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("output_dir", &self.output_dir)
            .field("delay", &self.delay)
            .field("flashcards", &self.flashcards)
            .field("language", &self.language)
            .field("auth_marker_header", &self.auth_marker_header)
            .field("fresh_login", &self.fresh_login)
            .field("accept_stale_stack", &self.accept_stale_stack)
            .field("quiet", &self.quiet)
            .finish()
    }
}

impl Settings {
    /// Credentials when both halves are known.
    pub(crate) fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials::new(username, password)),
            _ => None,
        }
    }

    /// Asks on the terminal for whichever credential half is missing, the
    /// first time the session needs to log in.
    pub(crate) fn credential_prompt(&self) -> TerminalPrompt {
        TerminalPrompt {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// Credentials read from an interactive terminal on demand.
pub(crate) struct TerminalPrompt {
    username: Option<String>,
    password: Option<String>,
}

impl CredentialPrompt for TerminalPrompt {
    fn ask(&self) -> Option<Credentials> {
        if !io::stdin().is_terminal() {
            return None;
        }
        let typed =
            complete_credentials(self.username.as_deref(), self.password.as_deref(), prompt_line);
        match typed {
            Ok(credentials) => Some(credentials),
            Err(error) => {
                warn!(error = %error, "could not read credentials from the terminal");
                None
            }
        }
    }
}

/// Fills the missing halves through `read`, which is given the prompt text.
fn complete_credentials(
    username: Option<&str>,
    password: Option<&str>,
    mut read: impl FnMut(&str) -> Result<String>,
) -> Result<Credentials> {
    let username = match username {
        Some(username) => username.to_string(),
        None => read("Username (mail): ")?,
    };
    let password = match password {
        Some(password) => password.to_string(),
        None => read("Password: ")?,
    };
    Ok(Credentials::new(username, password))
}

/// Log filter used when `RUST_LOG` is unset.
///
/// Priority: quiet flag > verbose flag > config verbosity > info.
pub(crate) fn default_log_filter(args: &Args, file: Option<&FileConfig>) -> &'static str {
    if args.quiet {
        return "error";
    }
    match args.verbose {
        0 => file
            .and_then(|config| config.verbosity)
            .unwrap_or(VerbositySetting::Default)
            .default_filter(),
        1 => "debug",
        _ => "trace",
    }
}

/// Resolves the run settings.
pub(crate) fn resolve_settings(args: &Args, file: Option<&FileConfig>) -> Result<Settings> {
    let language_name = args
        .language
        .clone()
        .or_else(|| file.and_then(|config| config.language.clone()));
    let language = match language_name {
        Some(name) => name
            .parse::<SupportedLanguage>()
            .context("Invalid course language")?,
        None => SupportedLanguage::default(),
    };

    let min_delay = args
        .min_delay
        .or_else(|| file.and_then(|config| config.min_delay_secs))
        .unwrap_or(DEFAULT_MIN_DELAY_SECS);
    let max_delay = args
        .max_delay
        .or_else(|| file.and_then(|config| config.max_delay_secs))
        .unwrap_or(DEFAULT_MAX_DELAY_SECS);

    let start_url = args.url.as_ref().map(|url| url.trim().to_string());
    if start_url.as_deref().is_some_and(str::is_empty) {
        bail!("--url must not be empty");
    }

    Ok(Settings {
        start_url,
        username: args
            .username
            .clone()
            .or_else(|| env_non_empty(USERNAME_ENV))
            .or_else(|| file.and_then(|config| config.username.clone())),
        password: args
            .password
            .clone()
            .or_else(|| env_non_empty(PASSWORD_ENV))
            .or_else(|| file.and_then(|config| config.password.clone())),
        output_dir: args
            .output_dir
            .clone()
            .or_else(|| file.and_then(|config| config.output_dir.clone()))
            .unwrap_or_else(|| PathBuf::from(".")),
        delay: DelayWindow::new(min_delay, max_delay),
        flashcards: args
            .flashcards_override()
            .or_else(|| file.and_then(|config| config.flashcards))
            .unwrap_or(true),
        language,
        auth_marker_header: file
            .and_then(|config| config.auth_marker_header.clone())
            .unwrap_or_else(|| DEFAULT_AUTH_MARKER_HEADER.to_string()),
        fresh_login: args.fresh_login,
        accept_stale_stack: args.accept_stale_stack,
        quiet: args.quiet,
    })
}

/// Asks a yes/no question on an interactive terminal; `false` otherwise.
pub(crate) fn confirm(question: &str) -> Result<bool> {
    if !io::stdin().is_terminal() {
        return Ok(false);
    }
    let answer = prompt_line(&format!("{question} [y/N] "))?;
    Ok(crate::app_config::parse_boolean(&answer).unwrap_or(false))
}

fn prompt_line(prompt: &str) -> Result<String> {
    let mut stderr = io::stderr();
    stderr.write_all(prompt.as_bytes())?;
    stderr.flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from the terminal")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn env_non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;

    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["language101"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_without_config() {
        let settings = resolve_settings(&args(&[]), None).unwrap();
        assert_eq!(settings.output_dir, PathBuf::from("."));
        assert!(settings.flashcards);
        assert_eq!(settings.language, SupportedLanguage::Japanese);
        assert_eq!(settings.auth_marker_header, "set-cookie");
        assert_eq!(settings.delay.min(), Duration::from_secs(5));
        assert_eq!(settings.delay.max(), Duration::from_secs(15));
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let file = FileConfig {
            output_dir: Some(PathBuf::from("/from/config")),
            flashcards: Some(true),
            min_delay_secs: Some(1),
            max_delay_secs: Some(2),
            ..FileConfig::default()
        };
        let settings = resolve_settings(
            &args(&["-o", "/from/cli", "--no-flashcards", "--max-delay", "9"]),
            Some(&file),
        )
        .unwrap();
        assert_eq!(settings.output_dir, PathBuf::from("/from/cli"));
        assert!(!settings.flashcards);
        assert_eq!(settings.delay.min(), Duration::from_secs(1));
        assert_eq!(settings.delay.max(), Duration::from_secs(9));
    }

    #[test]
    fn test_inverted_delays_are_swapped() {
        let settings =
            resolve_settings(&args(&["--min-delay", "50", "--max-delay", "10"]), None).unwrap();
        assert_eq!(settings.delay.min(), Duration::from_secs(10));
        assert_eq!(settings.delay.max(), Duration::from_secs(50));
    }

    #[test]
    fn test_unknown_language_is_rejected() {
        let err = resolve_settings(&args(&["--language", "klingon"]), None).unwrap_err();
        assert!(format!("{err:#}").contains("klingon"));
    }

    #[test]
    fn test_credentials_need_both_halves() {
        let settings = resolve_settings(&args(&["-u", "me", "-p", "pw"]), None).unwrap();
        assert_eq!(settings.credentials().unwrap().username(), "me");

        let file = FileConfig {
            username: Some("me".to_string()),
            ..FileConfig::default()
        };
        let mut settings = resolve_settings(&args(&[]), Some(&file)).unwrap();
        settings.password = None;
        assert!(settings.credentials().is_none());
    }

    #[test]
    fn test_prompt_reads_only_missing_halves() {
        let mut asked = Vec::new();
        let credentials = complete_credentials(Some("me"), None, |prompt| {
            asked.push(prompt.to_string());
            Ok("typed".to_string())
        })
        .unwrap();
        assert_eq!(credentials.username(), "me");
        assert_eq!(asked, vec!["Password: "]);

        let failed = complete_credentials(None, None, |_| bail!("closed"));
        assert!(failed.is_err());
    }

    #[test]
    fn test_log_filter_priority() {
        let file = FileConfig {
            verbosity: Some(VerbositySetting::Debug),
            ..FileConfig::default()
        };
        assert_eq!(default_log_filter(&args(&[]), Some(&file)), "trace");
        assert_eq!(default_log_filter(&args(&["-v"]), Some(&file)), "debug");
        assert_eq!(default_log_filter(&args(&["-q", "-v"]), Some(&file)), "error");
        assert_eq!(default_log_filter(&args(&[]), None), "info");
    }
}
