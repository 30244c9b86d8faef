//! Per-user locations for configuration and persisted state.
//!
//! Everything lives under `$XDG_CONFIG_HOME/language101/`, falling back to
//! `~/.config/language101/` and then `%APPDATA%\language101\`.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

const APP_DIR_NAME: &str = "language101";
const CONFIG_FILE_NAME: &str = "config.toml";
const STACK_FILE_NAME: &str = "stack.db";
const SESSION_FILE_NAME: &str = "session.enc";

/// No usable base directory could be derived from the environment.
#[derive(Debug, thiserror::Error)]
#[error("unable to determine config directory (set XDG_CONFIG_HOME or HOME)")]
pub struct ConfigDirUnavailable;

/// Returns the application config directory.
///
/// # Errors
///
/// Returns [`ConfigDirUnavailable`] when none of `XDG_CONFIG_HOME`, `HOME`
/// or `APPDATA` is set to a non-blank value.
pub fn app_config_dir() -> Result<PathBuf, ConfigDirUnavailable> {
    resolve_config_dir(
        sanitize_env_path(env::var_os("XDG_CONFIG_HOME")),
        sanitize_env_path(env::var_os("HOME")),
        sanitize_env_path(env::var_os("APPDATA")),
    )
}

/// Path of the optional key=value configuration file.
///
/// # Errors
///
/// See [`app_config_dir`].
pub fn config_file_path() -> Result<PathBuf, ConfigDirUnavailable> {
    Ok(app_config_dir()?.join(CONFIG_FILE_NAME))
}

/// Path of the download stack database.
///
/// # Errors
///
/// See [`app_config_dir`].
pub fn stack_db_path() -> Result<PathBuf, ConfigDirUnavailable> {
    Ok(app_config_dir()?.join(STACK_FILE_NAME))
}

/// Path of the encrypted site session.
///
/// # Errors
///
/// See [`app_config_dir`].
pub fn session_file_path() -> Result<PathBuf, ConfigDirUnavailable> {
    Ok(app_config_dir()?.join(SESSION_FILE_NAME))
}

fn sanitize_env_path(value: Option<OsString>) -> Option<PathBuf> {
    let value = value?;
    if value.to_string_lossy().trim().is_empty() {
        return None;
    }

    Some(PathBuf::from(value))
}

fn resolve_config_dir(
    xdg_config_home: Option<PathBuf>,
    home: Option<PathBuf>,
    app_data: Option<PathBuf>,
) -> Result<PathBuf, ConfigDirUnavailable> {
    if let Some(xdg) = xdg_config_home {
        return Ok(xdg.join(APP_DIR_NAME));
    }
    if let Some(home) = home {
        return Ok(home.join(".config").join(APP_DIR_NAME));
    }
    if let Some(app_data) = app_data {
        return Ok(app_data.join(APP_DIR_NAME));
    }

    Err(ConfigDirUnavailable)
}
