//! XDG Base Directory paths for studyloop.
//!
//! Policy state is user data, so it lives under the data directory;
//! config files live under the config directory. XDG variables win over
//! platform-native locations so the CLI behaves the same everywhere.

use std::path::PathBuf;

const APP_DIR: &str = "studyloop";

fn xdg_dir(var: &str, home_relative: &str) -> PathBuf {
    if let Ok(dir) = std::env::var(var)
        && !dir.is_empty()
    {
        return PathBuf::from(dir).join(APP_DIR);
    }
    match dirs::home_dir() {
        Some(home) => home.join(home_relative).join(APP_DIR),
        None => PathBuf::from(home_relative).join(APP_DIR),
    }
}

/// Get the studyloop config directory.
///
/// Returns `$XDG_CONFIG_HOME/studyloop` if set, otherwise `~/.config/studyloop`.
///
/// # Examples
///
/// ```
/// use studyloop_paths::config_dir;
///
/// let config_file = config_dir().join("config.toml");
/// assert!(config_file.ends_with("studyloop/config.toml"));
/// ```
pub fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
}

/// Get the studyloop data directory.
///
/// Returns `$XDG_DATA_HOME/studyloop` if set, otherwise `~/.local/share/studyloop`.
pub fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
}

/// Directory holding one JSON policy document per user.
pub fn policies_dir() -> PathBuf {
    data_dir().join("policies")
}

/// Default SQLite database for the `sqlite` storage backend.
pub fn database_path() -> PathBuf {
    data_dir().join("studyloop.db")
}
