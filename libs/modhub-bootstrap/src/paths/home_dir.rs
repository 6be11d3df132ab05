use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Errors for resolving the home directory
#[derive(Debug, thiserror::Error)]
pub enum HomeDirError {
    #[error("no user home found: {0} is not set")]
    EnvMissing(&'static str),
    #[error("home_dir must be an absolute path (after ~ expansion): {0}")]
    AbsoluteRequired(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(target_os = "windows")]
const USER_HOME_VARS: &[&str] = &["USERPROFILE", "HOME"];
#[cfg(not(target_os = "windows"))]
const USER_HOME_VARS: &[&str] = &["HOME"];

#[cfg(target_os = "windows")]
const DEFAULT_BASE_VAR: &str = "APPDATA";
#[cfg(not(target_os = "windows"))]
const DEFAULT_BASE_VAR: &str = "HOME";

fn user_home() -> Result<PathBuf, HomeDirError> {
    USER_HOME_VARS
        .iter()
        .find_map(|var| env::var(var).ok())
        .map(PathBuf::from)
        .ok_or(HomeDirError::EnvMissing(USER_HOME_VARS[0]))
}

/// Expand a leading `~`, `~/` or `~\` into the user home.
fn expand_tilde(raw: &str) -> Result<PathBuf, HomeDirError> {
    if raw == "~" {
        return user_home();
    }
    match raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\")) {
        Some(rest) => Ok(user_home()?.join(rest)),
        None => Ok(PathBuf::from(raw)),
    }
}

/// Resolve the server home directory.
///
/// A configured value may start with `~` and must be absolute after expansion.
/// Without a configured value the platform base is used: `$HOME/<default_subdir>`
/// on Unix, `%APPDATA%/<default_subdir>` on Windows.
///
/// When `create` is true the directory is created if missing.
pub fn resolve_home_dir(
    config_home: Option<String>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf, HomeDirError> {
    let path = match config_home {
        Some(raw) => {
            let expanded = expand_tilde(&raw)?;
            if !expanded.is_absolute() {
                return Err(HomeDirError::AbsoluteRequired(raw));
            }
            expanded
        }
        None => {
            let base = env::var(DEFAULT_BASE_VAR)
                .map_err(|_| HomeDirError::EnvMissing(DEFAULT_BASE_VAR))?;
            Path::new(&base).join(default_subdir)
        }
    };

    if create {
        fs::create_dir_all(&path)?;
    }
    Ok(path)
}
