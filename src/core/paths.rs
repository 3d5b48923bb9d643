use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Base deckhand config directory (~/.config/deckhand/ on all platforms)
pub fn deckhand() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected(
                "APPDATA environment variable not set on Windows".to_string(),
            )
        })?;
        Ok(PathBuf::from(appdata).join("deckhand"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected(
                "HOME environment variable not set on Unix-like system".to_string(),
            )
        })?;
        Ok(PathBuf::from(home).join(".config").join("deckhand"))
    }
}

/// Global deckhand.json config file path
pub fn deckhand_json() -> Result<PathBuf> {
    Ok(deckhand()?.join("deckhand.json"))
}

/// Expand a leading `~` in a user-supplied path.
pub fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}
