//! Saved session tokens, so one CLI invocation can pick up where the last
//! one left off.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::remote::SessionTokens;

#[derive(Debug, thiserror::Error)]
pub enum SessionFileError {
    #[error("session file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("session file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_error(path: &Path, source: io::Error) -> SessionFileError {
    SessionFileError::Io { path: path.to_path_buf(), source }
}

/// Read saved tokens. A missing file means no saved session.
///
/// # Errors
///
/// Returns [`SessionFileError`] when the file exists but cannot be read or
/// decoded.
pub fn load(path: &Path) -> Result<Option<SessionTokens>, SessionFileError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, e)),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| SessionFileError::Corrupt { path: path.to_path_buf(), source })
}

/// Write `tokens`, or remove the file when there is no session.
///
/// # Errors
///
/// Returns [`SessionFileError::Io`] when the file cannot be written or
/// removed.
pub fn save(path: &Path, tokens: Option<&SessionTokens>) -> Result<(), SessionFileError> {
    let Some(tokens) = tokens else {
        return match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(io_error(path, e)),
            _ => Ok(()),
        };
    };

    let body = serde_json::to_vec_pretty(tokens)
        .map_err(|source| SessionFileError::Corrupt { path: path.to_path_buf(), source })?;
    let mut file = open_private(path).map_err(|e| io_error(path, e))?;
    file.write_all(&body).map_err(|e| io_error(path, e))?;
    tracing::debug!(path = %path.display(), "session saved");
    Ok(())
}

/// Open for writing as owner-only. `mode` only applies on create, so an
/// existing file is narrowed before anything is written to it.
#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let file = fs::OpenOptions::new().write(true).create(true).truncate(true).mode(0o600).open(path)?;
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create(true).truncate(true).open(path)
}

#[cfg(test)]
#[path = "session_file_test.rs"]
mod tests;
