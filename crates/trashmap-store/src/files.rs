use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

use crate::StoreError;

/// Hex SHA-256 of an image payload.
#[must_use]
pub fn image_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub(crate) fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Serialises `value` to a sibling temp file and renames it over `path`, so
/// readers of the file never observe a half-written document.
pub(crate) async fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), StoreError> {
    let body = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.display().to_string(),
        source,
    })?;

    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, &body).await.map_err(io_error(&tmp))?;
    tokio::fs::rename(&tmp, path).await.map_err(io_error(path))
}

/// Loads a JSON document, treating a missing file as empty.
///
/// A file that exists but does not parse is renamed to
/// `<name>.corrupt-<unix-seconds>` and an empty value is returned, so a bad
/// write never blocks startup and the original bytes are kept for inspection.
pub(crate) async fn load_json_or_quarantine<T>(path: &Path) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(io_error(path)(e)),
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(value),
        Err(error) => {
            let quarantine = corrupt_path(path);
            tracing::warn!(
                path = %path.display(),
                quarantine = %quarantine.display(),
                error = %error,
                "store: unreadable data file moved aside; starting empty"
            );
            tokio::fs::rename(path, &quarantine)
                .await
                .map_err(io_error(path))?;
            Ok(T::default())
        }
    }
}

/// Deletes a file, ignoring files that are already gone.
pub(crate) async fn remove_file_if_present(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path)(e)),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".corrupt-{}", chrono::Utc::now().timestamp()));
    path.with_file_name(name)
}
