use serde::Serialize;
use serde_json::Value;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Failure to read a JSON document from disk
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document not found: {0}")]
    Missing(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Read a whole JSON document
pub async fn read_document(path: &Path) -> Result<Value, DocumentError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(DocumentError::Missing(path.to_path_buf()))
        }
        Err(source) => {
            return Err(DocumentError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_slice(&bytes).map_err(|source| DocumentError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Replace the document at `path` with `value`, pretty-printed.
///
/// The JSON is written to a sibling temp file, flushed to disk and renamed
/// over the target, so readers only ever see the old or the new document.
pub async fn write_document<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(io::Error::from)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = TempFile::new(temp_path(path));
    let mut file = tokio::fs::File::create(&tmp.path).await?;
    file.write_all(&json).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp.path, path).await?;
    tmp.keep();
    sync_parent(path).await?;
    debug!("Wrote {} bytes to {}", json.len(), path.display());
    Ok(())
}

/// Remove a document, treating "already gone" as success
pub async fn remove_document(path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Removes the temp file unless the rename went through, including when
/// the write future is dropped mid-way
struct TempFile {
    path: PathBuf,
    armed: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Make the rename itself durable
#[cfg(unix)]
async fn sync_parent(path: &Path) -> io::Result<()> {
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent,
        None => Path::new("."),
    };
    tokio::fs::File::open(parent).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_then_read_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("prices.json");

        write_document(&path, &json!({"tv": {"error": "x"}})).await.unwrap();

        let value = read_document(&path).await.unwrap();
        assert_eq!(value, json!({"tv": {"error": "x"}}));
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn failed_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        // Renaming a file over a directory fails after the temp file exists
        let target = dir.path().join("prices.json");
        std::fs::create_dir(&target).unwrap();

        assert!(write_document(&target, &json!({"tv": {}})).await.is_err());
        assert!(!temp_path(&target).exists());
    }

    #[tokio::test]
    async fn missing_and_malformed_documents_are_distinguished() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.json");
        assert!(matches!(
            read_document(&missing).await,
            Err(DocumentError::Missing(_))
        ));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{\"half\": ").unwrap();
        assert!(matches!(
            read_document(&broken).await,
            Err(DocumentError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn remove_document_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, "{}").unwrap();

        assert!(remove_document(&path).await.unwrap());
        assert!(!remove_document(&path).await.unwrap());
    }
}
