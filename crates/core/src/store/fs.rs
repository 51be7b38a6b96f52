use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::DocumentStore;
use crate::fetch::{CacheKey, FetchResult};
use crate::model::AttemptOutput;
use crate::{GleanerError, Result};

/// Filesystem document store.
///
/// Layout under the root directory:
///
/// ```text
/// fetch/<key digest>.cache              one JSON header line, then the raw body
/// attempts/<candidate_id>/<attempt_id>.json
/// ```
///
/// Files are written to a uniquely named sibling and renamed into place, so
/// readers never see a torn file and the last rename wins.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn fetch_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join("fetch").join(format!("{}.cache", key.digest()))
    }

    async fn write_atomic(&self, path: &Path, contents: Vec<u8>) -> Result<()> {
        let parent = path.parent().unwrap_or(&self.root);
        tokio::fs::create_dir_all(parent).await.map_err(|e| unavailable(parent, e))?;

        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("document");
        let temp = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&temp, contents).await.map_err(|e| unavailable(&temp, e))?;

        if let Err(e) = tokio::fs::rename(&temp, path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(unavailable(path, e));
        }
        Ok(())
    }
}

fn unavailable(path: &Path, e: std::io::Error) -> GleanerError {
    GleanerError::PersistenceUnavailable(format!("{}: {e}", path.display()))
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn get_fetch(&self, key: &CacheKey) -> Result<Option<FetchResult>> {
        let path = self.fetch_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(&path, e)),
        };

        let Some(split) = bytes.iter().position(|&b| b == b'\n') else {
            debug!(path = %path.display(), "Cache file has no header; ignoring");
            return Ok(None);
        };
        let mut result: FetchResult = serde_json::from_slice(&bytes[..split])?;
        result.body = bytes[split + 1..].to_vec();
        Ok(Some(result))
    }

    async fn put_fetch(&self, key: &CacheKey, result: &FetchResult) -> Result<()> {
        let mut contents = serde_json::to_vec(result)?;
        contents.push(b'\n');
        contents.extend_from_slice(&result.body);
        self.write_atomic(&self.fetch_path(key), contents).await
    }

    async fn put_attempt_output(&self, output: &AttemptOutput) -> Result<()> {
        let path = self
            .root
            .join("attempts")
            .join(output.candidate_id.as_str())
            .join(format!("{}.json", output.attempt_id));
        self.write_atomic(&path, serde_json::to_vec_pretty(output)?).await
    }
}
