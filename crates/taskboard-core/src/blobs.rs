use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::datastore::write_atomic;
use crate::error::BoardError;
use crate::store::BlobStore;

/// Blob store over a local directory: objects of bucket `b` live under
/// `<data>/blobs/<b>/`, and their public URLs are
/// `<public_base>/<b>/<path>`.
#[derive(Debug)]
pub struct DirBlobStore {
    root: PathBuf,
    bucket: String,
    public_base: String,
}

impl DirBlobStore {
    pub fn open(
        data_dir: &Path,
        bucket: &str,
        public_base: Option<&str>,
    ) -> anyhow::Result<Self> {
        let blobs_dir = data_dir.join("blobs");
        let root = blobs_dir.join(bucket);
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create {}", root.display()))?;

        let public_base = match public_base {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("file://{}", blobs_dir.display()),
        };
        info!(root = %root.display(), public_base = %public_base, "opened blob store");

        Ok(Self {
            root,
            bucket: bucket.to_string(),
            public_base,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Maps an object path onto the bucket directory. Absolute paths and
    /// `..` are refused so objects cannot escape it.
    fn object_file(&self, path: &str) -> Result<PathBuf, BoardError> {
        let relative = Path::new(path);
        let plain = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !plain {
            return Err(BoardError::Blob(format!("invalid object path: {path:?}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for DirBlobStore {
    #[tracing::instrument(skip(self, bytes), fields(bucket = %self.bucket, size = bytes.len()))]
    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<(), BoardError> {
        let file = self.object_file(path)?;
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                BoardError::Blob(format!("failed to create {}: {err}", parent.display()))
            })?;
        }
        write_atomic(&file, bytes).map_err(|err| BoardError::Blob(format!("{err:#}")))?;
        debug!(file = %file.display(), "stored object");
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.public_base, self.bucket, path)
    }

    #[tracing::instrument(skip(self), fields(bucket = %self.bucket))]
    async fn remove(&self, paths: &[String]) -> Result<(), BoardError> {
        for path in paths {
            let file = self.object_file(path)?;
            match fs::remove_file(&file) {
                Ok(()) => debug!(file = %file.display(), "removed object"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    debug!(file = %file.display(), "object already gone")
                }
                Err(err) => {
                    return Err(BoardError::Blob(format!(
                        "failed to remove {}: {err}",
                        file.display()
                    )));
                }
            }
        }
        Ok(())
    }
}
