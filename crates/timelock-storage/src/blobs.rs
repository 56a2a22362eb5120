use crate::atomic::write_atomically;
use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use timelock_core::message::BlobStore;
use tracing::debug;

/// Blobs as files in one directory. The handle is the content hash followed
/// by a sanitized form of the given name.
#[derive(Clone, Debug)]
pub struct DirBlobStore {
    dir: PathBuf,
}

impl DirBlobStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn sanitize(name: &str) -> String {
        name.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl BlobStore for DirBlobStore {
    fn store(&self, bytes: &[u8], name: &str) -> Result<String> {
        let digest = hex::encode(Sha256::digest(bytes));
        let handle = format!("{}-{}", &digest[..16], Self::sanitize(name));
        let path = self.dir.join(&handle);
        write_atomically(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
        debug!(%handle, len = bytes.len(), "blob stored");
        Ok(handle)
    }

    fn retrieve(&self, handle: &str) -> Result<Vec<u8>> {
        if handle.is_empty() || handle.starts_with('.') || Self::sanitize(handle) != handle {
            bail!("invalid blob handle `{handle}`");
        }
        let path = self.dir.join(handle);
        std::fs::read(&path).with_context(|| format!("reading {}", path.display()))
    }
}
