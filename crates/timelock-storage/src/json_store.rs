use crate::atomic::{read_if_exists, write_atomically};
use std::path::{Path, PathBuf};
use timelock_core::chain::{Chain, LedgerStore};
use timelock_core::{LedgerError, Result};
use tracing::{debug, info};

/// The ledger snapshot as one pretty-printed JSON document:
/// `chain`, `pending_transactions`, `difficulty`, `smart_contracts`, `nodes`.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStore for JsonFileStore {
    fn load(&self) -> Result<Option<Chain>> {
        let bytes = read_if_exists(&self.path).map_err(|e| {
            LedgerError::persistence(format!("reading {}", self.path.display()), e)
        })?;
        let Some(bytes) = bytes else {
            info!(path = %self.path.display(), "no ledger snapshot yet");
            return Ok(None);
        };
        let chain: Chain = serde_json::from_slice(&bytes).map_err(|e| {
            LedgerError::persistence(format!("decoding {}", self.path.display()), e)
        })?;
        info!(path = %self.path.display(), blocks = chain.len(), "ledger snapshot loaded");
        Ok(Some(chain))
    }

    fn save(&self, chain: &Chain) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(chain)
            .map_err(|e| LedgerError::persistence("encoding ledger snapshot", e))?;
        write_atomically(&self.path, &bytes).map_err(|e| {
            LedgerError::persistence(format!("writing {}", self.path.display()), e)
        })?;
        debug!(path = %self.path.display(), blocks = chain.len(), "ledger snapshot saved");
        Ok(())
    }
}
