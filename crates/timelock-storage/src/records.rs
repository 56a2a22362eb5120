use crate::atomic::{read_if_exists, write_atomically};
use std::path::{Path, PathBuf};
use timelock_core::message::{MessageRecord, MessageStore};
use timelock_core::{LedgerError, Result};

/// Message records as a JSON array, rewritten whole on every change.
#[derive(Clone, Debug)]
pub struct JsonMessageStore {
    path: PathBuf,
}

impl JsonMessageStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl MessageStore for JsonMessageStore {
    fn load_all(&self) -> Result<Vec<MessageRecord>> {
        match read_if_exists(&self.path) {
            Ok(None) => Ok(Vec::new()),
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).map_err(|e| {
                LedgerError::persistence(format!("decoding {}", self.path.display()), e)
            }),
            Err(e) => Err(LedgerError::persistence(
                format!("reading {}", self.path.display()),
                e,
            )),
        }
    }

    fn replace_all(&self, records: &[MessageRecord]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(records)
            .map_err(|e| LedgerError::persistence("encoding message records", e))?;
        write_atomically(&self.path, &bytes)
            .map_err(|e| LedgerError::persistence(format!("writing {}", self.path.display()), e))
    }
}
