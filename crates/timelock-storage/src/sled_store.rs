use std::collections::HashSet;
use std::path::Path;

use sled::{Batch, Db, Tree};
use timelock_core::message::{MessageRecord, MessageStore};
use timelock_core::{LedgerError, Result};
use tracing::info;

const TREE_MESSAGES: &str = "messages";

/// Message records in a sled tree keyed by big-endian id, values in bincode.
/// A full-set replacement is applied as one atomic batch.
#[derive(Clone)]
pub struct SledMessageStore {
  db: Db,
  messages: Tree,
}

impl SledMessageStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let db = sled::open(path).map_err(|e| LedgerError::persistence("opening sled", e))?;
    let messages = db
      .open_tree(TREE_MESSAGES)
      .map_err(|e| LedgerError::persistence("opening messages tree", e))?;
    info!("sled message store opened");
    Ok(Self { db, messages })
  }

  pub fn flush(&self) -> Result<()> {
    self
      .db
      .flush()
      .map_err(|e| LedgerError::persistence("flushing sled", e))?;
    Ok(())
  }
}

impl MessageStore for SledMessageStore {
  fn load_all(&self) -> Result<Vec<MessageRecord>> {
    self
      .messages
      .iter()
      .values()
      .map(|value| {
        let bytes = value.map_err(|e| LedgerError::persistence("reading message", e))?;
        bincode::deserialize(&bytes).map_err(|e| LedgerError::persistence("decoding message", e))
      })
      .collect()
  }

  fn replace_all(&self, records: &[MessageRecord]) -> Result<()> {
    let mut batch = Batch::default();
    let mut keep = HashSet::with_capacity(records.len());
    for record in records {
      let key = record.id.to_be_bytes();
      let bytes = bincode::serialize(record)
        .map_err(|e| LedgerError::persistence("encoding message", e))?;
      batch.insert(&key[..], bytes);
      keep.insert(key);
    }
    for key in self.messages.iter().keys() {
      let key = key.map_err(|e| LedgerError::persistence("scanning messages", e))?;
      let stale = <[u8; 8]>::try_from(key.as_ref()).map_or(true, |k| !keep.contains(&k));
      if stale {
        batch.remove(key);
      }
    }

    self
      .messages
      .apply_batch(batch)
      .map_err(|e| LedgerError::persistence("writing messages", e))?;
    self.flush()
  }
}
