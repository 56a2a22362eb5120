use crate::constants::KEY_FILE;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use timelock_core::constants::DEFAULT_DIFFICULTY;
use timelock_core::crypto::{XChaChaCipher, KEY_LEN};
use timelock_storage::atomic::{read_if_exists, write_atomically};
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RecordsBackend {
    Json,
    Sled,
}

#[derive(Parser, Debug)]
#[command(name = "timelock-node", about = "Time-locked message ledger node")]
pub struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, env = "TIMELOCK_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: String,

    /// Directory for the ledger snapshot, message records and blobs
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Leading zero hex digits required of a block hash. Only used when
    /// creating a new ledger; a loaded one keeps its own.
    #[arg(long, default_value_t = DEFAULT_DIFFICULTY)]
    pub difficulty: usize,

    /// Where message records are kept
    #[arg(long, value_enum, default_value = "json")]
    pub records: RecordsBackend,

    /// Peer node to register at startup (repeatable)
    #[arg(long = "peer")]
    pub peers: Vec<String>,

    /// 64 hex characters. Without it the key file in the data directory is
    /// used, created on first start.
    #[arg(long, env = "TIMELOCK_ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: Option<String>,
}

/// Resolve the payload cipher from an explicit key or the key file.
pub fn load_cipher(explicit: Option<&str>, data_dir: &Path) -> Result<XChaChaCipher> {
    if let Some(key) = explicit {
        return XChaChaCipher::from_hex(key).context("invalid encryption key");
    }

    let path = data_dir.join(KEY_FILE);
    let stored = read_if_exists(&path).with_context(|| format!("reading {}", path.display()))?;
    if let Some(bytes) = stored {
        let text = String::from_utf8(bytes).context("key file is not text")?;
        return XChaChaCipher::from_hex(&text)
            .with_context(|| format!("invalid key in {}", path.display()));
    }

    let key: [u8; KEY_LEN] = XChaChaCipher::generate_key();
    write_atomically(&path, hex::encode(key).as_bytes())
        .with_context(|| format!("writing {}", path.display()))?;
    warn!(path = %path.display(), "generated a new encryption key, back it up");
    Ok(XChaChaCipher::new(&key))
}
