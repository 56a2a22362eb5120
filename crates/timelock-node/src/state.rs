use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use timelock_core::chain::Ledger;
use timelock_core::contract::ContractEngine;
use timelock_core::mine::{mine_block_parallel, CancelToken};
use timelock_core::reveal::RevealGate;
use timelock_core::{Block, LedgerError, Result};
use timelock_storage::JsonFileStore;
use tracing::{debug, info};

/// Everything a mutation touches, guarded as one unit.
pub struct Core {
    pub ledger: Ledger<JsonFileStore>,
    pub gate: RevealGate,
    pub contracts: ContractEngine,
}

pub type SharedCore = Arc<RwLock<Core>>;

#[derive(Clone)]
pub struct AppState {
    pub core: SharedCore,
    pub miner: Arc<Miner>,
    pub http: reqwest::Client,
}

/// Runs nonce searches off the async runtime. At most one search is
/// current; starting another or aborting cancels it.
#[derive(Default)]
pub struct Miner {
    current: Mutex<Option<CancelToken>>,
}

impl Miner {
    /// Snapshot the pending buffer, search for a nonce on a blocking thread
    /// without holding the lock, then commit under the write lock.
    pub async fn mine(&self, core: &SharedCore) -> Result<Block> {
        let (template, difficulty) = {
            let core = core.read();
            (core.ledger.template()?, core.ledger.chain().difficulty())
        };

        let cancel = CancelToken::new();
        if let Some(previous) = self.current.lock().replace(cancel.clone()) {
            debug!("superseding in-flight search");
            previous.cancel();
        }

        let search = {
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || mine_block_parallel(template, difficulty, &cancel))
        };
        let found = search
            .await
            .map_err(|e| LedgerError::collaborator("mining worker", anyhow::Error::new(e)));
        self.finish(&cancel);

        let block = found?.ok_or(LedgerError::MiningAborted)?;
        core.write().ledger.commit(block)
    }

    /// Cancel the in-flight search, if any.
    pub fn abort(&self) -> bool {
        match self.current.lock().take() {
            Some(cancel) => {
                cancel.cancel();
                info!("mining aborted");
                true
            }
            None => false,
        }
    }

    fn finish(&self, cancel: &CancelToken) {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|c| c.same_as(cancel)) {
            *current = None;
        }
    }
}
