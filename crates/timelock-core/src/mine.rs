use crate::{constants::CANCEL_CHECK_INTERVAL, pow::meets_difficulty, Block};
use rayon::prelude::*;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::info;

/// Shared flag asking an in-flight search to stop.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Whether both tokens share one flag.
    pub fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Mines a block by searching nonces in parallel until its hash has at least
/// `difficulty` leading zero hex digits. The token is polled every
/// `CANCEL_CHECK_INTERVAL` nonces; `None` means the search was cancelled.
pub fn mine_block_parallel(block: Block, difficulty: usize, cancel: &CancelToken) -> Option<Block> {
    let preimage = block.preimage();

    // `Some(None)` stops the search on cancellation.
    let found = (0u64..u64::MAX).into_par_iter().find_map_any(|nonce| {
        if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            return Some(None);
        }
        let hash = preimage.hash_nonce(nonce);
        meets_difficulty(&hash, difficulty).then_some(Some((nonce, hash)))
    })?;

    let (nonce, hash) = found?;
    info!(index = block.index, nonce, %hash, "found nonce");
    Some(Block {
        nonce,
        hash,
        ..block
    })
}
