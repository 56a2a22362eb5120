//! Best-effort longest-chain reconciliation.
//!
//! Peers are not authenticated. A peer serving a longer chain that merely
//! recomputes correctly will be adopted; there is no finality and no
//! defence against fabricated history.

use crate::chain::first_invalid;
use crate::Block;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// What a peer reports at `GET /chain`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerChain {
    pub length: usize,
    pub chain: Vec<Block>,
}

impl PeerChain {
    pub fn from_blocks(blocks: &[Block]) -> Self {
        Self {
            length: blocks.len(),
            chain: blocks.to_vec(),
        }
    }
}

/// Fetches a peer's chain. Implementations do the network I/O.
pub trait ChainSource {
    fn fetch_chain(&self, peer: &str) -> anyhow::Result<PeerChain>;
}

/// Recompute every block of a foreign chain, genesis included.
pub fn is_valid_foreign(blocks: &[Block]) -> bool {
    match blocks.first() {
        Some(genesis) => {
            genesis.index == 0
                && genesis.is_sealed_consistently()
                && first_invalid(blocks).is_none()
        }
        None => false,
    }
}

/// Query each peer, skipping the ones that fail.
pub fn fetch_all<'a, S>(peers: impl Iterator<Item = &'a str>, source: &S) -> Vec<PeerChain>
where
    S: ChainSource + ?Sized,
{
    peers
        .filter_map(|peer| match source.fetch_chain(peer) {
            Ok(found) => Some(found),
            Err(e) => {
                warn!(peer, error = %e, "peer unreachable, skipping");
                None
            }
        })
        .collect()
}

/// The longest candidate strictly longer than `local_len` whose reported
/// length matches its content and whose blocks recompute.
pub fn longest_valid(
    local_len: usize,
    candidates: impl IntoIterator<Item = PeerChain>,
) -> Option<Vec<Block>> {
    let mut best: Option<Vec<Block>> = None;
    let mut max_len = local_len;
    for candidate in candidates {
        let len = candidate.chain.len();
        if candidate.length != len || len <= max_len {
            continue;
        }
        if !is_valid_foreign(&candidate.chain) {
            debug!(len, "ignoring longer chain that fails validation");
            continue;
        }
        max_len = len;
        best = Some(candidate.chain);
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::{sha256_hex, Transaction};
    use anyhow::anyhow;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    struct Peers(HashMap<String, PeerChain>);

    impl ChainSource for Peers {
        fn fetch_chain(&self, peer: &str) -> anyhow::Result<PeerChain> {
            self.0
                .get(peer)
                .cloned()
                .ok_or_else(|| anyhow!("connection refused"))
        }
    }

    fn grow(chain: &mut Chain, blocks: u64) {
        for _ in 0..blocks {
            let id = chain.max_transaction_id().unwrap_or(0) + 1;
            chain.add_transaction(Transaction::new(
                id,
                Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
                sha256_hex(&id.to_be_bytes()),
            ));
            let mut block = chain.block_template(id as f64).unwrap();
            block.mine(chain.difficulty());
            chain.append_mined(block).unwrap();
        }
    }

    #[test]
    fn adopts_strictly_longer_valid_chain() {
        let mut local = Chain::with_genesis(1, 0.0);
        grow(&mut local, 1);
        let mut remote = Chain::with_genesis(1, 1.0);
        grow(&mut remote, 3);

        local.add_node("good:1");
        local.add_node("down:1");
        let peers = Peers(HashMap::from([(
            "good:1".to_string(),
            PeerChain::from_blocks(remote.blocks()),
        )]));
        let best = longest_valid(local.len(), fetch_all(local.nodes(), &peers));
        assert_eq!(best.as_deref(), Some(remote.blocks()));
    }

    #[test]
    fn keeps_local_chain_when_peers_are_not_longer() {
        let mut local = Chain::with_genesis(1, 0.0);
        grow(&mut local, 2);
        let mut remote = Chain::with_genesis(1, 1.0);
        grow(&mut remote, 2);

        local.add_node("peer:1");
        let peers = Peers(HashMap::from([(
            "peer:1".to_string(),
            PeerChain::from_blocks(remote.blocks()),
        )]));
        assert!(longest_valid(local.len(), fetch_all(local.nodes(), &peers)).is_none());
    }

    #[test]
    fn rejects_longer_chain_that_does_not_recompute() {
        let mut local = Chain::with_genesis(1, 0.0);
        let mut remote = Chain::with_genesis(1, 1.0);
        grow(&mut remote, 2);
        let mut forged = PeerChain::from_blocks(remote.blocks());
        forged.chain[1].transactions[0].message_hash = sha256_hex(b"forged");

        local.add_node("evil:1");
        let peers = Peers(HashMap::from([("evil:1".to_string(), forged)]));
        assert!(longest_valid(local.len(), fetch_all(local.nodes(), &peers)).is_none());
    }

    #[test]
    fn reported_length_must_match_content() {
        let mut remote = Chain::with_genesis(1, 1.0);
        grow(&mut remote, 1);
        let mut lying = PeerChain::from_blocks(remote.blocks());
        lying.length = 50;
        assert!(longest_valid(1, [lying]).is_none());
    }

    #[test]
    fn unreachable_peers_are_skipped() {
        let mut remote = Chain::with_genesis(1, 1.0);
        grow(&mut remote, 1);
        let peers = Peers(HashMap::from([(
            "up:1".to_string(),
            PeerChain::from_blocks(remote.blocks()),
        )]));
        let found = fetch_all(["a:1", "up:1", "b:1"].into_iter(), &peers);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].length, 2);
    }
}
