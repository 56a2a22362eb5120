use crate::clock::{epoch_seconds, Clock};
use crate::constants::{DEFAULT_DIFFICULTY, GENESIS_PREVIOUS_HASH};
use crate::contract::{ContractBinding, ContractEngine};
use crate::pow::meets_difficulty;
use crate::{Block, LedgerError, Result, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{error, info};

/// Persistence seam for the whole ledger snapshot. Lives in `timelock-core`
/// so storage backends can depend on the core without a cycle.
pub trait LedgerStore: Send + Sync {
    /// `Ok(None)` means there is no prior state, not an error.
    fn load(&self) -> Result<Option<Chain>>;
    /// Replace the stored snapshot. Readers see the old or the new snapshot,
    /// never a mix.
    fn save(&self, chain: &Chain) -> Result<()>;
}

/// Blocks, the pending buffer and the auxiliary registries. The serde shape
/// is the on-disk snapshot format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    #[serde(rename = "chain")]
    pub(crate) blocks: Vec<Block>,
    pub(crate) pending_transactions: Vec<Transaction>,
    pub(crate) difficulty: usize,
    #[serde(default)]
    pub(crate) smart_contracts: BTreeMap<String, ContractBinding>,
    #[serde(default)]
    pub(crate) nodes: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChainStats {
    pub total_blocks: usize,
    pub total_transactions: usize,
    pub average_block_time: f64,
    pub difficulty: usize,
    pub nodes: usize,
    pub smart_contracts: usize,
}

/// Where a sealed transaction lives.
#[derive(Clone, Copy, Debug)]
pub struct Located<'a> {
    pub block_index: u64,
    pub block_hash: &'a str,
    pub transaction: &'a Transaction,
}

impl Chain {
    /// A chain holding only a freshly mined genesis block.
    pub fn with_genesis(difficulty: usize, timestamp: f64) -> Self {
        let mut genesis = Block::new(0, timestamp, vec![], GENESIS_PREVIOUS_HASH, 0);
        genesis.mine(difficulty);
        Self {
            blocks: vec![genesis],
            pending_transactions: vec![],
            difficulty,
            smart_contracts: BTreeMap::new(),
            nodes: BTreeSet::new(),
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.pending_transactions
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    pub fn contracts(&self) -> &BTreeMap<String, ContractBinding> {
        &self.smart_contracts
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn latest_block(&self) -> Result<&Block> {
        self.blocks.last().ok_or(LedgerError::EmptyChain)
    }

    /// Buffer a transaction. Shape and id uniqueness are the caller's job.
    pub fn add_transaction(&mut self, tx: Transaction) {
        self.pending_transactions.push(tx);
    }

    /// Snapshot the pending buffer into an unsealed block on top of the tip.
    pub fn block_template(&self, timestamp: f64) -> Result<Block> {
        if self.pending_transactions.is_empty() {
            return Err(LedgerError::NoPendingWork);
        }
        let tip = self.latest_block()?;
        Ok(Block::new(
            tip.index + 1,
            timestamp,
            self.pending_transactions.clone(),
            tip.hash.clone(),
            0,
        ))
    }

    /// Append a block mined from a template. The block must extend the
    /// current tip and seal exactly the head of the pending buffer; the
    /// sealed transactions leave the buffer.
    pub fn append_mined(&mut self, block: Block) -> Result<&Block> {
        let tip = self.latest_block()?;
        let sealed = block.transactions.len();
        if block.index != tip.index + 1
            || block.previous_hash != tip.hash
            || sealed == 0
            || !self.pending_transactions.starts_with(&block.transactions)
        {
            return Err(LedgerError::StaleTemplate);
        }
        if !block.is_sealed_consistently() || !meets_difficulty(&block.hash, self.difficulty) {
            return Err(LedgerError::ChainInvalid { index: block.index });
        }
        self.pending_transactions.drain(..sealed);
        self.blocks.push(block);
        self.latest_block()
    }

    /// Walk from index 1 checking hash recomputation, back-links and index
    /// continuity. Never repairs.
    pub fn is_valid(&self) -> bool {
        self.first_invalid_block().is_none()
    }

    pub fn first_invalid_block(&self) -> Option<u64> {
        first_invalid(&self.blocks)
    }

    /// Linear scan over sealed blocks; pending transactions are not found.
    pub fn find_transaction_by_id(&self, id: u64) -> Result<&Transaction> {
        self.locate_transaction(id)
            .map(|found| found.transaction)
            .ok_or(LedgerError::NotFound)
    }

    pub fn locate_transaction(&self, id: u64) -> Option<Located<'_>> {
        self.blocks.iter().find_map(|block| {
            block
                .transactions
                .iter()
                .find(|tx| tx.id == id)
                .map(|transaction| Located {
                    block_index: block.index,
                    block_hash: &block.hash,
                    transaction,
                })
        })
    }

    /// Sealed transactions sent or received by `participant`.
    pub fn transactions_for<'a>(
        &'a self,
        participant: &'a str,
    ) -> impl Iterator<Item = &'a Transaction> + 'a {
        self.blocks
            .iter()
            .flat_map(|b| b.transactions.iter())
            .filter(move |tx| {
                tx.field_str("sender") == Some(participant)
                    || tx.field_str("receiver") == Some(participant)
            })
    }

    /// Highest id seen in sealed or pending transactions.
    pub fn max_transaction_id(&self) -> Option<u64> {
        self.blocks
            .iter()
            .flat_map(|b| b.transactions.iter())
            .chain(self.pending_transactions.iter())
            .map(|tx| tx.id)
            .max()
    }

    pub fn add_node(&mut self, address: impl Into<String>) -> bool {
        self.nodes.insert(address.into())
    }

    /// Swap in `blocks` wholesale. Pending transactions and registries stay.
    pub(crate) fn replace_blocks(&mut self, blocks: Vec<Block>) {
        self.blocks = blocks;
    }

    pub fn stats(&self) -> ChainStats {
        let total_blocks = self.blocks.len();
        let average_block_time = match (self.blocks.first(), self.blocks.last()) {
            (Some(first), Some(last)) if total_blocks > 1 => {
                (last.timestamp - first.timestamp) / (total_blocks - 1) as f64
            }
            _ => 0.0,
        };
        ChainStats {
            total_blocks,
            total_transactions: self.blocks.iter().map(|b| b.transactions.len()).sum(),
            average_block_time,
            difficulty: self.difficulty,
            nodes: self.nodes.len(),
            smart_contracts: self.smart_contracts.len(),
        }
    }
}

/// Index of the first block (from 1) breaking hash, link or index rules.
pub(crate) fn first_invalid(blocks: &[Block]) -> Option<u64> {
    blocks.windows(2).find_map(|pair| {
        let (prev, cur) = (&pair[0], &pair[1]);
        let ok = cur.is_sealed_consistently()
            && cur.previous_hash == prev.hash
            && cur.index == prev.index + 1;
        (!ok).then_some(cur.index)
    })
}

/// Owns the chain for the life of the process and persists every mutation
/// through a `LedgerStore`. Mutators take `&mut self`: sharing a `Ledger`
/// across handlers means putting it behind one lock.
pub struct Ledger<S: LedgerStore> {
    chain: Chain,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: LedgerStore> Ledger<S> {
    /// Load the stored chain or start from a new genesis block. A loaded
    /// chain is validated before use.
    pub fn open(store: Arc<S>, difficulty: usize, clock: Arc<dyn Clock>) -> Result<Self> {
        let chain = match store.load()? {
            Some(chain) => {
                if let Some(index) = chain.first_invalid_block() {
                    error!(index, "stored chain failed validation");
                    return Err(LedgerError::ChainInvalid { index });
                }
                if chain.is_empty() {
                    return Err(LedgerError::EmptyChain);
                }
                info!(blocks = chain.len(), "ledger loaded");
                chain
            }
            None => {
                let chain = Chain::with_genesis(difficulty, epoch_seconds(clock.now()));
                store.save(&chain)?;
                info!(difficulty, "created genesis block");
                chain
            }
        };
        Ok(Self {
            chain,
            store,
            clock,
        })
    }

    pub fn open_default(store: Arc<S>, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::open(store, DEFAULT_DIFFICULTY, clock)
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run `mutate` and persist. When persisting fails the in-memory chain
    /// is restored so it never runs ahead of disk.
    fn persisted<T>(&mut self, mutate: impl FnOnce(&mut Chain) -> Result<T>) -> Result<T> {
        let before = self.chain.clone();
        let out = mutate(&mut self.chain)?;
        if let Err(e) = self.store.save(&self.chain) {
            error!(error = %e, "failed to persist ledger, rolling back");
            self.chain = before;
            return Err(e);
        }
        Ok(out)
    }

    /// Buffer a transaction and persist the buffer.
    pub fn submit(&mut self, tx: Transaction) -> Result<()> {
        self.persisted(|chain| {
            chain.add_transaction(tx);
            Ok(())
        })
    }

    pub fn template(&self) -> Result<Block> {
        self.chain.block_template(epoch_seconds(self.clock.now()))
    }

    /// Append a block mined elsewhere, then persist.
    pub fn commit(&mut self, block: Block) -> Result<Block> {
        let block = self.persisted(|chain| chain.append_mined(block).cloned())?;
        info!(
            index = block.index,
            nonce = block.nonce,
            hash = %block.hash,
            txs = block.transactions.len(),
            "mined block"
        );
        Ok(block)
    }

    /// Seal every pending transaction into a new block on this thread.
    ///
    /// Persisting happens after the pending buffer is cleared in memory.
    /// If the process dies before the snapshot is written, the transactions
    /// are gone from the next load and must be submitted again.
    pub fn mine_pending(&mut self) -> Result<Block> {
        let mut block = self.template()?;
        block.mine(self.chain.difficulty);
        self.commit(block)
    }

    pub fn register_node(&mut self, address: impl Into<String>) -> Result<bool> {
        let address = address.into();
        self.persisted(|chain| Ok(chain.add_node(address)))
    }

    /// Adopt the longest valid candidate strictly longer than the local
    /// chain, persisting it. Returns whether the chain was replaced.
    pub fn adopt_longest(
        &mut self,
        candidates: impl IntoIterator<Item = crate::consensus::PeerChain>,
    ) -> Result<bool> {
        let Some(best) = crate::consensus::longest_valid(self.chain.len(), candidates) else {
            return Ok(false);
        };
        let length = best.len();
        self.persisted(|chain| {
            chain.replace_blocks(best);
            Ok(())
        })?;
        info!(length, "adopted longer peer chain");
        Ok(true)
    }

    /// Fetch every known peer through `source` and adopt the longest valid
    /// chain. Peer failures are skipped; only persistence can fail.
    pub fn resolve_conflicts<C>(&mut self, source: &C) -> Result<bool>
    where
        C: crate::consensus::ChainSource + ?Sized,
    {
        let candidates = crate::consensus::fetch_all(self.chain.nodes(), source);
        self.adopt_longest(candidates)
    }

    pub fn deploy_contract(
        &mut self,
        engine: &ContractEngine,
        code: &str,
        name: &str,
    ) -> Result<String> {
        let binding = engine.deploy(code)?;
        let address = binding.address.clone();
        self.persisted(|chain| {
            chain.smart_contracts.insert(name.to_string(), binding);
            Ok(())
        })?;
        info!(name, %address, "deployed contract");
        Ok(address)
    }

    pub fn execute_contract(
        &self,
        engine: &ContractEngine,
        name: &str,
        function: &str,
        args: &[Value],
    ) -> Result<Value> {
        let binding = self
            .chain
            .smart_contracts
            .get(name)
            .ok_or_else(|| LedgerError::ContractNotFound(name.to_string()))?;
        engine.execute(name, binding, function, args)
    }

    pub fn stats(&self) -> ChainStats {
        self.chain.stats()
    }
}
