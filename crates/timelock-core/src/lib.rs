use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

pub mod canonical;
pub mod chain;
pub mod clock;
pub mod consensus;
pub mod constants;
pub mod contract;
pub mod crypto;
pub mod error;
pub mod message;
pub mod mine;
pub mod reveal;

pub use error::{LedgerError, Result};

/// A message commitment. Only `id`, `unlock_time` and `message_hash` mean
/// anything to the ledger; every other field is carried through untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: u64,
    pub unlock_time: DateTime<Utc>,
    /// SHA-256 hex of the plaintext.
    pub message_hash: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Transaction {
    pub fn new(id: u64, unlock_time: DateTime<Utc>, message_hash: impl Into<String>) -> Self {
        Self {
            id,
            unlock_time,
            message_hash: message_hash.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// SHA-256 of `bytes` as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    /// Epoch seconds, fractional.
    pub timestamp: f64,
    pub transactions: Vec<Transaction>,
    pub previous_hash: String,
    pub nonce: u64,
    pub hash: String,
}

impl Block {
    /// Build an unsealed block. `hash` is filled in right away so the value
    /// is consistent before it is mined.
    pub fn new(
        index: u64,
        timestamp: f64,
        transactions: Vec<Transaction>,
        previous_hash: impl Into<String>,
        nonce: u64,
    ) -> Self {
        let mut block = Self {
            index,
            timestamp,
            transactions,
            previous_hash: previous_hash.into(),
            nonce,
            hash: String::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    /// Digest of the canonical JSON of every field except `hash`.
    pub fn calculate_hash(&self) -> String {
        self.preimage().hash_nonce(self.nonce)
    }

    /// The canonical serialization split around the nonce. Sorted key order
    /// is `index, nonce, previous_hash, timestamp, transactions`.
    pub fn preimage(&self) -> Preimage {
        let mut prefix = String::from("{\"index\": ");
        canonical::write_value(&mut prefix, &json!(self.index));
        prefix.push_str(", \"nonce\": ");

        let mut suffix = String::from(", \"previous_hash\": ");
        canonical::write_str(&mut suffix, &self.previous_hash);
        suffix.push_str(", \"timestamp\": ");
        canonical::write_value(&mut suffix, &json!(self.timestamp));
        suffix.push_str(", \"transactions\": ");
        canonical::write_value(&mut suffix, &json!(self.transactions));
        suffix.push('}');

        let mut head = Sha256::new();
        head.update(prefix.as_bytes());
        Preimage { head, suffix }
    }

    /// Search nonces until the hash has `difficulty` leading `'0'` digits.
    pub fn mine(&mut self, difficulty: usize) {
        *self = pow::mine_block(self.clone(), difficulty);
    }

    /// True when the stored hash is the recomputed one.
    pub fn is_sealed_consistently(&self) -> bool {
        self.hash == self.calculate_hash()
    }
}

/// Hash state primed with everything before the nonce.
#[derive(Clone)]
pub struct Preimage {
    head: Sha256,
    suffix: String,
}

impl Preimage {
    pub fn hash_nonce(&self, nonce: u64) -> String {
        let mut hasher = self.head.clone();
        hasher.update(nonce.to_string().as_bytes());
        hasher.update(self.suffix.as_bytes());
        hex::encode(hasher.finalize())
    }
}

pub mod pow {
    use super::Block;

    /// Mine the block by incrementing nonce until its hash starts with
    /// `difficulty` zero hex digits.
    pub fn mine_block(mut block: Block, difficulty: usize) -> Block {
        let preimage = block.preimage();
        let mut hash = preimage.hash_nonce(block.nonce);
        while !meets_difficulty(&hash, difficulty) {
            block.nonce = block.nonce.wrapping_add(1);
            hash = preimage.hash_nonce(block.nonce);
        }
        block.hash = hash;
        block
    }

    pub fn count_leading_zero_digits(hash: &str) -> usize {
        hash.bytes().take_while(|b| *b == b'0').count()
    }

    pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
        count_leading_zero_digits(hash) >= difficulty
    }
}
