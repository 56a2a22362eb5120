use chrono::{DateTime, Utc};
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Nothing buffered; mining is a no-op.
    #[error("no pending transactions to mine")]
    NoPendingWork,

    #[error("chain has no genesis block")]
    EmptyChain,

    /// Absent message and missing access are reported the same way.
    #[error("message not found")]
    NotFound,

    #[error("message is locked until {unlock_time}")]
    StillLocked { unlock_time: DateTime<Utc> },

    #[error("persistence failure: {context}")]
    Persistence {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("chain invariant violated at block {index}")]
    ChainInvalid { index: u64 },

    #[error("mined block no longer extends the chain tip or pending buffer")]
    StaleTemplate,

    #[error("mining aborted")]
    MiningAborted,

    #[error("decrypted content of message {id} does not match its committed hash")]
    IntegrityMismatch { id: u64 },

    #[error("unlock time must be in the future")]
    UnlockInPast,

    #[error("contract `{0}` not found")]
    ContractNotFound(String),

    #[error("cipher failure: {0}")]
    Crypto(String),

    #[error("{context}")]
    Collaborator {
        context: String,
        #[source]
        source: BoxError,
    },
}

impl LedgerError {
    pub fn persistence(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Persistence {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn collaborator(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Collaborator {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Failures that callers handle as ordinary outcomes rather than faults.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoPendingWork
                | Self::NotFound
                | Self::StillLocked { .. }
                | Self::StaleTemplate
                | Self::MiningAborted
                | Self::UnlockInPast
                | Self::ContractNotFound(_)
        )
    }
}

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;
