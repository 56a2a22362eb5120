pub mod atomic;
pub mod blobs;
pub mod json_store;
pub mod records;
pub mod sled_store;

pub use blobs::DirBlobStore;
pub use json_store::JsonFileStore;
pub use records::JsonMessageStore;
pub use sled_store::SledMessageStore;

/// File name of the ledger snapshot inside a data directory.
pub const LEDGER_FILE: &str = "blockchain.json";
/// File name of the message record set inside a data directory.
pub const MESSAGES_FILE: &str = "messages.json";
