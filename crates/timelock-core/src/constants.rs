pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const DEFAULT_DIFFICULTY: usize = 4;
pub const GENESIS_PREVIOUS_HASH: &str = "0";
/// Nonces tried between two looks at a cancellation token.
pub const CANCEL_CHECK_INTERVAL: u64 = 4096;
