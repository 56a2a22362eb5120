pub(crate) const KEY_FILE: &str = ".encryption_key";
pub(crate) const BLOB_DIR: &str = "blobs";
pub(crate) const SLED_DIR: &str = "records.sled";
pub(crate) const PEER_TIMEOUT_SECS: u64 = 5;
