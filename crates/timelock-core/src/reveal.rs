//! Time-gated disclosure of committed messages.
//!
//! A message is `locked` until the clock reaches the `unlock_time` recorded
//! in its sealed transaction. Revealing decrypts the payload, checks it
//! against the committed `message_hash`, and durably marks the record
//! `revealed` before the plaintext is handed back. Revealing again returns
//! the same content with `already_revealed` set.
//!
//! Mutating operations take `&mut self`; the record set is read whole,
//! changed in one place and written back whole.

use crate::chain::{Chain, Ledger, LedgerStore};
use crate::clock::Clock;
use crate::crypto::Cipher;
use crate::message::{
    BlobStore, MessageRecord, MessageStatus, MessageStore, MessageView, NewMessage, Payload,
    Revealed,
};
use crate::{sha256_hex, LedgerError, Result, Transaction};
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct RevealGate<M: MessageStore + ?Sized = dyn MessageStore> {
    records: Arc<M>,
    cipher: Arc<dyn Cipher>,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
}

impl<M: MessageStore + ?Sized> RevealGate<M> {
    pub fn new(
        records: Arc<M>,
        cipher: Arc<dyn Cipher>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            records,
            cipher,
            blobs,
            clock,
        }
    }

    pub fn records(&self) -> &Arc<M> {
        &self.records
    }

    /// Encrypt and store a new message, record it as `locked` and buffer its
    /// commitment in the ledger. The message becomes revealable once the
    /// pending transaction is mined and `unlock_time` has passed.
    pub fn commit<S: LedgerStore>(
        &mut self,
        ledger: &mut Ledger<S>,
        message: NewMessage,
    ) -> Result<MessageRecord> {
        let now = self.clock.now();
        if message.unlock_time <= now {
            return Err(LedgerError::UnlockInPast);
        }

        let mut records = self.records.load_all()?;
        let id = records
            .iter()
            .map(|r| r.id)
            .chain(ledger.chain().max_transaction_id())
            .max()
            .unwrap_or(0)
            + 1;

        let message_hash = sha256_hex(&message.content);
        let ciphertext = self.cipher.encrypt(&message.content)?;
        let payload = if message.message_type.is_binary() {
            let name = message
                .file_name
                .clone()
                .unwrap_or_else(|| format!("message_{id}"));
            let handle = self
                .blobs
                .store(&ciphertext, &name)
                .map_err(|e| LedgerError::collaborator("blob upload failed", e))?;
            Payload::Blob { handle }
        } else {
            Payload::Inline {
                ciphertext: hex::encode(&ciphertext),
            }
        };

        let mut tx = Transaction::new(id, message.unlock_time, message_hash)
            .with_field("sender", message.sender.as_str())
            .with_field("receiver", message.receiver.as_str())
            .with_field("message_type", message.message_type.as_str());
        if let Payload::Blob { handle } = &payload {
            tx = tx.with_field("blob_handle", handle.as_str());
        }

        let record = MessageRecord {
            id,
            sender: message.sender,
            receiver: message.receiver,
            message_type: message.message_type,
            unlock_time: message.unlock_time,
            created_time: now,
            status: MessageStatus::Locked,
            payload,
        };
        records.push(record.clone());
        self.records.replace_all(&records)?;

        if let Err(e) = ledger.submit(tx) {
            records.pop();
            if let Err(undo) = self.records.replace_all(&records) {
                error!(id, error = %undo, "could not drop record of uncommitted message");
            }
            return Err(e);
        }

        info!(id, unlock_time = %record.unlock_time, "message committed");
        Ok(record)
    }

    /// Disclose message `id` to `requester` (its sender or receiver).
    ///
    /// Fails with `NotFound` when the message is unknown, not yet sealed in
    /// a block, or not visible to `requester`; with `StillLocked` before the
    /// unlock time, leaving every record untouched.
    pub fn reveal(&mut self, chain: &Chain, id: u64, requester: &str) -> Result<Revealed> {
        let mut records = self.records.load_all()?;
        let slot = records
            .iter()
            .position(|r| r.id == id && r.is_participant(requester))
            .ok_or(LedgerError::NotFound)?;
        let sealed = chain.locate_transaction(id).ok_or(LedgerError::NotFound)?;
        let tx = sealed.transaction;

        if self.clock.now() < tx.unlock_time {
            debug!(id, "reveal refused, still locked");
            return Err(LedgerError::StillLocked {
                unlock_time: tx.unlock_time,
            });
        }

        let record = &records[slot];
        let content = self.open_payload(&record.payload)?;
        if sha256_hex(&content) != tx.message_hash {
            error!(id, "decrypted content does not match commitment");
            return Err(LedgerError::IntegrityMismatch { id });
        }

        let message_type = record.message_type;
        let already_revealed = record.status == MessageStatus::Revealed;
        if !already_revealed {
            records[slot].status = MessageStatus::Revealed;
            self.records.replace_all(&records)?;
            info!(id, "message revealed");
        }

        Ok(Revealed {
            id,
            message_type,
            content,
            already_revealed,
            block_index: sealed.block_index,
            block_hash: sealed.block_hash.to_string(),
        })
    }

    fn open_payload(&self, payload: &Payload) -> Result<Vec<u8>> {
        let ciphertext = match payload {
            Payload::Inline { ciphertext } => {
                hex::decode(ciphertext).map_err(|e| LedgerError::Crypto(e.to_string()))?
            }
            Payload::Blob { handle } => self
                .blobs
                .retrieve(handle)
                .map_err(|e| LedgerError::collaborator("blob download failed", e))?,
        };
        self.cipher.decrypt(&ciphertext)
    }

    /// Whether the time gate for a sealed message is open. Pure.
    pub fn can_reveal(&self, chain: &Chain, id: u64) -> Result<bool> {
        let tx = chain.find_transaction_by_id(id)?;
        Ok(self.clock.now() >= tx.unlock_time)
    }

    /// Messages sent or received by `participant`, oldest first.
    pub fn list_for(&self, chain: &Chain, participant: &str) -> Result<Vec<MessageView>> {
        let now = self.clock.now();
        let records = self.records.load_all()?;
        Ok(records
            .into_iter()
            .filter(|r| r.is_participant(participant))
            .map(|r| {
                let sealed = chain.locate_transaction(r.id);
                let unlock_time = sealed.map_or(r.unlock_time, |s| s.transaction.unlock_time);
                let is_revealed = r.status == MessageStatus::Revealed;
                MessageView {
                    id: r.id,
                    can_reveal: sealed.is_some() && now >= unlock_time && !is_revealed,
                    is_revealed,
                    sender: r.sender,
                    receiver: r.receiver,
                    message_type: r.message_type,
                    unlock_time,
                    created_time: r.created_time,
                    status: r.status,
                    block_index: sealed.map(|s| s.block_index),
                    block_hash: sealed.map(|s| s.block_hash.to_string()),
                }
            })
            .collect())
    }

    /// Set the status tag by hand. Marking `revealed` still needs the time
    /// gate to be open, and a revealed message stays revealed.
    pub fn set_status(
        &mut self,
        chain: &Chain,
        id: u64,
        requester: &str,
        status: MessageStatus,
    ) -> Result<MessageStatus> {
        let mut records = self.records.load_all()?;
        let slot = records
            .iter()
            .position(|r| r.id == id && r.is_participant(requester))
            .ok_or(LedgerError::NotFound)?;

        let current = records[slot].status;
        if current == MessageStatus::Revealed || current == status {
            return Ok(current);
        }
        if status == MessageStatus::Revealed {
            let tx = chain.find_transaction_by_id(id)?;
            if self.clock.now() < tx.unlock_time {
                return Err(LedgerError::StillLocked {
                    unlock_time: tx.unlock_time,
                });
            }
        }

        records[slot].status = status;
        self.records.replace_all(&records)?;
        info!(id, %status, "message status updated");
        Ok(status)
    }

    /// Drop the record. The ledger keeps its commitment.
    pub fn delete(&mut self, id: u64, requester: &str) -> Result<()> {
        let mut records = self.records.load_all()?;
        let before = records.len();
        records.retain(|r| !(r.id == id && r.is_participant(requester)));
        if records.len() == before {
            return Err(LedgerError::NotFound);
        }
        self.records.replace_all(&records)?;
        info!(id, "message record deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::crypto::XChaChaCipher;
    use crate::message::MessageType;
    use anyhow::anyhow;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemRecords(Mutex<Vec<MessageRecord>>);

    impl MessageStore for MemRecords {
        fn load_all(&self) -> Result<Vec<MessageRecord>> {
            Ok(self.0.lock().unwrap().clone())
        }

        fn replace_all(&self, records: &[MessageRecord]) -> Result<()> {
            *self.0.lock().unwrap() = records.to_vec();
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemBlobs(Mutex<HashMap<String, Vec<u8>>>);

    impl BlobStore for MemBlobs {
        fn store(&self, bytes: &[u8], name: &str) -> anyhow::Result<String> {
            let handle = format!("blob-{name}");
            self.0.lock().unwrap().insert(handle.clone(), bytes.to_vec());
            Ok(handle)
        }

        fn retrieve(&self, handle: &str) -> anyhow::Result<Vec<u8>> {
            self.0
                .lock()
                .unwrap()
                .get(handle)
                .cloned()
                .ok_or_else(|| anyhow!("no blob {handle}"))
        }
    }

    #[derive(Default)]
    struct MemLedger(Mutex<Option<Chain>>);

    impl LedgerStore for MemLedger {
        fn load(&self) -> Result<Option<Chain>> {
            Ok(self.0.lock().unwrap().clone())
        }

        fn save(&self, chain: &Chain) -> Result<()> {
            *self.0.lock().unwrap() = Some(chain.clone());
            Ok(())
        }
    }

    struct Fixture {
        t0: DateTime<Utc>,
        clock: Arc<ManualClock>,
        ledger: Ledger<MemLedger>,
        gate: RevealGate<MemRecords>,
        records: Arc<MemRecords>,
    }

    fn fixture() -> Fixture {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(t0));
        let ledger = Ledger::open(Arc::new(MemLedger::default()), 2, clock.clone()).unwrap();
        let records = Arc::new(MemRecords::default());
        let gate = RevealGate::new(
            records.clone(),
            Arc::new(XChaChaCipher::new(&[9u8; 32])),
            Arc::new(MemBlobs::default()),
            clock.clone(),
        );
        Fixture {
            t0,
            clock,
            ledger,
            gate,
            records,
        }
    }

    fn text(unlock_time: DateTime<Utc>, body: &str) -> NewMessage {
        NewMessage {
            sender: "alice".into(),
            receiver: "bob".into(),
            message_type: MessageType::Text,
            unlock_time,
            content: body.as_bytes().to_vec(),
            file_name: None,
        }
    }

    fn committed(f: &mut Fixture, unlock_in: Duration) -> u64 {
        let unlock = f.t0 + unlock_in;
        let record = f.gate.commit(&mut f.ledger, text(unlock, "hello later")).unwrap();
        f.ledger.mine_pending().unwrap();
        record.id
    }

    #[test]
    fn reveal_before_unlock_is_still_locked_and_mutates_nothing() {
        let mut f = fixture();
        let id = committed(&mut f, Duration::seconds(60));
        f.clock.set(f.t0 + Duration::seconds(30));
        let before = f.records.load_all().unwrap();
        assert!(matches!(
            f.gate.reveal(f.ledger.chain(), id, "bob"),
            Err(LedgerError::StillLocked { .. })
        ));
        assert_eq!(f.records.load_all().unwrap(), before);
    }

    #[test]
    fn gate_opens_exactly_at_unlock_time() {
        let mut f = fixture();
        let id = committed(&mut f, Duration::seconds(60));
        f.clock.set(f.t0 + Duration::seconds(59));
        assert!(!f.gate.can_reveal(f.ledger.chain(), id).unwrap());
        assert!(f.gate.reveal(f.ledger.chain(), id, "bob").is_err());
        f.clock.set(f.t0 + Duration::seconds(60));
        assert!(f.gate.can_reveal(f.ledger.chain(), id).unwrap());
        assert!(f.gate.reveal(f.ledger.chain(), id, "bob").is_ok());
    }

    #[test]
    fn second_reveal_returns_same_content() {
        let mut f = fixture();
        let id = committed(&mut f, Duration::seconds(60));
        f.clock.set(f.t0 + Duration::seconds(61));
        let first = f.gate.reveal(f.ledger.chain(), id, "bob").unwrap();
        let second = f.gate.reveal(f.ledger.chain(), id, "alice").unwrap();
        assert_eq!(first.content, b"hello later");
        assert_eq!(first.content, second.content);
        assert!(!first.already_revealed);
        assert!(second.already_revealed);
        assert_eq!(first.block_index, 1);
        assert_eq!(first.block_hash, f.ledger.chain().blocks()[1].hash);
        assert_eq!(
            f.records.load_all().unwrap()[0].status,
            MessageStatus::Revealed
        );
    }

    #[test]
    fn strangers_and_unknown_ids_look_the_same() {
        let mut f = fixture();
        let id = committed(&mut f, Duration::seconds(1));
        f.clock.advance(Duration::seconds(5));
        assert!(matches!(
            f.gate.reveal(f.ledger.chain(), id, "mallory"),
            Err(LedgerError::NotFound)
        ));
        assert!(matches!(
            f.gate.reveal(f.ledger.chain(), 999, "bob"),
            Err(LedgerError::NotFound)
        ));
    }

    #[test]
    fn unsealed_message_is_not_found() {
        let mut f = fixture();
        let unlock = f.t0 + Duration::seconds(1);
        let record = f.gate.commit(&mut f.ledger, text(unlock, "x")).unwrap();
        f.clock.advance(Duration::seconds(5));
        assert!(matches!(
            f.gate.reveal(f.ledger.chain(), record.id, "bob"),
            Err(LedgerError::NotFound)
        ));
    }

    #[test]
    fn commit_rejects_past_unlock_and_assigns_increasing_ids() {
        let mut f = fixture();
        assert!(matches!(
            f.gate.commit(&mut f.ledger, text(f.t0, "now")),
            Err(LedgerError::UnlockInPast)
        ));
        let a = committed(&mut f, Duration::seconds(10));
        let b = committed(&mut f, Duration::seconds(20));
        assert_eq!((a, b), (1, 2));
        let tx = f.ledger.chain().find_transaction_by_id(b).unwrap();
        assert_eq!(tx.message_hash, sha256_hex(b"hello later"));
        assert_eq!(tx.field_str("receiver"), Some("bob"));
    }

    #[test]
    fn binary_payloads_go_through_blob_store() {
        let mut f = fixture();
        let mut msg = text(f.t0 + Duration::seconds(5), "");
        msg.message_type = MessageType::Image;
        msg.content = vec![0x89, b'P', b'N', b'G', 0, 1, 2];
        msg.file_name = Some("cat.png".into());
        let record = f.gate.commit(&mut f.ledger, msg).unwrap();
        assert_eq!(
            record.payload,
            Payload::Blob {
                handle: "blob-cat.png".into()
            }
        );
        f.ledger.mine_pending().unwrap();
        f.clock.advance(Duration::seconds(5));
        let revealed = f.gate.reveal(f.ledger.chain(), record.id, "bob").unwrap();
        assert_eq!(revealed.content, vec![0x89, b'P', b'N', b'G', 0, 1, 2]);
        assert_eq!(revealed.message_type, MessageType::Image);
    }

    #[test]
    fn tampered_payload_fails_integrity_check() {
        let mut f = fixture();
        let id = committed(&mut f, Duration::seconds(1));
        let mut records = f.records.load_all().unwrap();
        let forged = XChaChaCipher::new(&[9u8; 32]).encrypt(b"forged").unwrap();
        records[0].payload = Payload::Inline {
            ciphertext: hex::encode(forged),
        };
        f.records.replace_all(&records).unwrap();
        f.clock.advance(Duration::seconds(2));
        assert!(matches!(
            f.gate.reveal(f.ledger.chain(), id, "bob"),
            Err(LedgerError::IntegrityMismatch { id: 1 })
        ));
        assert_eq!(
            f.records.load_all().unwrap()[0].status,
            MessageStatus::Locked
        );
    }

    #[test]
    fn listing_reports_gate_state() {
        let mut f = fixture();
        let early = committed(&mut f, Duration::seconds(10));
        let late = committed(&mut f, Duration::seconds(100));
        f.clock.advance(Duration::seconds(50));
        let views = f.gate.list_for(f.ledger.chain(), "alice").unwrap();
        let by_id = |id| views.iter().find(|v| v.id == id).unwrap();
        assert!(by_id(early).can_reveal);
        assert!(!by_id(late).can_reveal);
        let blocks = f.ledger.chain().blocks();
        assert_eq!(by_id(early).block_index, Some(1));
        assert_eq!(by_id(late).block_hash.as_deref(), Some(blocks[2].hash.as_str()));

        let pending = f
            .gate
            .commit(&mut f.ledger, text(f.t0 + Duration::seconds(500), "queued"))
            .unwrap();
        let views = f.gate.list_for(f.ledger.chain(), "bob").unwrap();
        let queued = views.iter().find(|v| v.id == pending.id).unwrap();
        assert_eq!((queued.block_index, queued.block_hash.as_ref()), (None, None));
        assert!(f.gate.list_for(f.ledger.chain(), "mallory").unwrap().is_empty());
    }

    #[test]
    fn manual_status_tags() {
        let mut f = fixture();
        let id = committed(&mut f, Duration::seconds(10));
        let chain = f.ledger.chain();
        assert_eq!(
            f.gate
                .set_status(chain, id, "bob", MessageStatus::Unlocked)
                .unwrap(),
            MessageStatus::Unlocked
        );
        assert!(matches!(
            f.gate.set_status(chain, id, "bob", MessageStatus::Revealed),
            Err(LedgerError::StillLocked { .. })
        ));
        f.clock.advance(Duration::seconds(10));
        f.gate
            .set_status(chain, id, "bob", MessageStatus::Revealed)
            .unwrap();
        assert_eq!(
            f.gate
                .set_status(chain, id, "bob", MessageStatus::Locked)
                .unwrap(),
            MessageStatus::Revealed
        );
    }

    #[test]
    fn delete_removes_record_but_not_commitment() {
        let mut f = fixture();
        let id = committed(&mut f, Duration::seconds(10));
        assert!(matches!(
            f.gate.delete(id, "mallory"),
            Err(LedgerError::NotFound)
        ));
        f.gate.delete(id, "alice").unwrap();
        assert!(f.records.load_all().unwrap().is_empty());
        assert!(f.ledger.chain().find_transaction_by_id(id).is_ok());
    }
}
