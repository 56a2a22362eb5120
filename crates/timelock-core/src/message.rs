use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Document,
    File,
}

impl MessageType {
    pub fn is_binary(self) -> bool {
        self != Self::Text
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Document => "document",
            Self::File => "file",
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "document" => Ok(Self::Document),
            "file" => Ok(Self::File),
            other => Err(format!("unknown message type `{other}`")),
        }
    }
}

/// `Unlocked` is an application tag only. The time gate alone decides
/// whether a message may be revealed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Locked,
    Unlocked,
    Revealed,
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
            Self::Revealed => "revealed",
        })
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "locked" => Ok(Self::Locked),
            "unlocked" => Ok(Self::Unlocked),
            "revealed" => Ok(Self::Revealed),
            other => Err(format!("unknown status `{other}`")),
        }
    }
}

/// Where the ciphertext lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// Hex-encoded ciphertext kept in the record.
    Inline { ciphertext: String },
    /// Opaque handle returned by a `BlobStore`.
    Blob { handle: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: u64,
    pub sender: String,
    pub receiver: String,
    pub message_type: MessageType,
    pub unlock_time: DateTime<Utc>,
    pub created_time: DateTime<Utc>,
    pub status: MessageStatus,
    pub payload: Payload,
}

impl MessageRecord {
    pub fn is_participant(&self, who: &str) -> bool {
        self.sender == who || self.receiver == who
    }
}

/// Input to `RevealGate::commit`.
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub sender: String,
    pub receiver: String,
    pub message_type: MessageType,
    pub unlock_time: DateTime<Utc>,
    pub content: Vec<u8>,
    /// Name hint for the blob store.
    pub file_name: Option<String>,
}

/// Outcome of a successful reveal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Revealed {
    pub id: u64,
    pub message_type: MessageType,
    pub content: Vec<u8>,
    pub already_revealed: bool,
    /// The block sealing the commitment.
    pub block_index: u64,
    pub block_hash: String,
}

/// A record as a participant sees it in a listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageView {
    pub id: u64,
    pub sender: String,
    pub receiver: String,
    pub message_type: MessageType,
    pub unlock_time: DateTime<Utc>,
    pub created_time: DateTime<Utc>,
    pub status: MessageStatus,
    pub is_revealed: bool,
    pub can_reveal: bool,
    /// Set once the commitment is sealed.
    pub block_index: Option<u64>,
    pub block_hash: Option<String>,
}

/// The full record set, read and written as a unit. `replace_all` must be
/// atomic: after a crash either the old or the new set is visible.
pub trait MessageStore: Send + Sync {
    fn load_all(&self) -> Result<Vec<MessageRecord>>;
    fn replace_all(&self, records: &[MessageRecord]) -> Result<()>;
}

/// Storage for encrypted file payloads.
pub trait BlobStore: Send + Sync {
    fn store(&self, bytes: &[u8], name: &str) -> anyhow::Result<String>;
    fn retrieve(&self, handle: &str) -> anyhow::Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_round_trip_through_their_names() {
        for s in ["text", "image", "document", "file"] {
            assert_eq!(s.parse::<MessageType>().unwrap().as_str(), s);
        }
        for s in ["locked", "unlocked", "revealed"] {
            assert_eq!(s.parse::<MessageStatus>().unwrap().to_string(), s);
        }
        assert!("video".parse::<MessageType>().is_err());
        assert!(MessageType::Image.is_binary());
        assert!(!MessageType::Text.is_binary());
    }

    #[test]
    fn payload_json_shape() {
        let inline = Payload::Inline {
            ciphertext: "00ff".into(),
        };
        assert_eq!(
            serde_json::to_string(&inline).unwrap(),
            r#"{"inline":{"ciphertext":"00ff"}}"#
        );
    }
}
