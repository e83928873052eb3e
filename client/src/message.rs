//! Message data model.
//!
//! The wire payload is a polymorphic union; it is represented here as a
//! tagged variant with one arm per protocol message kind. A
//! [`WebMessage`] is created on stanza arrival, mutated only by message
//! intake under the per-chat mutex, then handed to the event bus by
//! value.

use serde::{Deserialize, Serialize};

use crate::jid::Jid;

/// Delivery state of a message. Advances monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Pending,
    ServerAck,
    DeliveryAck,
    Read,
    Played,
}

impl MessageStatus {
    /// Applies `next` only if it does not move the status backwards.
    pub fn advance(&mut self, next: MessageStatus) {
        if next > *self {
            *self = next;
        }
    }
}

/// System-event placeholder kinds carried instead of (or alongside) a
/// decrypted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StubType {
    Ciphertext,
    GroupCreate,
    GroupChangeSubject,
    GroupParticipantAdd,
    GroupParticipantRemove,
    GroupParticipantLeave,
    GroupParticipantPromote,
    GroupParticipantDemote,
    GroupChangeAnnounce,
    GroupChangeRestrict,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    pub remote_jid: Jid,
    pub from_me: bool,
    pub id: String,
    /// Present iff `remote_jid` is a group; names the acting device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant: Option<Jid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebMessage {
    pub key: MessageKey,
    pub message_timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stub_type: Option<StubType>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub stub_parameters: Vec<String>,
}

impl WebMessage {
    pub fn new(key: MessageKey, message_timestamp: i64) -> Self {
        Self {
            key,
            message_timestamp,
            push_name: None,
            status: MessageStatus::Pending,
            content: None,
            stub_type: None,
            stub_parameters: Vec::new(),
        }
    }

    pub fn is_ciphertext_stub(&self) -> bool {
        self.stub_type == Some(StubType::Ciphertext)
    }

    /// The protocol-message payload, if this message carries one.
    pub fn protocol_content(&self) -> Option<&ProtocolContent> {
        match &self.content {
            Some(MessageContent::Protocol(protocol)) => Some(protocol),
            _ => None,
        }
    }
}

/// Tagged message payload union.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MessageContent {
    Text {
        text: String,
    },
    Media(MediaContent),
    Location {
        latitude: f64,
        longitude: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Contact {
        display_name: String,
        vcard: String,
    },
    Protocol(ProtocolContent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
}

/// Relay-ready description of an uploaded, encrypted media payload.
#[derive(Debug, Clone, Serialize)]
pub struct MediaContent {
    pub kind: MediaKind,
    pub url: String,
    pub media_key: Vec<u8>,
    pub mimetype: String,
    /// base64url-unpadded SHA-256 of the encrypted body.
    pub file_enc_sha256: String,
    /// base64url-unpadded SHA-256 of the plaintext.
    pub file_sha256: String,
    pub file_length: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub gif_playback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jpeg_thumbnail: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextInfo>,
}

/// Quote context attached to an outbound payload.
#[derive(Debug, Clone, Serialize)]
pub struct ContextInfo {
    pub participant: Jid,
    pub stanza_id: String,
    pub quoted_message: Box<MessageContent>,
    /// Set when the quoted stanza came from a group.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_jid: Option<Jid>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "protocol", rename_all = "camelCase")]
pub enum ProtocolContent {
    EphemeralSetting {
        ephemeral_expiration: u64,
    },
    HistorySyncNotification {
        batch_id: String,
        sync_type: HistorySyncType,
    },
    Other {
        name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistorySyncType {
    InitialBootstrap,
    Recent,
    Full,
    PushName,
}

/// Normalizes a received message before it is handed to subscribers:
/// legacy consumer-domain JIDs collapse into the user space and empty
/// push names are dropped.
pub fn clean_message(message: &mut WebMessage, me: &Jid) {
    message.key.remote_jid = normalize_in_place(&message.key.remote_jid);
    if let Some(participant) = &message.key.participant {
        // Participants naming one of our own devices collapse to the bare
        // identity; other participants keep their device qualifier.
        let normalized = if message.key.from_me && participant.same_user(me) {
            me.normalized()
        } else {
            normalize_keep_device(participant)
        };
        message.key.participant = Some(normalized);
    }
    if message
        .push_name
        .as_ref()
        .is_some_and(|name| name.is_empty())
    {
        message.push_name = None;
    }
}

fn normalize_in_place(jid: &Jid) -> Jid {
    if jid.is_group() || jid.is_broadcast() {
        jid.clone()
    } else {
        jid.normalized()
    }
}

fn normalize_keep_device(jid: &Jid) -> Jid {
    let mut normalized = jid.normalized();
    normalized.device = jid.device;
    normalized
}

/// Generates a fresh outbound stanza id in the format peers expect:
/// a fixed prefix followed by uppercase hex.
pub fn generate_message_id() -> String {
    use rand::RngCore;

    let mut random = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut random);
    format!("3EB0{}", hex::encode_upper(random))
}
