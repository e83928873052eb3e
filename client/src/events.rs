//! High-level events emitted by the pipeline.
//!
//! Subscribers receive events over a broadcast channel; the variant
//! names serialize to the stable identifiers applications key on.

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

use crate::jid::Jid;
use crate::message::{MessageKey, MessageStatus, WebMessage};

/// How a batch of messages entered the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertKind {
    /// Live message, delivered in real time.
    Notify,
    /// Offline or history backfill; does not represent fresh activity.
    Append,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum Event {
    #[serde(rename = "messages.upsert")]
    MessagesUpsert {
        messages: Vec<WebMessage>,
        kind: UpsertKind,
    },
    #[serde(rename = "messages.update")]
    MessagesUpdate { updates: Vec<MessageUpdate> },
    #[serde(rename = "messages.media-update")]
    MessagesMediaUpdate { updates: Vec<MediaRetryUpdate> },
    #[serde(rename = "message-receipt.update")]
    MessageReceiptUpdate { updates: Vec<ReceiptUpdate> },
    #[serde(rename = "chats.upsert")]
    ChatsUpsert { chats: Vec<Chat> },
    #[serde(rename = "chats.update")]
    ChatsUpdate { updates: Vec<ChatUpdate> },
    #[serde(rename = "groups.upsert")]
    GroupsUpsert { groups: Vec<GroupMetadata> },
    #[serde(rename = "contacts.update")]
    ContactsUpdate { contacts: Vec<ContactUpdate> },
    #[serde(rename = "creds.update")]
    CredsUpdate { update: CredsUpdate },
    #[serde(rename = "call")]
    Call { data: CallEvent },
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageUpdate {
    pub key: MessageKey,
    pub status: MessageStatus,
}

/// Result of a media-retry notification for a previously failed download.
#[derive(Debug, Clone, Serialize)]
pub struct MediaRetryUpdate {
    pub key: MessageKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u32>,
}

/// Per-user receipt state for a message in a group chat. Delivery
/// fills `receipt_timestamp`; read and played fill `read_timestamp`.
#[derive(Debug, Clone, Serialize)]
pub struct ReceiptUpdate {
    pub key: MessageKey,
    pub user_jid: Jid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Chat {
    pub id: Jid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatUpdate {
    pub id: Jid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ephemeral_expiration: Option<u64>,
}

/// Chat-state delta observed during bulk history ingest; drained into
/// the app-state resync request when the history gate fires.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMutation {
    pub jid: Jid,
    pub last_message_recv_timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupMetadata {
    pub id: Jid,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<Jid>,
    pub creation: i64,
    pub participants: Vec<GroupParticipant>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupParticipant {
    pub jid: Jid,
    pub is_admin: bool,
    pub is_super_admin: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContactUpdate {
    pub id: Jid,
    /// Push name the contact chose for themselves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify: Option<String>,
}

/// Delta against the externally persisted credentials.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CredsUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_pre_key_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub me_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Offer,
    Ringing,
    Accept,
    Reject,
    Timeout,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Accept | CallStatus::Reject | CallStatus::Timeout)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CallEvent {
    pub id: String,
    pub from: Jid,
    pub chat_id: Jid,
    pub status: CallStatus,
    pub is_video: bool,
    pub is_group: bool,
    pub date: i64,
    pub offline: bool,
}

/// Fan-out point for pipeline events.
///
/// A single broadcast channel serves every subscriber; slow consumers
/// observe lag errors on their receiver rather than blocking the
/// pipeline.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        let (tx, _rx) = broadcast::channel(buffer);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// A fresh subscription wrapped as a `Stream`, for `StreamExt`
    /// consumers; lagged slots surface as stream errors.
    pub fn stream(&self) -> BroadcastStream<Event> {
        BroadcastStream::new(self.tx.subscribe())
    }

    /// Emits to all current subscribers. Events emitted while nobody
    /// listens are dropped silently.
    pub fn emit(&self, event: Event) {
        if self.tx.send(event).is_err() {
            trace!("event emitted with no subscribers");
        }
    }
}
