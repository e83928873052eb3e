//! Outbound collaborator seam.
//!
//! Everything the pipeline writes to the world goes through this trait:
//! raw stanza writes, encrypted relays, receipts, session assertions,
//! prekey replenishment, app-state resyncs and media upload slots. The
//! implementation owns the socket layers the core treats as external.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;
use crate::events::ChatMutation;
use crate::jid::Jid;
use crate::message::MessageContent;
use crate::stanza::Node;

/// Semantic receipt kinds; `None` on the wire means plain delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptKind {
    Read,
    ReadSelf,
    HistSync,
    PeerMsg,
    Sender,
    Inactive,
}

impl ReceiptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptKind::Read => "read",
            ReceiptKind::ReadSelf => "read-self",
            ReceiptKind::HistSync => "hist_sync",
            ReceiptKind::PeerMsg => "peer_msg",
            ReceiptKind::Sender => "sender",
            ReceiptKind::Inactive => "inactive",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub message_id: String,
    /// Restricts the fan-out to a single device, as in retry resends.
    pub participant: Option<Jid>,
}

/// Upload slot returned by the media gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConn {
    pub auth: String,
    pub hosts: Vec<String>,
    #[serde(default)]
    pub ttl: u64,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget stanza write.
    async fn send_node(&self, node: Node) -> Result<()>;

    /// Whether the websocket is currently open. Writes after close are
    /// dropped by the pipeline, not queued.
    fn is_open(&self) -> bool;

    /// Encrypted send through the session layer.
    async fn relay_message(
        &self,
        jid: &Jid,
        content: &MessageContent,
        options: RelayOptions,
    ) -> Result<()>;

    /// Semantic receipt for one or more message ids.
    async fn send_receipt(
        &self,
        jid: &Jid,
        participant: Option<&Jid>,
        ids: &[String],
        kind: Option<ReceiptKind>,
    ) -> Result<()>;

    /// Guarantees live sessions with the given devices.
    async fn assert_sessions(&self, jids: &[Jid], force: bool) -> Result<()>;

    /// Replenishes the server-side one-time prekey pool.
    async fn upload_prekeys(&self) -> Result<()>;

    /// Bulk chat-state pull after history-sync quiescence.
    async fn resync_main_app_state(&self, recv_chats: Vec<ChatMutation>) -> Result<()>;

    /// Requests an authenticated media upload slot.
    async fn media_conn(&self) -> Result<MediaConn>;
}
