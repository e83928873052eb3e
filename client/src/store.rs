//! External store and crypto seams.
//!
//! The Signal session store, the key store, and the outbound message
//! archive live outside the core; the pipeline reaches them only
//! through these traits.

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::creds::PreKey;
use crate::jid::Jid;
use crate::message::{MessageContent, MessageKey, WebMessage};
use crate::stanza::Node;

/// Transactional access to the persisted key material.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Reserves exactly one fresh one-time prekey inside the store's own
    /// transaction. A returned prekey counts as consumed whether or not
    /// the caller manages to put it on the wire.
    async fn reserve_prekey(&self) -> anyhow::Result<PreKey>;
}

/// Lookup of previously sent messages, used as resend source material
/// when a peer requests a retry.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn get_message(&self, key: &MessageKey) -> anyhow::Result<Option<MessageContent>>;
}

/// Store that never finds anything, for deployments that do not keep an
/// outbound archive.
pub struct NoMessageStore;

#[async_trait]
impl MessageStore for NoMessageStore {
    async fn get_message(&self, _key: &MessageKey) -> anyhow::Result<Option<MessageContent>> {
        Ok(None)
    }
}

/// Broad category the envelope decoder assigns to an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCategory {
    /// Ordinary chat traffic.
    Normal,
    /// Device-to-device control message between our own devices.
    Peer,
}

/// Future resolving to the decrypted payload of one inbound message.
/// Failure leaves the message as a ciphertext stub.
pub type DecryptionTask = BoxFuture<'static, anyhow::Result<MessageContent>>;

/// Result of decoding one inbound `message` stanza envelope.
pub struct DecodedFrame {
    pub message: WebMessage,
    pub category: MessageCategory,
    /// The actual sending device.
    pub author: Jid,
    pub task: DecryptionTask,
}

impl fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("message", &self.message)
            .field("category", &self.category)
            .field("author", &self.author)
            .finish_non_exhaustive()
    }
}

/// Envelope decoder backed by the external double-ratchet sessions.
#[async_trait]
pub trait MessageDecrypter: Send + Sync {
    /// Splits an inbound `message` stanza into its addressed envelope and
    /// the deferred decryption work.
    async fn decode(&self, stanza: &Node) -> crate::error::Result<DecodedFrame>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_message_store_is_empty() {
        let store = NoMessageStore;
        let key = MessageKey {
            remote_jid: "alice@s.whatsapp.net".parse().unwrap(),
            from_me: true,
            id: "X".into(),
            participant: None,
        };
        assert!(store.get_message(&key).await.unwrap().is_none());
    }
}
