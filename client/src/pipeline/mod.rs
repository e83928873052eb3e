//! Inbound message-processing pipeline.
//!
//! One decoded stanza enters through [`Client::feed`]; everything it
//! causes — acks, decryption, retries, receipts, events — happens under
//! the ordering rules of the per-chat and global retry mutexes. Errors
//! never propagate out of the pipeline: they are repaired, logged, or
//! routed to the unexpected-error hook.

mod ack;
mod calls;
mod history;
mod intake;
mod notifications;
mod process;
mod receipts;
mod retry;

use tracing::{debug, warn};

use crate::client::Client;
use crate::error::Error;
use crate::stanza::Node;

/// A message id is retried at most this many times.
pub(crate) const MAX_MESSAGE_RETRY_COUNT: u32 = 5;

/// Server-side one-time prekey floor; dropping below it triggers a
/// replenishing upload.
pub(crate) const MIN_PREKEY_COUNT: u32 = 5;

impl Client {
    /// Entry point for one decoded inbound stanza.
    pub async fn feed(&self, node: Node) {
        let tag = node.tag.clone();
        let result = match tag.as_str() {
            "message" => self.handle_message(node).await,
            "receipt" => self.handle_receipt(&node).await,
            "notification" => self.handle_notification(&node).await,
            "call" => self.handle_call(&node).await,
            other => {
                debug!(tag = other, "stanza with unhandled tag");
                self.ack_stanza(&node, None).await.map_err(Into::into)
            }
        };

        if let Err(err) = result {
            // Malformed stanzas are dropped by contract; anything else
            // goes to the unified sink.
            match err.downcast_ref::<Error>() {
                Some(Error::Protocol { reason }) => {
                    warn!(reason = %reason, "dropping malformed stanza");
                }
                _ => self.notify_unexpected(&err, "processing inbound stanza"),
            }
        }
    }
}
