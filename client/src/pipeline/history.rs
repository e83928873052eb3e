//! History-sync gating.
//!
//! History batches arrive in bursts after login. Instead of resyncing
//! app state per batch, a debounced gate waits for a quiet period and
//! then pulls chat state once, handing over the chat deltas accumulated
//! while the burst lasted.

use tracing::{debug, warn};

use crate::client::Client;
use crate::events::ChatMutation;
use crate::message::WebMessage;
use crate::transport::ReceiptKind;

impl Client {
    /// Records the chat-state delta a bulk-ingested message implies.
    pub(crate) fn note_recv_chat(&self, message: &WebMessage) {
        let jid = message.key.remote_jid.normalized();
        let mut recv_chats = self.recv_chats.lock();
        let entry = recv_chats
            .entry(jid.to_string())
            .or_insert_with(|| ChatMutation {
                jid,
                last_message_recv_timestamp: message.message_timestamp,
            });
        entry.last_message_recv_timestamp = entry
            .last_message_recv_timestamp
            .max(message.message_timestamp);
    }

    /// One history-carrying message: dedupe the batch, confirm receipt
    /// to the sender's consumer-domain JID, restart the quiet period.
    pub(crate) async fn handle_history_notification(
        &self,
        message: &WebMessage,
        batch_id: &str,
    ) -> anyhow::Result<()> {
        if !self.config.download_history {
            debug!(batch_id, "history sync disabled, dropping notification");
            return Ok(());
        }

        let first_sighting = self.history_cache.lock().insert(batch_id.to_string());
        if first_sighting {
            let sender = message
                .key
                .participant
                .clone()
                .unwrap_or_else(|| message.key.remote_jid.clone());
            if let Err(err) = self
                .transport
                .send_receipt(
                    &sender.to_consumer(),
                    None,
                    std::slice::from_ref(&message.key.id),
                    Some(ReceiptKind::HistSync),
                )
                .await
            {
                warn!(error = %err, "failed to send hist_sync receipt");
            }
        } else {
            debug!(batch_id, "history batch already seen");
        }

        self.arm_history_gate();
        Ok(())
    }

    /// (Re)starts the debounce window. When it expires undisturbed the
    /// accumulated chat deltas are pushed into one app-state resync.
    pub(crate) fn arm_history_gate(&self) {
        let client = self.clone();
        self.history_gate.poke(async move {
            if client.transport.is_open() {
                let recv_chats: Vec<ChatMutation> = {
                    let mut pending = client.recv_chats.lock();
                    pending.drain().map(|(_, mutation)| mutation).collect()
                };
                if let Err(err) = client.transport.resync_main_app_state(recv_chats).await {
                    client
                        .notify_unexpected(&err.into(), "resyncing app state after history sync");
                }
            } else {
                debug!("transport closed, skipping app-state resync");
            }
            client.history_cache.lock().clear();
            client.recv_chats.lock().clear();
        });
    }
}
