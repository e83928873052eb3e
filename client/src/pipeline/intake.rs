//! Message intake state machine.
//!
//! Per inbound `message` stanza:
//!
//! ```text
//! RECEIVED → ACKED → DECRYPTING → {DECRYPTED | FAILED}
//! FAILED → (under retry mutex) RETRY_SENT → terminal
//! DECRYPTED → RECEIPT_SENT → EMITTED → terminal
//! ```
//!
//! The whole machine runs under the per-chat ordering mutex, so two
//! stanzas for the same chat can never reorder their observable
//! effects. The ack goes out before the decryption task resolves.

use tracing::{debug, warn};

use crate::client::Client;
use crate::events::{Event, UpsertKind};
use crate::jid::Jid;
use crate::message::{clean_message, MessageStatus, StubType, WebMessage};
use crate::stanza::Node;
use crate::store::{DecodedFrame, MessageCategory};
use crate::transport::ReceiptKind;

impl Client {
    pub(crate) async fn handle_message(&self, node: Node) -> anyhow::Result<()> {
        let frame = match self.decrypter.decode(&node).await {
            Ok(frame) => frame,
            Err(err) => {
                // Malformed envelope: the stanza is dropped, but the
                // server still gets its ack where the attrs allow one.
                warn!(error = %err, "failed to decode message envelope");
                if let Err(ack_err) = self.ack_stanza(&node, None).await {
                    debug!(error = %ack_err, "could not ack undecodable message");
                }
                return Ok(());
            }
        };
        let DecodedFrame {
            mut message,
            category,
            author,
            task,
        } = frame;

        let chat = message.key.remote_jid.to_string();
        let _ordering = self.chat_mutex.lock(&chat).await;

        if let Err(err) = self.ack_stanza(&node, None).await {
            warn!(error = %err, id = %message.key.id, "failed to ack message");
        }
        message.status.advance(MessageStatus::ServerAck);

        match task.await {
            Ok(content) => {
                message.content = Some(content);
            }
            Err(err) => {
                debug!(error = %err, id = %message.key.id, "message decryption failed");
                message.stub_type = Some(StubType::Ciphertext);
                message.stub_parameters = vec![err.to_string()];
            }
        }

        if message.is_ciphertext_stub() {
            self.request_retry_for(&node).await;
            if !self.config.treat_ciphertext_messages_as_real {
                return Ok(());
            }
        } else {
            let (kind, participant) = self.delivery_receipt(&message, category, &author);
            if let Err(err) = self
                .transport
                .send_receipt(
                    &message.key.remote_jid,
                    participant.as_ref(),
                    std::slice::from_ref(&message.key.id),
                    kind,
                )
                .await
            {
                warn!(error = %err, id = %message.key.id, "failed to send delivery receipt");
            }
        }

        let me = self.me();
        clean_message(&mut message, &me);
        let kind = if node.attr("offline").is_some() {
            UpsertKind::Append
        } else {
            UpsertKind::Notify
        };
        self.emit(Event::MessagesUpsert {
            messages: vec![message],
            kind,
        });
        Ok(())
    }

    /// FAILED branch: one retry request under the global retry mutex.
    /// Nothing in here may propagate.
    async fn request_retry_for(&self, node: &Node) {
        let _retry = self.retry_mutex.lock().await;
        if !self.transport.is_open() {
            debug!("transport closed, skipping retry request");
            return;
        }
        if let Err(err) = self.send_retry_request(node).await {
            warn!(error = %err, "could not send retry request");
        }
        if let Some(delay) = self.config.retry_request_delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Receipt type for a successfully decrypted message, plus the
    /// participant override for 1:1 messages from our own devices.
    fn delivery_receipt(
        &self,
        message: &WebMessage,
        category: MessageCategory,
        author: &Jid,
    ) -> (Option<ReceiptKind>, Option<Jid>) {
        let mut participant = message.key.participant.clone();
        let kind = if category == MessageCategory::Peer {
            Some(ReceiptKind::PeerMsg)
        } else if message.key.from_me {
            if !message.key.remote_jid.is_group() {
                participant = Some(author.clone());
            }
            Some(ReceiptKind::Sender)
        } else if !self.send_active_receipts() {
            Some(ReceiptKind::Inactive)
        } else {
            None
        };
        (kind, participant)
    }
}
