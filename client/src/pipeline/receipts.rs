//! Receipt interpreter.
//!
//! Inbound receipts either advance message status (delivery, read,
//! played) or, for `type="retry"`, ask us to re-send messages the peer
//! could not decrypt.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::error::Error;
use crate::events::{Event, MessageUpdate, ReceiptUpdate};
use crate::message::{MessageKey, MessageStatus};
use crate::stanza::Node;
use crate::transport::RelayOptions;

use super::MAX_MESSAGE_RETRY_COUNT;

impl Client {
    pub(crate) async fn handle_receipt(&self, node: &Node) -> anyhow::Result<()> {
        let id = node.required_attr("id")?.to_string();
        let from = node.required_jid_attr("from")?;
        let participant = node.jid_attr("participant");
        let recipient = node.jid_attr("recipient");
        let receipt_type = node.attr("type");
        let timestamp = node
            .attr("t")
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or_else(|| Utc::now().timestamp());

        let me = self.me();
        let sender = participant.clone().unwrap_or_else(|| from.clone());
        let is_node_from_me = sender.same_user(&me);
        let remote_jid = if !is_node_from_me || from.is_group() {
            from.clone()
        } else {
            recipient.clone().unwrap_or_else(|| from.clone())
        };
        let from_me =
            recipient.is_none() || (receipt_type == Some("retry") && is_node_from_me);

        let mut ids = vec![id.clone()];
        if let Some(list) = node.child("list") {
            ids.extend(
                list.children_with_tag("item")
                    .filter_map(|item| item.attr("id"))
                    .map(str::to_string),
            );
        }

        let key = MessageKey {
            remote_jid: remote_jid.clone(),
            from_me,
            id,
            participant: participant.clone(),
        };

        let _ordering = self.chat_mutex.lock(&remote_jid.to_string()).await;

        let status = match receipt_type {
            None => Some(MessageStatus::DeliveryAck),
            Some("read") | Some("read-self") => Some(MessageStatus::Read),
            Some("played") => Some(MessageStatus::Played),
            Some("retry") => None,
            Some(other) => {
                debug!(kind = other, "ignoring receipt type");
                None
            }
        };

        if let Some(status) = status {
            // Our own plain delivery acks carry no information for
            // subscribers; everything else does.
            if status > MessageStatus::DeliveryAck || !is_node_from_me {
                self.emit_receipt_updates(&key, &ids, &sender, status, timestamp);
            }
        }

        let mut suppress_ack = false;
        if receipt_type == Some("retry") {
            let attempts = self
                .retry_counters
                .get(&ids[0])
                .map(|count| *count)
                .unwrap_or(0);
            if attempts < MAX_MESSAGE_RETRY_COUNT {
                let mut key = key.clone();
                key.participant = key.participant.take().or_else(|| Some(from.clone()));
                if key.from_me {
                    if let Err(err) = self.resend_messages(&key, &ids).await {
                        if let Some(Error::Protocol { reason }) = err.downcast_ref::<Error>() {
                            warn!(reason = %reason, "dropping malformed retry receipt");
                        } else {
                            self.notify_unexpected(&err, "resending messages for retry receipt");
                            // Withhold the ack so the peer re-issues the
                            // retry and we get another chance.
                            suppress_ack = true;
                        }
                    }
                } else {
                    info!(id = %ids[0], "peer requested retry for a message we did not send");
                }
            } else {
                debug!(id = %ids[0], "retry receipt past attempt cap, not resending");
            }
        }

        if !suppress_ack {
            self.ack_stanza(node, None).await?;
        }
        Ok(())
    }

    fn emit_receipt_updates(
        &self,
        key: &MessageKey,
        ids: &[String],
        sender: &crate::jid::Jid,
        status: MessageStatus,
        timestamp: i64,
    ) {
        if key.remote_jid.is_group() {
            let user_jid = sender.normalized();
            let updates = ids
                .iter()
                .map(|message_id| {
                    let mut update = ReceiptUpdate {
                        key: MessageKey {
                            id: message_id.clone(),
                            ..key.clone()
                        },
                        user_jid: user_jid.clone(),
                        receipt_timestamp: None,
                        read_timestamp: None,
                    };
                    if status == MessageStatus::DeliveryAck {
                        update.receipt_timestamp = Some(timestamp);
                    } else {
                        update.read_timestamp = Some(timestamp);
                    }
                    update
                })
                .collect();
            self.emit(Event::MessageReceiptUpdate { updates });
        } else {
            let updates = ids
                .iter()
                .map(|message_id| MessageUpdate {
                    key: MessageKey {
                        id: message_id.clone(),
                        ..key.clone()
                    },
                    status,
                })
                .collect();
            self.emit(Event::MessagesUpdate { updates });
        }
    }

    /// Re-sends our own messages a peer failed to decrypt. Runs under
    /// the global retry mutex so counter updates and session assertions
    /// are totally ordered with intake-initiated retries.
    async fn resend_messages(&self, key: &MessageKey, ids: &[String]) -> anyhow::Result<()> {
        let _retry = self.retry_mutex.lock().await;
        let participant = key
            .participant
            .clone()
            .ok_or_else(|| Error::protocol("retry receipt without resolvable participant"))?;

        let mut available = Vec::with_capacity(ids.len());
        for message_id in ids {
            let lookup = MessageKey {
                id: message_id.clone(),
                ..key.clone()
            };
            available.push((message_id.clone(), self.message_store.get_message(&lookup).await?));
        }

        self.transport
            .assert_sessions(std::slice::from_ref(&participant), true)
            .await?;

        if key.remote_jid.is_group() {
            // Force a fresh sender-key fan-out on the next group send.
            self.sender_key_memory.remove(&key.remote_jid.to_string());
        }

        for (message_id, content) in available {
            match content {
                Some(content) => {
                    {
                        let mut attempts =
                            self.retry_counters.entry(message_id.clone()).or_insert(0);
                        *attempts += 1;
                    }
                    self.transport
                        .relay_message(
                            &key.remote_jid,
                            &content,
                            RelayOptions {
                                message_id: message_id.clone(),
                                participant: Some(participant.clone()),
                            },
                        )
                        .await?;
                }
                None => {
                    warn!(id = %message_id, "retry requested but message is not in the store");
                }
            }
        }
        Ok(())
    }
}
