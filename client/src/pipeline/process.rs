//! Post-upsert processing.
//!
//! The pipeline subscribes to its own `messages.upsert` stream and does
//! the follow-up work there: contact-name propagation, protocol-message
//! interpretation and history-sync accumulation. It runs under a mutex
//! key space (`"p-" + chat id`) deliberately disjoint from the intake
//! keys, so the subscriber can never deadlock against intake.

use tracing::debug;

use crate::client::Client;
use crate::events::{ChatUpdate, ContactUpdate, CredsUpdate, Event, UpsertKind};
use crate::message::{ProtocolContent, WebMessage};

impl Client {
    pub(crate) async fn post_process_message(
        &self,
        message: WebMessage,
        kind: UpsertKind,
    ) -> anyhow::Result<()> {
        if let Some(push_name) = message.push_name.clone() {
            self.apply_push_name(&message, push_name);
        }

        let chat_id = message.key.remote_jid.normalized().to_string();
        let _guard = self.chat_mutex.lock(&format!("p-{chat_id}")).await;

        if kind == UpsertKind::Append {
            self.note_recv_chat(&message);
        }

        if let Some(protocol) = message.protocol_content() {
            match protocol {
                ProtocolContent::EphemeralSetting {
                    ephemeral_expiration,
                } => {
                    self.emit(Event::ChatsUpdate {
                        updates: vec![ChatUpdate {
                            id: message.key.remote_jid.normalized(),
                            ephemeral_expiration: Some(*ephemeral_expiration),
                        }],
                    });
                }
                ProtocolContent::HistorySyncNotification { batch_id, .. } => {
                    let batch_id = batch_id.clone();
                    self.handle_history_notification(&message, &batch_id).await?;
                }
                ProtocolContent::Other { name } => {
                    debug!(name = %name, "unhandled protocol message");
                }
            }
        }
        Ok(())
    }

    /// Push names ride along on every message; they feed the contact
    /// book, and our own name feeds the persisted credentials.
    fn apply_push_name(&self, message: &WebMessage, push_name: String) {
        let contact_jid = if message.key.from_me {
            self.me()
        } else {
            message
                .key
                .participant
                .clone()
                .unwrap_or_else(|| message.key.remote_jid.clone())
                .normalized()
        };
        self.emit(Event::ContactsUpdate {
            contacts: vec![ContactUpdate {
                id: contact_jid,
                notify: Some(push_name.clone()),
            }],
        });

        if message.key.from_me {
            let changed = {
                let mut creds = self.creds.write();
                if creds.me.name.as_deref() != Some(push_name.as_str()) {
                    creds.me.name = Some(push_name.clone());
                    true
                } else {
                    false
                }
            };
            if changed {
                self.emit(Event::CredsUpdate {
                    update: CredsUpdate {
                        next_pre_key_id: None,
                        me_name: Some(push_name),
                    },
                });
            }
        }
    }
}
