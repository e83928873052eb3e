//! Notification interpreter.
//!
//! Protocol notifications (group lifecycle, encryption counters, device
//! lists, media retries) are acked first and interpreted second, so a
//! bad payload never blocks protocol flow.

use tracing::{debug, info};

use crate::client::Client;
use crate::error::Error;
use crate::events::{Chat, Event, GroupMetadata, GroupParticipant, MediaRetryUpdate, UpsertKind};
use crate::jid::{Jid, GROUP_SERVER};
use crate::message::{MessageContent, MessageKey, ProtocolContent, StubType, WebMessage};
use crate::stanza::Node;

use super::MIN_PREKEY_COUNT;

impl Client {
    pub(crate) async fn handle_notification(&self, node: &Node) -> anyhow::Result<()> {
        self.ack_stanza(node, None).await?;

        match node.attr("type").unwrap_or_default() {
            "w:gp2" => self.handle_group_notification(node).await?,
            "mediaretry" => self.handle_media_retry_notification(node)?,
            "encrypt" => self.handle_encrypt_notification(node).await?,
            "devices" => self.handle_devices_notification(node),
            other => debug!(kind = other, "unhandled notification type"),
        }
        Ok(())
    }

    /// Group lifecycle changes synthesize stub messages (and, for
    /// `create`, chat/group upserts) that flow through the normal
    /// message upsert path.
    async fn handle_group_notification(&self, node: &Node) -> anyhow::Result<()> {
        let from = node.required_jid_attr("from")?;
        let notifier = node.jid_attr("participant");
        let Some(child) = node.first_child() else {
            debug!("group notification without body");
            return Ok(());
        };

        let me = self.me();
        let from_me = notifier
            .as_ref()
            .is_some_and(|participant| participant.same_user(&me));
        let timestamp = node
            .attr("t")
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or_default();
        let mut message = WebMessage::new(
            MessageKey {
                remote_jid: from,
                from_me,
                id: node.required_attr("id")?.to_string(),
                participant: notifier.clone(),
            },
            timestamp,
        );

        match child.tag.as_str() {
            "create" => {
                let group = child.child("group").unwrap_or(child);
                let metadata = extract_group_metadata(group)?;

                message.key.remote_jid = metadata.id.clone();
                message.key.participant = metadata.owner.clone();
                message.stub_type = Some(StubType::GroupCreate);
                message.stub_parameters = vec![metadata.subject.clone()];

                self.emit(Event::ChatsUpsert {
                    chats: vec![Chat {
                        id: metadata.id.clone(),
                        name: Some(metadata.subject.clone()),
                        conversation_timestamp: Some(metadata.creation),
                    }],
                });
                self.emit(Event::GroupsUpsert {
                    groups: vec![metadata],
                });
            }
            "ephemeral" | "not_ephemeral" => {
                let expiration = child
                    .attr("expiration")
                    .and_then(|raw| raw.parse::<u64>().ok())
                    .unwrap_or(0);
                message.content = Some(MessageContent::Protocol(
                    ProtocolContent::EphemeralSetting {
                        ephemeral_expiration: expiration,
                    },
                ));
            }
            tag @ ("promote" | "demote" | "remove" | "add" | "leave") => {
                let participants: Vec<String> = child
                    .children_with_tag("participant")
                    .filter_map(|participant| participant.attr("jid"))
                    .map(str::to_string)
                    .collect();

                let mut stub = match tag {
                    "promote" => StubType::GroupParticipantPromote,
                    "demote" => StubType::GroupParticipantDemote,
                    "remove" => StubType::GroupParticipantRemove,
                    "add" => StubType::GroupParticipantAdd,
                    _ => StubType::GroupParticipantLeave,
                };
                // A member removing exactly themselves left voluntarily.
                if tag == "remove" && participants.len() == 1 {
                    let same_actor = participants[0]
                        .parse::<Jid>()
                        .ok()
                        .zip(notifier.as_ref())
                        .is_some_and(|(removed, actor)| removed.same_user(actor));
                    if same_actor {
                        stub = StubType::GroupParticipantLeave;
                    }
                }
                message.stub_type = Some(stub);
                message.stub_parameters = participants;
            }
            "subject" => {
                message.stub_type = Some(StubType::GroupChangeSubject);
                message.stub_parameters =
                    vec![child.attr("subject").unwrap_or_default().to_string()];
            }
            tag @ ("announcement" | "not_announcement") => {
                message.stub_type = Some(StubType::GroupChangeAnnounce);
                message.stub_parameters =
                    vec![if tag == "announcement" { "on" } else { "off" }.to_string()];
            }
            tag @ ("locked" | "unlocked") => {
                message.stub_type = Some(StubType::GroupChangeRestrict);
                message.stub_parameters =
                    vec![if tag == "locked" { "on" } else { "off" }.to_string()];
            }
            other => {
                debug!(tag = other, "unhandled group notification");
                return Ok(());
            }
        }

        self.emit(Event::MessagesUpsert {
            messages: vec![message],
            kind: UpsertKind::Append,
        });
        Ok(())
    }

    fn handle_media_retry_notification(&self, node: &Node) -> anyhow::Result<()> {
        let rmr = node
            .child("rmr")
            .ok_or_else(|| Error::protocol("mediaretry notification without rmr"))?;
        let key = MessageKey {
            remote_jid: rmr.required_jid_attr("jid")?,
            from_me: rmr.attr("from_me") == Some("true"),
            id: rmr.required_attr("id")?.to_string(),
            participant: rmr.jid_attr("participant"),
        };
        let error_code = node
            .child("error")
            .and_then(|error| error.attr("code"))
            .and_then(|code| code.parse::<u32>().ok());
        let direct_path = node
            .child("media")
            .and_then(|media| media.attr("direct_path"))
            .map(str::to_string);

        self.emit(Event::MessagesMediaUpdate {
            updates: vec![MediaRetryUpdate {
                key,
                direct_path,
                error_code,
            }],
        });
        Ok(())
    }

    async fn handle_encrypt_notification(&self, node: &Node) -> anyhow::Result<()> {
        let from = node.required_jid_attr("from")?;
        if from != Jid::server() {
            debug!(from = %from, "encrypt notification not from server");
            return Ok(());
        }

        if let Some(count) = node.child("count") {
            let remaining: u32 = count
                .required_attr("value")?
                .parse()
                .map_err(|_| Error::protocol("unparseable prekey count"))?;
            if remaining < MIN_PREKEY_COUNT {
                info!(remaining, "server low on one-time prekeys, replenishing");
                self.transport.upload_prekeys().await?;
            }
        } else if node.child("identity").is_some() {
            info!("own signal identity changed on the server");
        } else {
            debug!("unhandled encrypt notification variant");
        }
        Ok(())
    }

    /// Informational only: the server told us about our own device list.
    fn handle_devices_notification(&self, node: &Node) {
        let Some(child) = node.first_child() else {
            return;
        };
        let me = self.me();
        if child
            .jid_attr("jid")
            .is_some_and(|jid| jid.same_user(&me))
        {
            let devices: Vec<String> = child
                .children_with_tag("device")
                .filter_map(|device| device.attr("jid"))
                .map(str::to_string)
                .collect();
            info!(?devices, "own device list updated");
        }
    }
}

fn extract_group_metadata(group: &Node) -> anyhow::Result<GroupMetadata> {
    let raw_id = group.required_attr("id")?;
    let id: Jid = if raw_id.contains('@') {
        raw_id.parse()?
    } else {
        Jid::new(raw_id, GROUP_SERVER)
    };

    let participants = group
        .children_with_tag("participant")
        .filter_map(|participant| {
            let jid = participant.jid_attr("jid")?;
            let kind = participant.attr("type");
            Some(GroupParticipant {
                jid,
                is_admin: matches!(kind, Some("admin") | Some("superadmin")),
                is_super_admin: kind == Some("superadmin"),
            })
        })
        .collect();

    Ok(GroupMetadata {
        id,
        subject: group.attr("subject").unwrap_or_default().to_string(),
        owner: group.jid_attr("creator").map(|creator| creator.normalized()),
        creation: group
            .attr("creation")
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or_default(),
        participants,
    })
}
