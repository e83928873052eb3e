//! Call stanza handling.
//!
//! Offers seed the call cache; later stanzas for the same call id enrich
//! the cached event and terminal statuses evict it.

use chrono::Utc;
use tracing::debug;

use crate::client::Client;
use crate::events::{CallEvent, CallStatus, Event};
use crate::stanza::Node;

impl Client {
    pub(crate) async fn handle_call(&self, node: &Node) -> anyhow::Result<()> {
        self.ack_stanza(node, None).await?;

        let from = node.required_jid_attr("from")?;
        let Some(child) = node.first_child() else {
            debug!("call stanza without body");
            return Ok(());
        };

        let status = match child.tag.as_str() {
            "offer" => CallStatus::Offer,
            "ringing" => CallStatus::Ringing,
            "accept" => CallStatus::Accept,
            "reject" => CallStatus::Reject,
            "terminate" => {
                if child.attr("reason") == Some("timeout") {
                    CallStatus::Timeout
                } else {
                    CallStatus::Reject
                }
            }
            other => {
                debug!(tag = other, "unhandled call stanza");
                return Ok(());
            }
        };

        let call_id = child.required_attr("call-id")?.to_string();
        let timestamp = node
            .attr("t")
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or_else(|| Utc::now().timestamp());

        let mut event = self.call_offers.get(&call_id).unwrap_or_else(|| CallEvent {
            id: call_id.clone(),
            from: from.clone(),
            chat_id: child.jid_attr("call-creator").unwrap_or_else(|| from.clone()),
            status,
            is_video: false,
            is_group: false,
            date: timestamp,
            offline: node.attr("offline").is_some(),
        });
        event.status = status;

        if status == CallStatus::Offer {
            event.is_video = child.child("video").is_some();
            event.is_group = child.attr("type") == Some("group") || child.child("group").is_some();
        }

        if status.is_terminal() {
            self.call_offers.invalidate(&call_id);
        } else {
            self.call_offers.insert(call_id, event.clone());
        }

        self.emit(Event::Call { data: event });
        Ok(())
    }
}
