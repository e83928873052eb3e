//! Retry requester.
//!
//! When decryption of an inbound message fails, the peer is asked to
//! re-send it. Each attempt consumes one fresh one-time prekey so the
//! peer can rebuild the session; the per-message attempt count is
//! capped. Callers hold the global retry mutex, which totally orders
//! prekey-consuming transactions.

use tracing::{debug, info};

use crate::client::Client;
use crate::creds::{encode_big_endian, prekey_node, signed_prekey_node, KEY_BUNDLE_TYPE};
use crate::error::{Error, Result};
use crate::events::{CredsUpdate, Event};
use crate::stanza::Node;

use super::MAX_MESSAGE_RETRY_COUNT;

impl Client {
    /// Builds and sends a `receipt type="retry"` for the failed stanza.
    ///
    /// A key-store failure aborts the send but does not roll the counter
    /// back; the next attempt simply carries a higher count.
    pub(crate) async fn send_retry_request(&self, stanza: &Node) -> Result<()> {
        let id = stanza.required_attr("id")?;
        let from = stanza.required_jid_attr("from")?;

        let retry_count = self.retry_counters.get(id).map(|count| *count).unwrap_or(1);
        if retry_count >= MAX_MESSAGE_RETRY_COUNT {
            self.retry_counters.remove(id);
            info!(id, "retry limit reached, giving up on message");
            return Ok(());
        }
        self.retry_counters.insert(id.to_string(), retry_count + 1);

        let prekey = self
            .key_store
            .reserve_prekey()
            .await
            .map_err(|err| Error::KeyStoreTx {
                reason: err.to_string(),
            })?;

        let (registration_id, identity_key, signed_pre_key, device_identity) = {
            let creds = self.creds.read();
            (
                creds.registration_id,
                creds.identity_key.clone(),
                creds.signed_pre_key.clone(),
                creds.device_identity.clone(),
            )
        };

        // Group traffic is answered at the group; direct traffic at the
        // specific sending device.
        let from_group = stanza.attr("participant").is_some();
        let to = if from_group {
            from
        } else {
            from.to_device_addressed()
        };

        let mut receipt = Node::new("receipt")
            .with_attr("id", id)
            .with_attr("type", "retry")
            .with_attr("to", to.to_string());
        if let Some(recipient) = stanza.attr("recipient") {
            receipt = receipt.with_attr("recipient", recipient);
        }
        if let Some(participant) = stanza.attr("participant") {
            receipt = receipt.with_attr("participant", participant);
        }

        let mut children = vec![
            Node::new("retry")
                .with_attr("count", retry_count.to_string())
                .with_attr("id", id)
                .with_attr("t", stanza.attr("t").unwrap_or_default())
                .with_attr("v", "1"),
            Node::new("registration").with_bytes(encode_big_endian(registration_id, 4)),
        ];
        // The first request relies on the peer's existing session; from
        // the second attempt on, ship a full bundle so the peer can
        // re-establish from scratch.
        if retry_count > 1 {
            children.push(Node::new("keys").with_children(vec![
                Node::new("type").with_bytes(KEY_BUNDLE_TYPE.to_vec()),
                Node::new("identity").with_bytes(identity_key),
                prekey_node(&prekey),
                signed_prekey_node(&signed_pre_key),
                Node::new("device-identity").with_bytes(device_identity),
            ]));
        }
        let receipt = receipt.with_children(children);

        self.transport.send_node(receipt).await?;

        self.emit(Event::CredsUpdate {
            update: CredsUpdate {
                next_pre_key_id: Some(prekey.id + 1),
                me_name: None,
            },
        });
        debug!(id, count = retry_count, "sent retry receipt");
        Ok(())
    }
}
