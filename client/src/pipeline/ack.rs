//! Stanza acknowledgement.

use tracing::debug;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::stanza::Node;

impl Client {
    /// Acknowledges one inbound stanza. The `type` attribute propagates
    /// from the input only for non-`message` stanzas and only when the
    /// caller does not override it. A closed transport drops the write
    /// silently; every other failure surfaces to the caller.
    pub(crate) async fn ack_stanza(&self, node: &Node, override_kind: Option<&str>) -> Result<()> {
        let id = node.required_attr("id")?;
        let from = node.required_attr("from")?;

        let mut ack = Node::new("ack")
            .with_attr("id", id)
            .with_attr("to", from)
            .with_attr("class", node.tag.clone());
        if let Some(participant) = node.attr("participant") {
            ack = ack.with_attr("participant", participant);
        }
        let kind = match override_kind {
            Some(kind) => Some(kind),
            None if node.tag != "message" => node.attr("type"),
            None => None,
        };
        if let Some(kind) = kind {
            ack = ack.with_attr("type", kind);
        }

        match self.transport.send_node(ack).await {
            Ok(()) => Ok(()),
            Err(Error::TransportClosed) => {
                debug!(id, "transport closed, ack dropped");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
