//! Loopback test for the websocket frame pump.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use palaver_client::error::{Error, Result};
use palaver_client::stanza::{Node, NodeContent};
use palaver_client::ws::{FrameCodec, WsConfig, WsConnection};

/// Test codec framing stanzas as JSON; stands in for the binary codec.
struct JsonCodec;

fn node_from_value(value: &serde_json::Value) -> Result<Node> {
    let tag = value["tag"]
        .as_str()
        .ok_or_else(|| Error::protocol("frame without tag"))?;
    let mut node = Node::new(tag);
    if let Some(attrs) = value["attrs"].as_object() {
        for (name, attr) in attrs {
            node.attrs
                .insert(name.clone(), attr.as_str().unwrap_or_default().to_string());
        }
    }
    if let Some(children) = value["content"]["Nodes"].as_array() {
        let children = children
            .iter()
            .map(node_from_value)
            .collect::<Result<Vec<_>>>()?;
        node.content = NodeContent::Nodes(children);
    }
    Ok(node)
}

impl FrameCodec for JsonCodec {
    fn encode(&self, node: &Node) -> Result<Vec<u8>> {
        serde_json::to_vec(node).map_err(|err| Error::protocol(err.to_string()))
    }

    fn decode(&self, frame: &[u8]) -> Result<Node> {
        let value: serde_json::Value = serde_json::from_slice(frame)
            .map_err(|err| Error::protocol(err.to_string()))?;
        node_from_value(&value)
    }
}

#[tokio::test]
async fn test_pump_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();

        // Deliver one receipt stanza into the pump.
        let receipt = Node::new("receipt")
            .with_attr("id", "R1")
            .with_attr("from", "alice@s.whatsapp.net");
        ws.send(Message::Binary(serde_json::to_vec(&receipt).unwrap()))
            .await
            .unwrap();

        // Wait for the stanza the client queues through send_node.
        loop {
            match ws.next().await {
                Some(Ok(Message::Binary(frame))) => break frame,
                Some(Ok(_)) => continue,
                other => panic!("unexpected websocket item: {other:?}"),
            }
        }
    });

    let harness = common::Harness::new();
    let connection = WsConnection::connect(
        WsConfig::new(format!("ws://{addr}")),
        Arc::new(JsonCodec),
        harness.client.clone(),
    )
    .await
    .unwrap();
    assert!(connection.is_open());

    connection
        .send_node(&Node::new("iq").with_attr("id", "Q1"))
        .await
        .unwrap();

    let frame = server.await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
    assert_eq!(value["tag"], "iq");
    assert_eq!(value["attrs"]["id"], "Q1");

    // The receipt that came through the pump was acked by the pipeline.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let acked = harness
            .transport
            .acks()
            .iter()
            .any(|ack| ack.attr("id") == Some("R1"));
        if acked {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "inbound frame never reached the pipeline"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    connection.close().await;
}
