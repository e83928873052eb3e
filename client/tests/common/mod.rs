//! Recording fakes shared by the integration suites.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use palaver_client::client::Client;
use palaver_client::config::ClientConfig;
use palaver_client::creds::{Contact, Creds, PreKey, SignedPreKey};
use palaver_client::error::{Error, Result};
use palaver_client::events::{ChatMutation, Event};
use palaver_client::jid::Jid;
use palaver_client::message::{MessageContent, MessageKey, WebMessage};
use palaver_client::stanza::Node;
use palaver_client::store::{
    DecodedFrame, KeyStore, MessageCategory, MessageDecrypter, MessageStore,
};
use palaver_client::transport::{MediaConn, ReceiptKind, RelayOptions, Transport};

#[derive(Debug, Clone)]
pub struct ReceiptCall {
    pub jid: String,
    pub participant: Option<String>,
    pub ids: Vec<String>,
    pub kind: Option<ReceiptKind>,
}

#[derive(Debug, Clone)]
pub struct RelayCall {
    pub jid: String,
    pub message_id: String,
    pub participant: Option<String>,
}

/// Transport fake that records every outbound primitive.
#[derive(Default)]
pub struct RecordingTransport {
    closed: AtomicBool,
    pub nodes: Mutex<Vec<Node>>,
    pub receipts: Mutex<Vec<ReceiptCall>>,
    pub relays: Mutex<Vec<RelayCall>>,
    pub sessions: Mutex<Vec<(Vec<String>, bool)>>,
    pub prekey_uploads: AtomicUsize,
    pub resyncs: Mutex<Vec<Vec<ChatMutation>>>,
}

impl RecordingTransport {
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn acks(&self) -> Vec<Node> {
        self.nodes
            .lock()
            .iter()
            .filter(|node| node.tag == "ack")
            .cloned()
            .collect()
    }

    pub fn retry_receipts(&self) -> Vec<Node> {
        self.nodes
            .lock()
            .iter()
            .filter(|node| node.tag == "receipt" && node.attr("type") == Some("retry"))
            .cloned()
            .collect()
    }

    pub fn prekey_upload_count(&self) -> usize {
        self.prekey_uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_node(&self, node: Node) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::TransportClosed);
        }
        self.nodes.lock().push(node);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn relay_message(
        &self,
        jid: &Jid,
        _content: &MessageContent,
        options: RelayOptions,
    ) -> Result<()> {
        self.relays.lock().push(RelayCall {
            jid: jid.to_string(),
            message_id: options.message_id,
            participant: options.participant.map(|jid| jid.to_string()),
        });
        Ok(())
    }

    async fn send_receipt(
        &self,
        jid: &Jid,
        participant: Option<&Jid>,
        ids: &[String],
        kind: Option<ReceiptKind>,
    ) -> Result<()> {
        self.receipts.lock().push(ReceiptCall {
            jid: jid.to_string(),
            participant: participant.map(|jid| jid.to_string()),
            ids: ids.to_vec(),
            kind,
        });
        Ok(())
    }

    async fn assert_sessions(&self, jids: &[Jid], force: bool) -> Result<()> {
        self.sessions
            .lock()
            .push((jids.iter().map(|jid| jid.to_string()).collect(), force));
        Ok(())
    }

    async fn upload_prekeys(&self) -> Result<()> {
        self.prekey_uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn resync_main_app_state(&self, recv_chats: Vec<ChatMutation>) -> Result<()> {
        self.resyncs.lock().push(recv_chats);
        Ok(())
    }

    async fn media_conn(&self) -> Result<MediaConn> {
        Ok(MediaConn {
            auth: "AUTH-TOKEN".into(),
            hosts: vec!["mmg.whatsapp.net".into()],
            ttl: 3600,
        })
    }
}

/// Per-message decryption outcome the decrypter fake replays.
pub enum Outcome {
    Content(MessageContent),
    DelayedContent(MessageContent, Duration),
    Fail(String),
}

/// Decrypter fake: builds envelopes straight from stanza attrs and
/// replays scripted outcomes (default: a short text message).
#[derive(Default)]
pub struct ScriptedDecrypter {
    outcomes: Mutex<HashMap<String, VecDeque<Outcome>>>,
}

impl ScriptedDecrypter {
    pub fn script(&self, id: &str, outcome: Outcome) {
        self.outcomes
            .lock()
            .entry(id.to_string())
            .or_default()
            .push_back(outcome);
    }
}

#[async_trait]
impl MessageDecrypter for ScriptedDecrypter {
    async fn decode(&self, stanza: &Node) -> Result<DecodedFrame> {
        let id = stanza.required_attr("id")?.to_string();
        let from = stanza.required_jid_attr("from")?;
        let participant = stanza.jid_attr("participant");

        let remote_jid = if from.is_group() {
            from.clone()
        } else {
            from.normalized()
        };
        let author = participant.clone().unwrap_or_else(|| from.clone());
        let timestamp = stanza
            .attr("t")
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or_default();

        let mut message = WebMessage::new(
            MessageKey {
                remote_jid,
                from_me: false,
                id: id.clone(),
                participant: participant.filter(|_| from.is_group()),
            },
            timestamp,
        );
        message.push_name = stanza.attr("notify").map(str::to_string);

        let category = if stanza.attr("category") == Some("peer") {
            MessageCategory::Peer
        } else {
            MessageCategory::Normal
        };

        let outcome = self
            .outcomes
            .lock()
            .get_mut(&id)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| {
                Outcome::Content(MessageContent::Text {
                    text: "hello".into(),
                })
            });

        let task: palaver_client::store::DecryptionTask = Box::pin(async move {
            match outcome {
                Outcome::Content(content) => Ok(content),
                Outcome::DelayedContent(content, delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(content)
                }
                Outcome::Fail(reason) => Err(anyhow::anyhow!(reason)),
            }
        });

        Ok(DecodedFrame {
            message,
            category,
            author,
            task,
        })
    }
}

/// Key store handing out sequentially numbered prekeys; can be switched
/// into a failing mode to exercise transaction errors.
pub struct SequentialKeyStore {
    next: AtomicU32,
    fail: AtomicBool,
}

impl Default for SequentialKeyStore {
    fn default() -> Self {
        Self {
            next: AtomicU32::new(100),
            fail: AtomicBool::new(false),
        }
    }
}

impl SequentialKeyStore {
    pub fn fail_next(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn consumed(&self) -> u32 {
        self.next.load(Ordering::SeqCst) - 100
    }
}

#[async_trait]
impl KeyStore for SequentialKeyStore {
    async fn reserve_prekey(&self) -> anyhow::Result<PreKey> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("key store offline");
        }
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(PreKey {
            id,
            public: vec![id as u8; 32],
        })
    }
}

/// In-memory outbound archive keyed by message id.
#[derive(Default)]
pub struct MapMessageStore {
    messages: Mutex<HashMap<String, MessageContent>>,
}

impl MapMessageStore {
    pub fn put(&self, id: &str, content: MessageContent) {
        self.messages.lock().insert(id.to_string(), content);
    }
}

#[async_trait]
impl MessageStore for MapMessageStore {
    async fn get_message(&self, key: &MessageKey) -> anyhow::Result<Option<MessageContent>> {
        Ok(self.messages.lock().get(&key.id).cloned())
    }
}

pub struct Harness {
    pub client: Client,
    pub transport: Arc<RecordingTransport>,
    pub decrypter: Arc<ScriptedDecrypter>,
    pub key_store: Arc<SequentialKeyStore>,
    pub message_store: Arc<MapMessageStore>,
    pub events: broadcast::Receiver<Event>,
    subscriber: JoinHandle<()>,
}

impl Harness {
    pub fn with_config(config: ClientConfig) -> Self {
        let transport = Arc::new(RecordingTransport::default());
        let decrypter = Arc::new(ScriptedDecrypter::default());
        let key_store = Arc::new(SequentialKeyStore::default());
        let message_store = Arc::new(MapMessageStore::default());

        let client = Client::new(
            config,
            test_creds(),
            transport.clone(),
            decrypter.clone(),
            key_store.clone(),
            message_store.clone(),
        );
        let events = client.subscribe();
        let subscriber = client.start();

        Self {
            client,
            transport,
            decrypter,
            key_store,
            message_store,
            events,
            subscriber,
        }
    }

    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Non-blocking drain of everything already on the bus.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Waits until `matches` accepts an event or the timeout expires.
    pub async fn wait_for_event<F>(&mut self, mut matches: F) -> Event
    where
        F: FnMut(&Event) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let event = self.events.recv().await.expect("event bus closed");
                if matches(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.subscriber.abort();
    }
}

pub fn test_creds() -> Creds {
    Creds {
        registration_id: 0x0102_0304,
        identity_key: vec![0x11; 32],
        signed_pre_key: SignedPreKey {
            id: 7,
            public: vec![0x22; 32],
            signature: vec![0x33; 64],
        },
        device_identity: vec![0x44; 16],
        me: Contact {
            jid: "me@s.whatsapp.net".parse().unwrap(),
            name: Some("Me".into()),
        },
    }
}

/// Inbound `message` stanza as the transport would deliver it.
pub fn message_stanza(id: &str, from: &str, timestamp: i64) -> Node {
    Node::new("message")
        .with_attr("id", id)
        .with_attr("from", from)
        .with_attr("t", timestamp.to_string())
}
