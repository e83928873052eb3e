//! The socket value.
//!
//! One [`Client`] owns all mutable state of one connection: retry
//! counters, the call-offer cache, history-sync accumulation, ordering
//! mutexes and the active-receipts flag. Nothing here is a process-wide
//! singleton, so multiple sockets can coexist in one process.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::config::ClientConfig;
use crate::creds::Creds;
use crate::events::{CallEvent, ChatMutation, Event, EventBus};
use crate::jid::Jid;
use crate::store::{KeyStore, MessageDecrypter, MessageStore};
use crate::transport::Transport;
use crate::util::{Debounce, KeyedMutex};

/// Unanswered call offers are evicted after this long even if no
/// terminal status ever arrives.
const CALL_OFFER_TTL: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct Client {
    pub(crate) config: ClientConfig,
    pub(crate) creds: Arc<RwLock<Creds>>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) decrypter: Arc<dyn MessageDecrypter>,
    pub(crate) key_store: Arc<dyn KeyStore>,
    pub(crate) message_store: Arc<dyn MessageStore>,
    pub(crate) bus: EventBus,
    /// Serializes inbound processing per chat; also hosts the disjoint
    /// `"p-"`-prefixed key space used by post-upsert processing.
    pub(crate) chat_mutex: Arc<KeyedMutex>,
    /// Serializes retry submissions globally so the key store never sees
    /// concurrent prekey-consuming transactions.
    pub(crate) retry_mutex: Arc<tokio::sync::Mutex<()>>,
    pub(crate) retry_counters: Arc<DashMap<String, u32>>,
    pub(crate) call_offers: moka::sync::Cache<String, CallEvent>,
    pub(crate) history_cache: Arc<SyncMutex<HashSet<String>>>,
    pub(crate) recv_chats: Arc<SyncMutex<HashMap<String, ChatMutation>>>,
    /// Per-group record of which participants hold the current
    /// sender key; dropping an entry forces a fresh fan-out.
    pub(crate) sender_key_memory: Arc<DashMap<String, HashSet<String>>>,
    pub(crate) send_active_receipts: Arc<AtomicBool>,
    pub(crate) history_gate: Arc<Debounce>,
    pub(crate) http: reqwest::Client,
}

impl Client {
    pub fn new(
        config: ClientConfig,
        creds: Creds,
        transport: Arc<dyn Transport>,
        decrypter: Arc<dyn MessageDecrypter>,
        key_store: Arc<dyn KeyStore>,
        message_store: Arc<dyn MessageStore>,
    ) -> Self {
        let retry_counters = config
            .retry_counters
            .clone()
            .unwrap_or_else(|| Arc::new(DashMap::new()));
        let send_active_receipts = Arc::new(AtomicBool::new(config.send_active_receipts));
        let bus = EventBus::new(config.event_buffer);
        let history_gate = Arc::new(Debounce::new(config.history_debounce));

        Self {
            config,
            creds: Arc::new(RwLock::new(creds)),
            transport,
            decrypter,
            key_store,
            message_store,
            bus,
            chat_mutex: Arc::new(KeyedMutex::new()),
            retry_mutex: Arc::new(tokio::sync::Mutex::new(())),
            retry_counters,
            call_offers: moka::sync::Cache::builder()
                .time_to_live(CALL_OFFER_TTL)
                .build(),
            history_cache: Arc::new(SyncMutex::new(HashSet::new())),
            recv_chats: Arc::new(SyncMutex::new(HashMap::new())),
            sender_key_memory: Arc::new(DashMap::new()),
            send_active_receipts,
            history_gate,
            http: reqwest::Client::new(),
        }
    }

    /// Subscribes to the event bus.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Spawns the post-upsert subscriber. The returned handle outlives
    /// the client value; abort it to stop post-processing.
    pub fn start(&self) -> JoinHandle<()> {
        let client = self.clone();
        // Subscribe before spawning so no upsert emitted after this call
        // can slip past the subscriber.
        let rx = self.bus.subscribe();
        tokio::spawn(async move { client.run_upsert_subscriber(rx).await })
    }

    async fn run_upsert_subscriber(&self, mut rx: broadcast::Receiver<Event>) {
        loop {
            match rx.recv().await {
                Ok(Event::MessagesUpsert { messages, kind }) => {
                    for message in messages {
                        if let Err(err) = self.post_process_message(message, kind).await {
                            self.notify_unexpected(&err, "post-processing message upsert");
                        }
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "post-upsert subscriber lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// The local identity, device-free.
    pub fn me(&self) -> Jid {
        self.creds.read().me.jid.normalized()
    }

    pub fn send_active_receipts(&self) -> bool {
        self.send_active_receipts.load(Ordering::Relaxed)
    }

    /// Toggles between real delivery receipts and `inactive` ones.
    pub fn set_send_active_receipts(&self, active: bool) {
        self.send_active_receipts.store(active, Ordering::Relaxed);
    }

    pub(crate) fn emit(&self, event: Event) {
        self.bus.emit(event);
    }

    /// Marks messages as read towards their senders. Keys are grouped
    /// per chat and participant; self-chat reads (and all reads while
    /// active receipts are off) go out as `read-self`.
    pub async fn read_messages(&self, keys: &[crate::message::MessageKey]) -> crate::error::Result<()> {
        use crate::transport::ReceiptKind;

        let me = self.me();
        let default_kind = if self.send_active_receipts() {
            ReceiptKind::Read
        } else {
            ReceiptKind::ReadSelf
        };

        let mut grouped: HashMap<String, (Jid, Option<Jid>, Vec<String>)> = HashMap::new();
        for key in keys {
            let group_key = format!(
                "{}|{}",
                key.remote_jid,
                key.participant
                    .as_ref()
                    .map(Jid::to_string)
                    .unwrap_or_default()
            );
            grouped
                .entry(group_key)
                .or_insert_with(|| {
                    (
                        key.remote_jid.clone(),
                        key.participant.clone(),
                        Vec::new(),
                    )
                })
                .2
                .push(key.id.clone());
        }

        for (jid, participant, ids) in grouped.into_values() {
            let kind = if jid.same_user(&me) {
                ReceiptKind::ReadSelf
            } else {
                default_kind
            };
            self.transport
                .send_receipt(&jid, participant.as_ref(), &ids, Some(kind))
                .await?;
        }
        Ok(())
    }

    /// Records that `participant` received the current sender key for
    /// `group`. Maintained by the relay layer; a retry receipt from a
    /// group drops the whole entry to force a fresh fan-out.
    pub fn note_sender_key_delivery(&self, group: &Jid, participant: &Jid) {
        self.sender_key_memory
            .entry(group.to_string())
            .or_default()
            .insert(participant.to_string());
    }

    /// Devices known to hold the current sender key for `group`.
    pub fn sender_key_holders(&self, group: &Jid) -> Vec<String> {
        self.sender_key_memory
            .get(&group.to_string())
            .map(|holders| holders.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Unified sink for failures in spawned work; never panics, never
    /// aborts the scheduler.
    pub(crate) fn notify_unexpected(&self, err: &anyhow::Error, context: &str) {
        error!(error = %err, context, "unexpected error in pipeline task");
        if let Some(hook) = &self.config.on_unexpected_error {
            hook(err, context);
        }
    }
}
