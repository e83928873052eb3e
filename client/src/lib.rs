//! Client core for an end-to-end encrypted chat protocol multiplexed
//! over a persistent websocket.
//!
//! The heart of the crate is the inbound pipeline: stanzas enter through
//! [`Client::feed`], get acked, decrypted (or retried with fresh key
//! material), interpreted, and surface as high-level events on the bus —
//! all under strict per-chat ordering. The outbound side prepares
//! encrypted media payloads and relay-ready message envelopes.
//!
//! Session crypto, key persistence, the binary stanza codec and the
//! higher socket layers are external collaborators reached through the
//! traits in [`store`], [`transport`] and [`ws`].

pub mod client;
pub mod config;
pub mod creds;
pub mod error;
pub mod events;
pub mod jid;
pub mod media;
pub mod message;
mod pipeline;
pub mod stanza;
pub mod store;
pub mod transport;
pub mod util;
pub mod ws;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use events::Event;
pub use jid::Jid;
pub use message::{MessageKey, WebMessage};
