//! Authentication-state snapshot and wire encodings of key material.
//!
//! Session establishment and key persistence are external; the core
//! only reads this snapshot when building retry receipts and emits
//! `creds.update` deltas when it consumes key material.

use serde::{Deserialize, Serialize};

use crate::jid::Jid;
use crate::stanza::Node;

/// First byte of the prekey bundle marker on the wire.
pub const KEY_BUNDLE_TYPE: [u8; 1] = [5];

/// One-time prekey consumed once by a peer to initiate a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKey {
    pub id: u32,
    pub public: Vec<u8>,
}

/// Rotated prekey signed by the local identity key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPreKey {
    pub id: u32,
    pub public: Vec<u8>,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub jid: Jid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Read-only view of the locally persisted credentials.
#[derive(Debug, Clone)]
pub struct Creds {
    pub registration_id: u32,
    /// Public half of the local identity key.
    pub identity_key: Vec<u8>,
    pub signed_pre_key: SignedPreKey,
    /// Pre-encoded signed device identity, attached to key bundles.
    pub device_identity: Vec<u8>,
    pub me: Contact,
}

/// Big-endian encoding at the width the wire expects: registration ids
/// use 4 bytes, prekey ids 3.
pub fn encode_big_endian(value: u32, width: usize) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    bytes[bytes.len() - width..].to_vec()
}

/// `<key>` element carrying a one-time prekey.
pub fn prekey_node(prekey: &PreKey) -> Node {
    Node::new("key").with_children(vec![
        Node::new("id").with_bytes(encode_big_endian(prekey.id, 3)),
        Node::new("value").with_bytes(prekey.public.clone()),
    ])
}

/// `<skey>` element carrying the current signed prekey.
pub fn signed_prekey_node(signed: &SignedPreKey) -> Node {
    Node::new("skey").with_children(vec![
        Node::new("id").with_bytes(encode_big_endian(signed.id, 3)),
        Node::new("value").with_bytes(signed.public.clone()),
        Node::new("signature").with_bytes(signed.signature.clone()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_widths() {
        assert_eq!(encode_big_endian(1, 4), vec![0, 0, 0, 1]);
        assert_eq!(encode_big_endian(0x0102_0304, 4), vec![1, 2, 3, 4]);
        assert_eq!(encode_big_endian(0x0102_03, 3), vec![1, 2, 3]);
        assert_eq!(encode_big_endian(42, 3), vec![0, 0, 42]);
    }

    #[test]
    fn test_prekey_node_shape() {
        let node = prekey_node(&PreKey {
            id: 7,
            public: vec![9; 32],
        });
        assert_eq!(node.tag, "key");
        assert_eq!(node.child("id").unwrap().bytes(), Some(&[0u8, 0, 7][..]));
        assert_eq!(node.child("value").unwrap().bytes().unwrap().len(), 32);
    }

    #[test]
    fn test_signed_prekey_node_carries_signature() {
        let node = signed_prekey_node(&SignedPreKey {
            id: 1,
            public: vec![1; 32],
            signature: vec![2; 64],
        });
        assert_eq!(node.tag, "skey");
        assert_eq!(node.child("signature").unwrap().bytes().unwrap().len(), 64);
    }
}
