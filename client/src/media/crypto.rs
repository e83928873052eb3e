//! Media envelope crypto.
//!
//! A 32-byte media key expands through HKDF-SHA256, with a per-kind
//! info string, into the IV, cipher key, MAC key and reference key of
//! one media payload. The body on the wire is
//! `AES-256-CBC(cipher_key, iv, plaintext) || HMAC-SHA256(mac_key, iv || ct)[..10]`.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::message::MediaKind;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Truncated MAC length appended to the ciphertext.
pub const MAC_LENGTH: usize = 10;

/// Media key size on the wire.
pub const MEDIA_KEY_LENGTH: usize = 32;

impl MediaKind {
    /// HKDF info string binding derived keys to the payload kind.
    /// Stickers share the image key space.
    pub fn hkdf_info(&self) -> &'static str {
        match self {
            MediaKind::Image | MediaKind::Sticker => "WhatsApp Image Keys",
            MediaKind::Video => "WhatsApp Video Keys",
            MediaKind::Audio => "WhatsApp Audio Keys",
            MediaKind::Document => "WhatsApp Document Keys",
        }
    }

    /// Upload path component on the media hosts.
    pub fn upload_path(&self) -> &'static str {
        match self {
            MediaKind::Image | MediaKind::Sticker => "/mms/image",
            MediaKind::Video => "/mms/video",
            MediaKind::Audio => "/mms/audio",
            MediaKind::Document => "/mms/document",
        }
    }
}

/// Key material derived from one media key.
pub struct MediaKeys {
    pub iv: [u8; 16],
    pub cipher_key: [u8; 32],
    pub mac_key: [u8; 32],
    /// Reserved for sidecar/URL signing flows.
    pub ref_key: [u8; 32],
}

pub fn derive_media_keys(media_key: &[u8], kind: MediaKind) -> Result<MediaKeys> {
    let hkdf = Hkdf::<Sha256>::new(None, media_key);
    let mut expanded = [0u8; 112];
    hkdf.expand(kind.hkdf_info().as_bytes(), &mut expanded)
        .map_err(|_| Error::invalid_arg("media key expansion failed"))?;

    let mut keys = MediaKeys {
        iv: [0u8; 16],
        cipher_key: [0u8; 32],
        mac_key: [0u8; 32],
        ref_key: [0u8; 32],
    };
    keys.iv.copy_from_slice(&expanded[..16]);
    keys.cipher_key.copy_from_slice(&expanded[16..48]);
    keys.mac_key.copy_from_slice(&expanded[48..80]);
    keys.ref_key.copy_from_slice(&expanded[80..112]);
    Ok(keys)
}

/// Encrypts a plaintext buffer into the wire body (ciphertext plus
/// truncated MAC).
pub fn encrypt_body(plaintext: &[u8], keys: &MediaKeys) -> Vec<u8> {
    let ciphertext = Aes256CbcEnc::new((&keys.cipher_key).into(), (&keys.iv).into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut mac = HmacSha256::new_from_slice(&keys.mac_key)
        .expect("HMAC accepts keys of any length");
    mac.update(&keys.iv);
    mac.update(&ciphertext);
    let tag = mac.finalize().into_bytes();

    let mut body = ciphertext;
    body.extend_from_slice(&tag[..MAC_LENGTH]);
    body
}

/// Verifies and decrypts a wire body back into the plaintext.
pub fn decrypt_body(body: &[u8], keys: &MediaKeys) -> Result<Vec<u8>> {
    if body.len() < MAC_LENGTH {
        return Err(Error::MediaVerification {
            reason: "body shorter than its MAC".into(),
        });
    }
    let (ciphertext, tag) = body.split_at(body.len() - MAC_LENGTH);

    let mut mac = HmacSha256::new_from_slice(&keys.mac_key)
        .expect("HMAC accepts keys of any length");
    mac.update(&keys.iv);
    mac.update(ciphertext);
    mac.verify_truncated_left(tag)
        .map_err(|_| Error::MediaVerification {
            reason: "MAC mismatch".into(),
        })?;

    Aes256CbcDec::new((&keys.cipher_key).into(), (&keys.iv).into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::MediaVerification {
            reason: "bad CBC padding".into(),
        })
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// URL-safe base64 without padding, as digests appear on the wire.
pub fn b64url(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn b64url_decode(encoded: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|err| Error::protocol(format!("bad base64url digest: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn random_key() -> [u8; MEDIA_KEY_LENGTH] {
        let mut key = [0u8; MEDIA_KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    #[test]
    fn test_derivation_is_kind_specific() {
        let key = random_key();
        let image = derive_media_keys(&key, MediaKind::Image).unwrap();
        let video = derive_media_keys(&key, MediaKind::Video).unwrap();
        let sticker = derive_media_keys(&key, MediaKind::Sticker).unwrap();

        assert_ne!(image.cipher_key, video.cipher_key);
        // Stickers deliberately share the image key space.
        assert_eq!(image.cipher_key, sticker.cipher_key);
        assert_eq!(image.iv, sticker.iv);
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let keys = derive_media_keys(&random_key(), MediaKind::Video).unwrap();
        let plaintext = b"not actually a video".to_vec();

        let body = encrypt_body(&plaintext, &keys);
        assert!(body.len() > plaintext.len());
        assert_eq!(decrypt_body(&body, &keys).unwrap(), plaintext);
    }

    #[test]
    fn test_tampered_body_fails_verification() {
        let keys = derive_media_keys(&random_key(), MediaKind::Image).unwrap();
        let mut body = encrypt_body(b"payload", &keys);
        body[0] ^= 0xff;

        assert!(matches!(
            decrypt_body(&body, &keys),
            Err(Error::MediaVerification { .. })
        ));
    }

    #[test]
    fn test_truncated_body_rejected() {
        let keys = derive_media_keys(&random_key(), MediaKind::Image).unwrap();
        assert!(decrypt_body(&[1, 2, 3], &keys).is_err());
    }

    #[test]
    fn test_b64url_round_trip() {
        let digest = sha256(b"some media body");
        let encoded = b64url(&digest);
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert_eq!(b64url_decode(&encoded).unwrap(), digest.to_vec());
    }
}
