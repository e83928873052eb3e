//! Outbound media preparation.
//!
//! A raw buffer becomes a relay-ready message: the payload is encrypted
//! under a fresh media key, uploaded to an authenticated slot on the
//! media hosts, and wrapped in a message envelope carrying the digests
//! a receiver needs to fetch and verify it. Thumbnails are the caller's
//! concern and pass through untouched.

pub mod crypto;

use bytes::Bytes;
use chrono::Utc;
use rand::RngCore;
use serde::Deserialize;
use tracing::debug;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::jid::Jid;
use crate::message::{
    generate_message_id, ContextInfo, MediaContent, MediaKind, MessageContent, MessageKey,
    WebMessage,
};
use crate::transport::RelayOptions;

use crypto::{b64url, derive_media_keys, encrypt_body, sha256, MEDIA_KEY_LENGTH};

/// Origin header the upload hosts require.
const UPLOAD_ORIGIN: &str = "https://web.whatsapp.com";

#[derive(Debug, Clone, Default)]
pub struct MediaOptions {
    /// Required for documents; defaulted per kind otherwise.
    pub mimetype: Option<String>,
    /// Not allowed on stickers.
    pub caption: Option<String>,
    pub jpeg_thumbnail: Option<Vec<u8>>,
    pub timestamp: Option<i64>,
    pub quoted: Option<QuotedMessage>,
}

/// The message an outbound payload quotes.
#[derive(Debug, Clone)]
pub struct QuotedMessage {
    pub key: MessageKey,
    pub content: MessageContent,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: Option<String>,
    #[serde(default)]
    direct_path: Option<String>,
}

impl Client {
    /// Encrypts, uploads and wraps a media buffer. The returned message
    /// is ready for the relay primitive; [`Client::send_media_message`]
    /// does both steps.
    pub async fn prepare_media_message(
        &self,
        jid: &Jid,
        kind: MediaKind,
        buffer: &[u8],
        options: MediaOptions,
    ) -> Result<WebMessage> {
        let (kind, mimetype, gif_playback) = resolve_media_setup(kind, &options)?;

        let mut media_key = [0u8; MEDIA_KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut media_key);
        let keys = derive_media_keys(&media_key, kind)?;

        let body = encrypt_body(buffer, &keys);
        let file_sha256 = b64url(&sha256(buffer));
        let file_enc_sha256 = b64url(&sha256(&body));

        let url = self.upload_encrypted(kind, body, &file_enc_sha256).await?;

        let context = options
            .quoted
            .as_ref()
            .map(|quoted| build_context(quoted, &self.me()));

        let content = MessageContent::Media(MediaContent {
            kind,
            url,
            media_key: media_key.to_vec(),
            mimetype,
            file_enc_sha256,
            file_sha256,
            file_length: buffer.len() as u64,
            caption: options.caption,
            gif_playback,
            jpeg_thumbnail: options.jpeg_thumbnail,
            context,
        });

        Ok(WebMessage {
            key: MessageKey {
                remote_jid: jid.clone(),
                from_me: true,
                id: generate_message_id(),
                participant: None,
            },
            message_timestamp: options.timestamp.unwrap_or_else(|| Utc::now().timestamp()),
            push_name: None,
            status: crate::message::MessageStatus::Pending,
            content: Some(content),
            stub_type: None,
            stub_parameters: Vec::new(),
        })
    }

    /// [`Client::prepare_media_message`] followed by the encrypted relay.
    pub async fn send_media_message(
        &self,
        jid: &Jid,
        kind: MediaKind,
        buffer: &[u8],
        options: MediaOptions,
    ) -> Result<WebMessage> {
        let message = self.prepare_media_message(jid, kind, buffer, options).await?;
        let content = message
            .content
            .as_ref()
            .ok_or_else(|| Error::media_upload("prepared message without content"))?;
        self.transport
            .relay_message(
                jid,
                content,
                RelayOptions {
                    message_id: message.key.id.clone(),
                    participant: None,
                },
            )
            .await?;
        Ok(message)
    }

    /// Uploads the encrypted body to the first media host and returns
    /// the canonical URL the receiver will fetch from.
    async fn upload_encrypted(
        &self,
        kind: MediaKind,
        body: Vec<u8>,
        file_enc_sha256: &str,
    ) -> Result<String> {
        let conn = self.transport.media_conn().await?;
        let host = conn
            .hosts
            .first()
            .ok_or_else(|| Error::media_upload("media gateway returned no hosts"))?;

        let upload_url = format!(
            "https://{host}{path}/{token}?auth={auth}&token={token}",
            path = kind.upload_path(),
            token = file_enc_sha256,
            auth = conn.auth,
        );

        let response = self
            .http
            .post(&upload_url)
            .header("Origin", UPLOAD_ORIGIN)
            .body(Bytes::from(body))
            .send()
            .await?;
        let result: UploadResponse = response.json().await?;

        debug!(direct_path = ?result.direct_path, "media upload finished");
        result
            .url
            .ok_or_else(|| Error::media_upload("upload response carried no url"))
    }
}

/// Validates caller constraints and resolves the effective kind,
/// mimetype and gif marker.
fn resolve_media_setup(
    kind: MediaKind,
    options: &MediaOptions,
) -> Result<(MediaKind, String, bool)> {
    if kind == MediaKind::Document && options.mimetype.is_none() {
        return Err(Error::invalid_arg("documents require an explicit mimetype"));
    }
    if kind == MediaKind::Sticker && options.caption.is_some() {
        return Err(Error::invalid_arg("stickers cannot carry a caption"));
    }

    let mimetype = options
        .mimetype
        .clone()
        .unwrap_or_else(|| default_mimetype(kind).to_string());

    // Animated gifs travel as looping videos.
    if mimetype == "image/gif" {
        return Ok((MediaKind::Video, "video/mp4".to_string(), true));
    }
    Ok((kind, mimetype, false))
}

fn default_mimetype(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "image/jpeg",
        MediaKind::Video => "video/mp4",
        MediaKind::Audio => "audio/ogg; codecs=opus",
        MediaKind::Sticker => "image/webp",
        MediaKind::Document => "application/octet-stream",
    }
}

fn build_context(quoted: &QuotedMessage, me: &Jid) -> ContextInfo {
    let participant = if quoted.key.from_me {
        me.clone()
    } else {
        quoted
            .key
            .participant
            .clone()
            .unwrap_or_else(|| quoted.key.remote_jid.clone())
            .normalized()
    };
    ContextInfo {
        participant,
        stanza_id: quoted.key.id.clone(),
        quoted_message: Box::new(quoted.content.clone()),
        remote_jid: quoted
            .key
            .remote_jid
            .is_group()
            .then(|| quoted.key.remote_jid.clone()),
    }
}
