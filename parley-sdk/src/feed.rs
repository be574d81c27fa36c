//! Feed entries and their wire representation.
//!
//! History records and live frames share one JSON shape:
//! `{"type": "chat"|"system"|"file", "user", "text", "ts", "url", "filename", "content_type"}`
//! with an optional server-assigned `id` (or `msgid`).

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[default]
    Chat,
    System,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    pub content_type: Option<String>,
}

/// Dedup identity of a feed entry.
///
/// Derived from the server id when the server sends one, otherwise from the
/// kind, timestamp, author, text and attachment URL. The same logical message
/// gets the same key whether it arrives through history or the live stream.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequenceKey([u8; 32]);

impl SequenceKey {
    fn explicit(id: &str) -> Self {
        let mut h = Sha256::new();
        h.update(b"id\x1f");
        h.update(id.as_bytes());
        Self(h.finalize().into())
    }

    fn derived(
        kind: EntryKind,
        timestamp: &DateTime<Utc>,
        author: &str,
        text: Option<&str>,
        url: Option<&str>,
    ) -> Self {
        let mut h = Sha256::new();
        h.update(format!("{kind:?}").as_bytes());
        h.update(b"\x1f");
        h.update(timestamp.timestamp_micros().to_be_bytes());
        h.update(b"\x1f");
        h.update(author.as_bytes());
        h.update(b"\x1f");
        h.update(text.unwrap_or_default().as_bytes());
        h.update(b"\x1f");
        h.update(url.unwrap_or_default().as_bytes());
        Self(h.finalize().into())
    }
}

impl fmt::Debug for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SequenceKey(")?;
        for b in &self.0[..6] {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

/// One unit of the chat feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub kind: EntryKind,
    /// Empty for system entries.
    pub author: String,
    /// Absent only for file entries.
    pub text: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub attachment: Option<Attachment>,
    key: SequenceKey,
}

impl FeedEntry {
    pub fn key(&self) -> SequenceKey {
        self.key
    }

    /// Whether `username` wrote this entry. System entries have no author.
    pub fn is_authored_by(&self, username: &str) -> bool {
        self.kind != EntryKind::System && !username.is_empty() && self.author == username
    }

    /// Parse a JSON frame. `received_at` stamps frames that carry no `ts`.
    pub fn parse(payload: &str, received_at: DateTime<Utc>) -> Result<Self> {
        let wire: WireEntry = serde_json::from_str(payload)
            .map_err(|e| Error::MalformedInboundPayload(e.to_string()))?;
        Self::from_wire(wire, received_at)
    }

    pub fn from_wire(wire: WireEntry, received_at: DateTime<Utc>) -> Result<Self> {
        let timestamp = match wire.ts.as_deref() {
            Some(ts) => parse_timestamp(ts)?,
            None => received_at,
        };

        let author = match wire.kind {
            EntryKind::System => String::new(),
            _ => match wire.user {
                Some(u) if !u.is_empty() => u,
                _ => {
                    return Err(Error::MalformedInboundPayload(format!(
                        "{:?} entry without user",
                        wire.kind
                    )));
                }
            },
        };

        let attachment = match wire.kind {
            EntryKind::File => {
                let url = wire.url.filter(|u| !u.is_empty()).ok_or_else(|| {
                    Error::MalformedInboundPayload("file entry without url".to_string())
                })?;
                let filename = wire
                    .filename
                    .filter(|f| !f.is_empty())
                    .unwrap_or_else(|| url.rsplit('/').next().unwrap_or("attachment").to_string());
                Some(Attachment {
                    url,
                    filename,
                    content_type: wire.content_type,
                })
            }
            _ => None,
        };

        if wire.kind != EntryKind::File && wire.text.is_none() {
            return Err(Error::MalformedInboundPayload(format!(
                "{:?} entry without text",
                wire.kind
            )));
        }

        let key = match wire.id.as_deref() {
            Some(id) if !id.is_empty() => SequenceKey::explicit(id),
            _ => SequenceKey::derived(
                wire.kind,
                &timestamp,
                &author,
                wire.text.as_deref(),
                attachment.as_ref().map(|a| a.url.as_str()),
            ),
        };

        Ok(Self {
            kind: wire.kind,
            author,
            text: wire.text,
            timestamp,
            attachment,
            key,
        })
    }
}

/// JSON shape shared by `/history` records and live frames.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireEntry {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, alias = "msgid", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Frames the client sends. Only chat text ever goes out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame {
    Chat { text: String },
}

impl OutboundFrame {
    pub fn to_json(&self) -> String {
        // A struct of plain strings always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Accepts RFC 3339 and the naive ISO-8601 form (`2024-05-01T12:00:00.123456`),
/// which is taken as UTC.
pub fn parse_timestamp(ts: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|n| n.and_utc())
        .map_err(|e| Error::MalformedInboundPayload(format!("bad timestamp {ts:?}: {e}")))
}
