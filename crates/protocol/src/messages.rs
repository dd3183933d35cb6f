use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constants::INTELLIGENT_INGESTION;
use crate::types::StorageOptions;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Opens an upload session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    pub apikey: String,
    pub filename: String,
    pub mimetype: String,
    pub size: u64,
    #[serde(flatten)]
    pub store: StorageOptions,
    /// Requests Intelligent Ingestion; the server may still refuse it.
    #[serde(default, skip_serializing_if = "is_false")]
    pub multipart: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Asks for a signed target for one chunk.
///
/// `offset` is relative to the start of the part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub apikey: String,
    pub uri: String,
    pub region: String,
    pub upload_id: String,
    pub part: u32,
    pub size: u64,
    pub md5: String,
    pub offset: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub multipart: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Closes one part of an Intelligent Ingestion session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub apikey: String,
    pub uri: String,
    pub region: String,
    pub upload_id: String,
    pub part: u32,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Finalizes a session.
///
/// Standard sessions list their part tokens in `parts`; Intelligent Ingestion
/// sessions set `multipart` instead and rely on the committed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub apikey: String,
    pub uri: String,
    pub region: String,
    pub upload_id: String,
    pub filename: String,
    pub mimetype: String,
    pub size: u64,
    #[serde(flatten)]
    pub store: StorageOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub multipart: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Discards a Standard session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbortRequest {
    pub apikey: String,
    pub uri: String,
    pub region: String,
    pub upload_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Session parameters returned by the start call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartResponse {
    pub uri: String,
    pub region: String,
    pub upload_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location_url: String,
    /// Set to [`INTELLIGENT_INGESTION`] when the server granted it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_type: Option<String>,
    /// Server-suggested initial chunk size for Intelligent Ingestion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
}

impl StartResponse {
    /// Returns `true` if the session runs under Intelligent Ingestion.
    pub fn is_intelligent_ingestion(&self) -> bool {
        self.upload_type.as_deref() == Some(INTELLIGENT_INGESTION)
    }
}

/// Signed target for one chunk PUT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_url: Option<String>,
}

/// Server instruction to retry a failed chunk over a different range.
///
/// Sent by Intelligent Ingestion sessions as `{"retry": {...}}` in the body
/// of a failed chunk response. `offset` is relative to the part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryDirective {
    pub offset: u64,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

#[derive(Deserialize)]
struct RetryEnvelope {
    retry: RetryDirective,
}

impl RetryDirective {
    /// Extracts a directive from a response body, if it carries one.
    pub fn from_body(body: &[u8]) -> Option<Self> {
        serde_json::from_slice::<RetryEnvelope>(body)
            .ok()
            .map(|env| env.retry)
    }

    /// Same as [`from_body`](Self::from_body) for an already decoded body.
    pub fn from_value(body: &serde_json::Value) -> Option<Self> {
        serde_json::from_value::<RetryDirective>(body.get("retry")?.clone()).ok()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Formats the `parts` field of a Standard complete request.
///
/// Tokens are emitted sorted by part sequence regardless of input order.
pub fn parts_param<S: AsRef<str>>(tokens: &[(u32, S)]) -> String {
    let mut sorted: Vec<(u32, &str)> = tokens.iter().map(|(seq, t)| (*seq, t.as_ref())).collect();
    sorted.sort_by_key(|(seq, _)| *seq);
    sorted
        .iter()
        .map(|(seq, token)| format!("{seq}:{token}"))
        .collect::<Vec<_>>()
        .join(";")
}

fn is_false(v: &bool) -> bool {
    !v
}
