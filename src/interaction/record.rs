//! Interaction record data model
//!
//! One [`InteractionRecord`] is persisted per inbound request. Everything in
//! it is owned data, so a record can be handed to the log writer without
//! borrowing from the request flow that built it.

use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Identifier of one interaction, echoed to the client in `x-tapline-interaction-id`
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(transparent)]
pub struct InteractionId(Uuid);

impl InteractionId {
    /// Create a new time-ordered (v7) identifier
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for InteractionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Header mapping as logged: lower-case name to value
pub type HeaderSnapshot = BTreeMap<String, String>;

/// Flatten a header map for logging. Repeated headers are joined with `, `.
pub fn snapshot_headers(headers: &HeaderMap) -> HeaderSnapshot {
    let mut snapshot = HeaderSnapshot::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        match snapshot.entry(name.as_str().to_owned()) {
            Entry::Occupied(mut existing) => {
                let joined = existing.get_mut();
                joined.push_str(", ");
                joined.push_str(&value);
            }
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
        }
    }
    snapshot
}

/// A body as it appears in the log.
///
/// Structured bodies are kept parsed; anything else is kept verbatim, as text
/// when it is valid UTF-8 and as base64 otherwise, so no byte is ever lost.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CapturedBody {
    Empty,
    Json(serde_json::Value),
    Text(String),
    Binary(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl CapturedBody {
    /// Capture a complete body, parsing it as JSON when it is well-formed.
    ///
    /// JSON whose numbers would not survive as `serde_json::Value` (integers
    /// wider than 64 bits, decimals beyond `f64` precision) is kept verbatim.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self::Empty;
        }
        match serde_json::from_slice(bytes) {
            Ok(value) if numbers_are_exact(bytes) => Self::Json(value),
            _ => Self::raw(bytes),
        }
    }

    /// Capture bytes verbatim without attempting structured parsing.
    pub fn raw(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self::Empty;
        }
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::Text(text.to_owned()),
            Err(_) => Self::Binary(bytes.to_vec()),
        }
    }

    pub fn json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Bytes of a verbatim capture. `None` for parsed JSON.
    pub fn raw_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Empty => Some(&[]),
            Self::Text(text) => Some(text.as_bytes()),
            Self::Binary(bytes) => Some(bytes),
            Self::Json(_) => None,
        }
    }
}

/// Whether every number literal in a well-formed JSON document parses exactly.
fn numbers_are_exact(json: &[u8]) -> bool {
    let mut in_string = false;
    let mut escaped = false;
    let mut pos = 0;

    while pos < json.len() {
        let byte = json[pos];
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            pos += 1;
        } else if byte == b'"' {
            in_string = true;
            pos += 1;
        } else if byte == b'-' || byte.is_ascii_digit() {
            let end = json[pos..]
                .iter()
                .position(|b| !matches!(b, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E'))
                .map_or(json.len(), |len| pos + len);
            if !std::str::from_utf8(&json[pos..end]).is_ok_and(number_is_exact) {
                return false;
            }
            pos = end;
        } else {
            pos += 1;
        }
    }
    true
}

/// Parse `literal` the way `serde_json::Value` does and check nothing was lost.
fn number_is_exact(literal: &str) -> bool {
    let Ok(number) = serde_json::from_str::<serde_json::Number>(literal) else {
        return false;
    };
    if !number.is_f64() {
        return true;
    }
    // Integer literals only land in f64 when they overflow 64 bits
    if !literal.contains(['.', 'e', 'E']) {
        return false;
    }
    number
        .as_f64()
        .is_some_and(|value| decimal_digits(literal) == decimal_digits(&format!("{value:e}")))
}

/// Significant digits and decimal exponent of a numeric literal, sign ignored.
fn decimal_digits(literal: &str) -> (String, i64) {
    let unsigned = literal.trim_start_matches('-');
    let (mantissa, exponent) = match unsigned.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => (
            mantissa,
            exponent.trim_start_matches('+').parse::<i64>().unwrap_or(0),
        ),
        None => (unsigned, 0),
    };
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = format!("{whole}{fraction}");
    let leading_trimmed = digits.trim_start_matches('0');
    let significant = leading_trimmed.trim_end_matches('0');
    if significant.is_empty() {
        return (String::new(), 0);
    }

    let trailing_zeros = (leading_trimmed.len() - significant.len()) as i64;
    (
        significant.to_string(),
        exponent - fraction.len() as i64 + trailing_zeros,
    )
}

/// What the proxy received from the client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub method: String,
    /// Full upstream URL the request was (or would have been) forwarded to
    pub url: String,
    pub headers: HeaderSnapshot,
    pub body: CapturedBody,
    pub client_addr: Option<String>,
}

/// How a relayed stream ended
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StreamStatus {
    Completed,
    Interrupted,
    Failed { message: String },
}

/// Streaming descriptor: what was relayed to the client, chunk by chunk
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamCapture {
    pub chunk_count: u64,
    pub total_bytes: u64,
    /// Reassembled content, possibly cut short when `truncated` is set
    pub content: CapturedBody,
    pub truncated: bool,
    pub status: StreamStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ResponseBody {
    Buffered { content: CapturedBody },
    Streamed(StreamCapture),
}

/// What the upstream answered
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: HeaderSnapshot,
    pub body: ResponseBody,
    /// From dispatch start until the body was fully relayed
    #[serde(rename = "elapsed_ms", with = "duration_ms")]
    pub elapsed: Duration,
}

/// A failure that prevented a response from being relayed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorSnapshot {
    pub code: String,
    pub message: String,
    #[serde(rename = "elapsed_ms", with = "duration_ms")]
    pub elapsed: Duration,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Response(ResponseSnapshot),
    Error(ErrorSnapshot),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    #[display("completed")]
    Completed,
    #[display("interrupted")]
    Interrupted,
    #[display("failed")]
    Failed,
}

/// One self-contained log entry for one proxied request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: InteractionId,
    pub timestamp: DateTime<Utc>,
    pub request: RequestSnapshot,
    #[serde(flatten)]
    pub resolution: Resolution,
    pub outcome: Outcome,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    pub streaming: bool,
}

impl InteractionRecord {
    pub fn response(&self) -> Option<&ResponseSnapshot> {
        match &self.resolution {
            Resolution::Response(response) => Some(response),
            Resolution::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorSnapshot> {
        match &self.resolution {
            Resolution::Error(error) => Some(error),
            Resolution::Response(_) => None,
        }
    }

    pub fn stream(&self) -> Option<&StreamCapture> {
        match self.response().map(|response| &response.body) {
            Some(ResponseBody::Streamed(capture)) => Some(capture),
            _ => None,
        }
    }
}

/// Durations as fractional milliseconds
mod duration_ms {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    const NANOS_PER_MILLI: f64 = 1_000_000.0;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_nanos() as f64 / NANOS_PER_MILLI)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = f64::deserialize(deserializer)?;
        if !millis.is_finite() || millis < 0.0 {
            return Err(D::Error::custom(format!("invalid duration: {millis}ms")));
        }
        Ok(Duration::from_nanos((millis * NANOS_PER_MILLI).round() as u64))
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}
