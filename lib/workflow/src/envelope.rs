//! Versioned envelope for jobs on the wire.
//!
//! Every job published to a broker is wrapped in an [`Envelope`] so that
//! consumers running an older build can refuse payloads from a newer schema
//! instead of misreading them during a rolling deployment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

/// The current envelope version.
pub const CURRENT_VERSION: u32 = 1;

/// Errors from decoding an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The bytes are not an envelope, or the payload has the wrong shape.
    Malformed { message: String },
    /// The envelope was written by a newer schema.
    UnsupportedVersion { version: u32 },
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed { message } => write!(f, "malformed envelope: {message}"),
            Self::UnsupportedVersion { version } => write!(
                f,
                "envelope version {version} is newer than supported version {CURRENT_VERSION}"
            ),
        }
    }
}

impl std::error::Error for EnvelopeError {}

/// A versioned envelope around a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub version: u32,
    /// When the producer sealed the envelope.
    pub sent_at: DateTime<Utc>,
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Wraps a payload with the current version.
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self {
            version: CURRENT_VERSION,
            sent_at: Utc::now(),
            payload,
        }
    }

    /// Unwraps the envelope, returning the payload.
    #[must_use]
    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serializes the envelope to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Decodes an envelope, checking the version before the payload.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedVersion` for envelopes from a newer schema and
    /// `Malformed` for anything that does not decode.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let raw: RawEnvelope = serde_json::from_slice(bytes).map_err(malformed)?;
        if raw.version > CURRENT_VERSION {
            return Err(EnvelopeError::UnsupportedVersion {
                version: raw.version,
            });
        }
        let payload = serde_json::from_value(raw.payload).map_err(malformed)?;
        Ok(Self {
            version: raw.version,
            sent_at: raw.sent_at,
            payload,
        })
    }
}

/// An envelope whose payload has not been decoded yet.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    version: u32,
    sent_at: DateTime<Utc>,
    payload: serde_json::Value,
}

fn malformed(e: serde_json::Error) -> EnvelopeError {
    EnvelopeError::Malformed {
        message: e.to_string(),
    }
}
