//! Audio payload encoding shared by both legs of a call.
//!
//! Both transports carry audio as base64 text. The relay never transcodes
//! samples; it validates and re-encodes payloads and derives durations from
//! the configured audio format.

use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),
}

/// Audio encoding negotiated with the realtime model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioFormat {
    /// 8 kHz mu-law, one byte per sample. What the telephony leg speaks.
    #[default]
    #[serde(rename = "g711_ulaw")]
    G711Ulaw,
    #[serde(rename = "g711_alaw")]
    G711Alaw,
    /// 24 kHz little-endian 16-bit PCM.
    #[serde(rename = "pcm16")]
    Pcm16,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::G711Ulaw => "g711_ulaw",
            Self::G711Alaw => "g711_alaw",
            Self::Pcm16 => "pcm16",
        }
    }

    pub fn bytes_per_ms(&self) -> u64 {
        match self {
            Self::G711Ulaw | Self::G711Alaw => 8,
            Self::Pcm16 => 48,
        }
    }

    /// Playback duration of `len` raw bytes, rounded down.
    pub fn duration_ms(&self, len: usize) -> u64 {
        len as u64 / self.bytes_per_ms()
    }
}

impl FromStr for AudioFormat {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "g711_ulaw" | "ulaw" | "mulaw" => Ok(Self::G711Ulaw),
            "g711_alaw" | "alaw" => Ok(Self::G711Alaw),
            "pcm16" => Ok(Self::Pcm16),
            other => Err(CodecError::UnsupportedFormat(other.to_string())),
        }
    }
}

pub fn decode(payload: &str) -> Result<Vec<u8>, CodecError> {
    Ok(STANDARD.decode(payload.trim())?)
}

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// A payload re-encoded for the other leg, with its playback duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reencoded {
    pub payload: String,
    pub duration_ms: u64,
}

/// Validate a model audio delta and re-encode it for the telephony leg.
pub fn reencode(payload: &str, format: AudioFormat) -> Result<Reencoded, CodecError> {
    let bytes = decode(payload)?;
    Ok(Reencoded {
        payload: encode(&bytes),
        duration_ms: format.duration_ms(bytes.len()),
    })
}
