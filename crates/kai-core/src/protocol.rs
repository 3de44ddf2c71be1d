//! Wire protocols for both legs of a call.
//!
//! The telephony leg speaks the Twilio Media Streams JSON protocol
//! (`event`-tagged frames); the model leg speaks the realtime speech-model
//! protocol (`type`-tagged events). Unknown event kinds deserialize into an
//! `Unknown` variant so new server events never break a running call.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

// --- Telephony leg ---

/// Frame received from the telephony transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyInbound {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        start: StreamStart,
    },
    Media {
        media: InboundMedia,
    },
    Mark {
        mark: MarkName,
    },
    Stop {
        #[serde(default)]
        stop: Option<serde_json::Value>,
    },
    #[serde(other)]
    Unknown,
}

/// Payload of the `start` event.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamStart {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    #[serde(rename = "callSid", default)]
    pub call_sid: Option<String>,
    #[serde(rename = "customParameters", default)]
    pub custom_parameters: HashMap<String, String>,
}

impl StreamStart {
    /// Caller phone number passed through the stream's custom parameters.
    pub fn caller(&self) -> Option<String> {
        self.custom_parameters
            .get("caller")
            .filter(|c| !c.is_empty())
            .cloned()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundMedia {
    /// Milliseconds since the stream started. Twilio sends this as a string.
    #[serde(deserialize_with = "de_millis")]
    pub timestamp: u64,
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkName {
    pub name: String,
}

/// Frame sent to the telephony transport.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyOutbound {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkName,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
    Stop {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

fn de_millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Millis {
        Num(u64),
        Text(String),
    }

    match Millis::deserialize(deserializer)? {
        Millis::Num(n) => Ok(n),
        Millis::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

// --- Model leg ---

/// Command sent to the realtime model.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSettings },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        item_id: String,
        content_index: u32,
        audio_end_ms: u64,
    },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: serde_json::Value },

    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseOptions>,
    },
}

impl ClientEvent {
    /// A `response.create` carrying explicit instructions.
    pub fn instruct(instructions: impl Into<String>) -> Self {
        Self::ResponseCreate {
            response: Some(ResponseOptions {
                instructions: Some(instructions.into()),
            }),
        }
    }

    /// A user text item, used to prompt the model without caller audio.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::ConversationItemCreate {
            item: serde_json::json!({
                "type": "message",
                "role": "user",
                "content": [{ "type": "input_text", "text": text.into() }],
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResponseOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Body of `session.update`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSettings {
    pub turn_detection: TurnDetection,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub voice: String,
    pub instructions: String,
    pub modalities: Vec<String>,
    pub temperature: f64,
    pub input_audio_transcription: TranscriptionSettings,
    pub tools: Vec<serde_json::Value>,
    pub tool_choice: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionSettings {
    pub model: String,
}

/// Event received from the realtime model.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: Option<u64>,
    },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        name: String,
        #[serde(default)]
        arguments: String,
    },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: Option<serde_json::Value>,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ErrorDetail,
    },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}
