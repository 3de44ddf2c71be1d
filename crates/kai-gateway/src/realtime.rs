//! Connection to the realtime speech model.

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::info;

use kai_agent::prompt::build_system_instructions;
use kai_core::config::RealtimeConfig;
use kai_core::error::{KaiError, Result};
use kai_core::protocol::{ClientEvent, SessionSettings, TranscriptionSettings, TurnDetection};
use kai_media::AudioFormat;
use kai_tools::ToolRegistry;

pub type ModelSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open the model WebSocket with bearer auth.
pub async fn connect(config: &RealtimeConfig) -> Result<ModelSocket> {
    let api_key = config
        .resolve_api_key()
        .ok_or_else(|| KaiError::Config("realtime API key is not configured".into()))?;

    let url = config.connect_url();
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| KaiError::Config(format!("invalid realtime url {url}: {e}")))?;
    let headers = request.headers_mut();
    headers.insert(
        "Authorization",
        HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| KaiError::Config(format!("invalid API key header: {e}")))?,
    );
    headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    let (socket, _response) = connect_async(request)
        .await
        .map_err(|e| KaiError::Transport(format!("realtime connect failed: {e}")))?;
    info!(model = %config.model, "Connected to realtime model");
    Ok(socket)
}

/// The `session.update` sent right after connecting.
pub fn session_update(
    config: &RealtimeConfig,
    tools: &ToolRegistry,
    format: AudioFormat,
) -> ClientEvent {
    ClientEvent::SessionUpdate {
        session: SessionSettings {
            turn_detection: TurnDetection {
                kind: "server_vad".into(),
            },
            input_audio_format: format.as_str().into(),
            output_audio_format: format.as_str().into(),
            voice: config.voice.clone(),
            instructions: build_system_instructions(tools, config.instructions.as_deref()),
            modalities: vec!["text".into(), "audio".into()],
            temperature: config.temperature,
            input_audio_transcription: TranscriptionSettings {
                model: config.transcription_model.clone(),
            },
            tools: tools.to_realtime_tools(),
            tool_choice: "auto".into(),
        },
    }
}
