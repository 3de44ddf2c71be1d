//! Duplex relay between the telephony stream and the realtime model.
//!
//! Both loops consume text frames as a `Stream<Item = String>`; the session
//! manager adapts the WebSocket halves into that shape. Outgoing traffic goes
//! through the session's writer channels.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use kai_core::error::{KaiError, Result};
use kai_core::protocol::{
    ClientEvent, MarkName, OutboundMedia, ServerEvent, TelephonyInbound, TelephonyOutbound,
};
use kai_media::codec::{self, Reencoded};

use crate::call::CallSession;
use crate::dispatch::{apply_flow_action, dispatch};
use crate::interruption::handle_barge_in;
use crate::state::CallContext;
use crate::termination::finalize;

/// Telephony -> model. Returns when the stream stops, closes, or sends a
/// frame that does not decode.
pub async fn run_inbound<S>(session: &CallSession, mut frames: S)
where
    S: Stream<Item = String> + Unpin,
{
    while let Some(text) = frames.next().await {
        let frame = match decode::<TelephonyInbound>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(call_id = %session.call_id, error = %e, "Malformed telephony frame");
                break;
            }
        };

        match frame {
            TelephonyInbound::Media { media } => {
                session.observe_inbound(media.timestamp);
                session.send_model(ClientEvent::InputAudioBufferAppend {
                    audio: media.payload,
                });
            }
            TelephonyInbound::Mark { mark } => {
                session.playback.lock().await.acknowledge_mark(&mark.name);
            }
            TelephonyInbound::Start { start } => {
                info!(
                    call_id = %session.call_id,
                    stream_sid = %start.stream_sid,
                    "Stream restarted, resetting playback state"
                );
                session.reset_stream().await;
            }
            TelephonyInbound::Stop { .. } => {
                info!(call_id = %session.call_id, "Telephony stream stopped");
                break;
            }
            TelephonyInbound::Connected { .. } | TelephonyInbound::Unknown => {}
        }
    }
}

/// Model -> telephony, feeding the state machine and tool dispatch on the way.
pub async fn run_outbound<S>(session: &Arc<CallSession>, ctx: &Arc<CallContext>, mut events: S)
where
    S: Stream<Item = String> + Unpin,
{
    while let Some(text) = events.next().await {
        let event = match decode::<ServerEvent>(&text) {
            Ok(event) => event,
            Err(e) => {
                warn!(call_id = %session.call_id, error = %e, "Malformed model event");
                break;
            }
        };

        match event {
            ServerEvent::AudioDelta { item_id, delta } => {
                forward_audio(session, ctx, item_id.as_deref(), &delta).await;
            }
            ServerEvent::AudioTranscriptDone { transcript, .. } => {
                debug!(call_id = %session.call_id, text = %transcript, "Assistant said");
                session.flow.lock().await.record_assistant_turn(&transcript);
            }
            ServerEvent::InputTranscriptionCompleted { transcript, .. } => {
                debug!(call_id = %session.call_id, text = %transcript, "Caller said");
                let action = {
                    let mut flow = session.flow.lock().await;
                    if !flow.record_caller_turn(&transcript) || session.response_pending() {
                        continue;
                    }
                    flow.enforce()
                };
                apply_flow_action(action, session, ctx).await;
            }
            ServerEvent::SpeechStarted { .. } => {
                handle_barge_in(session).await;
            }
            ServerEvent::FunctionCallArgumentsDone {
                name, arguments, ..
            } => {
                // Lookups may take a while; keep audio flowing meanwhile.
                let session = Arc::clone(session);
                let ctx = Arc::clone(ctx);
                tokio::spawn(async move {
                    if let Err(e) = dispatch(&name, &arguments, &session, &ctx).await {
                        warn!(call_id = %session.call_id, tool = %name, error = %e, "Tool call failed");
                    }
                });
            }
            ServerEvent::ResponseDone { .. } => {
                session.set_response_pending(false);
            }
            ServerEvent::Error { error } => {
                warn!(
                    call_id = %session.call_id,
                    kind = ?error.kind,
                    code = ?error.code,
                    message = %error.message,
                    "Realtime model reported an error"
                );
                #[cfg(feature = "metrics")]
                crate::metrics::record_error("model");
            }
            ServerEvent::Unknown => {}
        }
    }
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T> {
    Ok(serde_json::from_str(text)?)
}

fn reencode_delta(delta: &str, ctx: &CallContext) -> Result<Reencoded> {
    codec::reencode(delta, ctx.audio_format)
        .map_err(|e| KaiError::Protocol(format!("audio delta: {e}")))
}

async fn forward_audio(
    session: &CallSession,
    ctx: &CallContext,
    item_id: Option<&str>,
    delta: &str,
) {
    let chunk = match reencode_delta(delta, ctx) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(call_id = %session.call_id, error = %e, "Dropping undecodable audio delta");
            return;
        }
    };

    session.send_telephony(TelephonyOutbound::Media {
        stream_sid: session.call_id.clone(),
        media: OutboundMedia {
            payload: chunk.payload,
        },
    });

    let mark = session.playback.lock().await.record_chunk(
        item_id,
        session.latest_inbound_ms(),
        chunk.duration_ms,
    );
    session.send_telephony(TelephonyOutbound::Mark {
        stream_sid: session.call_id.clone(),
        mark: MarkName { name: mark },
    });
}

/// Run both loops until either ends or the call is cancelled, then finalize.
pub async fn run_relay<T, M>(
    session: Arc<CallSession>,
    ctx: Arc<CallContext>,
    telephony: T,
    model: M,
) where
    T: Stream<Item = String> + Unpin,
    M: Stream<Item = String> + Unpin,
{
    tokio::select! {
        _ = run_inbound(&session, telephony) => {
            debug!(call_id = %session.call_id, "Telephony loop finished");
        }
        _ = run_outbound(&session, &ctx, model) => {
            debug!(call_id = %session.call_id, "Model loop finished");
        }
        _ = session.cancel.cancelled() => {
            debug!(call_id = %session.call_id, "Relay cancelled");
        }
    }
    session.cancel.cancel();
    finalize(&session, &ctx).await;
}
