//! Stream session manager: owns one call from the telephony `start` event to
//! teardown.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{BoxStream, SplitStream};
use futures::{SinkExt, Stream, StreamExt, future};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as ModelMessage;
use tracing::{debug, error, info, warn};

use kai_core::protocol::{StreamStart, TelephonyInbound};

use crate::call::{CallSession, Outbound};
use crate::realtime::{self, ModelSocket};
use crate::relay::run_relay;
use crate::state::GatewayState;

/// Handle one telephony media-stream WebSocket.
pub async fn handle_media_stream(state: Arc<GatewayState>, socket: WebSocket) {
    let (mut ws_tx, ws_rx) = socket.split();
    let mut frames = telephony_text_frames(ws_rx);

    let start = match tokio::time::timeout(
        state.config.start_timeout(),
        wait_for_start(&mut frames),
    )
    .await
    {
        Ok(Some(start)) => start,
        Ok(None) => {
            debug!("Telephony stream closed before start");
            return;
        }
        Err(_) => {
            warn!("Timed out waiting for stream start");
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };

    let call_id = start.stream_sid.clone();
    let caller = start.caller();
    info!(call_id = %call_id, caller = ?caller, call_sid = ?start.call_sid, "Incoming stream started");

    let realtime_config = state.config.realtime();
    let model = match realtime::connect(&realtime_config).await {
        Ok(model) => model,
        Err(e) => {
            error!(call_id = %call_id, error = %e, "Could not reach realtime model");
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };
    let (mut model_tx, model_rx) = model.split();

    let ctx = state.calls.clone();
    let (telephony_out, mut telephony_queue) = mpsc::unbounded_channel();
    let (model_out, mut model_queue) = mpsc::unbounded_channel();
    let session = Arc::new(CallSession::new(
        call_id.clone(),
        caller,
        ctx.classifier.clone(),
        model_out,
        telephony_out,
    ));

    if let Err(e) = ctx.registry.insert(session.clone()).await {
        warn!(call_id = %call_id, error = %e, "Rejecting duplicate stream");
        let _ = ws_tx.send(Message::Close(None)).await;
        let _ = model_tx.close().await;
        return;
    }

    session.send_model(realtime::session_update(
        &realtime_config,
        &ctx.tools,
        ctx.audio_format,
    ));
    if state.config.call().greeting {
        session.greet();
    }

    let telephony_writer = tokio::spawn(async move {
        while let Some(item) = telephony_queue.recv().await {
            match item {
                Outbound::Send(frame) => {
                    let Ok(text) = serde_json::to_string(&frame) else {
                        continue;
                    };
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let model_writer = tokio::spawn(async move {
        while let Some(item) = model_queue.recv().await {
            match item {
                Outbound::Send(event) => {
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if model_tx.send(ModelMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = model_tx.close().await;
                    break;
                }
            }
        }
    });

    run_relay(session.clone(), ctx, frames, model_text_frames(model_rx)).await;

    // Flush what is queued, then let both writers close their sockets.
    session.close_model();
    session.close_telephony();
    let _ = tokio::join!(telephony_writer, model_writer);
    info!(call_id = %call_id, "Stream closed");
}

/// Skip frames until the telephony `start` event arrives.
pub async fn wait_for_start<S>(frames: &mut S) -> Option<StreamStart>
where
    S: Stream<Item = String> + Unpin,
{
    while let Some(text) = frames.next().await {
        match serde_json::from_str::<TelephonyInbound>(&text) {
            Ok(TelephonyInbound::Start { start }) => return Some(start),
            Ok(TelephonyInbound::Stop { .. }) => return None,
            Ok(_) => debug!("Ignoring frame received before stream start"),
            Err(e) => {
                warn!(error = %e, "Malformed frame before stream start");
                return None;
            }
        }
    }
    None
}

/// Text frames from the telephony socket, ending at close or on error.
fn telephony_text_frames(rx: SplitStream<WebSocket>) -> BoxStream<'static, String> {
    rx.inspect(|msg| {
        if let Err(e) = msg {
            warn!(error = %e, "Telephony socket error");
        }
    })
    .take_while(|msg| future::ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_)))))
    .filter_map(|msg| {
        future::ready(match msg {
            Ok(Message::Text(text)) => Some(text.as_str().to_owned()),
            _ => None,
        })
    })
    .boxed()
}

/// Text frames from the model socket, ending at close or on error.
fn model_text_frames(rx: SplitStream<ModelSocket>) -> BoxStream<'static, String> {
    rx.inspect(|msg| {
        if let Err(e) = msg {
            warn!(error = %e, "Realtime socket error");
        }
    })
    .take_while(|msg| future::ready(matches!(msg, Ok(m) if !m.is_close())))
    .filter_map(|msg| {
        future::ready(match msg {
            Ok(ModelMessage::Text(text)) => Some(text.as_str().to_owned()),
            _ => None,
        })
    })
    .boxed()
}
