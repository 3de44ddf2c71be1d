//! Ending a call: one idempotent path for tool calls, flow enforcement and
//! transport disconnects.

use std::sync::Arc;

use tracing::{debug, info, warn};

use kai_core::error::{KaiError, Result};
use kai_core::protocol::TelephonyOutbound;
use kai_core::session::{EndReason, Transcript};

use crate::call::CallSession;
use crate::state::CallContext;

/// Start terminating the call for `reason`.
///
/// The first request moves the flow into its ending state, has the model speak
/// the closing line, and spawns the shutdown sequence: wait for the line to
/// play, finalize, stop the telephony stream, close the model connection.
/// Later requests are ignored. Returns whether this request started it.
pub async fn request_termination(
    session: &Arc<CallSession>,
    ctx: &Arc<CallContext>,
    reason: EndReason,
) -> bool {
    let closing_line = session.flow.lock().await.begin_termination(reason);
    let Some(line) = closing_line else {
        debug!(
            call_id = %session.call_id,
            reason = reason.as_str(),
            "Termination already in progress, ignoring"
        );
        return false;
    };

    info!(call_id = %session.call_id, reason = reason.as_str(), "Ending call");
    session.instruct_closing(line);

    let session = Arc::clone(session);
    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(ctx.farewell_delay) => {}
            _ = session.cancel.cancelled() => {
                debug!(call_id = %session.call_id, "Call dropped during farewell");
            }
        }
        finalize(&session, &ctx).await;
        session.send_telephony(TelephonyOutbound::Stop {
            stream_sid: session.call_id.clone(),
        });
        session.close_telephony();
        session.close_model();
        session.cancel.cancel();
    });

    true
}

/// Hand the transcript to ticketing and drop the call from the registry.
///
/// Runs at most once per session no matter how many paths reach it. An empty
/// transcript produces no ticket.
pub async fn finalize(session: &CallSession, ctx: &CallContext) {
    if !session.claim_finalization() {
        return;
    }

    let transcript = {
        let mut flow = session.flow.lock().await;
        let snapshot = flow.transcript().clone();
        flow.mark_ended();
        snapshot
    };
    ctx.registry.remove(&session.call_id).await;

    if transcript.is_empty() {
        info!(call_id = %session.call_id, "Call ended with no transcript, no ticket created");
        return;
    }

    match file_ticket(session, ctx, &transcript).await {
        Ok(ticket_id) => info!(
            call_id = %session.call_id,
            ticket_id = %ticket_id,
            turns = transcript.len(),
            state = %transcript.meta.state,
            "Call finalized"
        ),
        Err(e) => {
            warn!(call_id = %session.call_id, error = %e, "Ticket creation failed");
            #[cfg(feature = "metrics")]
            crate::metrics::record_error("ticketing");
        }
    }
}

async fn file_ticket(
    session: &CallSession,
    ctx: &CallContext,
    transcript: &Transcript,
) -> Result<String> {
    ctx.ticketing
        .create_ticket(transcript, session.caller.as_deref())
        .await
        .map_err(|e| KaiError::Ticketing(format!("{e:#}")))
}
