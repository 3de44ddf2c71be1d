//! Barge-in handling: cut the assistant off when the caller starts talking.

use tracing::{debug, info};

use kai_core::protocol::{ClientEvent, TelephonyOutbound};
use kai_media::Truncation;

use crate::call::CallSession;

/// Truncate the audible assistant utterance and flush queued playback.
///
/// No-op unless assistant audio is still playing (marks pending, an active
/// utterance and a playback start are all recorded).
pub async fn handle_barge_in(session: &CallSession) -> Option<Truncation> {
    let latest = session.latest_inbound_ms();
    let Some(cut) = session.playback.lock().await.interrupt(latest) else {
        debug!(call_id = %session.call_id, "Speech started with no audible playback");
        return None;
    };

    info!(
        call_id = %session.call_id,
        item_id = %cut.item_id,
        audio_end_ms = cut.audio_end_ms,
        "Caller barged in, truncating assistant audio"
    );

    session.send_model(ClientEvent::ConversationItemTruncate {
        item_id: cut.item_id.clone(),
        content_index: 0,
        audio_end_ms: cut.audio_end_ms,
    });
    session.send_telephony(TelephonyOutbound::Clear {
        stream_sid: session.call_id.clone(),
    });

    #[cfg(feature = "metrics")]
    crate::metrics::record_barge_in();

    Some(cut)
}
