//! Per-call session state shared by the relay loops, the dispatcher and the
//! termination task.
//!
//! Field ownership:
//! - `latest_inbound_ms` is written only by the inbound (telephony) loop.
//! - `playback` is written by the outbound (model) loop; the inbound loop
//!   only pops acknowledged marks.
//! - `flow` (state machine + transcript) is written by the outbound loop and
//!   by tool dispatch triggered from it.
//!
//! Each mutable field sits behind its own lock or atomic so the session can be
//! shared through an `Arc`; no lock is held across an await on I/O.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use kai_agent::{ConversationFlow, IntentClassifier};
use kai_core::protocol::{ClientEvent, TelephonyOutbound};
use kai_core::session::ConversationState;
use kai_media::PlaybackTracker;

/// Item queued for one of the two connection writers.
#[derive(Debug)]
pub enum Outbound<T> {
    Send(T),
    Close,
}

pub type ModelSender = mpsc::UnboundedSender<Outbound<ClientEvent>>;
pub type TelephonySender = mpsc::UnboundedSender<Outbound<TelephonyOutbound>>;

pub struct CallSession {
    /// Stream identifier assigned by the telephony transport.
    pub call_id: String,
    pub caller: Option<String>,
    latest_inbound_ms: AtomicU64,
    pub(crate) playback: Mutex<PlaybackTracker>,
    pub(crate) flow: Mutex<ConversationFlow>,
    response_pending: AtomicBool,
    finalized: AtomicBool,
    model_tx: ModelSender,
    telephony_tx: TelephonySender,
    pub cancel: CancellationToken,
}

impl CallSession {
    pub fn new(
        call_id: impl Into<String>,
        caller: Option<String>,
        classifier: Arc<dyn IntentClassifier>,
        model_tx: ModelSender,
        telephony_tx: TelephonySender,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            caller,
            latest_inbound_ms: AtomicU64::new(0),
            playback: Mutex::new(PlaybackTracker::new()),
            flow: Mutex::new(ConversationFlow::new(classifier)),
            response_pending: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            model_tx,
            telephony_tx,
            cancel: CancellationToken::new(),
        }
    }

    pub fn latest_inbound_ms(&self) -> u64 {
        self.latest_inbound_ms.load(Ordering::Acquire)
    }

    /// Advance the inbound clock. Never moves backwards.
    pub fn observe_inbound(&self, timestamp_ms: u64) {
        self.latest_inbound_ms.fetch_max(timestamp_ms, Ordering::AcqRel);
    }

    /// Reset timing and playback for a restarted stream.
    pub async fn reset_stream(&self) {
        self.latest_inbound_ms.store(0, Ordering::Release);
        self.playback.lock().await.reset();
    }

    pub async fn flow_state(&self) -> ConversationState {
        self.flow.lock().await.state()
    }

    pub fn response_pending(&self) -> bool {
        self.response_pending.load(Ordering::Acquire)
    }

    pub fn set_response_pending(&self, pending: bool) {
        self.response_pending.store(pending, Ordering::Release);
    }

    /// Claim the right to finalize. Only the first caller gets `true`.
    pub fn claim_finalization(&self) -> bool {
        !self.finalized.swap(true, Ordering::AcqRel)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    pub fn send_model(&self, event: ClientEvent) -> bool {
        if self.model_tx.send(Outbound::Send(event)).is_err() {
            trace!(call_id = %self.call_id, "Model writer gone, dropping event");
            return false;
        }
        true
    }

    pub fn send_telephony(&self, frame: TelephonyOutbound) -> bool {
        if self.telephony_tx.send(Outbound::Send(frame)).is_err() {
            trace!(call_id = %self.call_id, "Telephony writer gone, dropping frame");
            return false;
        }
        true
    }

    pub fn close_model(&self) {
        let _ = self.model_tx.send(Outbound::Close);
    }

    pub fn close_telephony(&self) {
        let _ = self.telephony_tx.send(Outbound::Close);
    }

    /// Ask the model for a directed reply.
    ///
    /// Suppressed once termination has begun. Returns whether it was sent.
    pub async fn instruct(&self, instructions: impl Into<String>) -> bool {
        if !self.flow.lock().await.allows_instructions() {
            debug!(call_id = %self.call_id, "Call is ending, instruction suppressed");
            return false;
        }
        self.set_response_pending(true);
        self.send_model(ClientEvent::instruct(instructions))
    }

    /// Send a closing line during termination. Bypasses ending-state suppression.
    pub(crate) fn instruct_closing(&self, instructions: &str) -> bool {
        self.set_response_pending(true);
        self.send_model(ClientEvent::instruct(instructions))
    }

    /// Have the assistant speak first.
    pub fn greet(&self) {
        self.set_response_pending(true);
        self.send_model(ClientEvent::user_text(kai_agent::prompt::GREETING));
        self.send_model(ClientEvent::ResponseCreate { response: None });
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use kai_agent::KeywordClassifier;
    use kai_core::session::{ConversationState, Speaker, Transcript};
    use kai_tools::{KnowledgeBase, Ticketing};

    use crate::state::CallContext;

    pub struct FixedKnowledge(pub String);

    #[async_trait::async_trait]
    impl KnowledgeBase for FixedKnowledge {
        async fn answer(&self, _query: &str) -> anyhow::Result<String> {
            Ok(self.0.clone())
        }
    }

    pub struct FailingKnowledge;

    #[async_trait::async_trait]
    impl KnowledgeBase for FailingKnowledge {
        async fn answer(&self, _query: &str) -> anyhow::Result<String> {
            anyhow::bail!("vector index unavailable")
        }
    }

    pub struct FailingTicketing;

    #[async_trait::async_trait]
    impl Ticketing for FailingTicketing {
        async fn create_ticket(
            &self,
            _transcript: &Transcript,
            _caller: Option<&str>,
        ) -> anyhow::Result<String> {
            anyhow::bail!("helpdesk unreachable")
        }
    }

    pub struct CreatedTicket {
        pub caller: Option<String>,
        pub state: ConversationState,
        pub turns: Vec<(Speaker, String)>,
    }

    #[derive(Default)]
    pub struct RecordingTicketing {
        pub created: Mutex<Vec<CreatedTicket>>,
    }

    #[async_trait::async_trait]
    impl Ticketing for RecordingTicketing {
        async fn create_ticket(
            &self,
            transcript: &Transcript,
            caller: Option<&str>,
        ) -> anyhow::Result<String> {
            let mut created = self.created.lock().await;
            created.push(CreatedTicket {
                caller: caller.map(str::to_string),
                state: transcript.meta.state,
                turns: transcript
                    .turns()
                    .iter()
                    .map(|t| (t.speaker, t.text.clone()))
                    .collect(),
            });
            Ok(format!("T-{}", created.len()))
        }
    }

    pub fn context(
        knowledge: Arc<dyn KnowledgeBase>,
        ticketing: Arc<dyn Ticketing>,
    ) -> CallContext {
        CallContext::new(knowledge, ticketing)
    }

    pub struct Wires {
        pub model_rx: mpsc::UnboundedReceiver<Outbound<ClientEvent>>,
        pub telephony_rx: mpsc::UnboundedReceiver<Outbound<TelephonyOutbound>>,
    }

    pub fn session(call_id: &str) -> (Arc<CallSession>, Wires) {
        let (model_tx, model_rx) = mpsc::unbounded_channel();
        let (telephony_tx, telephony_rx) = mpsc::unbounded_channel();
        let session = CallSession::new(
            call_id,
            Some("+15550001111".into()),
            Arc::new(KeywordClassifier::default()),
            model_tx,
            telephony_tx,
        );
        (
            Arc::new(session),
            Wires {
                model_rx,
                telephony_rx,
            },
        )
    }
}
