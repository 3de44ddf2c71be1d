//! Assistant playback tracking for barge-in.
//!
//! Every audio chunk forwarded to the telephony leg is followed by a named
//! mark. The telephony side echoes marks back once the audio before them has
//! played, so a non-empty mark queue means assistant audio is still audible.

use std::collections::VecDeque;

use tracing::trace;

/// Where to cut the interrupted utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncation {
    pub item_id: String,
    pub audio_end_ms: u64,
}

#[derive(Debug, Default)]
pub struct PlaybackTracker {
    active_item: Option<String>,
    /// Inbound media timestamp when the active utterance started playing.
    started_at_ms: Option<u64>,
    /// Audio duration sent so far for the active utterance.
    sent_ms: u64,
    marks: VecDeque<String>,
    seq: u64,
}

impl PlaybackTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outbound audio chunk and return the mark name to send after it.
    ///
    /// A chunk for a different utterance restarts the playback clock.
    pub fn record_chunk(
        &mut self,
        item_id: Option<&str>,
        latest_inbound_ms: u64,
        audio_ms: u64,
    ) -> String {
        if let Some(id) = item_id {
            if self.active_item.as_deref() != Some(id) {
                self.active_item = Some(id.to_string());
                self.started_at_ms = None;
                self.sent_ms = 0;
            }
        }
        if self.started_at_ms.is_none() {
            self.started_at_ms = Some(latest_inbound_ms);
        }
        self.sent_ms += audio_ms;

        self.seq += 1;
        let name = format!("chunk-{}", self.seq);
        self.marks.push_back(name.clone());
        name
    }

    /// Acknowledge a played mark, dropping it and every mark queued before it.
    ///
    /// Names not in the queue are ignored; these are echoes for audio that
    /// was cleared by an earlier interruption.
    pub fn acknowledge_mark(&mut self, name: &str) -> bool {
        let Some(pos) = self.marks.iter().position(|m| m == name) else {
            trace!(mark = %name, "Ignoring acknowledgment for unknown mark");
            return false;
        };
        if pos > 0 {
            trace!(mark = %name, skipped = pos, "Mark acknowledged out of order");
        }
        self.marks.drain(..=pos);
        true
    }

    /// True while sent assistant audio is still queued or playing.
    pub fn is_audible(&self) -> bool {
        !self.marks.is_empty() && self.started_at_ms.is_some() && self.active_item.is_some()
    }

    pub fn pending_marks(&self) -> usize {
        self.marks.len()
    }

    pub fn active_item(&self) -> Option<&str> {
        self.active_item.as_deref()
    }

    pub fn sent_ms(&self) -> u64 {
        self.sent_ms
    }

    /// Cut the active utterance at the caller's current position.
    ///
    /// Returns `None` (and changes nothing) unless audio is audible. The cutoff
    /// is clamped to `[0, sent_ms]`.
    pub fn interrupt(&mut self, latest_inbound_ms: u64) -> Option<Truncation> {
        if !self.is_audible() {
            return None;
        }
        let (Some(item_id), Some(start)) = (self.active_item.take(), self.started_at_ms) else {
            return None;
        };
        let audio_end_ms = latest_inbound_ms.saturating_sub(start).min(self.sent_ms);
        self.reset();
        Some(Truncation {
            item_id,
            audio_end_ms,
        })
    }

    pub fn reset(&mut self) {
        self.active_item = None;
        self.started_at_ms = None;
        self.sent_ms = 0;
        self.marks.clear();
    }
}
