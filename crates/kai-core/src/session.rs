//! Call transcript model and conversation states.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Caller,
    Assistant,
}

impl Speaker {
    /// Label used when rendering a transcript for a ticket.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Caller => "Customer",
            Self::Assistant => "Support",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Dialogue phase of a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    #[default]
    Initial,
    AwaitingAnswerFeedback,
    AwaitingMoreQuestions,
    EndingQuestionAnswered,
    EndingInsufficientInfo,
    Ended,
}

impl ConversationState {
    /// True once termination has begun. No further flow instructions may be sent.
    pub fn is_ending(&self) -> bool {
        matches!(
            self,
            Self::EndingQuestionAnswered | Self::EndingInsufficientInfo | Self::Ended
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::AwaitingAnswerFeedback => "awaiting_answer_feedback",
            Self::AwaitingMoreQuestions => "awaiting_more_questions",
            Self::EndingQuestionAnswered => "ending_question_answered",
            Self::EndingInsufficientInfo => "ending_insufficient_info",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a call is being ended. Mirrors the `end_call` tool's `reason` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    QuestionAnswered,
    InsufficientInformation,
}

impl EndReason {
    pub fn ending_state(&self) -> ConversationState {
        match self {
            Self::QuestionAnswered => ConversationState::EndingQuestionAnswered,
            Self::InsufficientInformation => ConversationState::EndingInsufficientInfo,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuestionAnswered => "question_answered",
            Self::InsufficientInformation => "insufficient_information",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMeta {
    pub state: ConversationState,
    pub state_updated_at: DateTime<Utc>,
}

impl Default for TranscriptMeta {
    fn default() -> Self {
        Self {
            state: ConversationState::Initial,
            state_updated_at: Utc::now(),
        }
    }
}

/// Append-only list of turns plus metadata that never disturbs turn order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<Turn>,
    pub meta: TranscriptMeta,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn. Blank text is dropped.
    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) -> Option<&Turn> {
        let text = text.into();
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        self.turns.push(Turn {
            speaker,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
        self.turns.last()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last_turn(&self, speaker: Speaker) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.speaker == speaker)
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn set_state(&mut self, state: ConversationState) {
        self.meta.state = state;
        self.meta.state_updated_at = Utc::now();
    }

    /// `Customer: ...` / `Support: ...` lines in turn order.
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(|t| format!("{}: {}", t.speaker.label(), t.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
