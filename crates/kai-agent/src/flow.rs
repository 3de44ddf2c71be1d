//! Conversation state machine for a support call.
//!
//! ```text
//! initial -> awaiting_answer_feedback -> awaiting_more_questions
//!    ^                 |                        |      |
//!    +-----------------|------------------------+      |
//!                      v                               v
//!          ending_insufficient_info      ending_question_answered
//!                      \                              /
//!                       +----------> ended <---------+
//! ```
//!
//! The flow owns the call transcript; the current state lives in the
//! transcript metadata so a finalized transcript always records where the
//! call stopped.

use std::sync::Arc;

use tracing::{debug, info};

use kai_core::session::{ConversationState, EndReason, Speaker, Transcript};

use crate::classifier::{Intent, IntentClassifier, Prompt};
use crate::prompt;

/// What the caller of [`ConversationFlow::enforce`] must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowAction {
    None,
    /// Send a directed instruction to the model.
    Instruct(String),
    /// End the call.
    Terminate(EndReason),
}

pub struct ConversationFlow {
    transcript: Transcript,
    classifier: Arc<dyn IntentClassifier>,
    clarification_asked: bool,
}

impl ConversationFlow {
    pub fn new(classifier: Arc<dyn IntentClassifier>) -> Self {
        Self {
            transcript: Transcript::new(),
            classifier,
            clarification_asked: false,
        }
    }

    pub fn state(&self) -> ConversationState {
        self.transcript.meta.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// False once termination has begun.
    pub fn allows_instructions(&self) -> bool {
        !self.state().is_ending()
    }

    fn transition(&mut self, to: ConversationState) {
        let from = self.state();
        if from != to {
            debug!(from = %from, to = %to, "Conversation state change");
        }
        self.transcript.set_state(to);
    }

    pub fn record_caller_turn(&mut self, text: &str) -> bool {
        self.transcript.push(Speaker::Caller, text).is_some()
    }

    /// Append an assistant turn and infer the phase from what was asked.
    pub fn record_assistant_turn(&mut self, text: &str) {
        if self.transcript.push(Speaker::Assistant, text).is_none() {
            return;
        }
        let lower = text.to_lowercase();
        match self.state() {
            ConversationState::Initial if lower.contains("answer your question") => {
                self.transition(ConversationState::AwaitingAnswerFeedback);
            }
            ConversationState::Initial | ConversationState::AwaitingAnswerFeedback
                if lower.contains("other question") =>
            {
                self.transition(ConversationState::AwaitingMoreQuestions);
            }
            _ => {}
        }
    }

    /// A knowledge lookup completed (successfully or not). The caller is now
    /// expected to say whether it helped.
    pub fn on_knowledge_answer(&mut self) {
        if !self.allows_instructions() {
            return;
        }
        self.clarification_asked = false;
        self.transition(ConversationState::AwaitingAnswerFeedback);
    }

    /// Decide the next step from the latest caller turn.
    pub fn enforce(&mut self) -> FlowAction {
        let Some(utterance) = self
            .transcript
            .last_turn(Speaker::Caller)
            .map(|t| t.text.clone())
        else {
            return FlowAction::None;
        };

        match self.state() {
            ConversationState::AwaitingAnswerFeedback => {
                match self.classifier.classify(Prompt::AnswerFeedback, &utterance) {
                    Intent::Affirmative => {
                        self.clarification_asked = false;
                        self.transition(ConversationState::AwaitingMoreQuestions);
                        FlowAction::Instruct(prompt::ASK_MORE_QUESTIONS.to_string())
                    }
                    Intent::Negative => FlowAction::Terminate(EndReason::InsufficientInformation),
                    Intent::Unclear if !self.clarification_asked => {
                        self.clarification_asked = true;
                        FlowAction::Instruct(prompt::CLARIFY_ANSWER_FEEDBACK.to_string())
                    }
                    Intent::Unclear => FlowAction::None,
                }
            }
            ConversationState::AwaitingMoreQuestions => {
                match self.classifier.classify(Prompt::MoreQuestions, &utterance) {
                    Intent::Negative => FlowAction::Terminate(EndReason::QuestionAnswered),
                    _ => {
                        self.transition(ConversationState::Initial);
                        FlowAction::None
                    }
                }
            }
            _ => FlowAction::None,
        }
    }

    /// Move into the ending state for `reason`.
    ///
    /// Returns the closing line the model must speak, or `None` when
    /// termination already began.
    pub fn begin_termination(&mut self, reason: EndReason) -> Option<&'static str> {
        if self.state().is_ending() {
            return None;
        }
        info!(reason = reason.as_str(), "Call termination started");
        self.transition(reason.ending_state());
        Some(match reason {
            EndReason::QuestionAnswered => prompt::FAREWELL,
            EndReason::InsufficientInformation => prompt::APOLOGY,
        })
    }

    pub fn mark_ended(&mut self) {
        self.transition(ConversationState::Ended);
    }
}
