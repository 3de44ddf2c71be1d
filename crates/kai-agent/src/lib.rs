//! Conversation policy for support calls: the scripted state machine, the
//! caller-intent classifier it consults, and the instruction texts it emits.

pub mod classifier;
pub mod flow;
pub mod prompt;

pub use classifier::{Intent, IntentClassifier, KeywordClassifier, Lexicon, Prompt};
pub use flow::{ConversationFlow, FlowAction};
