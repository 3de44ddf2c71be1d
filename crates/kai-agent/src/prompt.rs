//! Instruction texts sent to the realtime model.

use kai_tools::ToolRegistry;

pub const ASK_ANSWER_FEEDBACK: &str = "Did that answer your question?";

pub const ASK_MORE_QUESTIONS: &str =
    "Ask: 'Do you have any other questions I can help you with?'";

pub const CLARIFY_ANSWER_FEEDBACK: &str =
    "Ask again if the information answered their question.";

pub const FAREWELL: &str = "Say: 'Thank you for calling. Have a great day!'";

pub const APOLOGY: &str = "Say: 'I apologize, but I don't have enough information to fully answer your question. I'll have a representative call you back to assist with this. Thank you for calling.'";

pub const NO_INFORMATION: &str = "Tell the caller that no relevant information was found in the knowledge base for their question.";

pub const GREETING: &str = "Greet the user with 'Hi! This is Kai speaking. How can I assist you?'";

const IDENTITY: &str = "You are a helpful and professional AI assistant. Keep responses concise and clear, as this is a phone conversation.";

/// Instruction delivering a knowledge-base answer, ending with the mandated
/// feedback question.
pub fn knowledge_answer(answer: &str) -> String {
    format!("{answer}\n\nAfter providing this information, ask '{ASK_ANSWER_FEEDBACK}'")
}

/// Instruction used when retrieval failed or found nothing.
pub fn no_information() -> String {
    format!("{NO_INFORMATION} Then ask '{ASK_ANSWER_FEEDBACK}'")
}

/// Session instructions for `session.update`.
pub fn build_system_instructions(tools: &ToolRegistry, custom_identity: Option<&str>) -> String {
    let mut parts = Vec::new();

    parts.push(custom_identity.unwrap_or(IDENTITY).to_string());

    parts.push(
        "Follow this call script:\n\
         1. Listen to the caller's question and call search_knowledge_base with it.\n\
         2. Answer only from the search result, then ask 'Did that answer your question?'\n\
         3. If it did, ask whether they have any other questions.\n\
         4. When there are no more questions, call end_call with reason question_answered.\n\
         5. If the answer did not help, call end_call with reason insufficient_information."
            .to_string(),
    );

    let tool_names = tools.list();
    if !tool_names.is_empty() {
        parts.push(format!("Available tools: {}", tool_names.join(", ")));
    }

    parts.join("\n\n")
}
