//! Tool dispatch and flow actions.

use std::sync::Arc;

use tracing::{info, warn};

use kai_agent::{FlowAction, prompt};
use kai_core::error::{KaiError, Result};
use kai_tools::ToolCall;

use crate::call::CallSession;
use crate::state::CallContext;
use crate::termination::request_termination;

/// Route a model function call.
///
/// Unknown functions are logged and ignored. Malformed arguments come back as
/// a recoverable `KaiError::Tool`; the call carries on either way.
pub async fn dispatch(
    name: &str,
    arguments: &str,
    session: &Arc<CallSession>,
    ctx: &Arc<CallContext>,
) -> Result<()> {
    let call = ToolCall::parse(name, arguments).map_err(|e| KaiError::Tool(e.to_string()))?;
    let Some(call) = call else {
        warn!(call_id = %session.call_id, tool = name, "Unknown function call ignored");
        return Ok(());
    };

    #[cfg(feature = "metrics")]
    crate::metrics::record_tool_call(call.name());

    match call {
        ToolCall::SearchKnowledgeBase { query } => {
            info!(call_id = %session.call_id, query = %query, "Searching knowledge base");
            let instruction = match lookup(ctx, &query).await {
                Ok(answer) => prompt::knowledge_answer(&answer),
                Err(e) => {
                    warn!(call_id = %session.call_id, error = %e, "Knowledge lookup failed");
                    #[cfg(feature = "metrics")]
                    crate::metrics::record_error("knowledge");
                    prompt::no_information()
                }
            };
            // Must be awaiting feedback before the answer is spoken.
            session.flow.lock().await.on_knowledge_answer();
            session.instruct(instruction).await;
        }
        ToolCall::EndCall { reason } => {
            request_termination(session, ctx, reason).await;
        }
    }
    Ok(())
}

async fn lookup(ctx: &CallContext, query: &str) -> Result<String> {
    ctx.knowledge
        .answer(query)
        .await
        .map_err(|e| KaiError::Knowledge(format!("{e:#}")))
}

/// Carry out what flow enforcement decided.
pub async fn apply_flow_action(
    action: FlowAction,
    session: &Arc<CallSession>,
    ctx: &Arc<CallContext>,
) {
    match action {
        FlowAction::None => {}
        FlowAction::Instruct(text) => {
            session.instruct(text).await;
        }
        FlowAction::Terminate(reason) => {
            request_termination(session, ctx, reason).await;
        }
    }
}
