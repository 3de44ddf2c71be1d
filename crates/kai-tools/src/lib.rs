//! Tools exposed to the realtime model and the backends they reach.
//!
//! The model sees two functions: `search_knowledge_base` and `end_call`.
//! Their schemas come from the [`Tool`] implementations registered in a
//! [`ToolRegistry`]; invocations arrive as raw name + JSON arguments and are
//! parsed into a typed [`ToolCall`].

pub mod knowledge;
pub mod ticketing;

use serde::Deserialize;
use thiserror::Error;

use kai_core::session::EndReason;

pub use knowledge::{HttpKnowledgeBase, KnowledgeBase, UnconfiguredKnowledgeBase};
pub use ticketing::{HttpTicketing, LogTicketing, TicketDraft, Ticketing};

pub const SEARCH_KNOWLEDGE_BASE: &str = "search_knowledge_base";
pub const END_CALL: &str = "end_call";

/// A function the realtime model may call.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;
}

pub struct SearchKnowledgeBaseTool;

impl Tool for SearchKnowledgeBaseTool {
    fn name(&self) -> &str {
        SEARCH_KNOWLEDGE_BASE
    }

    fn description(&self) -> &str {
        "Search the knowledge base for information to answer user questions"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The caller's question, phrased as a search query"
                }
            },
            "required": ["query"]
        })
    }
}

pub struct EndCallTool;

impl Tool for EndCallTool {
    fn name(&self) -> &str {
        END_CALL
    }

    fn description(&self) -> &str {
        "End the current call"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "enum": ["question_answered", "insufficient_information"],
                    "description": "Why the call is ending"
                }
            },
            "required": ["reason"]
        })
    }
}

/// Registry of tools advertised in the model session.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the two call-handling tools.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchKnowledgeBaseTool));
        registry.register(Box::new(EndCallTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Tool definitions in the realtime `session.update` format.
    pub fn to_realtime_tools(&self) -> Vec<serde_json::Value> {
        self.tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "name": t.name(),
                    "description": t.description(),
                    "parameters": t.parameters_schema(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error("malformed arguments for {tool}: {source}")]
    MalformedArguments {
        tool: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A parsed model function invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    SearchKnowledgeBase { query: String },
    EndCall { reason: EndReason },
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
}

#[derive(Deserialize)]
struct EndCallArgs {
    reason: EndReason,
}

impl ToolCall {
    /// Parse a function call. Unknown names yield `Ok(None)`.
    pub fn parse(name: &str, arguments: &str) -> Result<Option<Self>, ToolCallError> {
        let malformed = |source| ToolCallError::MalformedArguments {
            tool: name.to_string(),
            source,
        };
        let args = if arguments.trim().is_empty() {
            "{}"
        } else {
            arguments
        };
        match name {
            SEARCH_KNOWLEDGE_BASE => {
                let SearchArgs { query } = serde_json::from_str(args).map_err(malformed)?;
                Ok(Some(Self::SearchKnowledgeBase { query }))
            }
            END_CALL => {
                let EndCallArgs { reason } = serde_json::from_str(args).map_err(malformed)?;
                Ok(Some(Self::EndCall { reason }))
            }
            _ => Ok(None),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SearchKnowledgeBase { .. } => SEARCH_KNOWLEDGE_BASE,
            Self::EndCall { .. } => END_CALL,
        }
    }
}
