//! Ticketing collaborator: turns a finished call into a support case.

use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use kai_core::config::TicketingConfig;
use kai_core::session::{ConversationState, Transcript};

#[async_trait]
pub trait Ticketing: Send + Sync {
    /// Create a ticket for the call and return its identifier.
    async fn create_ticket(
        &self,
        transcript: &Transcript,
        caller: Option<&str>,
    ) -> anyhow::Result<String>;
}

/// Subject and body of a call ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketDraft {
    pub subject: String,
    pub contents: String,
}

fn resolution_status(state: ConversationState) -> &'static str {
    match state {
        ConversationState::EndingQuestionAnswered => "Question answered by assistant",
        ConversationState::EndingInsufficientInfo => {
            "Insufficient information, representative callback required"
        }
        _ => "Call ended before resolution",
    }
}

impl TicketDraft {
    pub fn from_transcript(transcript: &Transcript, caller: Option<&str>) -> Self {
        let caller = caller.unwrap_or("Unknown");
        let contents = format!(
            "Caller: {caller}\nResolution Status: {}\n\n--- Full Transcript ---\n{}",
            resolution_status(transcript.meta.state),
            transcript.render()
        );
        Self {
            subject: format!("Call with AI Assistant - Caller: {caller}"),
            contents,
        }
    }
}

/// Case-creation endpoint of the helpdesk (`POST {base_url}/cases`).
pub struct HttpTicketing {
    client: reqwest::Client,
    config: TicketingConfig,
    password: Option<String>,
}

#[derive(Serialize)]
struct CaseRequest<'a> {
    subject: &'a str,
    contents: &'a str,
    channel: &'a str,
    channel_id: &'a str,
    requester_id: &'a str,
    priority_id: &'a str,
    type_id: &'a str,
}

#[derive(Deserialize)]
struct CaseResponse {
    data: Option<CaseData>,
}

#[derive(Deserialize)]
struct CaseData {
    id: serde_json::Value,
}

impl HttpTicketing {
    pub fn new(config: TicketingConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .context("building ticketing HTTP client")?;
        let password = config.resolve_password();
        Ok(Self {
            client,
            config,
            password,
        })
    }
}

#[async_trait]
impl Ticketing for HttpTicketing {
    async fn create_ticket(
        &self,
        transcript: &Transcript,
        caller: Option<&str>,
    ) -> anyhow::Result<String> {
        let draft = TicketDraft::from_transcript(transcript, caller);
        let url = format!("{}/cases", self.config.base_url.trim_end_matches('/'));
        let body = CaseRequest {
            subject: &draft.subject,
            contents: &draft.contents,
            channel: &self.config.channel,
            channel_id: &self.config.channel_id,
            requester_id: &self.config.requester_id,
            priority_id: &self.config.priority_id,
            type_id: &self.config.type_id,
        };

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.config.username, self.password.as_deref())
            .json(&body)
            .send()
            .await
            .context("ticket create request")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("ticket create returned {status}: {text}");
        }

        let parsed: CaseResponse = resp.json().await.context("decoding ticket response")?;
        let id = match parsed.data.map(|d| d.id) {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => bail!("ticket response carried no case id"),
        };
        info!(ticket_id = %id, "Ticket created");
        Ok(id)
    }
}

/// Writes the ticket to the log. Used when no helpdesk is configured.
#[derive(Default)]
pub struct LogTicketing;

#[async_trait]
impl Ticketing for LogTicketing {
    async fn create_ticket(
        &self,
        transcript: &Transcript,
        caller: Option<&str>,
    ) -> anyhow::Result<String> {
        let draft = TicketDraft::from_transcript(transcript, caller);
        let id = format!("log-{}", uuid::Uuid::new_v4());
        info!(
            ticket_id = %id,
            subject = %draft.subject,
            turns = transcript.len(),
            "Final conversation:\n{}",
            draft.contents
        );
        Ok(id)
    }
}
