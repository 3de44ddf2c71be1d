//! Gateway integration tests: drive whole calls through the relay and through
//! a real server with a fake realtime model.
//!
//! Run with: `cargo test -p kai-gateway --test integration`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async};

use kai_core::config::{Config, RealtimeConfig};
use kai_core::protocol::{ClientEvent, TelephonyOutbound};
use kai_core::session::{ConversationState, Speaker, Transcript};
use kai_gateway::relay::run_relay;
use kai_gateway::{CallContext, CallSession, GatewayState, Outbound};
use kai_tools::{KnowledgeBase, Ticketing};

const WAIT: Duration = Duration::from_secs(5);

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

struct PasswordKnowledge;

#[async_trait]
impl KnowledgeBase for PasswordKnowledge {
    async fn answer(&self, query: &str) -> anyhow::Result<String> {
        if query.contains("password") {
            Ok("Click 'Forgot password' on the sign-in page and follow the email link.".into())
        } else {
            anyhow::bail!("no match")
        }
    }
}

struct BrokenKnowledge;

#[async_trait]
impl KnowledgeBase for BrokenKnowledge {
    async fn answer(&self, _query: &str) -> anyhow::Result<String> {
        anyhow::bail!("connection refused")
    }
}

#[derive(Default)]
struct Tickets {
    created: Mutex<Vec<(Option<String>, ConversationState, Vec<(Speaker, String)>)>>,
}

#[async_trait]
impl Ticketing for Tickets {
    async fn create_ticket(
        &self,
        transcript: &Transcript,
        caller: Option<&str>,
    ) -> anyhow::Result<String> {
        let turns = transcript
            .turns()
            .iter()
            .map(|t| (t.speaker, t.text.clone()))
            .collect();
        let mut created = self.created.lock().await;
        created.push((caller.map(str::to_string), transcript.meta.state, turns));
        Ok(format!("CASE-{}", created.len()))
    }
}

/// A call wired to in-memory streams.
struct Harness {
    session: Arc<CallSession>,
    ctx: Arc<CallContext>,
    tickets: Arc<Tickets>,
    telephony_in: fmpsc::UnboundedSender<String>,
    model_in: fmpsc::UnboundedSender<String>,
    to_model: mpsc::UnboundedReceiver<Outbound<ClientEvent>>,
    to_telephony: mpsc::UnboundedReceiver<Outbound<TelephonyOutbound>>,
    relay: tokio::task::JoinHandle<()>,
}

async fn start_call(knowledge: Arc<dyn KnowledgeBase>) -> Harness {
    let tickets = Arc::new(Tickets::default());
    let ctx = Arc::new(
        CallContext::new(knowledge, tickets.clone()).with_farewell_delay(Duration::from_millis(50)),
    );
    let (model_tx, to_model) = mpsc::unbounded_channel();
    let (telephony_tx, to_telephony) = mpsc::unbounded_channel();
    let session = Arc::new(CallSession::new(
        "MZ-scenario",
        Some("+15550001111".into()),
        ctx.classifier.clone(),
        model_tx,
        telephony_tx,
    ));
    ctx.registry.insert(session.clone()).await.unwrap();

    let (telephony_in, telephony_rx) = fmpsc::unbounded();
    let (model_in, model_rx) = fmpsc::unbounded();
    let relay = tokio::spawn(run_relay(
        session.clone(),
        ctx.clone(),
        telephony_rx,
        model_rx,
    ));

    Harness {
        session,
        ctx,
        tickets,
        telephony_in,
        model_in,
        to_model,
        to_telephony,
        relay,
    }
}

impl Harness {
    fn model_says(&self, event: Value) {
        self.model_in.unbounded_send(event.to_string()).unwrap();
    }

    fn caller_says(&self, text: &str) {
        self.model_says(json!({
            "type": "conversation.item.input_audio_transcription.completed",
            "item_id": "caller_item",
            "content_index": 0,
            "transcript": text,
        }));
    }

    fn assistant_says(&self, text: &str) {
        self.model_says(json!({"type": "response.audio_transcript.done", "transcript": text}));
        self.model_says(json!({"type": "response.done", "response": {"status": "completed"}}));
    }

    /// Next `response.create` instructions sent to the model.
    async fn next_instruction(&mut self) -> String {
        loop {
            let item = tokio::time::timeout(WAIT, self.to_model.recv())
                .await
                .expect("timed out waiting for an instruction")
                .expect("model channel closed");
            if let Outbound::Send(ClientEvent::ResponseCreate {
                response: Some(opts),
            }) = item
            {
                if let Some(text) = opts.instructions {
                    return text;
                }
            }
        }
    }

    /// Telephony frames until the writer is told to close.
    async fn telephony_until_close(&mut self) -> Vec<TelephonyOutbound> {
        let mut frames = Vec::new();
        loop {
            let item = tokio::time::timeout(WAIT, self.to_telephony.recv())
                .await
                .expect("timed out waiting for telephony close")
                .expect("telephony channel closed");
            match item {
                Outbound::Send(frame) => frames.push(frame),
                Outbound::Close => return frames,
            }
        }
    }
}

#[tokio::test]
async fn test_password_reset_call_scenario() {
    let mut call = start_call(Arc::new(PasswordKnowledge)).await;

    call.caller_says("How do I reset my password?");
    call.model_says(json!({
        "type": "response.function_call_arguments.done",
        "call_id": "call_1",
        "name": "search_knowledge_base",
        "arguments": "{\"query\":\"reset password\"}",
    }));

    let answer = call.next_instruction().await;
    assert!(answer.starts_with("Click 'Forgot password'"));
    assert!(answer.ends_with("ask 'Did that answer your question?'"));
    call.assistant_says(
        "Click 'Forgot password' on the sign-in page and follow the email link. Did that answer your question?",
    );

    call.caller_says("Yes");
    let ask_more = call.next_instruction().await;
    assert!(ask_more.contains("Do you have any other questions"));
    call.assistant_says("Great! Do you have any other questions I can help you with?");

    call.caller_says("No");
    let farewell = call.next_instruction().await;
    assert!(farewell.contains("Thank you for calling. Have a great day!"));

    let frames = call.telephony_until_close().await;
    let stops = frames
        .iter()
        .filter(|f| matches!(f, TelephonyOutbound::Stop { .. }))
        .count();
    assert_eq!(stops, 1);

    tokio::time::timeout(WAIT, call.relay).await.unwrap().unwrap();

    let created = call.tickets.created.lock().await;
    assert_eq!(created.len(), 1);
    let (caller, state, turns) = &created[0];
    assert_eq!(caller.as_deref(), Some("+15550001111"));
    assert_eq!(*state, ConversationState::EndingQuestionAnswered);
    assert_eq!(turns.len(), 5);
    assert_eq!(turns[0], (Speaker::Caller, "How do I reset my password?".to_string()));
    assert_eq!(turns[4], (Speaker::Caller, "No".to_string()));
    assert!(call.ctx.registry.is_empty().await);
    assert_eq!(call.session.flow_state().await, ConversationState::Ended);
}

#[tokio::test]
async fn test_unhelpful_answer_ends_with_apology() {
    let mut call = start_call(Arc::new(BrokenKnowledge)).await;

    call.caller_says("Why is my invoice wrong?");
    call.model_says(json!({
        "type": "response.function_call_arguments.done",
        "name": "search_knowledge_base",
        "arguments": "{\"query\":\"invoice wrong\"}",
    }));
    let fallback = call.next_instruction().await;
    assert!(fallback.contains("no relevant information"));
    call.model_says(json!({"type": "response.done"}));

    call.caller_says("No, it didn't");
    let apology = call.next_instruction().await;
    assert!(apology.contains("I'll have a representative call you back"));

    // the model also decides to end the call; it must not run twice
    call.model_says(json!({
        "type": "response.function_call_arguments.done",
        "name": "end_call",
        "arguments": "{\"reason\":\"insufficient_information\"}",
    }));

    let frames = call.telephony_until_close().await;
    assert_eq!(
        frames
            .iter()
            .filter(|f| matches!(f, TelephonyOutbound::Stop { .. }))
            .count(),
        1
    );
    tokio::time::timeout(WAIT, call.relay).await.unwrap().unwrap();

    let created = call.tickets.created.lock().await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].1, ConversationState::EndingInsufficientInfo);
}

#[tokio::test]
async fn test_hangup_mid_call_files_ticket() {
    let call = start_call(Arc::new(PasswordKnowledge)).await;
    call.caller_says("Hello, is anyone there?");
    tokio::time::sleep(Duration::from_millis(50)).await;

    call.telephony_in
        .unbounded_send(json!({"event": "stop", "stop": {}}).to_string())
        .unwrap();
    tokio::time::timeout(WAIT, call.relay).await.unwrap().unwrap();

    let created = call.tickets.created.lock().await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].1, ConversationState::Initial);
    assert!(call.session.cancel.is_cancelled());
}

#[tokio::test]
async fn test_barge_in_truncates_playing_utterance() {
    let mut call = start_call(Arc::new(PasswordKnowledge)).await;

    call.telephony_in
        .unbounded_send(
            json!({"event": "media", "media": {"timestamp": "1000", "payload": "AAAA"}})
                .to_string(),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    // 25 x 20 ms of mu-law
    let delta = {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode([0xFFu8; 160])
    };
    for _ in 0..25 {
        call.model_says(json!({"type": "response.audio.delta", "item_id": "item_A", "delta": delta}));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    call.telephony_in
        .unbounded_send(
            json!({"event": "media", "media": {"timestamp": "1240", "payload": "AAAA"}})
                .to_string(),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    call.model_says(json!({"type": "input_audio_buffer.speech_started", "audio_start_ms": 1200}));

    let truncate = loop {
        let item = tokio::time::timeout(WAIT, call.to_model.recv())
            .await
            .unwrap()
            .unwrap();
        if let Outbound::Send(ClientEvent::ConversationItemTruncate {
            item_id,
            audio_end_ms,
            ..
        }) = item
        {
            break (item_id, audio_end_ms);
        }
    };
    assert_eq!(truncate, ("item_A".to_string(), 240));

    let cleared = loop {
        let item = tokio::time::timeout(WAIT, call.to_telephony.recv())
            .await
            .unwrap()
            .unwrap();
        if let Outbound::Send(TelephonyOutbound::Clear { stream_sid }) = item {
            break stream_sid;
        }
    };
    assert_eq!(cleared, "MZ-scenario");

    call.telephony_in.close_channel();
    tokio::time::timeout(WAIT, call.relay).await.unwrap().unwrap();
}

// --- Real server, fake realtime model ---

/// Fake realtime model: accepts one connection, reports every received event
/// and sends whatever the test pushes.
async fn spawn_fake_model() -> (
    u16,
    mpsc::UnboundedReceiver<Value>,
    mpsc::UnboundedSender<Value>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<Value>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        let (mut tx, mut rx) = ws.split();
        tokio::spawn(async move {
            while let Some(v) = push_rx.recv().await {
                if tx.send(Message::Text(v.to_string().into())).await.is_err() {
                    break;
                }
            }
        });
        while let Some(Ok(msg)) = rx.next().await {
            if let Message::Text(text) = msg {
                let _ = seen_tx.send(serde_json::from_str::<Value>(text.as_str()).unwrap());
            }
        }
    });

    (port, seen_rx, push_tx)
}

async fn next_of_type(rx: &mut mpsc::UnboundedReceiver<Value>, kind: &str) -> Value {
    loop {
        let v = tokio::time::timeout(WAIT, rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {kind}"))
            .expect("channel closed");
        if v["type"] == kind || v["event"] == kind {
            return v;
        }
    }
}

#[tokio::test]
async fn test_end_to_end_through_server() {
    let (model_port, mut model_seen, model_push) = spawn_fake_model().await;

    let config = Config {
        realtime: Some(RealtimeConfig {
            url: format!("ws://127.0.0.1:{model_port}/v1/realtime"),
            api_key: Some("sk-test".into()),
            ..Default::default()
        }),
        ..Default::default()
    };
    let tickets = Arc::new(Tickets::default());
    let state = Arc::new(GatewayState::new(
        Arc::new(config),
        CallContext::new(Arc::new(PasswordKnowledge), tickets.clone())
            .with_farewell_delay(Duration::from_millis(100)),
    ));

    let port = find_free_port();
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let app = kai_gateway::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // health
    let health: Value = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["active_calls"], 0);

    // webhook
    let twiml = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/incoming-call"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body("CallSid=CA1&From=%2B15550001111")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(twiml.contains(&format!("wss://127.0.0.1:{port}/media-stream")));
    assert!(twiml.contains("<Parameter name=\"caller\" value=\"+15550001111\" />"));

    // telephony leg
    let (mut phone, _) = connect_async(format!("ws://127.0.0.1:{port}/media-stream"))
        .await
        .unwrap();
    phone
        .send(Message::Text(
            json!({"event": "connected", "protocol": "Call"}).to_string().into(),
        ))
        .await
        .unwrap();
    phone
        .send(Message::Text(
            json!({"event": "start", "start": {
                "streamSid": "MZ-e2e",
                "callSid": "CA1",
                "customParameters": {"caller": "+15550001111"}
            }})
            .to_string()
            .into(),
        ))
        .await
        .unwrap();

    let update = next_of_type(&mut model_seen, "session.update").await;
    assert_eq!(update["session"]["input_audio_format"], "g711_ulaw");
    assert_eq!(update["session"]["tools"][1]["name"], "end_call");
    let greeting = next_of_type(&mut model_seen, "conversation.item.create").await;
    assert!(
        greeting["item"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("Hi! This is Kai speaking")
    );

    phone
        .send(Message::Text(
            json!({"event": "media", "media": {"timestamp": "20", "payload": "//7+/Q=="}})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let append = next_of_type(&mut model_seen, "input_audio_buffer.append").await;
    assert_eq!(append["audio"], "//7+/Q==");

    // assistant audio reaches the phone with a mark
    model_push
        .send(json!({"type": "response.audio.delta", "item_id": "item_G", "delta": "AAAAAA=="}))
        .unwrap();
    let mut got_media = false;
    let mut got_mark = false;
    while !(got_media && got_mark) {
        let msg = tokio::time::timeout(WAIT, phone.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = msg {
            let v: Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(v["streamSid"], "MZ-e2e");
            match v["event"].as_str() {
                Some("media") => got_media = true,
                Some("mark") => got_mark = true,
                _ => {}
            }
        }
    }
    assert_eq!(state.calls.registry.len().await, 1);

    // the model ends the call
    model_push
        .send(json!({"type": "conversation.item.input_audio_transcription.completed", "transcript": "That's all, bye"}))
        .unwrap();
    model_push
        .send(json!({
            "type": "response.function_call_arguments.done",
            "call_id": "c9",
            "name": "end_call",
            "arguments": "{\"reason\":\"question_answered\"}"
        }))
        .unwrap();
    let farewell = next_of_type(&mut model_seen, "response.create").await;
    let farewell = if farewell["response"]["instructions"].is_string() {
        farewell
    } else {
        next_of_type(&mut model_seen, "response.create").await
    };
    assert!(
        farewell["response"]["instructions"]
            .as_str()
            .unwrap()
            .contains("Have a great day")
    );

    let mut stopped = false;
    loop {
        match tokio::time::timeout(WAIT, phone.next()).await.unwrap() {
            Some(Ok(Message::Text(text))) => {
                let v: Value = serde_json::from_str(text.as_str()).unwrap();
                if v["event"] == "stop" {
                    stopped = true;
                }
            }
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => {}
        }
    }
    assert!(stopped);

    for _ in 0..50 {
        if state.calls.registry.is_empty().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(state.calls.registry.is_empty().await);
    let created = tickets.created.lock().await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].0.as_deref(), Some("+15550001111"));
}

#[tokio::test]
async fn test_stream_without_start_times_out() {
    let mut config = Config::default();
    config.call = Some(kai_core::config::CallConfig {
        start_timeout_secs: 1,
        ..Default::default()
    });
    let state = Arc::new(GatewayState::new(
        Arc::new(config),
        CallContext::new(Arc::new(BrokenKnowledge), Arc::new(Tickets::default())),
    ));
    let port = find_free_port();
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let app = kai_gateway::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (mut phone, _) = connect_async(format!("ws://127.0.0.1:{port}/media-stream"))
        .await
        .unwrap();
    let closed = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match phone.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return true,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .unwrap();
    assert!(closed);
    assert!(state.calls.registry.is_empty().await);
}
