//! Gateway shared state and the collaborators injected into every call.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use kai_agent::{IntentClassifier, KeywordClassifier};
use kai_core::config::Config;
use kai_media::AudioFormat;
use kai_tools::{
    HttpKnowledgeBase, HttpTicketing, KnowledgeBase, LogTicketing, Ticketing, ToolRegistry,
    UnconfiguredKnowledgeBase,
};

use crate::registry::CallRegistry;

/// Collaborators and settings every call session needs.
pub struct CallContext {
    pub knowledge: Arc<dyn KnowledgeBase>,
    pub ticketing: Arc<dyn Ticketing>,
    pub classifier: Arc<dyn IntentClassifier>,
    pub tools: Arc<ToolRegistry>,
    pub registry: Arc<CallRegistry>,
    pub audio_format: AudioFormat,
    /// How long the closing line may play before the stream is stopped.
    pub farewell_delay: Duration,
}

impl CallContext {
    pub fn new(knowledge: Arc<dyn KnowledgeBase>, ticketing: Arc<dyn Ticketing>) -> Self {
        Self {
            knowledge,
            ticketing,
            classifier: Arc::new(KeywordClassifier::default()),
            tools: Arc::new(ToolRegistry::builtin()),
            registry: Arc::new(CallRegistry::new()),
            audio_format: AudioFormat::default(),
            farewell_delay: Duration::from_millis(3000),
        }
    }

    pub fn with_farewell_delay(mut self, delay: Duration) -> Self {
        self.farewell_delay = delay;
        self
    }

    pub fn with_audio_format(mut self, format: AudioFormat) -> Self {
        self.audio_format = format;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }
}

/// State shared by all HTTP and WebSocket handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub calls: Arc<CallContext>,
    #[cfg(feature = "metrics")]
    pub prometheus: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, calls: CallContext) -> Self {
        Self {
            config,
            calls: Arc::new(calls),
            #[cfg(feature = "metrics")]
            prometheus: None,
        }
    }

    /// Build the gateway from config, constructing the HTTP collaborators.
    pub fn from_config(config: Arc<Config>) -> anyhow::Result<Self> {
        let knowledge: Arc<dyn KnowledgeBase> = match &config.knowledge {
            Some(k) => Arc::new(HttpKnowledgeBase::new(k)?),
            None => {
                warn!("No knowledge backend configured");
                Arc::new(UnconfiguredKnowledgeBase)
            }
        };

        let ticketing: Arc<dyn Ticketing> = match &config.ticketing {
            Some(t) => Arc::new(HttpTicketing::new(t.clone())?),
            None => {
                info!("No ticketing backend configured, tickets will be logged");
                Arc::new(LogTicketing)
            }
        };

        let audio_format = config.realtime().audio_format.parse::<AudioFormat>()?;
        let calls = CallContext::new(knowledge, ticketing)
            .with_audio_format(audio_format)
            .with_farewell_delay(config.farewell_delay());

        Ok(Self::new(config, calls))
    }

    #[cfg(feature = "metrics")]
    pub fn with_prometheus(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_default_config() {
        let state = GatewayState::from_config(Arc::new(Config::default())).unwrap();
        assert_eq!(state.calls.audio_format, AudioFormat::G711Ulaw);
        assert_eq!(state.calls.farewell_delay, Duration::from_millis(3000));
        assert_eq!(
            state.calls.tools.list(),
            vec!["search_knowledge_base", "end_call"]
        );
    }

    #[test]
    fn test_bad_audio_format_rejected() {
        let config: Config =
            serde_json::from_str(r#"{ "realtime": { "audio_format": "opus" } }"#).unwrap();
        assert!(GatewayState::from_config(Arc::new(config)).is_err());
    }
}
