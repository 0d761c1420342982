//! Gateway shared state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use parley_agent::ReplyPipeline;
use parley_agent::prompt::build_system_instruction;
use parley_core::config::Config;
use parley_providers::{ChatSession, Credentials, LlmProvider, SessionSettings, build_provider};
use parley_tts::{SovitsBackend, SynthesisGateway};

/// State shared by all connections. Holds nothing conversation-specific.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub provider: Arc<dyn LlmProvider>,
    pub credentials: Credentials,
    pub synthesizer: SynthesisGateway,
    pub connections: RwLock<HashMap<String, ConnectionInfo>>,
    #[cfg(feature = "metrics")]
    pub metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

/// Per-connection bookkeeping for the health endpoint.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub conn_id: String,
    pub connected_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(
        config: Arc<Config>,
        provider: Arc<dyn LlmProvider>,
        credentials: Credentials,
        synthesizer: SynthesisGateway,
    ) -> Self {
        Self {
            config,
            provider,
            credentials,
            synthesizer,
            connections: RwLock::new(HashMap::new()),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Build the model provider and GPT-SoVITS backend named in the config.
    pub fn from_config(config: Arc<Config>) -> anyhow::Result<Self> {
        let (provider, credentials) = build_provider(&config.model())?;
        let backend = SovitsBackend::new(config.tts())?;
        let synthesizer = SynthesisGateway::new(Arc::new(backend));
        Ok(Self::new(config, provider, credentials, synthesizer))
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// A fresh chat session for a new connection.
    pub fn new_session(&self) -> ChatSession {
        let settings = SessionSettings::from_config(&self.config, build_system_instruction(&self.config));
        ChatSession::new(Arc::clone(&self.provider), self.credentials.clone(), settings)
    }

    pub fn pipeline(&self) -> ReplyPipeline {
        ReplyPipeline::from_config(&self.config, self.synthesizer.clone())
    }

    pub async fn register_connection(&self, conn_id: &str) {
        let mut connections = self.connections.write().await;
        connections.insert(
            conn_id.to_string(),
            ConnectionInfo {
                conn_id: conn_id.to_string(),
                connected_at: Utc::now(),
            },
        );
    }

    pub async fn remove_connection(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
