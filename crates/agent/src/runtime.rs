use std::sync::Arc;

use chrono::Utc;
use concierge_core::config::AppConfig;
use concierge_core::{
    AuditSink, CacheBackend, CachedPipeline, ConversationState, DispatchError, ExecutionPipeline,
    ExecutionResult, InMemoryCacheBackend, NullCacheBackend, PerformanceAlert, Principal,
    ResultCache, ToolExecutor, ToolRegistry, UsageMonitor,
};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::conversation::{ConversationEngine, ConversationReply};
use crate::intent::IntentExtractor;
use crate::llm::LlmClient;
use crate::session::{ConversationSession, InMemorySessionStore, SessionStore};

const FOREIGN_SESSION_REPLY: &str = "This conversation belongs to another user. Please start your own session.";

/// Everything a chat front end needs: sessions, the dialogue engine and the
/// cached execution pipeline, built from one [`AppConfig`].
pub struct AgentRuntime {
    config: AppConfig,
    registry: Arc<ToolRegistry>,
    monitor: Arc<UsageMonitor>,
    executor: Arc<CachedPipeline>,
    extractor: IntentExtractor,
    engine: ConversationEngine,
    sessions: Arc<dyn SessionStore>,
}

impl AgentRuntime {
    pub fn new(
        config: AppConfig,
        registry: Arc<ToolRegistry>,
        audit: Arc<dyn AuditSink>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        let monitor = Arc::new(UsageMonitor::new());
        let backend: Arc<dyn CacheBackend> = if config.cache.enabled {
            Arc::new(InMemoryCacheBackend::new())
        } else {
            Arc::new(NullCacheBackend)
        };
        let pipeline = Arc::new(ExecutionPipeline::new(registry.clone(), audit, monitor.clone()));
        let executor = Arc::new(CachedPipeline::new(
            pipeline,
            registry.clone(),
            ResultCache::new(backend, config.cache.default_ttl()),
        ));
        let extractor = IntentExtractor::new(llm, config.llm.timeout());
        let engine = ConversationEngine::new(extractor.clone(), executor.clone());

        info!(
            event_name = "agent.runtime.ready",
            tools = registry.len(),
            llm_provider = config.llm.provider.as_str(),
            cache_enabled = config.cache.enabled,
            "agent runtime initialised"
        );

        Self {
            config,
            registry,
            monitor,
            executor,
            extractor,
            engine,
            sessions: Arc::new(InMemorySessionStore::new()),
        }
    }

    pub fn with_session_store(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Handles one message for `session_id`, creating the session on first
    /// use. Messages on the same session are processed one at a time, and
    /// only the user who opened the session may drive it.
    pub async fn process_message(
        &self,
        session_id: &str,
        principal: &Principal,
        text: &str,
    ) -> ConversationReply {
        let handle = self.sessions.checkout(session_id, &principal.id);
        let mut session = handle.lock().await;
        if session.user_id != principal.id {
            warn!(
                event_name = "agent.runtime.session_owner_mismatch",
                session_id,
                principal_id = %principal.id,
                owner_id = %session.user_id,
                "message rejected for session owned by another user"
            );
            return ConversationReply {
                session_id: session.session_id.clone(),
                state: session.state,
                message: FOREIGN_SESSION_REPLY.to_string(),
                intent: None,
                missing_slots: Vec::new(),
                result: None,
            };
        }
        let reply = self.engine.process_message(&mut session, principal, text).await;
        debug!(
            event_name = "agent.runtime.message",
            session_id,
            principal_id = %principal.id,
            state = ?reply.state,
            "message processed"
        );
        reply
    }

    /// Runs a tool directly, bypassing the dialogue.
    pub async fn execute(
        &self,
        tool_name: &str,
        principal: &Principal,
        args: Map<String, Value>,
    ) -> ExecutionResult {
        self.executor.execute(tool_name, principal, args).await
    }

    pub async fn classify(&self, text: &str) -> concierge_core::IntentClassification {
        self.extractor.parse(text).await
    }

    pub async fn reset(&self, session_id: &str) -> Result<(), DispatchError> {
        if self.sessions.remove(session_id) {
            info!(event_name = "agent.runtime.session_reset", session_id, "session destroyed");
            Ok(())
        } else {
            Err(DispatchError::session_not_found(session_id))
        }
    }

    pub async fn session(&self, session_id: &str) -> Result<ConversationSession, DispatchError> {
        let handle = self
            .sessions
            .get(session_id)
            .ok_or_else(|| DispatchError::session_not_found(session_id))?;
        let session = handle.lock().await;
        Ok(session.clone())
    }

    pub async fn session_state(&self, session_id: &str) -> Result<ConversationState, DispatchError> {
        self.session(session_id).await.map(|session| session.state)
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<UsageMonitor> {
        &self.monitor
    }

    pub fn cache(&self) -> &ResultCache {
        self.executor.cache()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn alerts(&self) -> Vec<PerformanceAlert> {
        self.monitor.alerts(&self.config.monitor.thresholds())
    }

    /// Periodically evicts idle sessions. The task runs until aborted.
    pub fn spawn_session_sweeper(&self) -> JoinHandle<()> {
        let sessions = self.sessions.clone();
        let idle_ttl = self.config.sessions.idle_ttl();
        let interval = self.config.sessions.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = sessions.sweep_idle(Utc::now(), idle_ttl);
                if removed > 0 {
                    info!(
                        event_name = "agent.runtime.sessions_swept",
                        removed,
                        remaining = sessions.len(),
                        "evicted idle sessions"
                    );
                }
            }
        })
    }
}
