//! Command routing
//!
//! [`CommandRouter`] validates a [`ManagerCommand`], runs the matching
//! handler and answers with an [`Envelope`]. No failure escapes
//! `dispatch`: validation errors, store failures, collaborator failures
//! and handler panics all come back as `success: false` envelopes.
//!
//! Every read-modify-write of a user's policy state holds that user's
//! lock from load to save, so concurrent feedback for one user is never
//! lost. Commands for different users and sessions run independently.

mod command;
mod envelope;
mod locks;

use std::future::Future;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, field, info, info_span, warn};

use crate::collaborators::{
    ExtractionRequest, Extractor, GenerationRequest, Generator, HttpGenerator, TextExtractor,
    UnavailableGenerator,
};
use crate::config::{DEFAULT_COLLABORATOR_TIMEOUT_SECS, DEFAULT_USER, StudyConfig};
use crate::error::{ErrorKind, Result, StoreError, StudyError};
use crate::policy::{BanditPolicy, Feedback, ModeId};
use crate::session::{SessionContext, SessionData};
use crate::store::{PolicyStore, open_store};

pub use command::{Action, ExtractParams, GenerateParams, ManagerCommand, ParsedCommand, Request};
pub use envelope::{
    Envelope, ExtractPayload, GeneratePayload, Payload, PolicySummary, PolicyUpdate, SurveyPayload,
};
pub use locks::KeyedLocks;

pub struct CommandRouter {
    store: Arc<dyn PolicyStore>,
    policy: BanditPolicy,
    sessions: SessionContext,
    extractor: Arc<dyn Extractor>,
    generator: Arc<dyn Generator>,
    user_locks: KeyedLocks,
    default_user: String,
    collaborator_timeout: Duration,
    blocking_runtime: OnceLock<tokio::runtime::Runtime>,
}

impl std::fmt::Debug for CommandRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRouter")
            .field("policy", &self.policy)
            .field("default_user", &self.default_user)
            .field("collaborator_timeout", &self.collaborator_timeout)
            .finish_non_exhaustive()
    }
}

impl CommandRouter {
    /// Router over `store` with the built-in text extractor and no generator
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            policy: BanditPolicy::default(),
            sessions: SessionContext::new(),
            extractor: Arc::new(TextExtractor::default()),
            generator: Arc::new(UnavailableGenerator),
            user_locks: KeyedLocks::new(),
            default_user: DEFAULT_USER.to_string(),
            collaborator_timeout: Duration::from_secs(DEFAULT_COLLABORATOR_TIMEOUT_SECS),
            blocking_runtime: OnceLock::new(),
        }
    }

    /// Wire a router from configuration, opening the configured store
    pub fn from_config(config: &StudyConfig) -> std::result::Result<Self, StoreError> {
        let store = open_store(&config.storage, config.bandit.prior())?;
        let sessions = match config.session.ttl() {
            Some(ttl) => SessionContext::with_ttl(ttl),
            None => SessionContext::new(),
        };
        let generator: Arc<dyn Generator> = match &config.collaborators.generator_url {
            Some(url) => Arc::new(HttpGenerator::new(url.clone())),
            None => Arc::new(UnavailableGenerator),
        };

        Ok(Self::new(store)
            .with_policy(BanditPolicy::new(config.bandit.clone()))
            .with_sessions(sessions)
            .with_extractor(Arc::new(TextExtractor::new(config.session.max_chunk_chars)))
            .with_generator(generator)
            .with_default_user(config.default_user.clone())
            .with_collaborator_timeout(config.collaborators.timeout()))
    }

    pub fn with_policy(mut self, policy: BanditPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sessions(mut self, sessions: SessionContext) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_default_user(mut self, user: impl Into<String>) -> Self {
        self.default_user = user.into();
        self
    }

    pub fn with_collaborator_timeout(mut self, timeout: Duration) -> Self {
        self.collaborator_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn PolicyStore> {
        &self.store
    }

    pub fn policy(&self) -> &BanditPolicy {
        &self.policy
    }

    pub fn sessions(&self) -> &SessionContext {
        &self.sessions
    }

    pub fn default_user(&self) -> &str {
        &self.default_user
    }

    /// Handle one command
    pub async fn dispatch(&self, command: ManagerCommand) -> Envelope {
        self.dispatch_with_cancel(command, &CancellationToken::new())
            .await
    }

    /// Handle one command; cancelling `cancel` aborts any collaborator call
    pub async fn dispatch_with_cancel(
        &self,
        command: ManagerCommand,
        cancel: &CancellationToken,
    ) -> Envelope {
        let span = info_span!(
            "command",
            action = %command.action,
            session_id = field::Empty,
            user = field::Empty,
        );

        async move {
            let outcome = AssertUnwindSafe(self.handle(command, cancel))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(payload)) => {
                    debug!("Command succeeded");
                    Envelope::ok(payload)
                }
                Ok(Err(e)) => {
                    match e.kind() {
                        ErrorKind::Validation | ErrorKind::SessionNotFound => {
                            warn!(error = %e, "Command rejected")
                        }
                        _ => error!(error = %e, "Command failed"),
                    }
                    Envelope::failure(&e)
                }
                Err(_) => {
                    error!("Command handler panicked");
                    Envelope::failure(&StudyError::Internal("command handler panicked".into()))
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Handle a batch concurrently; envelopes come back in input order
    pub async fn dispatch_all(&self, commands: Vec<ManagerCommand>) -> Vec<Envelope> {
        join_all(commands.into_iter().map(|command| self.dispatch(command))).await
    }

    /// Handle one command from synchronous code
    ///
    /// Drives the command on a current-thread runtime owned by the router.
    /// Fails if called from inside an async runtime.
    pub fn dispatch_blocking(&self, command: ManagerCommand) -> io::Result<Envelope> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(io::Error::other(
                "dispatch_blocking called from within an async runtime; use dispatch",
            ));
        }
        let runtime = match self.blocking_runtime.get() {
            Some(runtime) => runtime,
            None => {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                self.blocking_runtime.get_or_init(|| runtime)
            }
        };
        Ok(runtime.block_on(self.dispatch(command)))
    }

    async fn handle(&self, command: ManagerCommand, cancel: &CancellationToken) -> Result<Payload> {
        let ParsedCommand {
            action,
            session_id,
            user_id,
            request,
        } = command.parse(&self.default_user)?;

        let span = Span::current();
        span.record("user", user_id.as_str());
        if let Some(id) = &session_id {
            span.record("session_id", id.as_str());
        }
        debug!(%action, "Dispatching command");

        match request {
            Request::Extract(params) => self.handle_extract(session_id, params, cancel).await,
            Request::Generate(params) => self.handle_generate(session_id, params, cancel).await,
            Request::UpdateRl { mode, feedback } => {
                self.handle_update_rl(&user_id, mode, feedback).await
            }
            Request::Recommend => self.handle_recommend(&user_id).await,
            Request::Survey { preference } => self.handle_survey(&user_id, preference).await,
            Request::ResetPreferences => self.handle_reset(&user_id).await,
            Request::EndSession => self.handle_end_session(&user_id, session_id).await,
        }
    }

    async fn handle_extract(
        &self,
        session_id: Option<String>,
        params: ExtractParams,
        cancel: &CancellationToken,
    ) -> Result<Payload> {
        let request = ExtractionRequest {
            file_path: params.file_path,
            file_content: params.file_content,
            file_type: params.file_type,
        };
        let response = self
            .call_collaborator(self.extractor.extract(request), cancel)
            .await?;
        if !response.success {
            return Err(StudyError::Collaborator(
                response.error.unwrap_or_else(|| "Extraction failed".into()),
            ));
        }

        match &session_id {
            Some(id) => {
                let data = SessionData::new(response.chunks.clone(), response.summary.clone());
                let total_chars = data.total_chars();
                self.sessions.insert(id, data).await;
                info!(
                    chunks = response.chunks.len(),
                    total_chars, "Stored extracted chunks in session"
                );
            }
            None => warn!("No session_id provided; extracted chunks will not be retained"),
        }

        Ok(ExtractPayload {
            chunks: response.chunks,
            summary: response.summary,
            session_id,
        }
        .into())
    }

    async fn handle_generate(
        &self,
        session_id: Option<String>,
        params: GenerateParams,
        cancel: &CancellationToken,
    ) -> Result<Payload> {
        let session_id = session_id
            .ok_or_else(|| StudyError::Validation("generate requires session_id".into()))?;
        let data = self
            .sessions
            .get(&session_id)
            .await
            .ok_or_else(|| StudyError::SessionNotFound(session_id.clone()))?;

        let request = GenerationRequest {
            session_id,
            mode: params.mode,
            count: params.count,
            topic: params.topic,
            chunks: data.chunks.clone(),
            summary: data.summary.clone(),
        };
        let response = self
            .call_collaborator(self.generator.generate(request), cancel)
            .await?;
        if !response.success {
            return Err(StudyError::Collaborator(
                response.error.unwrap_or_else(|| "Generation failed".into()),
            ));
        }

        Ok(GeneratePayload {
            payload: response.payload,
        }
        .into())
    }

    async fn handle_update_rl(&self, user_id: &str, mode: ModeId, feedback: Feedback) -> Result<Payload> {
        let _guard = self.user_locks.lock(user_id).await;
        let state = self.store.load(user_id).await;
        let next = self.policy.update(&state, mode, feedback)?;
        self.store.save(user_id, &next).await?;

        info!(
            %mode,
            success = next.success(mode),
            failure = next.failure(mode),
            "Recorded feedback"
        );
        Ok(PolicyUpdate::new(&next, mode).into())
    }

    async fn handle_recommend(&self, user_id: &str) -> Result<Payload> {
        let state = self.store.load(user_id).await;
        let recommendation = self.policy.recommend(&state);
        debug!(mode = %recommendation.mode, source = ?recommendation.source, "Recommended mode");
        Ok(recommendation.into())
    }

    async fn handle_survey(&self, user_id: &str, preference: Option<ModeId>) -> Result<Payload> {
        let _guard = self.user_locks.lock(user_id).await;
        let state = self.store.load(user_id).await;
        let next = self.policy.record_survey(&state, preference);
        self.store.save(user_id, &next).await?;

        info!(preference = ?preference, "Recorded survey");
        Ok(SurveyPayload { preference }.into())
    }

    async fn handle_reset(&self, user_id: &str) -> Result<Payload> {
        let _guard = self.user_locks.lock(user_id).await;
        let state = self.store.reset(user_id).await?;

        info!("Reset policy state");
        Ok(PolicySummary::from(&state).into())
    }

    async fn handle_end_session(&self, user_id: &str, session_id: Option<String>) -> Result<Payload> {
        if let Some(id) = &session_id
            && self.sessions.remove(id).await.is_none()
        {
            debug!(session_id = %id, "Ending session with no stored context");
        }

        let _guard = self.user_locks.lock(user_id).await;
        let state = self.store.load(user_id).await;
        let next = self.policy.increment_session(&state);
        self.store.save(user_id, &next).await?;

        info!(total_sessions = next.total_sessions, "Session ended");
        Ok(PolicySummary::from(&next).into())
    }

    /// Await a collaborator under the router's deadline and `cancel`
    async fn call_collaborator<T>(
        &self,
        call: impl Future<Output = T>,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let timeout = self.collaborator_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StudyError::Cancelled),
            result = tokio::time::timeout(timeout, call) => {
                result.map_err(|_| StudyError::Timeout(timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{ExtractionResponse, GenerationResponse};
    use crate::policy::{BanditConfig, BetaSampler, PolicyState};
    use crate::store::MemoryPolicyStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct MeanSampler;

    impl BetaSampler for MeanSampler {
        fn sample(&self, alpha: f64, beta: f64) -> f64 {
            alpha / (alpha + beta)
        }
    }

    struct SlowGenerator(Duration);

    #[async_trait]
    impl Generator for SlowGenerator {
        async fn generate(&self, _request: GenerationRequest) -> GenerationResponse {
            tokio::time::sleep(self.0).await;
            GenerationResponse::ok(json!({"late": true}))
        }
    }

    struct PanickingExtractor;

    #[async_trait]
    impl Extractor for PanickingExtractor {
        async fn extract(&self, _request: ExtractionRequest) -> ExtractionResponse {
            panic!("extractor exploded");
        }
    }

    fn router() -> CommandRouter {
        CommandRouter::new(Arc::new(MemoryPolicyStore::new())).with_policy(
            BanditPolicy::with_sampler(BanditConfig::default(), Arc::new(MeanSampler)),
        )
    }

    async fn extract_into(router: &CommandRouter, session: &str) {
        let envelope = router
            .dispatch(
                ManagerCommand::new("extract")
                    .session(session)
                    .param("file_content", "Cells divide.\n\nDNA replicates."),
            )
            .await;
        assert!(envelope.success, "{:?}", envelope.error);
    }

    #[tokio::test]
    async fn test_unknown_action_is_an_envelope() {
        let envelope = router().dispatch(ManagerCommand::new("bogus")).await;
        assert!(!envelope.success);
        assert!(envelope.error.unwrap().contains("bogus"));
        assert_eq!(envelope.error_kind, Some(ErrorKind::Validation));
    }

    #[tokio::test]
    async fn test_extract_without_session_is_not_retained() {
        let router = router();
        let envelope = router
            .dispatch(ManagerCommand::new("extract").param("file_content", "Some notes."))
            .await;
        assert!(envelope.success);
        assert_eq!(envelope.to_json()["chunks"][0], "Some notes.");
        assert!(envelope.to_json()["session_id"].is_null());
        assert!(router.sessions().is_empty().await);
    }

    #[tokio::test]
    async fn test_extract_failure_is_collaborator_error() {
        let envelope = router()
            .dispatch(
                ManagerCommand::new("extract")
                    .session("s1")
                    .param("file_path", "/nonexistent/file.txt"),
            )
            .await;
        assert!(!envelope.success);
        assert_eq!(envelope.error_kind, Some(ErrorKind::Collaborator));
    }

    #[tokio::test]
    async fn test_generate_without_generator_configured() {
        let router = router();
        extract_into(&router, "s1").await;
        let envelope = router
            .dispatch(ManagerCommand::new("generate").session("s1"))
            .await;
        assert!(!envelope.success);
        assert_eq!(envelope.error_kind, Some(ErrorKind::Collaborator));
    }

    #[tokio::test]
    async fn test_generate_requires_session_id() {
        let envelope = router().dispatch(ManagerCommand::new("generate")).await;
        assert_eq!(envelope.error_kind, Some(ErrorKind::Validation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generator_timeout() {
        let router = router()
            .with_generator(Arc::new(SlowGenerator(Duration::from_secs(120))))
            .with_collaborator_timeout(Duration::from_secs(5));
        extract_into(&router, "s1").await;

        let envelope = router
            .dispatch(ManagerCommand::new("generate").session("s1"))
            .await;
        assert!(!envelope.success);
        assert!(envelope.error.unwrap().contains("timed out"));
        assert_eq!(envelope.error_kind, Some(ErrorKind::Collaborator));
    }

    #[tokio::test]
    async fn test_cancelled_generation() {
        let router = router().with_generator(Arc::new(SlowGenerator(Duration::from_secs(30))));
        extract_into(&router, "s1").await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let envelope = router
            .dispatch_with_cancel(ManagerCommand::new("generate").session("s1"), &cancel)
            .await;
        assert!(!envelope.success);
        assert_eq!(
            envelope.error.as_deref(),
            Some("Collaborator call cancelled")
        );
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_internal_error() {
        let router = router().with_extractor(Arc::new(PanickingExtractor));
        let envelope = router
            .dispatch(ManagerCommand::new("extract").param("file_content", "x"))
            .await;
        assert!(!envelope.success);
        assert_eq!(envelope.error_kind, Some(ErrorKind::Internal));

        // router still usable afterwards
        let envelope = router.dispatch(ManagerCommand::new("recommend")).await;
        assert!(envelope.success);
    }

    #[tokio::test]
    async fn test_survey_then_cold_start_recommend() {
        let router = router();
        let envelope = router
            .dispatch(ManagerCommand::new("survey").param("preference", "interactive"))
            .await;
        assert!(envelope.success);
        assert_eq!(envelope.to_json()["preference"], "interactive");

        let json = router.dispatch(ManagerCommand::new("recommend")).await.to_json();
        assert_eq!(json["mode"], "interactive");
        assert_eq!(json["source"], "cold_start");
    }

    #[tokio::test]
    async fn test_end_session_counts_and_evicts() {
        let router = router();
        extract_into(&router, "s1").await;

        let json = router
            .dispatch(ManagerCommand::new("end_session").session("s1"))
            .await
            .to_json();
        assert_eq!(json["success"], true);
        assert_eq!(json["total_sessions"], 1);
        assert!(!router.sessions().contains("s1").await);

        let state = router.store().load(DEFAULT_USER).await;
        assert_eq!(state.total_sessions, 1);
    }

    #[tokio::test]
    async fn test_cold_start_window_closes_after_sessions() {
        let router = router();
        router
            .dispatch(ManagerCommand::new("survey").param("preference", "interactive"))
            .await;
        for _ in 0..3 {
            router.dispatch(ManagerCommand::new("end_session")).await;
        }
        // feedback makes quiz the best mean once sampling takes over
        router
            .dispatch(
                ManagerCommand::new("update_rl")
                    .param("mode", "quiz")
                    .param("feedback", 1.0),
            )
            .await;

        let json = router.dispatch(ManagerCommand::new("recommend")).await.to_json();
        assert_eq!(json["source"], "sampled");
        assert_eq!(json["mode"], "quiz");
    }

    #[tokio::test]
    async fn test_reset_preferences() {
        let router = router();
        router
            .dispatch(
                ManagerCommand::new("update_rl")
                    .user("alice")
                    .param("mode", "flashcard")
                    .param("feedback", true),
            )
            .await;

        let envelope = router
            .dispatch(ManagerCommand::new("reset_preferences").user("alice"))
            .await;
        assert!(envelope.success);
        assert_eq!(router.store().load("alice").await, PolicyState::new());
    }

    #[tokio::test]
    async fn test_dispatch_all_preserves_order() {
        let router = router();
        let envelopes = router
            .dispatch_all(vec![
                ManagerCommand::new("recommend"),
                ManagerCommand::new("bogus"),
                ManagerCommand::new("survey"),
            ])
            .await;
        assert_eq!(envelopes.len(), 3);
        assert!(envelopes[0].success);
        assert!(!envelopes[1].success);
        assert!(envelopes[2].success);
    }

    #[test]
    fn test_dispatch_blocking() {
        let router = router();
        let envelope = router
            .dispatch_blocking(
                ManagerCommand::new("update_rl")
                    .param("mode", "quiz")
                    .param("feedback", 0.5),
            )
            .unwrap();
        assert!(envelope.success);
        assert_eq!(envelope.to_json()["mode_success"], 1.5);

        let envelope = router.dispatch_blocking(ManagerCommand::new("recommend")).unwrap();
        assert!(envelope.success);
    }

    #[tokio::test]
    async fn test_dispatch_blocking_refuses_inside_runtime() {
        let router = router();
        assert!(router.dispatch_blocking(ManagerCommand::new("recommend")).is_err());
    }
}
