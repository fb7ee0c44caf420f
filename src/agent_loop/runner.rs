//! The conversation driver: one user prompt in, one answer (or failure) out.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::config::SqlTalkConfig;
use crate::error::SqlTalkError;
use crate::provider::{ModelProvider, ModelReply, ProviderRequest, ProviderResponse};
use crate::session::{Session, SessionMessage};
use crate::tools::{ToolCallRequest, ToolCatalog};
use crate::trace::TraceBuilder;
use crate::types::{GenerationSettings, ModelMessage, Usage};
use crate::util::retry::RetryPolicy;
use crate::util::timeout::with_timeout;

use super::events::{TurnEventEmitter, TurnEventPayload, TurnEventSink};
use super::types::{
    TurnId, TurnLimits, TurnMachine, TurnOutcome, TurnState, TurnStatus,
    DEFAULT_SYSTEM_INSTRUCTION,
};

const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(120);

/// Drives turns against a model provider and a session's database.
///
/// The driver holds no conversation state; everything a turn reads or
/// appends lives in the [`Session`] passed to [`run_turn`](Self::run_turn).
pub struct ConversationDriver {
    provider: Arc<dyn ModelProvider>,
    catalog: ToolCatalog,
    limits: TurnLimits,
    settings: GenerationSettings,
    system_instruction: Option<String>,
    retry_policy: RetryPolicy,
    model_timeout: Duration,
    event_sink: Option<TurnEventSink>,
    cancel: CancellationToken,
}

impl ConversationDriver {
    pub fn new(provider: Arc<dyn ModelProvider>, catalog: ToolCatalog) -> Self {
        Self {
            provider,
            catalog,
            limits: TurnLimits::default(),
            settings: GenerationSettings::builder().temperature(0.0).build(),
            system_instruction: Some(DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            retry_policy: RetryPolicy::default(),
            model_timeout: DEFAULT_MODEL_TIMEOUT,
            event_sink: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Build a driver with limits, sampling and timeouts taken from `config`.
    pub fn from_config(provider: Arc<dyn ModelProvider>, config: &SqlTalkConfig) -> Self {
        let settings = config.settings();
        let mut driver = Self::new(provider, ToolCatalog::new())
            .with_limits(TurnLimits {
                max_tool_calls: settings.max_tool_calls,
                ..TurnLimits::default()
            })
            .with_settings(
                GenerationSettings::builder()
                    .temperature(settings.temperature)
                    .build(),
            )
            .with_retry_policy(RetryPolicy::default().with_max_attempts(settings.max_attempts))
            .with_model_timeout(config.model_timeout());
        if let Some(instruction) = &settings.system_instruction {
            driver = driver.with_system_instruction(instruction.clone());
        }
        driver
    }

    pub fn with_limits(mut self, limits: TurnLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the system instruction. An empty string sends none.
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        let instruction = instruction.into();
        self.system_instruction = (!instruction.trim().is_empty()).then_some(instruction);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn with_event_sink(mut self, sink: TurnEventSink) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Share a cancellation token with the caller. Canceling it fails the
    /// current turn and every later one until a fresh token is installed.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn limits(&self) -> TurnLimits {
        self.limits
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn provider(&self) -> &dyn ModelProvider {
        self.provider.as_ref()
    }

    /// Run one user prompt to completion.
    ///
    /// Never returns an error: failures end the turn with a notice the user
    /// can read, and the model history is rolled back to where it stood
    /// before the prompt.
    pub async fn run_turn(&self, session: &mut Session, prompt: &str) -> TurnOutcome {
        self.run_turn_with_cancellation(session, prompt, &self.cancel).await
    }

    /// Like [`run_turn`](Self::run_turn), but watch `cancel` instead of the
    /// driver's own token. Lets a caller arm a fresh token per turn.
    pub async fn run_turn_with_cancellation(
        &self,
        session: &mut Session,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let turn_id = Uuid::new_v4();
        let span = tracing::info_span!("turn", session_id = %session.id(), %turn_id);
        self.run_turn_inner(turn_id, session, prompt, cancel)
            .instrument(span)
            .await
    }

    async fn run_turn_inner(
        &self,
        turn_id: TurnId,
        session: &mut Session,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let mut turn = TurnProgress::new(TurnEventEmitter::new(turn_id, self.event_sink.clone()));
        turn.emitter.emit(TurnEventPayload::Started {
            session_id: session.id().to_string(),
            prompt: prompt.to_string(),
        });

        let checkpoint = session.history().len();
        session.push_transcript(SessionMessage::user(prompt));
        session.push_history(ModelMessage::user(prompt));

        match self.drive(session, &mut turn, cancel).await {
            Ok(answer) => {
                session.push_history(ModelMessage::assistant(answer.clone()));
                session.push_transcript(SessionMessage::assistant(
                    answer.clone(),
                    turn.trace.clone(),
                ));
                info!(
                    tool_calls = turn.trace.len(),
                    total_tokens = turn.usage.total_tokens,
                    "turn completed"
                );
                turn.emitter.emit(TurnEventPayload::Completed {
                    answer: answer.clone(),
                });
                turn.finish(TurnStatus::Completed, answer, None)
            }
            Err(err) => {
                if let Some(from) = turn.machine.fail() {
                    turn.emitter.emit(TurnEventPayload::StateChanged {
                        from,
                        to: TurnState::Failed,
                    });
                }
                session.truncate_history(checkpoint);
                let notice = failure_notice(&err);
                session.push_transcript(SessionMessage::assistant(notice.clone(), turn.trace.clone()));
                warn!(
                    error = %err,
                    category = ?err.category(),
                    tool_calls = turn.trace.len(),
                    "turn failed"
                );
                turn.emitter.emit(TurnEventPayload::Failed {
                    error: err.to_string(),
                });
                turn.finish(TurnStatus::Failed, notice, Some(err))
            }
        }
    }

    /// The state machine proper. Returns the final answer text.
    async fn drive(
        &self,
        session: &mut Session,
        turn: &mut TurnProgress,
        cancel: &CancellationToken,
    ) -> Result<String, SqlTalkError> {
        let mut malformed = 0usize;
        let mut iteration = 0usize;

        loop {
            iteration += 1;
            check_canceled(cancel)?;
            debug!(iteration, history = session.history().len(), "awaiting model");

            let response = match self.call_model(session.history(), cancel).await {
                Ok(response) => response,
                Err(SqlTalkError::MalformedResponse(reason))
                    if malformed < self.limits.max_malformed_replies =>
                {
                    malformed += 1;
                    warn!(iteration, malformed, %reason, "malformed model reply, asking again");
                    continue;
                }
                Err(err) => return Err(err),
            };
            turn.usage.merge(&response.usage);

            let (text, calls) = match response.reply {
                ModelReply::Text(text) => {
                    turn.transition(TurnState::FinalAnswer)?;
                    return Ok(text);
                }
                ModelReply::ToolCalls { text, calls } => (text, calls),
            };

            turn.transition(TurnState::ToolCallPending)?;
            session.push_history(ModelMessage::assistant_tool_calls(text, &calls));

            let mut pending = calls.into_iter().peekable();
            while let Some(call) = pending.next() {
                if turn.trace.len() >= self.limits.max_tool_calls {
                    return Err(SqlTalkError::TooManyToolCalls {
                        limit: self.limits.max_tool_calls,
                    });
                }
                check_canceled(cancel)?;
                turn.transition(TurnState::Dispatching)?;

                debug!(iteration, tool = %call.name, call_id = %call.id, "dispatching");
                turn.emitter.emit(TurnEventPayload::ToolCallStarted { call: call.clone() });

                let request = ToolCallRequest::from(call);
                let result = self.catalog.dispatch(session.gateway(), &request)?;
                session.push_history(ModelMessage::tool_result(
                    result.call_id.clone(),
                    result.name.as_ref(),
                    result.to_response_payload(),
                    result.is_error(),
                ));
                turn.emitter.emit(TurnEventPayload::ToolCallCompleted {
                    result: result.clone(),
                });
                turn.trace.record(result);

                let next = if pending.peek().is_some() {
                    TurnState::ToolCallPending
                } else {
                    TurnState::AwaitingModel
                };
                turn.transition(next)?;
            }
        }
    }

    async fn call_model(
        &self,
        history: &[ModelMessage],
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, SqlTalkError> {
        let request = ProviderRequest {
            system: self.system_instruction.clone(),
            messages: history.to_vec(),
            tools: self.catalog.declarations().to_vec(),
            settings: self.settings.clone(),
        };
        debug!(
            provider = self.provider.provider_name(),
            model = self.provider.model_id(),
            messages = request.messages.len(),
            "calling model"
        );

        generate_with_policy(
            self.provider.as_ref(),
            &request,
            &self.retry_policy,
            self.model_timeout,
            cancel,
        )
        .await
    }
}

/// One model call under a retry policy and a per-attempt timeout, abandoned
/// as soon as `cancel` fires.
pub(crate) async fn generate_with_policy(
    provider: &dyn ModelProvider,
    request: &ProviderRequest,
    retry_policy: &RetryPolicy,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ProviderResponse, SqlTalkError> {
    let call = retry_policy.execute(|| with_timeout(timeout, provider.generate(request)));
    tokio::select! {
        _ = cancel.cancelled() => Err(SqlTalkError::Canceled),
        result = call => result,
    }
}

fn check_canceled(cancel: &CancellationToken) -> Result<(), SqlTalkError> {
    if cancel.is_cancelled() {
        return Err(SqlTalkError::Canceled);
    }
    Ok(())
}

/// Mutable bookkeeping for one turn.
struct TurnProgress {
    machine: TurnMachine,
    emitter: TurnEventEmitter,
    trace: TraceBuilder,
    usage: Usage,
}

impl TurnProgress {
    fn new(emitter: TurnEventEmitter) -> Self {
        Self {
            machine: TurnMachine::new(),
            emitter,
            trace: TraceBuilder::new(),
            usage: Usage::default(),
        }
    }

    fn transition(&mut self, next: TurnState) -> Result<(), SqlTalkError> {
        let from = self.machine.transition(next)?;
        self.emitter
            .emit(TurnEventPayload::StateChanged { from, to: next });
        Ok(())
    }

    fn finish(self, status: TurnStatus, answer: String, error: Option<SqlTalkError>) -> TurnOutcome {
        TurnOutcome {
            turn_id: self.emitter.turn_id(),
            status,
            answer,
            trace: self.trace,
            error,
            states: self.machine.path().to_vec(),
            usage: self.usage,
            finished_at: Utc::now(),
        }
    }
}

/// The message shown in place of an answer when a turn fails.
pub fn failure_notice(err: &SqlTalkError) -> String {
    format!(
        "Something went wrong! We encountered an unexpected error while trying to process \
         your request. Please try rephrasing your question. Details:\n\n{err}"
    )
}
