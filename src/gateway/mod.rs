//! Completion gateway: the service boundary and the model-family-aware invoker.

pub mod error;
pub mod openai;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::{Duration, Instant};

use usage::{CallPhase, CompletionCallRecord};

use crate::telemetry::TelemetrySink;

pub use error::{ErrorContext, ProviderError, TimeoutKind};
pub use openai::{CompletionService, OpenAiResponsesAdapter};
pub use types::*;

/// Call options the caller controls; the invoker adjusts them per model family.
#[derive(Debug, Clone, Copy)]
pub struct InvokeOptions {
    pub timeout: Duration,
    pub temperature: Option<f32>,
    pub max_output_tokens: u32,
}

impl InvokeOptions {
    pub fn new(timeout: Duration, max_output_tokens: u32) -> Self {
        Self {
            timeout,
            temperature: None,
            max_output_tokens,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }
}

/// Shapes requests per model family and reports every attempt to telemetry.
///
/// The invoker retries only for the unsupported-temperature rejection.
/// Multi-attempt retry belongs to the orchestrator.
#[derive(Clone)]
pub struct CompletionInvoker {
    service: Arc<dyn CompletionService>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl CompletionInvoker {
    pub fn new(service: Arc<dyn CompletionService>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self { service, telemetry }
    }

    /// Build the wire request for `model` from caller options.
    pub fn shape(
        model: &str,
        messages: Vec<Message>,
        opts: InvokeOptions,
        attribution: Attribution,
    ) -> CompletionRequest {
        let family = ModelFamily::of(model);
        let mut req = CompletionRequest::new(model, messages, attribution)
            .timeout(opts.timeout)
            .max_output_tokens(opts.max_output_tokens.max(family.min_output_tokens()));
        if family.accepts_temperature() {
            req.temperature = opts.temperature;
        }
        req.reasoning_effort = family.reasoning_effort();
        req
    }

    pub async fn invoke(
        &self,
        model: &str,
        messages: Vec<Message>,
        opts: InvokeOptions,
        attribution: Attribution,
    ) -> Result<CompletionResponse, ProviderError> {
        let mut req = Self::shape(model, messages, opts, attribution);

        match self.attempt(&req, 1).await {
            Err(err) if req.temperature.is_some() && err.is_unsupported_temperature() => {
                tracing::info!(
                    model = %req.model,
                    request_id = %req.attribution.request_id,
                    "temperature rejected; retrying without it"
                );
                req.temperature = None;
                self.attempt(&req, 2).await
            }
            other => other,
        }
    }

    /// Minimal reachability check for a model.
    pub async fn probe(&self, model: &str, timeout: Duration) -> Result<(), ProviderError> {
        let messages = vec![Message::user_text("Reply with OK.")];
        let opts = InvokeOptions::new(timeout, 16);
        self.invoke(model, messages, opts, Attribution::new("probe"))
            .await
            .map(|_| ())
    }

    async fn attempt(
        &self,
        req: &CompletionRequest,
        attempt: u32,
    ) -> Result<CompletionResponse, ProviderError> {
        let record = |phase| {
            CompletionCallRecord::new(
                phase,
                req.attribution.request_id.clone(),
                req.attribution.flow,
                req.model.clone(),
            )
            .attempt(attempt)
            .shaped(req.temperature.is_some(), req.max_output_tokens)
        };

        self.telemetry.record(record(CallPhase::Start).into_event());
        let start = Instant::now();
        let result = self.service.complete(req).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(resp) => {
                let event = record(CallPhase::Complete)
                    .tokens(resp.input_tokens, resp.output_tokens)
                    .latency(elapsed_ms)
                    .into_event();
                self.telemetry.record(event);
            }
            Err(err) => {
                tracing::debug!(
                    model = %req.model,
                    flow = req.attribution.flow,
                    error = %err,
                    "completion attempt failed"
                );
                let event = record(CallPhase::Error)
                    .latency(elapsed_ms)
                    .error(err)
                    .into_event();
                self.telemetry.record(event);
            }
        }
        result
    }
}
