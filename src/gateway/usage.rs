//! Per-attempt call records.
//!
//! The invoker describes every completion attempt with a [`CompletionCallRecord`]
//! and hands it to the telemetry sink as a `completion_call` event. This keeps
//! the gateway decoupled from where telemetry ends up:
//! - the CLI writes JSON lines
//! - tests use a recording sink

use chrono::{DateTime, Utc};

use super::error::ProviderError;
use crate::telemetry::TelemetryEvent;

/// Phase of a completion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Start,
    Complete,
    Error,
}

impl CallPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallPhase::Start => "start",
            CallPhase::Complete => "complete",
            CallPhase::Error => "error",
        }
    }
}

/// Record of one completion attempt.
#[derive(Debug, Clone)]
pub struct CompletionCallRecord {
    pub phase: CallPhase,
    pub request_id: String,
    /// Which code path made this call.
    pub flow: &'static str,
    pub model: String,
    /// 1-based attempt within the invoker (2 means the temperature fallback).
    pub attempt: u32,
    pub temperature_sent: bool,
    pub max_output_tokens: u32,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub latency_ms: Option<u64>,
    pub error_code: Option<String>,
    pub error: Option<String>,
    pub timeout_type: Option<&'static str>,
    pub timestamp: DateTime<Utc>,
}

impl CompletionCallRecord {
    pub fn new(
        phase: CallPhase,
        request_id: impl Into<String>,
        flow: &'static str,
        model: impl Into<String>,
    ) -> Self {
        Self {
            phase,
            request_id: request_id.into(),
            flow,
            model: model.into(),
            attempt: 1,
            temperature_sent: false,
            max_output_tokens: 0,
            input_tokens: None,
            output_tokens: None,
            latency_ms: None,
            error_code: None,
            error: None,
            timeout_type: None,
            timestamp: Utc::now(),
        }
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn shaped(mut self, temperature_sent: bool, max_output_tokens: u32) -> Self {
        self.temperature_sent = temperature_sent;
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn tokens(mut self, input: Option<u32>, output: Option<u32>) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn latency(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }

    pub fn error(mut self, err: &ProviderError) -> Self {
        self.phase = CallPhase::Error;
        self.error_code = Some(err.code().to_string());
        self.error = Some(err.to_string());
        self.timeout_type = err.timeout_kind().map(|k| k.as_str());
        self
    }

    pub fn into_event(self) -> TelemetryEvent {
        let mut event = TelemetryEvent::new("completion_call")
            .field("phase", self.phase.as_str())
            .field("request_id", self.request_id)
            .field("flow", self.flow)
            .field("model", self.model)
            .field("attempt", self.attempt)
            .field("temperature_sent", self.temperature_sent)
            .field("max_output_tokens", self.max_output_tokens)
            .field("ts", self.timestamp.to_rfc3339());
        if let Some(v) = self.input_tokens {
            event = event.field("input_tokens", v);
        }
        if let Some(v) = self.output_tokens {
            event = event.field("output_tokens", v);
        }
        if let Some(v) = self.latency_ms {
            event = event.field("latency_ms", v);
        }
        if let Some(v) = self.error_code {
            event = event.field("error_code", v);
        }
        if let Some(v) = self.error {
            event = event.field("error", v);
        }
        if let Some(v) = self.timeout_type {
            event = event.field("timeout_type", v);
        }
        event
    }
}
