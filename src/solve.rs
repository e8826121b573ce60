//! Solve request orchestration.
//!
//! One [`SolveContext`] per process holds the collaborators and the
//! single-solve gate. A solve walks
//! `Idle → Building → Attempting → Parsing → Validating → Delivering → Done`
//! and can end in `Cancelled` from any state before `Done`.
//!
//! Delivery is two clipboard writes: the full annotated output, then (after
//! the settle delay) the distilled final answer. Cancellation is checked
//! before and after every attempt, before the first write and between the
//! two writes. A write already issued is never interrupted.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;

use crate::clipboard::{ClipboardContent, ClipboardError, ClipboardTransport, StatusSurface};
use crate::config::{ConfigError, SolverConfig};
use crate::gateway::{
    Attribution, CompletionInvoker, InvokeOptions, Message, ModelFamily, ProviderError,
};
use crate::graph::interval::split_work_final;
use crate::graph::{parse_graph_evidence, validate_consistency, ConsistencyMismatch, GraphEvidence};
use crate::prompts::{build_solve_messages, ProblemInput, PromptInputs};
use crate::reference::{ReferenceKind, ReferenceStore, ResolvedReference};
use crate::response::{extract_final_answer_text, has_final_answer_header, postprocess};
use crate::telemetry::{TelemetryEvent, TelemetrySink};

pub const CANCELED_STATUS: &str = "Solve canceled: model switched.";

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative cancellation flag shared between a solve and whoever may
/// cancel it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn same(&self, other: &CancelFlag) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

// =============================================================================
// Outcomes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveState {
    Idle,
    Building,
    Attempting,
    Parsing,
    Validating,
    Delivering,
    Done,
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    #[error("clipboard read failed: {0}")]
    Clipboard(#[from] ClipboardError),

    #[error("no image/text in clipboard")]
    EmptyInput,

    #[error("{0}")]
    Provider(#[from] ProviderError),

    #[error("Empty model response.")]
    EmptyResponse,

    #[error("Model returned empty output.")]
    EmptyOutput,

    #[error("clipboard write failed")]
    WriteFailed,
}

impl SolveError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Clipboard(_) => "clipboard_read",
            Self::EmptyInput => "empty_input",
            Self::Provider(e) => e.code(),
            Self::EmptyResponse => "empty_response",
            Self::EmptyOutput => "empty_output",
            Self::WriteFailed => "clipboard_write",
        }
    }
}

/// What a successful solve produced.
#[derive(Debug, Clone)]
pub struct SolveReport {
    pub request_id: String,
    pub model: String,
    pub attempts: u32,
    /// Post-processed output, as delivered by the first write (minus any
    /// reference prefix).
    pub output: String,
    pub final_answer: Option<String>,
    pub reference: Option<ReferenceKind>,
    pub graph_evidence: Option<GraphEvidence>,
    pub mismatches: Vec<ConsistencyMismatch>,
    pub writes: u32,
}

#[derive(Debug)]
pub enum SolveOutcome {
    Succeeded(SolveReport),
    Failed(SolveError),
    Cancelled,
    /// Another solve holds the gate; nothing was done.
    Busy,
}

impl SolveOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Result of a model switch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSwitch {
    Activated { old: String, new: String },
    Rejected(String),
    Busy,
}

/// Reachability of the models the session depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    pub selected_model_online: bool,
    pub graph_extraction_online: bool,
}

// =============================================================================
// Context
// =============================================================================

pub struct SolveContext {
    config: RwLock<SolverConfig>,
    config_path: Option<PathBuf>,
    invoker: CompletionInvoker,
    store: Arc<ReferenceStore>,
    clipboard: Arc<dyn ClipboardTransport>,
    status: Arc<dyn StatusSurface>,
    telemetry: Arc<dyn TelemetrySink>,
    gate: tokio::sync::Mutex<()>,
    model_gate: tokio::sync::Mutex<()>,
    active: Mutex<Option<CancelFlag>>,
}

/// Per-solve values fixed once the request is built.
struct Plan {
    request_id: String,
    model: String,
    config: SolverConfig,
    reference: ResolvedReference,
    problem_text: Option<String>,
    request_grammar: bool,
}

impl SolveContext {
    pub fn new(
        config: SolverConfig,
        invoker: CompletionInvoker,
        store: Arc<ReferenceStore>,
        clipboard: Arc<dyn ClipboardTransport>,
        status: Arc<dyn StatusSurface>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            config_path: None,
            invoker,
            store,
            clipboard,
            status,
            telemetry,
            gate: tokio::sync::Mutex::new(()),
            model_gate: tokio::sync::Mutex::new(()),
            active: Mutex::new(None),
        }
    }

    /// Persist model changes to `path`.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> SolverConfig {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn active_model(&self) -> String {
        self.config().model
    }

    pub fn invoker(&self) -> &CompletionInvoker {
        &self.invoker
    }

    pub fn store(&self) -> &Arc<ReferenceStore> {
        &self.store
    }

    /// Signal the in-flight solve, if any. Returns whether one was signalled.
    pub fn cancel_in_flight(&self) -> bool {
        let slot = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(flag) => {
                flag.cancel();
                true
            }
            None => false,
        }
    }

    // -------------------------------------------------------------------------
    // Solve
    // -------------------------------------------------------------------------

    /// Solve whatever the clipboard holds.
    pub async fn solve(&self) -> SolveOutcome {
        let Ok(_guard) = self.gate.try_lock() else {
            return self.reject_busy();
        };
        let input = match self.clipboard.read() {
            Ok(ClipboardContent::Text(t)) if !t.trim().is_empty() => ProblemInput::Text(t),
            Ok(ClipboardContent::Image(img)) => ProblemInput::Image(img),
            Ok(_) => return self.fail(SolveError::EmptyInput, "", 0),
            Err(e) => return self.fail(SolveError::Clipboard(e), "", 0),
        };
        self.run_registered(input, CancelFlag::new()).await
    }

    /// Solve `input` directly, bypassing the clipboard read.
    pub async fn solve_input(&self, input: ProblemInput) -> SolveOutcome {
        self.solve_with_cancel(input, CancelFlag::new()).await
    }

    /// Solve `input` under a caller-provided cancellation flag.
    pub async fn solve_with_cancel(&self, input: ProblemInput, cancel: CancelFlag) -> SolveOutcome {
        let Ok(_guard) = self.gate.try_lock() else {
            return self.reject_busy();
        };
        self.run_registered(input, cancel).await
    }

    fn reject_busy(&self) -> SolveOutcome {
        tracing::info!("solve already in flight; rejecting");
        self.telemetry.record(TelemetryEvent::new("solve_rejected_busy"));
        SolveOutcome::Busy
    }

    async fn run_registered(&self, input: ProblemInput, cancel: CancelFlag) -> SolveOutcome {
        self.set_active(Some(cancel.clone()));
        let outcome = self.run(input, &cancel).await;
        self.clear_active(&cancel);
        outcome
    }

    fn set_active(&self, flag: Option<CancelFlag>) {
        let mut slot = self.active.lock().unwrap_or_else(|e| e.into_inner());
        *slot = flag;
    }

    fn clear_active(&self, flag: &CancelFlag) {
        let mut slot = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|f| f.same(flag)) {
            *slot = None;
        }
    }

    fn enter(&self, request_id: &str, state: SolveState) {
        tracing::debug!(request_id = %request_id, state = ?state, "solve state");
    }

    async fn run(&self, input: ProblemInput, cancel: &CancelFlag) -> SolveOutcome {
        let request_id = uuid::Uuid::new_v4().simple().to_string();
        self.enter(&request_id, SolveState::Building);
        if cancel.is_cancelled() {
            return self.cancelled(&request_id, SolveState::Building);
        }

        let plan = self.build_plan(request_id, &input);
        let cached_evidence = plan
            .reference
            .record
            .graph_evidence
            .as_deref()
            .filter(|_| plan.reference.record.graph_mode);
        let messages = build_solve_messages(&PromptInputs {
            input: &input,
            reference: plan.reference.payload.as_ref(),
            graph_mode: plan.reference.record.graph_mode,
            cached_evidence,
            forced_visual_extraction: plan.config.enable_forced_visual_extraction,
            request_graph_grammar: plan.request_grammar,
        });

        self.enter(&plan.request_id, SolveState::Attempting);
        let (candidate, attempts) = match self.attempt_loop(&plan, messages, cancel).await {
            Attempted::Candidate { text, attempts } => (text, attempts),
            Attempted::Cancelled(state) => return self.cancelled(&plan.request_id, state),
            Attempted::Failed { error, attempts } => {
                return self.fail(error, &plan.request_id, attempts)
            }
        };

        self.enter(&plan.request_id, SolveState::Parsing);
        let final_answer = has_final_answer_header(&candidate)
            .then(|| extract_final_answer_text(&candidate))
            .filter(|f| !f.is_empty());

        self.enter(&plan.request_id, SolveState::Validating);
        let (graph_evidence, mismatches) = self.validate(&plan, &candidate);

        self.enter(&plan.request_id, SolveState::Delivering);
        if cancel.is_cancelled() {
            return self.cancelled(&plan.request_id, SolveState::Delivering);
        }
        let kind = plan.reference.payload.as_ref().and(plan.reference.record.kind);
        let first = match kind {
            Some(k) => format!("[REF {}]\n{candidate}", k.as_str()),
            None => candidate.clone(),
        };
        if !self.clipboard.write(&first) {
            return self.fail(SolveError::WriteFailed, &plan.request_id, attempts);
        }
        let mut writes = 1;

        if let Some(answer) = &final_answer {
            tokio::time::sleep(plan.config.clipboard_settle()).await;
            if cancel.is_cancelled() {
                return self.cancelled(&plan.request_id, SolveState::Delivering);
            }
            let second = match kind {
                Some(k) => format!(
                    "* REF {}: {}\n{answer}",
                    k.as_str(),
                    plan.reference.record.summary
                ),
                None => answer.clone(),
            };
            if !self.clipboard.write(&second) {
                return self.fail(SolveError::WriteFailed, &plan.request_id, attempts);
            }
            writes += 1;
        }

        self.enter(&plan.request_id, SolveState::Done);
        self.telemetry.record(
            TelemetryEvent::new("solve_complete")
                .field("request_id", plan.request_id.clone())
                .field("model", plan.model.clone())
                .field("attempts", attempts)
                .field("writes", writes)
                .field("reference", kind.map(|k| k.as_str()).unwrap_or("none")),
        );
        if plan.config.notify_on_complete {
            self.status.announce("Solved → copied to clipboard");
        }
        tracing::info!(request_id = %plan.request_id, attempts, writes, "solve complete");

        SolveOutcome::Succeeded(SolveReport {
            request_id: plan.request_id,
            model: plan.model,
            attempts,
            output: candidate,
            final_answer,
            reference: kind,
            graph_evidence,
            mismatches,
            writes,
        })
    }

    fn build_plan(&self, request_id: String, input: &ProblemInput) -> Plan {
        let config = self.config();
        let reference = self.store.resolve();
        if let Some(reason) = &reference.cleared_reason {
            self.status.announce(reason);
        }
        Plan {
            request_id,
            model: config.model.clone(),
            problem_text: input.as_text().map(str::to_string),
            request_grammar: config.enable_graph_evidence_parsing,
            reference,
            config,
        }
    }

    fn attempt_budget(config: &SolverConfig, model: &str) -> u32 {
        if ModelFamily::of(model).is_no_retry() {
            config.no_retry_family_attempts.max(1)
        } else {
            config.retries.saturating_add(1)
        }
    }

    async fn attempt_loop(
        &self,
        plan: &Plan,
        messages: Vec<Message>,
        cancel: &CancelFlag,
    ) -> Attempted {
        let budget = Self::attempt_budget(&plan.config, &plan.model);
        let opts = InvokeOptions::new(plan.config.request_timeout(), plan.config.max_output_tokens)
            .temperature(plan.config.temperature as f32);

        let mut last_error = SolveError::EmptyResponse;
        for attempt in 1..=budget {
            if cancel.is_cancelled() {
                return Attempted::Cancelled(SolveState::Attempting);
            }

            let attribution = Attribution::new("solve").with_request_id(plan.request_id.clone());
            let result = self
                .invoker
                .invoke(&plan.model, messages.clone(), opts, attribution)
                .await;
            if cancel.is_cancelled() {
                return Attempted::Cancelled(SolveState::Attempting);
            }
            let resp = match result {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!(
                        request_id = %plan.request_id,
                        attempt,
                        budget,
                        error = %e,
                        "solve attempt failed"
                    );
                    let retryable = e.is_retryable();
                    last_error = SolveError::Provider(e);
                    if !retryable {
                        return Attempted::Failed {
                            error: last_error,
                            attempts: attempt,
                        };
                    }
                    continue;
                }
            };

            if resp.content.trim().is_empty() {
                tracing::warn!(request_id = %plan.request_id, attempt, "empty model response");
                last_error = SolveError::EmptyResponse;
                continue;
            }

            let text = postprocess(&resp.content, plan.problem_text.as_deref());
            if text.is_empty() {
                tracing::warn!(request_id = %plan.request_id, attempt, "output empty after cleanup");
                last_error = SolveError::EmptyOutput;
                continue;
            }

            if plan.request_grammar
                && plan.config.retry_on_weak_graph_evidence
                && attempt < budget
            {
                if let Err(e) = parse_graph_evidence(&text) {
                    tracing::info!(
                        request_id = %plan.request_id,
                        attempt,
                        code = e.code(),
                        "weak graph evidence; retrying"
                    );
                    self.telemetry.record(
                        TelemetryEvent::new("graph_evidence_weak_retry")
                            .field("request_id", plan.request_id.clone())
                            .field("attempt", attempt)
                            .field("code", e.code()),
                    );
                    continue;
                }
            }

            return Attempted::Candidate {
                text,
                attempts: attempt,
            };
        }
        Attempted::Failed {
            error: last_error,
            attempts: budget,
        }
    }

    fn validate(
        &self,
        plan: &Plan,
        candidate: &str,
    ) -> (Option<GraphEvidence>, Vec<ConsistencyMismatch>) {
        if !plan.request_grammar {
            return (None, Vec::new());
        }
        let evidence = match parse_graph_evidence(candidate) {
            Ok(ev) => ev,
            Err(e) => {
                tracing::debug!(request_id = %plan.request_id, code = e.code(), error = %e, "no usable graph evidence");
                self.telemetry.record(
                    TelemetryEvent::new("graph_evidence_parse_fail")
                        .field("request_id", plan.request_id.clone())
                        .field("stage", "solve")
                        .field("code", e.code())
                        .field("error", e.to_string()),
                );
                return (None, Vec::new());
            }
        };

        if !plan.config.enable_consistency_warnings {
            return (Some(evidence), Vec::new());
        }
        let (work, final_text) = split_work_final(candidate);
        let mismatches = validate_consistency(&evidence, &work, &final_text);
        if !mismatches.is_empty() {
            tracing::warn!(
                request_id = %plan.request_id,
                count = mismatches.len(),
                "graph evidence disagrees with the stated answer"
            );
            self.telemetry.record(
                TelemetryEvent::new("validator_mismatch_warning")
                    .field("request_id", plan.request_id.clone())
                    .field_json("mismatches", &mismatches),
            );
        }
        (Some(evidence), mismatches)
    }

    fn cancelled(&self, request_id: &str, state: SolveState) -> SolveOutcome {
        self.enter(request_id, SolveState::Cancelled);
        tracing::info!(request_id = %request_id, from = ?state, "solve cancelled");
        self.telemetry.record(
            TelemetryEvent::new("solve_cancelled")
                .field("request_id", request_id)
                .field_json("state", &state),
        );
        self.status.announce(CANCELED_STATUS);
        SolveOutcome::Cancelled
    }

    fn fail(&self, error: SolveError, request_id: &str, attempts: u32) -> SolveOutcome {
        let message = match &error {
            SolveError::WriteFailed => "Solved, but failed to write clipboard".to_string(),
            SolveError::EmptyInput => "Solve failed: no image/text in clipboard".to_string(),
            other => format!("Solve failed: {other}"),
        };
        tracing::warn!(request_id = %request_id, attempts, error = %error, "solve failed");
        self.telemetry.record(
            TelemetryEvent::new("solve_failed")
                .field("request_id", request_id)
                .field("attempts", attempts)
                .field("code", error.code())
                .field("error", error.to_string()),
        );
        self.status.announce(&message);
        SolveOutcome::Failed(error)
    }

    // -------------------------------------------------------------------------
    // Model session
    // -------------------------------------------------------------------------

    /// Switch to `model`: cancel the in-flight solve, probe, then activate.
    pub async fn switch_model(&self, model: &str) -> ModelSwitch {
        let _guard = self.model_gate.lock().await;
        self.switch_model_locked(model.trim(), "select").await
    }

    /// Advance to the next configured model. Rejected while another switch
    /// is running.
    pub async fn cycle_model(&self) -> ModelSwitch {
        let Ok(_guard) = self.model_gate.try_lock() else {
            return ModelSwitch::Busy;
        };
        let config = self.config();
        let models = &config.available_models;
        let next = match models.iter().position(|m| *m == config.model) {
            Some(i) => models[(i + 1) % models.len()].clone(),
            None => models.first().cloned().unwrap_or_else(|| config.model.clone()),
        };
        self.switch_model_locked(&next, "cycle").await
    }

    async fn switch_model_locked(&self, target: &str, source: &str) -> ModelSwitch {
        if target.is_empty() {
            return self.reject_switch("MODEL CHANGE FAILED: empty model".to_string());
        }
        let config = self.config();
        if !config.available_models.iter().any(|m| m == target) {
            return self.reject_switch(format!("MODEL CHANGE FAILED: unknown model '{target}'"));
        }

        if self.cancel_in_flight() {
            tracing::info!(model = target, "cancelled in-flight solve for model switch");
        }

        let timeout = config.classify_timeout();
        if let Err(e) = self.invoker.probe(target, timeout).await {
            tracing::warn!(model = target, error = %e, "model probe failed");
            return self.reject_switch(format!("MODEL CHANGE FAILED: {target} is offline ({e})"));
        }

        let old = config.model.clone();
        let mut updated = config;
        updated.model = target.to_string();
        if let Err(e) = self.persist(&updated) {
            tracing::warn!(error = %e, "failed to persist model change");
            return self
                .reject_switch("MODEL CHANGE FAILED: unable to persist config".to_string());
        }
        match self.config.write() {
            Ok(mut slot) => *slot = updated,
            Err(e) => *e.into_inner() = updated,
        }

        if old != target {
            self.telemetry.record(
                TelemetryEvent::new("model_changed")
                    .field("old", old.clone())
                    .field("new", target)
                    .field("source", source),
            );
            self.status.announce(&format!("MODEL CHANGED: {old} -> {target}"));
        }
        let active = format!("MODEL ACTIVE: {target}");
        if !self.clipboard.write(&active) {
            self.telemetry
                .record(TelemetryEvent::new("model_active_clipboard_error").field("model", target));
        }
        self.status.announce(&active);
        ModelSwitch::Activated {
            old,
            new: target.to_string(),
        }
    }

    fn reject_switch(&self, message: String) -> ModelSwitch {
        self.status.announce(&message);
        ModelSwitch::Rejected(message)
    }

    fn persist(&self, config: &SolverConfig) -> Result<(), ConfigError> {
        match &self.config_path {
            Some(path) => config.save(path),
            None => Ok(()),
        }
    }

    /// Probe the selected model and the graph extraction model.
    pub async fn startup_probes(&self) -> ProbeReport {
        let config = self.config();
        let timeout = config.classify_timeout();

        let selected_model_online = self.probe_quiet(&config.model, timeout).await;
        if !selected_model_online {
            self.status.announce(&format!(
                "Selected model [{}] is offline; please select another.",
                config.model
            ));
        }
        let graph_extraction_online = self
            .probe_quiet(&config.graph_extraction_model, timeout)
            .await;
        if !graph_extraction_online {
            self.status
                .announce("5.2 is offline; High-precision Graph Extraction is disabled.");
        }
        ProbeReport {
            selected_model_online,
            graph_extraction_online,
        }
    }

    async fn probe_quiet(&self, model: &str, timeout: Duration) -> bool {
        match self.invoker.probe(model, timeout).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(model, error = %e, "startup probe failed");
                self.telemetry.record(
                    TelemetryEvent::new("model_probe_failed")
                        .field("model", model)
                        .field("error", e.to_string()),
                );
                false
            }
        }
    }
}

enum Attempted {
    Candidate { text: String, attempts: u32 },
    Cancelled(SolveState),
    Failed { error: SolveError, attempts: u32 },
}
