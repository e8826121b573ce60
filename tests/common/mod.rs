#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clipsolve::clipboard::{MemoryClipboard, StatusSurface};
use clipsolve::config::SolverConfig;
use clipsolve::gateway::{
    CompletionInvoker, CompletionRequest, CompletionResponse, CompletionService, ErrorContext,
    ProviderError,
};
use clipsolve::reference::prime::ReferencePrimer;
use clipsolve::reference::ReferenceStore;
use clipsolve::solve::SolveContext;
use clipsolve::telemetry::{TelemetryEvent, TelemetrySink};

/// One scripted service reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    /// Sleep before answering.
    Delayed(Duration, String),
    Fail { message: String, retryable: bool },
    RejectTemperature,
}

impl Reply {
    pub fn text(s: impl Into<String>) -> Self {
        Reply::Text(s.into())
    }

    pub fn transient(message: &str) -> Self {
        Reply::Fail {
            message: message.to_string(),
            retryable: true,
        }
    }

    pub fn fatal(message: &str) -> Self {
        Reply::Fail {
            message: message.to_string(),
            retryable: false,
        }
    }
}

/// Completion service answering from per-flow queues.
///
/// The last reply in a queue repeats; a flow with no script answers "OK".
#[derive(Default)]
pub struct FakeCompletion {
    script: Mutex<HashMap<&'static str, VecDeque<Reply>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeCompletion {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, flow: &'static str, replies: impl IntoIterator<Item = Reply>) {
        self.script
            .lock()
            .unwrap()
            .insert(flow, replies.into_iter().collect());
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, flow: &str) -> Vec<CompletionRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.attribution.flow == flow)
            .collect()
    }

    pub fn flows(&self) -> Vec<&'static str> {
        self.requests().iter().map(|r| r.attribution.flow).collect()
    }

    fn next_reply(&self, flow: &str) -> Reply {
        let mut script = self.script.lock().unwrap();
        match script.get_mut(flow) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| Reply::text("OK")),
            None => Reply::text("OK"),
        }
    }
}

#[async_trait]
impl CompletionService for FakeCompletion {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        self.requests.lock().unwrap().push(req.clone());
        match self.next_reply(req.attribution.flow) {
            Reply::Text(text) => Ok(CompletionResponse::text(text)),
            Reply::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(CompletionResponse::text(text))
            }
            Reply::Fail { message, retryable } => {
                Err(ProviderError::provider("fake", message, retryable))
            }
            Reply::RejectTemperature => {
                if req.temperature.is_some() {
                    Err(ProviderError::invalid_request_with_context(
                        "Unsupported parameter: 'temperature'",
                        ErrorContext::new()
                            .with_status(400)
                            .with_code("unsupported_parameter")
                            .with_param("temperature"),
                    ))
                } else {
                    Ok(CompletionResponse::text("FINAL ANSWER:\nx = 1"))
                }
            }
        }
    }
}

#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn named(&self, name: &str) -> Vec<TelemetryEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event == name)
            .collect()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct RecordingStatus {
    messages: Mutex<Vec<String>>,
}

impl RecordingStatus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn saw(&self, message: &str) -> bool {
        self.messages().iter().any(|m| m == message)
    }
}

impl StatusSurface for RecordingStatus {
    fn announce(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

/// Config with no settle delay and every optional stage off.
pub fn test_config() -> SolverConfig {
    let mut config = SolverConfig::default();
    config.clipboard_settle_ms = 0;
    config.available_models = vec![
        "gpt-4o".to_string(),
        "gpt-4.1".to_string(),
        "gpt-5.2".to_string(),
    ];
    config
}

/// A solve context over fakes, rooted in a fresh temp dir.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub service: Arc<FakeCompletion>,
    pub telemetry: Arc<RecordingTelemetry>,
    pub status: Arc<RecordingStatus>,
    pub clipboard: Arc<MemoryClipboard>,
    pub store: Arc<ReferenceStore>,
    pub invoker: CompletionInvoker,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let service = FakeCompletion::new();
        let telemetry = RecordingTelemetry::new();
        let invoker = CompletionInvoker::new(service.clone(), telemetry.clone());
        let store = Arc::new(ReferenceStore::new(dir.path(), telemetry.clone()));
        Self {
            dir,
            service,
            telemetry,
            status: RecordingStatus::new(),
            clipboard: Arc::new(MemoryClipboard::new()),
            store,
            invoker,
        }
    }

    pub fn solver(&self, config: SolverConfig) -> SolveContext {
        SolveContext::new(
            config,
            self.invoker.clone(),
            self.store.clone(),
            self.clipboard.clone(),
            self.status.clone(),
            self.telemetry.clone(),
        )
    }

    pub fn primer(&self) -> ReferencePrimer {
        ReferencePrimer::new(
            self.store.clone(),
            self.invoker.clone(),
            self.clipboard.clone(),
            self.status.clone(),
            self.telemetry.clone(),
        )
    }

    pub fn config_path(&self) -> std::path::PathBuf {
        self.dir.path().join("config.json")
    }
}
