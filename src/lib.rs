#![forbid(unsafe_code)]

//! # clipsolve
//!
//! Solve math problems straight from the clipboard.
//!
//! A problem (text or image) is read from a clipboard-like transport, sent to
//! a multimodal completion service together with an optional pinned reference
//! ("STAR"), and the answer is written back in two steps: the full worked
//! output, then the distilled final answer.
//!
//! When graph handling is enabled, the model is asked for a fixed-grammar
//! `GRAPH_EVIDENCE:` block that is parsed and cross-checked against the
//! domain and range the answer states. Findings go to telemetry; they never
//! block delivery.

pub mod clipboard;
pub mod config;
pub mod gateway;
pub mod graph;
pub mod prompts;
pub mod reference;
pub mod response;
pub mod solve;
pub mod telemetry;

pub use clipboard::{
    ClipboardContent, ClipboardTransport, ConsoleClipboard, MemoryClipboard, StatusSurface,
    TracingStatus,
};
pub use config::SolverConfig;
pub use gateway::{
    Attribution, CompletionInvoker, CompletionService, OpenAiResponsesAdapter, ProviderError,
};
pub use graph::{parse_graph_evidence, validate_consistency, EvidenceError, GraphEvidence};
pub use prompts::ProblemInput;
pub use reference::prime::{PrimeOutcome, ReferencePrimer};
pub use reference::{ReferenceKind, ReferenceRecord, ReferenceStore};
pub use solve::{CancelFlag, ModelSwitch, SolveContext, SolveError, SolveOutcome, SolveReport};
pub use telemetry::{JsonlTelemetrySink, TelemetryEvent, TelemetrySink, TelemetryWorker};
