//! STAR toggle: pin the clipboard as reference context, or clear the pin.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{summarize, ReferenceStore, StoreError};
use crate::clipboard::{ClipboardContent, ClipboardError, ClipboardTransport, StatusSurface};
use crate::config::SolverConfig;
use crate::gateway::{
    Attribution, CompletionInvoker, ContentPart, ImageInput, InvokeOptions, Message, ProviderError,
};
use crate::graph::refine::refine_key_points;
use crate::graph::{
    detect_graph_presence, extract_graph_evidence, parse_graph_evidence, Extraction,
    GraphPresence,
};
use crate::prompts::{CLASSIFY_PROMPT, OCR_PROMPT, VISUAL_SUMMARY_PROMPT};
use crate::telemetry::{TelemetryEvent, TelemetrySink};

const CLASSIFY_MAX_TOKENS: u32 = 16;
const OCR_MAX_TOKENS: u32 = 1200;
const SUMMARY_MAX_TOKENS: u32 = 60;
const FALLBACK_IMAGE_SUMMARY: &str = "image reference";

#[derive(Debug, thiserror::Error)]
pub enum PrimeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Clipboard(#[from] ClipboardError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimeOutcome {
    Cleared,
    AssignedText,
    AssignedImage { graph_evidence: bool },
    /// Nothing was pinned; the message was announced.
    Rejected(String),
    Failed(String),
    /// Another toggle is running.
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageClass {
    Textual,
    Visual,
}

pub struct ReferencePrimer {
    store: Arc<ReferenceStore>,
    invoker: CompletionInvoker,
    clipboard: Arc<dyn ClipboardTransport>,
    status: Arc<dyn StatusSurface>,
    telemetry: Arc<dyn TelemetrySink>,
    extraction_enabled: AtomicBool,
    gate: tokio::sync::Mutex<()>,
}

impl ReferencePrimer {
    pub fn new(
        store: Arc<ReferenceStore>,
        invoker: CompletionInvoker,
        clipboard: Arc<dyn ClipboardTransport>,
        status: Arc<dyn StatusSurface>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            store,
            invoker,
            clipboard,
            status,
            telemetry,
            extraction_enabled: AtomicBool::new(true),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Turn high-precision graph extraction off, e.g. after a failed probe.
    pub fn set_graph_extraction_enabled(&self, enabled: bool) {
        self.extraction_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn graph_extraction_enabled(&self) -> bool {
        self.extraction_enabled.load(Ordering::SeqCst)
    }

    /// Clear an active pin, or pin whatever the clipboard holds.
    ///
    /// A call made while another is running returns [`PrimeOutcome::Busy`]
    /// without waiting.
    pub async fn toggle_reference(&self, config: &SolverConfig) -> PrimeOutcome {
        let Ok(_guard) = self.gate.try_lock() else {
            tracing::debug!("reference toggle already running");
            return PrimeOutcome::Busy;
        };

        match self.toggle_locked(config).await {
            Ok(PrimeOutcome::Rejected(message)) => {
                self.status.announce(&message);
                PrimeOutcome::Rejected(message)
            }
            Ok(outcome) => outcome,
            Err(e) => {
                let message = format!("STAR failed: {e}");
                tracing::warn!(error = %e, "reference toggle failed");
                self.telemetry
                    .record(TelemetryEvent::new("star_failed").field("error", e.to_string()));
                self.status.announce(&message);
                PrimeOutcome::Failed(message)
            }
        }
    }

    async fn toggle_locked(&self, config: &SolverConfig) -> Result<PrimeOutcome, PrimeError> {
        let record = self.store.load()?;
        if record.active {
            self.store.clear("toggle");
            self.status.announce("REF CLEARED");
            return Ok(PrimeOutcome::Cleared);
        }

        match self.clipboard.read()? {
            ClipboardContent::Text(text) if !text.trim().is_empty() => {
                let text = text.trim();
                self.store.assign_text(text, &summarize(text))?;
                self.status.announce("REF = TEXT");
                Ok(PrimeOutcome::AssignedText)
            }
            ClipboardContent::Image(image) => {
                self.prime_image(config, &image, record.graph_mode).await
            }
            _ => Ok(PrimeOutcome::Rejected(
                "REF assign failed: no image/text in clipboard".to_string(),
            )),
        }
    }

    async fn prime_image(
        &self,
        config: &SolverConfig,
        image: &ImageInput,
        graph_mode: bool,
    ) -> Result<PrimeOutcome, PrimeError> {
        let wants_graph = self.graph_extraction_enabled()
            && (graph_mode
                || (config.enable_auto_graph_detect_ref_prime
                    && self.detect(config, image).await));

        if wants_graph {
            if let Some(evidence) = self.extract(config, image).await {
                let summary = self.visual_summary(config, image).await;
                self.store.assign_image(image, &summary, Some(evidence))?;
                self.telemetry.record(
                    TelemetryEvent::new("graph_evidence_primed")
                        .field("model", config.graph_extraction_model.clone()),
                );
                self.status.announce("REF = IMG");
                return Ok(PrimeOutcome::AssignedImage {
                    graph_evidence: true,
                });
            }
        }

        let label = self.classify(config, image).await?;
        match parse_image_class(&label) {
            Some(ImageClass::Textual) => {
                let text = self.ocr(config, image).await?;
                if text.is_empty() {
                    return Ok(PrimeOutcome::Rejected(
                        "REF assign failed: OCR returned empty text".to_string(),
                    ));
                }
                self.store.assign_text(&text, &summarize(&text))?;
                self.status.announce("REF = TEXT");
                Ok(PrimeOutcome::AssignedText)
            }
            Some(ImageClass::Visual) => {
                let summary = self.visual_summary(config, image).await;
                self.store.assign_image(image, &summary, None)?;
                self.status.announce("REF = IMG");
                Ok(PrimeOutcome::AssignedImage {
                    graph_evidence: false,
                })
            }
            None => {
                let shown = if label.is_empty() { "EMPTY" } else { label.as_str() };
                Ok(PrimeOutcome::Rejected(format!(
                    "REF assign failed: classifier returned '{shown}'"
                )))
            }
        }
    }

    async fn detect(&self, config: &SolverConfig, image: &ImageInput) -> bool {
        match detect_graph_presence(
            &self.invoker,
            image,
            &config.graph_detect_model,
            config.graph_detect_timeout(),
        )
        .await
        {
            Ok(presence) => presence == GraphPresence::Yes,
            Err(e) => {
                tracing::warn!(error = %e, "graph detection failed; treating as no graph");
                false
            }
        }
    }

    /// Validated evidence text, or `None` to fall back to classification.
    async fn extract(&self, config: &SolverConfig, image: &ImageInput) -> Option<String> {
        let model = config.graph_extraction_model.as_str();
        let timeout = config.graph_extraction_timeout();
        let text = match extract_graph_evidence(&self.invoker, image, model, timeout).await {
            Ok(Extraction::Evidence(text)) => text,
            Ok(Extraction::NotAGraph) => {
                tracing::info!("extractor reported no graph");
                return None;
            }
            Err(e) => {
                tracing::warn!(model, error = %e, "graph extraction failed");
                return None;
            }
        };
        if let Err(e) = parse_graph_evidence(&text) {
            tracing::warn!(code = e.code(), error = %e, "extracted evidence rejected");
            self.telemetry.record(
                TelemetryEvent::new("graph_evidence_parse_fail")
                    .field("stage", "prime")
                    .field("code", e.code())
                    .field("error", e.to_string()),
            );
            return None;
        }
        if !config.enable_key_point_refinement {
            return Some(text);
        }
        match refine_key_points(&self.invoker, image, &text, model, timeout).await {
            Ok(refined) => Some(refined),
            Err(e) => {
                tracing::warn!(error = %e, "key point refinement failed; keeping evidence");
                Some(text)
            }
        }
    }

    async fn classify(&self, config: &SolverConfig, image: &ImageInput) -> Result<String, PrimeError> {
        let resp = self
            .invoker
            .invoke(
                &config.model,
                image_messages(CLASSIFY_PROMPT, image),
                InvokeOptions::new(config.classify_timeout(), CLASSIFY_MAX_TOKENS).temperature(0.0),
                Attribution::new("star_classify"),
            )
            .await?;
        Ok(resp.content.trim().to_string())
    }

    async fn ocr(&self, config: &SolverConfig, image: &ImageInput) -> Result<String, PrimeError> {
        let resp = self
            .invoker
            .invoke(
                &config.model,
                image_messages(OCR_PROMPT, image),
                InvokeOptions::new(config.ocr_timeout(), OCR_MAX_TOKENS).temperature(0.0),
                Attribution::new("star_ocr"),
            )
            .await?;
        Ok(resp.content.trim().to_string())
    }

    async fn visual_summary(&self, config: &SolverConfig, image: &ImageInput) -> String {
        let result = self
            .invoker
            .invoke(
                &config.reference_summary_model,
                image_messages(VISUAL_SUMMARY_PROMPT, image),
                InvokeOptions::new(config.classify_timeout(), SUMMARY_MAX_TOKENS).temperature(0.0),
                Attribution::new("star_summary"),
            )
            .await;
        match result {
            Ok(resp) if !resp.content.trim().is_empty() => summarize(&resp.content),
            Ok(_) => FALLBACK_IMAGE_SUMMARY.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "visual summary failed");
                FALLBACK_IMAGE_SUMMARY.to_string()
            }
        }
    }
}

fn image_messages(instruction: &str, image: &ImageInput) -> Vec<Message> {
    vec![
        Message::system(instruction),
        Message::user(vec![ContentPart::Image(image.clone())]),
    ]
}

fn parse_image_class(label: &str) -> Option<ImageClass> {
    let word = label
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_matches(|c: char| !c.is_ascii_alphabetic())
        .to_ascii_uppercase();
    match word.as_str() {
        "TEXTUAL" => Some(ImageClass::Textual),
        "VISUAL" => Some(ImageClass::Visual),
        _ => None,
    }
}
