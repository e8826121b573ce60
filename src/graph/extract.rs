//! Dedicated graph-reading calls: presence detection and evidence extraction.

use std::time::Duration;

use super::INVALID_GRAPH;
use crate::gateway::{
    Attribution, CompletionInvoker, ContentPart, ImageInput, InvokeOptions, Message, ProviderError,
};
use crate::prompts::{GRAPH_DETECT_PROMPT, GRAPH_EXTRACTION_PROMPT};

const EXTRACTION_MAX_TOKENS: u32 = 1200;
const DETECT_MAX_TOKENS: u32 = 16;

/// Raw extractor output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// The model answered with the not-a-graph sentinel.
    NotAGraph,
    /// Trimmed block text; it still has to be parsed.
    Evidence(String),
}

impl Extraction {
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(INVALID_GRAPH) {
            Self::NotAGraph
        } else {
            Self::Evidence(trimmed.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphPresence {
    Yes,
    No,
}

impl GraphPresence {
    /// Anything other than a leading `YES` counts as `No`.
    pub fn from_text(text: &str) -> Self {
        if text.trim().to_ascii_uppercase().starts_with("YES") {
            Self::Yes
        } else {
            Self::No
        }
    }
}

fn image_request(instruction: &str, image: &ImageInput) -> Vec<Message> {
    vec![
        Message::system(instruction),
        Message::user(vec![ContentPart::Image(image.clone())]),
    ]
}

/// Run the strict-grammar extraction call on `image`.
pub async fn extract_graph_evidence(
    invoker: &CompletionInvoker,
    image: &ImageInput,
    model: &str,
    timeout: Duration,
) -> Result<Extraction, ProviderError> {
    let resp = invoker
        .invoke(
            model,
            image_request(GRAPH_EXTRACTION_PROMPT.as_str(), image),
            InvokeOptions::new(timeout, EXTRACTION_MAX_TOKENS).temperature(0.0),
            Attribution::new("graph_extract"),
        )
        .await?;
    let extraction = Extraction::from_text(&resp.content);
    tracing::debug!(
        model,
        not_a_graph = matches!(extraction, Extraction::NotAGraph),
        "graph extraction finished"
    );
    Ok(extraction)
}

/// Ask a small model whether `image` holds a graph.
pub async fn detect_graph_presence(
    invoker: &CompletionInvoker,
    image: &ImageInput,
    model: &str,
    timeout: Duration,
) -> Result<GraphPresence, ProviderError> {
    let resp = invoker
        .invoke(
            model,
            image_request(GRAPH_DETECT_PROMPT, image),
            InvokeOptions::new(timeout, DETECT_MAX_TOKENS).temperature(0.0),
            Attribution::new("graph_detect"),
        )
        .await?;
    Ok(GraphPresence::from_text(&resp.content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_sentinel() {
        assert_eq!(Extraction::from_text(" INVALID_GRAPH \n"), Extraction::NotAGraph);
        assert_eq!(Extraction::from_text(""), Extraction::NotAGraph);
        assert_eq!(
            Extraction::from_text("\nGRAPH_EVIDENCE:\nX: 1\n"),
            Extraction::Evidence("GRAPH_EVIDENCE:\nX: 1".into())
        );
    }

    #[test]
    fn presence_normalization() {
        assert_eq!(GraphPresence::from_text("yes."), GraphPresence::Yes);
        assert_eq!(GraphPresence::from_text(" YES"), GraphPresence::Yes);
        assert_eq!(GraphPresence::from_text("No"), GraphPresence::No);
        assert_eq!(GraphPresence::from_text("maybe"), GraphPresence::No);
    }
}
