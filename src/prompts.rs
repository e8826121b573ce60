//! Prompt text and the solve-request builder.
//!
//! Wording lives here so the orchestrator and priming worker stay
//! provider-agnostic. The builder's part ordering is significant: cached
//! evidence, then the forced-extraction hint, then the current problem, then
//! any pinned reference.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::gateway::{ContentPart, ImageInput, Message};
use crate::graph::{is_valid_evidence, INVALID_GRAPH};
use crate::reference::ReferencePayload;

// =============================================================================
// Solve prompts
// =============================================================================

pub const SYSTEM_PROMPT: &str = "You are solving a math problem.
Output MUST be plain text only. No markdown. No LaTeX.
Use this exact structure:
<raw math only, no label>
WORK:
<minimal symbolic steps>
FINAL ANSWER: <answer>
Rules:
- Do not include 'DETECTED_INPUT:' or 'Q:'.
- First line must be only the detected expression/equation.
- Keep WORK concise.
- For inequalities, final should be interval notation.
- If all reals: FINAL ANSWER: All Real Numbers
- If none: FINAL ANSWER: No Solution
";

/// Appended to [`SYSTEM_PROMPT`] when the answer must carry graph evidence.
pub const GRAPH_EVIDENCE_GRAMMAR: &str = "
When the problem shows a graph, put this block at the start of WORK, one field per line:
GRAPH_EVIDENCE:
LEFT_ENDPOINT: x=<value>, y=<value>, marker=<open|closed|arrow|unclear>
RIGHT_ENDPOINT: x=<value>, y=<value>, marker=<open|closed|arrow|unclear>
ASYMPTOTES: <x=a; y=b | none>
DISCONTINUITIES: <x=a; ... | none>
INTERCEPTS: <(x=a, y=b); ... | none>
KEY_POINTS: <(x=a, y=b); ... | none>
SCALE: x_tick=<value>, y_tick=<value>
CONFIDENCE: <0.0-1.0>
Base the domain and range in FINAL ANSWER on these markers.
";

pub const FORCED_EXTRACTION_HINT: &str = "MANDATORY VISUAL EXTRACTION: before solving, read every endpoint marker \
(open circle, closed dot, arrow), asymptote, hole and axis scale from the graph. \
Use them to decide bracket inclusion in interval notation.";

pub const CACHED_EVIDENCE_LABEL: &str = "GRAPH MODE CACHED EVIDENCE (secondary context only; \
re-check it against what you see):";

pub const REFERENCE_GUIDE: &str =
    "The STARRED reference below is secondary context. Use it only where it helps;\nit must not override the current problem. Solve only the current problem.\n";

pub const CURRENT_PROBLEM_LABEL: &str = "CURRENT PROBLEM:";

pub const REFERENCE_LABEL: &str = "STARRED REFERENCE (secondary, optional context; it must not override the current problem):";

// =============================================================================
// Priming prompts
// =============================================================================

pub const CLASSIFY_PROMPT: &str =
    "Classify this image as one of exactly two labels:\nTEXTUAL or VISUAL.\nReturn ONLY one word.";

pub const OCR_PROMPT: &str = "Transcribe all visible text, equations, labels, and instructions from this image.\nDo NOT solve.\nReturn plain text only.";

pub const VISUAL_SUMMARY_PROMPT: &str =
    "Describe this image in one short line (under 120 characters). Do not solve anything.";

pub const GRAPH_DETECT_PROMPT: &str =
    "Does this image contain a coordinate graph of a function or relation?\nAnswer with exactly one word: YES or NO.";

// =============================================================================
// Graph extraction prompts
// =============================================================================

pub static GRAPH_EXTRACTION_PROMPT: Lazy<String> = Lazy::new(|| {
    format!(
        "You read graphs precisely. Do NOT solve anything.
If the image does not contain a coordinate graph, reply with exactly: {INVALID_GRAPH}
Otherwise reply with exactly this block and nothing else:
GRAPH_EVIDENCE:
LEFT_ENDPOINT: x=<value>, y=<value>, marker=<open|closed|arrow|unclear>
RIGHT_ENDPOINT: x=<value>, y=<value>, marker=<open|closed|arrow|unclear>
ASYMPTOTES: <x=a; y=b | none>
DISCONTINUITIES: <x=a; ... | none>
INTERCEPTS: <(x=a, y=b); ... | none>
KEY_POINTS: <(x=a, y=b); ... | none>
SCALE: x_tick=<value>, y_tick=<value>
CONFIDENCE: <0.0-1.0>
Count grid ticks to place every coordinate. Use 'unclear' when a marker cannot be seen."
    )
});

pub const KEY_POINT_CANDIDATES_PROMPT: &str = "List up to five lattice points the plotted curve clearly passes through.
Reply with exactly one line:
KEY_POINT_CANDIDATES: (x=<value>, y=<value>); (x=<value>, y=<value>)";

// =============================================================================
// Solve request builder
// =============================================================================

static GRAPH_INTENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(domain|range|interval\s+notation|open\s+circle|closed\s+circle|holes?|asymptotes?|arrows?|endpoints?|discontinuit(?:y|ies))\b",
    )
    .expect("Invalid graph intent regex")
});

/// The problem read from the clipboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProblemInput {
    Text(String),
    Image(ImageInput),
}

impl ProblemInput {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ProblemInput::Text(t) => Some(t),
            ProblemInput::Image(_) => None,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ProblemInput::Image(_))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub input: &'a ProblemInput,
    pub reference: Option<&'a ReferencePayload>,
    pub graph_mode: bool,
    pub cached_evidence: Option<&'a str>,
    pub forced_visual_extraction: bool,
    pub request_graph_grammar: bool,
}

impl<'a> PromptInputs<'a> {
    pub fn new(input: &'a ProblemInput) -> Self {
        Self {
            input,
            reference: None,
            graph_mode: false,
            cached_evidence: None,
            forced_visual_extraction: false,
            request_graph_grammar: false,
        }
    }
}

pub fn system_prompt(request_graph_grammar: bool) -> String {
    if request_graph_grammar {
        format!("{SYSTEM_PROMPT}{GRAPH_EVIDENCE_GRAMMAR}")
    } else {
        SYSTEM_PROMPT.to_string()
    }
}

/// Whether the forced-extraction hint applies to this request.
pub fn wants_forced_extraction(inputs: &PromptInputs<'_>) -> bool {
    if !inputs.forced_visual_extraction {
        return false;
    }
    let reference_is_image = matches!(inputs.reference, Some(ReferencePayload::Image(_)));
    match inputs.input {
        ProblemInput::Image(_) => true,
        ProblemInput::Text(_) if reference_is_image => true,
        ProblemInput::Text(text) => GRAPH_INTENT_RE.is_match(text),
    }
}

/// Build the instruction message and the ordered user message.
pub fn build_solve_messages(inputs: &PromptInputs<'_>) -> Vec<Message> {
    let mut parts: Vec<ContentPart> = Vec::new();

    if inputs.graph_mode {
        if let Some(evidence) = inputs
            .cached_evidence
            .map(str::trim)
            .filter(|e| *e != INVALID_GRAPH && is_valid_evidence(e))
        {
            parts.push(ContentPart::text(format!("{CACHED_EVIDENCE_LABEL}\n{evidence}")));
        }
    }

    if wants_forced_extraction(inputs) {
        parts.push(ContentPart::text(FORCED_EXTRACTION_HINT));
    }

    let has_reference = inputs.reference.is_some();
    match inputs.input {
        ProblemInput::Text(text) if has_reference => {
            parts.push(ContentPart::text(format!("{REFERENCE_GUIDE}{CURRENT_PROBLEM_LABEL}\n{text}")));
        }
        ProblemInput::Text(text) => parts.push(ContentPart::text(text.clone())),
        ProblemInput::Image(image) => {
            if has_reference {
                parts.push(ContentPart::text(format!(
                    "{REFERENCE_GUIDE}{CURRENT_PROBLEM_LABEL} (image)"
                )));
            }
            parts.push(ContentPart::Image(image.clone()));
        }
    }

    match inputs.reference {
        Some(ReferencePayload::Text(text)) => {
            parts.push(ContentPart::text(format!("{REFERENCE_LABEL}\nSTARRED TEXT:\n{text}")));
        }
        Some(ReferencePayload::Image(image)) => {
            parts.push(ContentPart::text(format!("{REFERENCE_LABEL}\nSTARRED IMAGE:")));
            parts.push(ContentPart::Image(image.clone()));
        }
        None => {}
    }

    vec![
        Message::system(system_prompt(inputs.request_graph_grammar)),
        Message::user(parts),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVIDENCE: &str = "GRAPH_EVIDENCE:\nLEFT_ENDPOINT: x=-2, y=0, marker=closed\nRIGHT_ENDPOINT: x=4, y=-5, marker=open\nASYMPTOTES: none\nDISCONTINUITIES: none\nSCALE: x_tick=1, y_tick=1\nCONFIDENCE: 0.9";

    fn texts(messages: &[Message]) -> Vec<String> {
        messages[1]
            .content
            .iter()
            .map(|p| match p {
                ContentPart::Text(t) => t.clone(),
                ContentPart::Image(_) => "<image>".to_string(),
            })
            .collect()
    }

    #[test]
    fn plain_text_problem() {
        let input = ProblemInput::Text("2x+1=5".into());
        let msgs = build_solve_messages(&PromptInputs::new(&input));
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].text(), SYSTEM_PROMPT);
        assert_eq!(texts(&msgs), vec!["2x+1=5"]);
    }

    #[test]
    fn grammar_appendix_only_when_requested() {
        assert!(!system_prompt(false).contains("GRAPH_EVIDENCE:"));
        assert!(system_prompt(true).contains("GRAPH_EVIDENCE:"));
    }

    #[test]
    fn cached_evidence_leads_then_hint_then_primary_then_reference() {
        let input = ProblemInput::Image(ImageInput::png(vec![1]));
        let reference = ReferencePayload::Image(ImageInput::png(vec![2]));
        let mut inputs = PromptInputs::new(&input);
        inputs.reference = Some(&reference);
        inputs.graph_mode = true;
        inputs.cached_evidence = Some(EVIDENCE);
        inputs.forced_visual_extraction = true;

        let parts = texts(&build_solve_messages(&inputs));
        assert_eq!(parts.len(), 6);
        assert!(parts[0].starts_with("GRAPH MODE CACHED EVIDENCE"));
        assert_eq!(parts[1], FORCED_EXTRACTION_HINT);
        assert!(parts[2].contains(CURRENT_PROBLEM_LABEL));
        assert_eq!(parts[3], "<image>");
        assert!(parts[4].starts_with(REFERENCE_LABEL));
        assert_eq!(parts[5], "<image>");
    }

    #[test]
    fn invalid_cached_evidence_is_skipped() {
        let input = ProblemInput::Text("graph it".into());
        for cached in [Some(INVALID_GRAPH), Some("GRAPH_EVIDENCE:\nSCALE: x"), None] {
            let mut inputs = PromptInputs::new(&input);
            inputs.graph_mode = true;
            inputs.cached_evidence = cached;
            assert_eq!(texts(&build_solve_messages(&inputs)), vec!["graph it"]);
        }
    }

    #[test]
    fn forced_hint_needs_image_or_keyword() {
        let plain = ProblemInput::Text("solve 2x = 4".into());
        let keyword = ProblemInput::Text("State the domain in interval notation".into());
        let mut inputs = PromptInputs::new(&plain);
        inputs.forced_visual_extraction = true;
        assert!(!wants_forced_extraction(&inputs));
        inputs.input = &keyword;
        assert!(wants_forced_extraction(&inputs));
        inputs.forced_visual_extraction = false;
        assert!(!wants_forced_extraction(&inputs));
    }

    #[test]
    fn text_reference_follows_current_problem() {
        let input = ProblemInput::Text("x + 1 = 2".into());
        let reference = ReferencePayload::Text("Unit 3 notes".into());
        let mut inputs = PromptInputs::new(&input);
        inputs.reference = Some(&reference);
        let parts = texts(&build_solve_messages(&inputs));
        assert_eq!(parts.len(), 2);
        assert!(parts[0].ends_with("CURRENT PROBLEM:\nx + 1 = 2"));
        assert!(parts[1].ends_with("STARRED TEXT:\nUnit 3 notes"));
    }
}
