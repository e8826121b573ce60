//! Graph evidence: the fixed-grammar block a model emits after reading a graph.
//!
//! ```text
//! GRAPH_EVIDENCE:
//! LEFT_ENDPOINT: x=-2, y=0, marker=closed
//! RIGHT_ENDPOINT: x=4, y=-5, marker=open
//! ASYMPTOTES: none
//! DISCONTINUITIES: none
//! INTERCEPTS: (x=2, y=0); (x=0, y=-4)
//! KEY_POINTS: (x=5, y=13)
//! SCALE: x_tick=1, y_tick=1
//! CONFIDENCE: 0.88
//! ```
//!
//! Parsing is total-or-nothing: a block either yields a full
//! [`GraphEvidence`] or an [`EvidenceError`] naming the rule it broke.

pub mod consistency;
pub mod extract;
pub mod interval;
pub mod refine;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

pub use consistency::{validate_consistency, ConsistencyMismatch, MismatchKind, Side};
pub use extract::{detect_graph_presence, extract_graph_evidence, Extraction, GraphPresence};

/// Sentinel an extractor returns when the image holds no graph.
pub const INVALID_GRAPH: &str = "INVALID_GRAPH";

/// Characters scanned after the header line.
pub const EVIDENCE_WINDOW_CHARS: usize = 2000;

const REQUIRED_FIELDS: [&str; 6] = [
    "LEFT_ENDPOINT",
    "RIGHT_ENDPOINT",
    "ASYMPTOTES",
    "DISCONTINUITIES",
    "SCALE",
    "CONFIDENCE",
];

const NONE_TOKENS: &[&str] = &[
    "none", "n/a", "na", "no", "null", "nil", "-", "[]", "empty",
];

static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[ \t]*graph_evidence[ \t]*:[ \t]*\r?$").expect("Invalid header regex")
});

static FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z][A-Z0-9_]*)\s*:\s*(.*)$").expect("Invalid field regex"));

static BOUNDARY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:work\b|final\s+answer\b)|\[final\]").expect("Invalid boundary regex")
});

static ENDPOINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^x\s*=\s*([^,]+?)\s*,\s*y\s*=\s*([^,]+?)\s*,\s*marker\s*=\s*(open|closed|arrow|unclear)\s*$",
    )
    .expect("Invalid endpoint regex")
});

static SCALE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^x_tick\s*=\s*([^,]+?)\s*,\s*y_tick\s*=\s*([^,]+?)\s*$")
        .expect("Invalid scale regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Marker {
    Open,
    Closed,
    Arrow,
    Unclear,
}

impl Marker {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            "arrow" => Some(Self::Arrow),
            "unclear" => Some(Self::Unclear),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Arrow => "arrow",
            Self::Unclear => "unclear",
        }
    }
}

/// Coordinates stay as the model wrote them (`-2`, `1/2`, `∞`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Endpoint {
    pub x: String,
    pub y: String,
    pub marker: Marker,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scale {
    pub x_tick: String,
    pub y_tick: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphEvidence {
    pub left_endpoint: Endpoint,
    pub right_endpoint: Endpoint,
    pub asymptotes: Vec<String>,
    pub discontinuities: Vec<String>,
    pub intercepts: Vec<String>,
    pub key_points: Vec<String>,
    pub scale: Scale,
    pub confidence: f64,
    /// Unrecognized fields, in order of appearance.
    pub extra: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvidenceError {
    #[error("no GRAPH_EVIDENCE header")]
    MissingHeader,

    #[error("boundary '{marker}' reached before all required fields")]
    BoundaryBeforeComplete { marker: String },

    #[error("required field {0} missing")]
    MissingField(&'static str),

    #[error("required field {0} is empty")]
    EmptyField(&'static str),

    #[error("malformed {field}: '{value}'")]
    MalformedEndpoint { field: &'static str, value: String },

    #[error("malformed SCALE: '{0}'")]
    MalformedScale(String),

    #[error("malformed CONFIDENCE: '{0}'")]
    MalformedConfidence(String),

    #[error("CONFIDENCE {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),
}

impl EvidenceError {
    /// Stable identifier for telemetry.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingHeader => "missing_header",
            Self::BoundaryBeforeComplete { .. } => "boundary_before_complete",
            Self::MissingField(_) => "missing_field",
            Self::EmptyField(_) => "empty_field",
            Self::MalformedEndpoint { .. } => "malformed_endpoint",
            Self::MalformedScale(_) => "malformed_scale",
            Self::MalformedConfidence(_) => "malformed_confidence",
            Self::ConfidenceOutOfRange(_) => "confidence_out_of_range",
        }
    }
}

/// Parse the first `GRAPH_EVIDENCE:` block in `text`.
pub fn parse_graph_evidence(text: &str) -> Result<GraphEvidence, EvidenceError> {
    let header = HEADER_RE.find(text).ok_or(EvidenceError::MissingHeader)?;
    let after = &text[header.end()..];
    let after = after
        .strip_prefix("\r\n")
        .or_else(|| after.strip_prefix('\n'))
        .unwrap_or(after);

    let window = bounded_window(after, EVIDENCE_WINDOW_CHARS);
    let fields = scan_fields(window)?;

    let required = |name: &'static str| required_field(&fields, name);
    let optional = |name: &str| -> Vec<String> {
        fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| split_list(v))
            .unwrap_or_default()
    };

    for name in REQUIRED_FIELDS {
        required(name)?;
    }

    let left_endpoint = parse_endpoint("LEFT_ENDPOINT", required("LEFT_ENDPOINT")?)?;
    let right_endpoint = parse_endpoint("RIGHT_ENDPOINT", required("RIGHT_ENDPOINT")?)?;
    let scale = parse_scale(required("SCALE")?)?;
    let confidence = parse_confidence(required("CONFIDENCE")?)?;

    const KNOWN: [&str; 8] = [
        "LEFT_ENDPOINT",
        "RIGHT_ENDPOINT",
        "ASYMPTOTES",
        "DISCONTINUITIES",
        "INTERCEPTS",
        "KEY_POINTS",
        "SCALE",
        "CONFIDENCE",
    ];
    let extra = fields
        .iter()
        .filter(|(k, _)| !KNOWN.contains(&k.as_str()))
        .cloned()
        .collect();

    Ok(GraphEvidence {
        left_endpoint,
        right_endpoint,
        asymptotes: split_list(required("ASYMPTOTES")?),
        discontinuities: split_list(required("DISCONTINUITIES")?),
        intercepts: optional("INTERCEPTS"),
        key_points: optional("KEY_POINTS"),
        scale,
        confidence,
        extra,
    })
}

fn required_field<'a>(
    fields: &'a [(String, String)],
    name: &'static str,
) -> Result<&'a str, EvidenceError> {
    let value = fields
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
        .ok_or(EvidenceError::MissingField(name))?;
    if value.is_empty() {
        return Err(EvidenceError::EmptyField(name));
    }
    Ok(value)
}

/// Whether `text` carries a block that parses.
pub fn is_valid_evidence(text: &str) -> bool {
    parse_graph_evidence(text).is_ok()
}

/// Up to `max_chars` characters; a line cut by the bound is dropped.
fn bounded_window(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        None => text,
        Some((cut, _)) => match text[..cut].rfind('\n') {
            Some(nl) => &text[..nl],
            None => "",
        },
    }
}

fn scan_fields(window: &str) -> Result<Vec<(String, String)>, EvidenceError> {
    let mut fields: Vec<(String, String)> = Vec::new();
    let complete = |fields: &[(String, String)]| {
        REQUIRED_FIELDS
            .iter()
            .all(|name| fields.iter().any(|(k, _)| k == name))
    };

    for raw in window.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(m) = BOUNDARY_RE.find(line) {
            if complete(&fields) {
                break;
            }
            return Err(EvidenceError::BoundaryBeforeComplete {
                marker: m.as_str().to_string(),
            });
        }
        let Some(caps) = FIELD_RE.captures(line) else {
            break;
        };
        let key = caps[1].to_string();
        if fields.iter().any(|(k, _)| *k == key) {
            continue;
        }
        fields.push((key, caps[2].trim().to_string()));
    }
    Ok(fields)
}

fn parse_endpoint(field: &'static str, value: &str) -> Result<Endpoint, EvidenceError> {
    let malformed = || EvidenceError::MalformedEndpoint {
        field,
        value: value.to_string(),
    };
    let caps = ENDPOINT_RE.captures(value).ok_or_else(malformed)?;
    Ok(Endpoint {
        x: caps[1].to_string(),
        y: caps[2].to_string(),
        marker: Marker::parse(&caps[3]).ok_or_else(malformed)?,
    })
}

fn parse_scale(value: &str) -> Result<Scale, EvidenceError> {
    let caps = SCALE_RE
        .captures(value)
        .ok_or_else(|| EvidenceError::MalformedScale(value.to_string()))?;
    Ok(Scale {
        x_tick: caps[1].to_string(),
        y_tick: caps[2].to_string(),
    })
}

fn parse_confidence(value: &str) -> Result<f64, EvidenceError> {
    let c: f64 = value
        .parse()
        .map_err(|_| EvidenceError::MalformedConfidence(value.to_string()))?;
    if !c.is_finite() {
        return Err(EvidenceError::MalformedConfidence(value.to_string()));
    }
    if !(0.0..=1.0).contains(&c) {
        return Err(EvidenceError::ConfidenceOutOfRange(c));
    }
    Ok(c)
}

fn split_list(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    if NONE_TOKENS.contains(&trimmed.to_ascii_lowercase().as_str()) {
        return Vec::new();
    }
    trimmed
        .split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "WORK:\nGRAPH_EVIDENCE:\n  LEFT_ENDPOINT: x=-2, y=0, marker=closed\n  RIGHT_ENDPOINT: x=4, y=-5, marker=open\n  ASYMPTOTES: none\n  DISCONTINUITIES: none\n  SCALE: x_tick=1, y_tick=1\n  CONFIDENCE: 0.91\nObserved markers confirm inclusion.\nFINAL ANSWER:\nDomain: [-2, 4)\n";

    #[test]
    fn parses_indented_block_ended_by_prose() {
        let ev = parse_graph_evidence(VALID).unwrap();
        assert_eq!(ev.left_endpoint.marker, Marker::Closed);
        assert_eq!(ev.right_endpoint.x, "4");
        assert!(ev.asymptotes.is_empty());
        assert_eq!(ev.scale.x_tick, "1");
        assert!((ev.confidence - 0.91).abs() < 1e-12);
    }

    #[test]
    fn window_drops_truncated_line() {
        let text = format!("x\n{}\nabc", "y".repeat(10));
        assert_eq!(bounded_window(&text, 5), "x");
        assert_eq!(bounded_window("short", 50), "short");
        assert_eq!(bounded_window(&"é".repeat(30), 10), "");
    }

    #[test]
    fn none_synonyms_are_empty_lists() {
        for token in ["none", "N/A", "no", "[]"] {
            assert!(split_list(token).is_empty(), "{token}");
        }
        assert_eq!(split_list("x=2; x=-2;"), vec!["x=2", "x=-2"]);
    }

    #[test]
    fn duplicate_field_keeps_first() {
        let text = VALID.replace(
            "  ASYMPTOTES: none\n",
            "  ASYMPTOTES: none\n  ASYMPTOTES: x=3\n",
        );
        assert!(parse_graph_evidence(&text).unwrap().asymptotes.is_empty());
    }

    #[test]
    fn confidence_rules() {
        assert_eq!(parse_confidence("1"), Ok(1.0));
        assert_eq!(
            parse_confidence("1.2"),
            Err(EvidenceError::ConfidenceOutOfRange(1.2))
        );
        assert!(matches!(
            parse_confidence("high"),
            Err(EvidenceError::MalformedConfidence(_))
        ));
        assert!(matches!(
            parse_confidence("NaN"),
            Err(EvidenceError::MalformedConfidence(_))
        ));
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(EvidenceError::MissingHeader.code(), "missing_header");
        assert_eq!(
            parse_graph_evidence("nothing here").unwrap_err(),
            EvidenceError::MissingHeader
        );
    }
}
