//! Cross-checks between graph evidence and the stated domain/range.
//!
//! Findings are diagnostics only; nothing here blocks delivery.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::interval::{stated_intervals, Axis, Bound, IntervalSet};
use super::{Endpoint, GraphEvidence, Marker};

static VERTICAL_ASYMPTOTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bx\s*=\s*([+\-−]?\d+(?:\.\d+)?(?:/\d+)?)").expect("Invalid asymptote regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    EndpointInclusionConflict,
    ArrowBoundConflict,
    AsymptoteInclusionConflict,
    IntervalDisagreementDomain,
    IntervalDisagreementRange,
}

impl MismatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndpointInclusionConflict => "endpoint_inclusion_conflict",
            Self::ArrowBoundConflict => "arrow_bound_conflict",
            Self::AsymptoteInclusionConflict => "asymptote_inclusion_conflict",
            Self::IntervalDisagreementDomain => "interval_disagreement_domain",
            Self::IntervalDisagreementRange => "interval_disagreement_range",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyMismatch {
    pub mismatch_type: MismatchKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<Marker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_interval: Option<String>,
}

impl ConsistencyMismatch {
    fn new(mismatch_type: MismatchKind) -> Self {
        Self {
            mismatch_type,
            side: None,
            marker: None,
            x: None,
            work_interval: None,
            final_interval: None,
        }
    }
}

/// Compare `evidence` against the WORK and FINAL ANSWER sections.
pub fn validate_consistency(
    evidence: &GraphEvidence,
    work: &str,
    final_text: &str,
) -> Vec<ConsistencyMismatch> {
    let mut out = Vec::new();
    let final_domain = stated_intervals(final_text, Axis::Domain).into_iter().next();

    if let Some(domain) = &final_domain {
        if let Some((bound, inclusive)) = domain.left() {
            check_endpoint(&mut out, Side::Left, &evidence.left_endpoint, bound, inclusive, domain);
        }
        if let Some((bound, inclusive)) = domain.right() {
            check_endpoint(&mut out, Side::Right, &evidence.right_endpoint, bound, inclusive, domain);
        }
        for x in evidence.asymptotes.iter().filter_map(|a| vertical_asymptote_x(a)) {
            if domain.contains(x) == Some(true) {
                let mut m = ConsistencyMismatch::new(MismatchKind::AsymptoteInclusionConflict);
                m.x = Some(x);
                m.final_interval = Some(domain.to_string());
                out.push(m);
            }
        }
    }

    for (axis, kind) in [
        (Axis::Domain, MismatchKind::IntervalDisagreementDomain),
        (Axis::Range, MismatchKind::IntervalDisagreementRange),
    ] {
        let stated_work = stated_intervals(work, axis).into_iter().last();
        let stated_final = stated_intervals(final_text, axis).into_iter().next();
        if let (Some(w), Some(f)) = (stated_work, stated_final) {
            if w.signature() != f.signature() {
                let mut m = ConsistencyMismatch::new(kind);
                m.work_interval = Some(w.to_string());
                m.final_interval = Some(f.to_string());
                out.push(m);
            }
        }
    }
    out
}

fn check_endpoint(
    out: &mut Vec<ConsistencyMismatch>,
    side: Side,
    endpoint: &Endpoint,
    bound: &Bound,
    inclusive: bool,
    domain: &IntervalSet,
) {
    let kind = match endpoint.marker {
        Marker::Open if inclusive => MismatchKind::EndpointInclusionConflict,
        Marker::Closed if matches!(bound, Bound::Finite(_)) && !inclusive => {
            MismatchKind::EndpointInclusionConflict
        }
        Marker::Arrow if !bound.is_infinite() => MismatchKind::ArrowBoundConflict,
        _ => return,
    };
    let mut m = ConsistencyMismatch::new(kind);
    m.side = Some(side);
    m.marker = Some(endpoint.marker);
    m.final_interval = Some(domain.to_string());
    out.push(m);
}

fn vertical_asymptote_x(entry: &str) -> Option<f64> {
    let caps = VERTICAL_ASYMPTOTE_RE.captures(entry)?;
    match Bound::parse(&caps[1]) {
        Bound::Finite(x) => Some(x),
        _ => None,
    }
}
