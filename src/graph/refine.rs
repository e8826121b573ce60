//! Key-point refinement for evidence blocks that lack `KEY_POINTS`.
//!
//! A second call lists candidate lattice points; each coordinate is snapped
//! to the nearest integer when close enough and the most frequent snapped
//! point wins.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use super::parse_graph_evidence;
use crate::gateway::{
    Attribution, CompletionInvoker, ContentPart, ImageInput, InvokeOptions, Message, ProviderError,
};
use crate::prompts::KEY_POINT_CANDIDATES_PROMPT;

/// Distance under which a coordinate snaps to the nearest integer.
pub const SNAP_THRESHOLD: f64 = 0.15;

static CANDIDATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)x\s*=\s*([+-]?\d+(?:\.\d+)?)\s*,\s*y\s*=\s*([+-]?\d+(?:\.\d+)?)")
        .expect("Invalid candidate regex")
});

static FIELD_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)([A-Z][A-Z0-9_]*)\s*:").expect("Invalid field line regex"));

pub fn snap_value(v: f64, threshold: f64) -> f64 {
    let nearest = v.round();
    if (v - nearest).abs() <= threshold {
        nearest
    } else {
        v
    }
}

pub fn parse_candidate_xy_pairs(text: &str) -> Vec<(f64, f64)> {
    CANDIDATE_RE
        .captures_iter(text)
        .filter_map(|c| Some((c[1].parse().ok()?, c[2].parse().ok()?)))
        .collect()
}

/// Most frequent snapped point; ties go to the earliest.
pub fn rerank_key_point(candidates: &[(f64, f64)]) -> Option<(f64, f64)> {
    let mut tally: Vec<((f64, f64), usize)> = Vec::new();
    for &(x, y) in candidates {
        let p = (snap_value(x, SNAP_THRESHOLD), snap_value(y, SNAP_THRESHOLD));
        match tally.iter_mut().find(|(q, _)| *q == p) {
            Some((_, n)) => *n += 1,
            None => tally.push((p, 1)),
        }
    }
    let mut best: Option<((f64, f64), usize)> = None;
    for (p, n) in tally {
        if best.map_or(true, |(_, bn)| n > bn) {
            best = Some((p, n));
        }
    }
    best.map(|(p, _)| p)
}

fn fmt_coord(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

pub fn format_key_point((x, y): (f64, f64)) -> String {
    format!("(x={}, y={})", fmt_coord(x), fmt_coord(y))
}

/// Replace the `key:` line (keeping its indentation), else insert before
/// `SCALE:`, else append.
pub fn upsert_field_line(text: &str, key: &str, value: &str) -> String {
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    let field_at = |lines: &[String], name: &str| {
        lines.iter().position(|l| {
            FIELD_LINE_RE
                .captures(l)
                .is_some_and(|c| &c[2] == name)
        })
    };

    if let Some(i) = field_at(&lines, key) {
        let indent = FIELD_LINE_RE
            .captures(&lines[i])
            .map(|c| c[1].to_string())
            .unwrap_or_default();
        lines[i] = format!("{indent}{key}: {value}");
    } else if let Some(i) = field_at(&lines, "SCALE") {
        let indent = FIELD_LINE_RE
            .captures(&lines[i])
            .map(|c| c[1].to_string())
            .unwrap_or_default();
        lines.insert(i, format!("{indent}{key}: {value}"));
    } else {
        lines.push(format!("{key}: {value}"));
    }
    lines.join("\n")
}

/// Add a `KEY_POINTS` line to `evidence_text` when it has none.
///
/// Returns the input unchanged when the block does not parse, already has
/// key points, or no candidate comes back.
pub async fn refine_key_points(
    invoker: &CompletionInvoker,
    image: &ImageInput,
    evidence_text: &str,
    model: &str,
    timeout: Duration,
) -> Result<String, ProviderError> {
    match parse_graph_evidence(evidence_text) {
        Ok(ev) if ev.key_points.is_empty() => {}
        _ => return Ok(evidence_text.to_string()),
    }

    let messages = vec![
        Message::system(KEY_POINT_CANDIDATES_PROMPT),
        Message::user(vec![ContentPart::Image(image.clone())]),
    ];
    let resp = invoker
        .invoke(
            model,
            messages,
            InvokeOptions::new(timeout, 200).temperature(0.0),
            Attribution::new("key_point_refine"),
        )
        .await?;

    let candidates = parse_candidate_xy_pairs(&resp.content);
    let Some(point) = rerank_key_point(&candidates) else {
        tracing::debug!("no key point candidates returned");
        return Ok(evidence_text.to_string());
    };
    Ok(upsert_field_line(
        evidence_text,
        "KEY_POINTS",
        &format_key_point(point),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snap_only_within_threshold() {
        assert_eq!(snap_value(2.1, 0.15), 2.0);
        assert_eq!(snap_value(-1.9, 0.15), -2.0);
        assert_eq!(snap_value(2.2, 0.15), 2.2);
    }

    #[test]
    fn rerank_picks_majority_snapped_point() {
        let text = "KEY_POINT_CANDIDATES: (x=1.98, y=-1.98); (x=2.02, y=-2.02); (x=2.01, y=-2.01); (x=0.4, y=3)";
        let candidates = parse_candidate_xy_pairs(text);
        assert_eq!(candidates.len(), 4);
        let best = rerank_key_point(&candidates).unwrap();
        assert_eq!(best, (2.0, -2.0));
        assert_eq!(format_key_point(best), "(x=2, y=-2)");
        assert_eq!(rerank_key_point(&[]), None);
    }

    #[test]
    fn upsert_inserts_before_scale() {
        let block = "GRAPH_EVIDENCE:\n  ASYMPTOTES: none\n  SCALE: x_tick=1, y_tick=1\n  CONFIDENCE: 0.9";
        let out = upsert_field_line(block, "KEY_POINTS", "(x=2, y=-2)");
        assert_eq!(
            out,
            "GRAPH_EVIDENCE:\n  ASYMPTOTES: none\n  KEY_POINTS: (x=2, y=-2)\n  SCALE: x_tick=1, y_tick=1\n  CONFIDENCE: 0.9"
        );
    }

    #[test]
    fn upsert_replaces_existing_none() {
        let block = "KEY_POINTS: none\nSCALE: x_tick=1, y_tick=1";
        let out = upsert_field_line(block, "KEY_POINTS", "(x=2, y=-2)");
        assert_eq!(out, "KEY_POINTS: (x=2, y=-2)\nSCALE: x_tick=1, y_tick=1");
    }
}
