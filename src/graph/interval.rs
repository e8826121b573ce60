//! Interval notation found on `Domain:` / `Range:` lines.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

/// Tolerance for comparing finite bounds.
pub const BOUND_TOLERANCE: f64 = 1e-9;

static STATEMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:final\s+answer\s*:\s*)?(domain|range)\s*:\s*(.*)$")
        .expect("Invalid statement regex")
});

static INTERVAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([\[(])\s*([^,\[\]()]+?)\s*,\s*([^,\[\]()]+?)\s*([\])])")
        .expect("Invalid interval regex")
});

static FINAL_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*final\s+answer\s*:\s*(.*)$").expect("Invalid final header regex")
});

static WORK_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*work\s*:\s*(.*)$").expect("Invalid work header regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Domain,
    Range,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    NegInf,
    PosInf,
    Finite(f64),
    /// A token that is neither numeric nor infinite, e.g. `a` or `π/2`.
    Symbol(String),
}

impl Bound {
    pub fn parse(token: &str) -> Self {
        let t: String = token
            .trim()
            .replace('−', "-")
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let lower = t.to_lowercase();
        match lower.as_str() {
            "-∞" | "-inf" | "-infinity" => return Self::NegInf,
            "∞" | "+∞" | "inf" | "+inf" | "infinity" | "+infinity" => return Self::PosInf,
            _ => {}
        }
        parse_number(&t).map_or(Self::Symbol(t), Self::Finite)
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, Self::NegInf | Self::PosInf)
    }

    fn value(&self) -> Option<f64> {
        match self {
            Self::Finite(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegInf => write!(f, "-∞"),
            Self::PosInf => write!(f, "∞"),
            Self::Finite(v) => {
                let rounded = (v * 1e9).round() / 1e9;
                if rounded == 0.0 {
                    write!(f, "0")
                } else {
                    write!(f, "{rounded}")
                }
            }
            Self::Symbol(s) => write!(f, "{s}"),
        }
    }
}

fn parse_number(t: &str) -> Option<f64> {
    if let Some((n, d)) = t.split_once('/') {
        let n: f64 = n.parse().ok()?;
        let d: f64 = d.parse().ok()?;
        if d == 0.0 {
            return None;
        }
        return Some(n / d);
    }
    t.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    pub lower: Bound,
    pub upper: Bound,
    pub left_inclusive: bool,
    pub right_inclusive: bool,
}

impl Interval {
    pub fn all_reals() -> Self {
        Self {
            lower: Bound::NegInf,
            upper: Bound::PosInf,
            left_inclusive: false,
            right_inclusive: false,
        }
    }

    /// `None` when a bound is symbolic.
    pub fn contains(&self, x: f64) -> Option<bool> {
        let above = match &self.lower {
            Bound::NegInf => true,
            Bound::PosInf => false,
            Bound::Finite(l) if (x - l).abs() <= BOUND_TOLERANCE => self.left_inclusive,
            Bound::Finite(l) => x > *l,
            Bound::Symbol(_) => return None,
        };
        let below = match &self.upper {
            Bound::PosInf => true,
            Bound::NegInf => false,
            Bound::Finite(u) if (x - u).abs() <= BOUND_TOLERANCE => self.right_inclusive,
            Bound::Finite(u) => x < *u,
            Bound::Symbol(_) => return None,
        };
        Some(above && below)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = if self.left_inclusive { '[' } else { '(' };
        let close = if self.right_inclusive { ']' } else { ')' };
        write!(f, "{open}{}, {}{close}", self.lower, self.upper)
    }
}

/// A union of intervals in the order written.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalSet {
    pub intervals: Vec<Interval>,
}

impl IntervalSet {
    /// Parse the value part of a `Domain:` / `Range:` line.
    pub fn parse(value: &str) -> Option<Self> {
        let intervals: Vec<Interval> = INTERVAL_RE
            .captures_iter(value)
            .map(|c| {
                let lower = Bound::parse(&c[2]);
                let upper = Bound::parse(&c[3]);
                Interval {
                    left_inclusive: &c[1] == "[" && !lower.is_infinite(),
                    right_inclusive: &c[4] == "]" && !upper.is_infinite(),
                    lower,
                    upper,
                }
            })
            .collect();
        if !intervals.is_empty() {
            return Some(Self { intervals });
        }
        let lower = value.to_lowercase();
        if lower.contains("all real") || value.contains('ℝ') {
            return Some(Self {
                intervals: vec![Interval::all_reals()],
            });
        }
        None
    }

    /// Lower bound of the first interval and its inclusivity.
    pub fn left(&self) -> Option<(&Bound, bool)> {
        self.intervals.first().map(|i| (&i.lower, i.left_inclusive))
    }

    /// Upper bound of the last interval and its inclusivity.
    pub fn right(&self) -> Option<(&Bound, bool)> {
        self.intervals.last().map(|i| (&i.upper, i.right_inclusive))
    }

    /// `None` when containment cannot be decided.
    pub fn contains(&self, x: f64) -> Option<bool> {
        let mut undecided = false;
        for interval in &self.intervals {
            match interval.contains(x) {
                Some(true) => return Some(true),
                Some(false) => {}
                None => undecided = true,
            }
        }
        (!undecided).then_some(false)
    }

    /// Normalized form used for equality; whitespace and number spelling
    /// (`0.5` vs `1/2`) do not matter.
    pub fn signature(&self) -> String {
        self.intervals
            .iter()
            .map(|i| i.to_string().replace(' ', ""))
            .collect::<Vec<_>>()
            .join("∪")
    }
}

impl fmt::Display for IntervalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.intervals.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join(" ∪ "))
    }
}

/// Every `Domain:` or `Range:` statement in `section` that parses, in order.
pub fn stated_intervals(section: &str, axis: Axis) -> Vec<IntervalSet> {
    STATEMENT_RE
        .captures_iter(section)
        .filter(|c| {
            let is_domain = c[1].eq_ignore_ascii_case("domain");
            is_domain == (axis == Axis::Domain)
        })
        .filter_map(|c| IntervalSet::parse(&c[2]))
        .collect()
}

/// Split an answer into its WORK and FINAL ANSWER sections.
///
/// FINAL starts at the first header and includes its inline remainder.
/// WORK is everything between a `WORK:` line and that header; without a
/// `WORK:` line it is everything before the header.
pub fn split_work_final(text: &str) -> (String, String) {
    let lines: Vec<&str> = text.lines().collect();
    let Some(final_idx) = lines.iter().position(|l| FINAL_HEADER_RE.is_match(l)) else {
        return (text.to_string(), String::new());
    };

    let mut final_lines: Vec<&str> = Vec::new();
    if let Some(m) = FINAL_HEADER_RE.captures(lines[final_idx]).and_then(|c| c.get(1)) {
        if !m.as_str().trim().is_empty() {
            final_lines.push(m.as_str());
        }
    }
    final_lines.extend_from_slice(&lines[final_idx + 1..]);

    let head = &lines[..final_idx];
    let work_lines: Vec<&str> = match head.iter().position(|l| WORK_HEADER_RE.is_match(l)) {
        Some(w) => {
            let mut out = Vec::new();
            if let Some(m) = WORK_HEADER_RE.captures(head[w]).and_then(|c| c.get(1)) {
                if !m.as_str().trim().is_empty() {
                    out.push(m.as_str());
                }
            }
            out.extend_from_slice(&head[w + 1..]);
            out
        }
        None => head.to_vec(),
    };
    (work_lines.join("\n"), final_lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_parse_tokens() {
        assert_eq!(Bound::parse("−∞"), Bound::NegInf);
        assert_eq!(Bound::parse(" inf "), Bound::PosInf);
        assert_eq!(Bound::parse("-1/2"), Bound::Finite(-0.5));
        assert_eq!(Bound::parse("a"), Bound::Symbol("a".into()));
    }

    #[test]
    fn union_parses_and_signs() {
        let set = IntervalSet::parse("(-∞, 2) ∪ (2, ∞)").unwrap();
        assert_eq!(set.intervals.len(), 2);
        assert_eq!(set.signature(), "(-∞,2)∪(2,∞)");
        assert_eq!(set.contains(2.0), Some(false));
        assert_eq!(set.contains(2.5), Some(true));
    }

    #[test]
    fn signature_ignores_number_spelling() {
        let a = IntervalSet::parse("[1/2, 4)").unwrap();
        let b = IntervalSet::parse("[0.5,4)").unwrap();
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn infinite_bounds_never_inclusive() {
        let set = IntervalSet::parse("[-∞, 3]").unwrap();
        assert_eq!(set.left(), Some((&Bound::NegInf, false)));
        assert_eq!(set.right(), Some((&Bound::Finite(3.0), true)));
    }

    #[test]
    fn all_reals_words() {
        let set = IntervalSet::parse("All Real Numbers").unwrap();
        assert_eq!(set.signature(), "(-∞,∞)");
        assert!(IntervalSet::parse("{1, 2, 3}").is_none());
    }

    #[test]
    fn split_sections() {
        let text = "f(x)\nWORK:\nDomain: [-2, 4)\nFINAL ANSWER: Domain: (-2, 4)\nRange: (-5, 4]";
        let (work, fin) = split_work_final(text);
        assert_eq!(work, "Domain: [-2, 4)");
        assert_eq!(fin, "Domain: (-2, 4)\nRange: (-5, 4]");
        assert_eq!(stated_intervals(&fin, Axis::Range).len(), 1);
        assert_eq!(stated_intervals(&work, Axis::Range).len(), 0);
    }
}
