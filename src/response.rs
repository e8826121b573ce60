//! Post-processing of raw completion text.
//!
//! Everything here is a pure function over strings. The orchestrator runs
//! [`postprocess`] on each candidate and [`extract_final_answer_text`] on the
//! result to get the distilled answer for the second delivery write.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

pub const FINAL_ANSWER_HEADER: &str = "FINAL ANSWER:";
pub const POINTS_TO_PLOT_LABEL: &str = "Points to plot:";

/// x-values at which plotted points are computed.
const PLOT_XS: [i128; 3] = [-3, 0, 3];

/// Upper length of a "bare" final-answer value.
const BARE_MAX_CHARS: usize = 60;

const GRAPH_CUES: &[&str] = &[
    "graph the",
    "graph each",
    "graph this",
    "graph y",
    "plot the",
    "sketch the",
    "draw the graph",
];

static FINAL_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*final\s+answer\s*:\s*(.*)$").expect("Invalid final header regex")
});

static FINAL_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*final\s+answer\s*:\s*").expect("Invalid final prefix regex"));

static DOMAIN_RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\s*)(domain|range)\s*:\s*(.*)$").expect("Invalid domain/range regex")
});

static DISCRETE_QUALIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:\s*\((?:specific|discrete|distinct|individual|separate|only\s+these)(?:\s+(?:values?|points?|numbers?|inputs?|outputs?))?\))+\s*\.?\s*$",
    )
    .expect("Invalid discrete qualifier regex")
});

static LINEAR_EQ_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\by\s*=\s*([^\n=]*)").expect("Invalid linear equation regex"));

static POINTS_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*points\s+to\s+plot\s*:").expect("Invalid points regex"));

static BARE_VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    let number = r"[+\-−]?\d+(?:\.\d+)?(?:/\d+)?";
    let interval = r"[\[(][^\[\]()]*,[^\[\]()]*[\])]";
    let pair = r"\(\s*[^(),]+,\s*[^(),]+\)";
    let pattern = format!(
        r"^(?:\{{[^{{}}]*\}}|{interval}(?:\s*∪\s*{interval})*|{number}|[A-Za-z]\s*=\s*{number}|{pair}(?:\s*,\s*{pair})*|No Solution|All Real Numbers)$"
    );
    Regex::new(&pattern).expect("Invalid bare value regex")
});

static SQRT_BRACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\sqrt\s*\{([^{}]+)\}").expect("Invalid sqrt brace regex"));
static SQRT_PAREN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bsqrt\s*\(\s*([^()]+?)\s*\)").expect("Invalid sqrt paren regex")
});
static SQUARED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\^2\b").expect("Invalid squared regex"));
static CUBED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\^3\b").expect("Invalid cubed regex"));
static HSPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").expect("Invalid space regex"));
static BLANK_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("Invalid blank run regex"));

// =============================================================================
// Pipeline
// =============================================================================

/// Full post-processing chain applied to a raw completion.
pub fn postprocess(raw: &str, problem: Option<&str>) -> String {
    let out = clean(&apply_safe_symbols(raw));
    let out = normalize_final_block(&out);
    let out = enforce_points_to_plot(&out, problem);
    enforce_domain_range_wording(&out)
}

/// Replace LaTeX-ish and ASCII operators with plain symbols.
pub fn apply_safe_symbols(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let t = text.replace("\r\n", "\n").replace('\r', "\n");
    let t = t
        .replace("\\leq", "≤")
        .replace("\\geq", "≥")
        .replace("\\neq", "≠")
        .replace("<=", "≤")
        .replace(">=", "≥")
        .replace("!=", "≠")
        .replace("\\infty", "∞")
        .replace("infty", "∞")
        .replace("\\cup", "∪")
        .replace('⋃', "∪")
        .replace("\\in", "∈")
        .replace("\\mathbb{R}", "ℝ")
        .replace("\\pm", "±");
    let t = SQRT_BRACE_RE.replace_all(&t, "√($1)");
    let t = SQRT_PAREN_RE.replace_all(&t, "√($1)");
    let t = SQUARED_RE.replace_all(&t, "²");
    let t = CUBED_RE.replace_all(&t, "³");
    let t = HSPACE_RE.replace_all(&t, " ");
    let t = BLANK_RUN_RE.replace_all(&t, "\n\n");
    t.trim().to_string()
}

/// Drop `Q:` lines and unwrap `DETECTED_INPUT:` markers.
pub fn clean(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for line in text.lines() {
        let stripped = line.trim();
        if let Some(rest) = stripped.strip_prefix("DETECTED_INPUT:") {
            let value = rest.trim();
            if !value.is_empty() {
                out.push(value);
            }
            continue;
        }
        if stripped.starts_with("Q:") {
            continue;
        }
        out.push(line);
    }
    out.join("\n").trim().to_string()
}

pub fn has_final_answer_header(text: &str) -> bool {
    text.lines().any(|l| FINAL_HEADER_RE.is_match(l))
}

fn final_header_index(lines: &[String]) -> Option<usize> {
    lines.iter().position(|l| FINAL_HEADER_RE.is_match(l))
}

/// Split an inline `FINAL ANSWER: <value>` so the header stands alone.
///
/// Only the first header is rewritten. A missing header is left missing.
pub fn normalize_final_block(text: &str) -> String {
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    let Some(idx) = final_header_index(&lines) else {
        return text.to_string();
    };
    let remainder = FINAL_HEADER_RE
        .captures(&lines[idx])
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    lines[idx] = FINAL_ANSWER_HEADER.to_string();
    if !remainder.is_empty() {
        lines.insert(idx + 1, remainder);
    }
    lines.join("\n")
}

// =============================================================================
// Points to plot
// =============================================================================

/// Add a `Points to plot:` line for graphing prompts over a linear equation.
///
/// `problem` is the user's text input, searched before the output for both
/// the graphing cue and the equation.
pub fn enforce_points_to_plot(output: &str, problem: Option<&str>) -> String {
    if POINTS_LINE_RE.is_match(output) {
        return output.to_string();
    }
    let has_cue = |s: &str| {
        let lower = s.to_lowercase();
        GRAPH_CUES.iter().any(|cue| lower.contains(cue))
    };
    if !(problem.is_some_and(has_cue) || has_cue(output)) {
        return output.to_string();
    }

    let Some((slope, intercept)) = problem
        .and_then(find_linear_equation)
        .or_else(|| find_linear_equation(output))
    else {
        return output.to_string();
    };

    let mut points = Vec::with_capacity(PLOT_XS.len());
    for x in PLOT_XS {
        let Some(y) = slope
            .mul(Ratio::int(x))
            .and_then(|mx| mx.add(intercept))
        else {
            return output.to_string();
        };
        points.push(format!("({x}, {y})"));
    }
    let joined = points.join(", ");
    let points_line = format!("{POINTS_TO_PLOT_LABEL} {joined}");

    let normalized = normalize_final_block(output);
    let mut lines: Vec<String> = normalized.lines().map(str::to_string).collect();
    match final_header_index(&lines) {
        Some(idx) => {
            lines.truncate(idx);
            lines.push(points_line);
            lines.push(FINAL_ANSWER_HEADER.to_string());
            lines.push(joined);
        }
        None => lines.push(points_line),
    }
    lines.join("\n")
}

/// Find the first `y = <linear rhs>` that parses.
fn find_linear_equation(text: &str) -> Option<(Ratio, Ratio)> {
    let text = text.replace('−', "-");
    LINEAR_EQ_RE
        .captures_iter(&text)
        .filter_map(|c| c.get(1))
        .find_map(|m| linear_rhs(m.as_str()))
}

fn linear_rhs(raw: &str) -> Option<(Ratio, Ratio)> {
    const ALLOWED: &str = "0123456789+-/xX*(). ";
    let mut end = raw.len();
    let mut prev: Option<char> = None;
    for (i, c) in raw.char_indices() {
        if !ALLOWED.contains(c) {
            // `x^2`, `2sin` and similar are not linear.
            if c == '^' || (c.is_alphanumeric() && prev.is_some_and(|p| !p.is_whitespace())) {
                return None;
            }
            end = i;
            break;
        }
        prev = Some(c);
    }
    let rhs = raw[..end].trim().trim_end_matches('.');
    LinearParser::new(rhs).parse()
}

/// Recursive-descent parser for `m*x + b` with integer, decimal or
/// fractional coefficients.
struct LinearParser {
    chars: Vec<char>,
    pos: usize,
}

impl LinearParser {
    fn new(s: &str) -> Self {
        Self {
            chars: s.chars().filter(|c| !c.is_whitespace()).collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn parse(mut self) -> Option<(Ratio, Ratio)> {
        if self.chars.is_empty() {
            return None;
        }
        let mut slope = Ratio::ZERO;
        let mut intercept = Ratio::ZERO;
        let mut first = true;
        while self.pos < self.chars.len() {
            let negative = match self.peek() {
                Some('+') => {
                    self.bump();
                    false
                }
                Some('-') => {
                    self.bump();
                    true
                }
                _ if first => false,
                _ => return None,
            };
            let (coef, has_x) = self.term()?;
            let coef = if negative { coef.neg() } else { coef };
            if has_x {
                slope = slope.add(coef)?;
            } else {
                intercept = intercept.add(coef)?;
            }
            first = false;
        }
        Some((slope, intercept))
    }

    fn term(&mut self) -> Option<(Ratio, bool)> {
        let mut coef = match self.peek() {
            Some('(') => {
                self.bump();
                let r = self.fraction()?;
                if self.peek() != Some(')') {
                    return None;
                }
                self.bump();
                Some(r)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => Some(self.fraction()?),
            _ => None,
        };
        let star = self.peek() == Some('*');
        if star {
            self.bump();
        }
        let has_x = matches!(self.peek(), Some('x') | Some('X'));
        if has_x {
            self.bump();
            if self.peek() == Some('/') {
                self.bump();
                let d = self.number()?;
                coef = Some(coef.unwrap_or(Ratio::ONE).div(d)?);
            }
        } else if star || coef.is_none() {
            return None;
        }
        Some((coef.unwrap_or(Ratio::ONE), has_x))
    }

    fn fraction(&mut self) -> Option<Ratio> {
        let n = self.number()?;
        if self.peek() == Some('/') {
            self.bump();
            let d = self.number()?;
            return n.div(d);
        }
        Some(n)
    }

    fn number(&mut self) -> Option<Ratio> {
        let mut int_digits = String::new();
        let mut frac_digits = String::new();
        while let Some(c) = self.peek().filter(char::is_ascii_digit) {
            int_digits.push(c);
            self.bump();
        }
        if self.peek() == Some('.') {
            self.bump();
            while let Some(c) = self.peek().filter(char::is_ascii_digit) {
                frac_digits.push(c);
                self.bump();
            }
        }
        if int_digits.is_empty() && frac_digits.is_empty() {
            return None;
        }
        if int_digits.len() + frac_digits.len() > 18 {
            return None;
        }
        let digits = format!("{int_digits}{frac_digits}");
        let num: i128 = digits.parse().ok()?;
        let den = 10i128.checked_pow(frac_digits.len() as u32)?;
        Ratio::new(num, den)
    }
}

/// Exact rational number in lowest terms with a positive denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ratio {
    num: i128,
    den: i128,
}

impl Ratio {
    pub const ZERO: Ratio = Ratio { num: 0, den: 1 };
    pub const ONE: Ratio = Ratio { num: 1, den: 1 };

    pub fn new(num: i128, den: i128) -> Option<Self> {
        if den == 0 {
            return None;
        }
        let g = gcd(num.checked_abs()?, den.checked_abs()?).max(1);
        let sign = if den < 0 { -1 } else { 1 };
        Some(Self {
            num: sign * num / g,
            den: sign * den / g,
        })
    }

    pub fn int(n: i128) -> Self {
        Self { num: n, den: 1 }
    }

    pub fn neg(self) -> Self {
        Self {
            num: -self.num,
            den: self.den,
        }
    }

    pub fn add(self, other: Self) -> Option<Self> {
        let num = self
            .num
            .checked_mul(other.den)?
            .checked_add(other.num.checked_mul(self.den)?)?;
        Self::new(num, self.den.checked_mul(other.den)?)
    }

    pub fn mul(self, other: Self) -> Option<Self> {
        Self::new(
            self.num.checked_mul(other.num)?,
            self.den.checked_mul(other.den)?,
        )
    }

    pub fn div(self, other: Self) -> Option<Self> {
        Self::new(
            self.num.checked_mul(other.den)?,
            self.den.checked_mul(other.num)?,
        )
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

fn gcd(mut a: i128, mut b: i128) -> i128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

// =============================================================================
// Domain / range wording
// =============================================================================

/// Canonicalize domain/range lines inside the FINAL ANSWER section.
pub fn enforce_domain_range_wording(text: &str) -> String {
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    let Some(idx) = final_header_index(&lines) else {
        return text.to_string();
    };

    let inline = FINAL_HEADER_RE
        .captures(&lines[idx])
        .and_then(|c| c.get(1))
        .and_then(|m| {
            let rewritten = rewrite_domain_range(m.as_str())?;
            Some(format!("{}{rewritten}", &lines[idx][..m.start()]))
        });
    if let Some(line) = inline {
        lines[idx] = line;
    }
    for line in lines.iter_mut().skip(idx + 1) {
        if let Some(rewritten) = rewrite_domain_range(line) {
            *line = rewritten;
        }
    }
    lines.join("\n")
}

fn rewrite_domain_range(line: &str) -> Option<String> {
    let caps = DOMAIN_RANGE_RE.captures(line)?;
    let indent = caps.get(1).map_or("", |m| m.as_str());
    let label = if caps[2].eq_ignore_ascii_case("domain") {
        "Domain"
    } else {
        "Range"
    };
    let value = caps[3].trim();
    let rewritten = if is_all_reals(value) {
        format!("{indent}{label}: (-∞, ∞) (All Real Numbers)")
    } else {
        let stripped = strip_discrete_qualifier(value);
        format!("{indent}{label}: {stripped}")
    };
    (rewritten != line).then_some(rewritten)
}

fn strip_discrete_qualifier(value: &str) -> String {
    DISCRETE_QUALIFIER_RE.replace(value, "").trim().to_string()
}

fn is_all_reals(value: &str) -> bool {
    let compact: String = value
        .to_lowercase()
        .replace('−', "-")
        .replace("infinity", "∞")
        .replace("inf", "∞")
        .replace("+∞", "∞")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let compact = compact.trim_end_matches('.');
    const WORDS: &[&str] = &["allrealnumbers", "allreals", "ℝ", "(allrealnumbers)"];
    const INTERVAL: &str = "(-∞,∞)";
    if compact == INTERVAL || WORDS.contains(&compact) {
        return true;
    }
    let rest = compact
        .strip_prefix(INTERVAL)
        .map(|r| r.trim_start_matches(','))
        .or_else(|| {
            compact
                .strip_suffix(INTERVAL)
                .map(|r| r.trim_end_matches(','))
        });
    rest.is_some_and(|r| WORDS.contains(&r))
}

// =============================================================================
// Distilled final answer
// =============================================================================

/// The user-facing answer: lines from the FINAL ANSWER header onward.
///
/// Applying this to its own output returns the same text.
pub fn extract_final_answer_text(text: &str) -> String {
    let lines: Vec<String> = text.lines().map(str::to_string).collect();
    let body: Vec<String> = match final_header_index(&lines) {
        Some(idx) => {
            let mut body = Vec::new();
            if let Some(m) = FINAL_HEADER_RE.captures(&lines[idx]).and_then(|c| c.get(1)) {
                body.push(m.as_str().to_string());
            }
            body.extend(lines[idx + 1..].iter().cloned());
            body
        }
        None => lines,
    };

    let mut seen: Vec<String> = Vec::new();
    for line in body {
        let mut t = line.trim().to_string();
        while FINAL_PREFIX_RE.is_match(&t) {
            t = FINAL_PREFIX_RE.replace(&t, "").trim().to_string();
        }
        if t.is_empty() {
            continue;
        }
        if DOMAIN_RANGE_RE.is_match(&t) {
            t = strip_discrete_qualifier(&t);
        }
        if !seen.contains(&t) {
            seen.push(t);
        }
    }

    if seen.len() > 1 {
        let bare: Vec<&String> = seen.iter().filter(|l| is_bare_value(l)).collect();
        if let [only] = bare.as_slice() {
            let needle = compact(only);
            let restates = seen
                .iter()
                .filter(|l| l != only)
                .all(|l| compact(l).contains(&needle));
            if restates {
                return (*only).clone();
            }
        }
    }
    seen.join("\n")
}

fn is_bare_value(line: &str) -> bool {
    line.chars().count() <= BARE_MAX_CHARS && BARE_VALUE_RE.is_match(line)
}

fn compact(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}
