//! Response parsing: model text → [`GeneratedListingCopy`].
//!
//! Models asked for "JSON only" still wrap it in prose or code fences, drop
//! fields, or answer in plain lines. Parsing therefore never fails; it runs
//! two tiers and reports which one produced the copy:
//!
//! 1. **JSON**: the span from the first `{` to the last `}` is decoded. If
//!    that span does not decode (two fragments, stray braces in prose), each
//!    balanced `{…}` object is tried in order and the first that decodes wins.
//! 2. **Heuristic**: the text is split into non-blank lines; the first line
//!    mentioning "title" becomes the title, the remaining lines the
//!    description.
//!
//! Both tiers substitute [`FALLBACK_TITLE`] / [`FALLBACK_DESCRIPTION`] so the
//! mandatory fields are never empty.

use crate::output::{CopySource, GeneratedListingCopy, FALLBACK_DESCRIPTION, FALLBACK_TITLE};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

/// Greedy object span: first `{` through last `}`, across newlines.
static JSON_SPAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// Everything up to and including the label on a title line.
static TITLE_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i).*title:?\s*").unwrap());

/// Result of [`parse_response`], tagged with the tier that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedCopy {
    Parsed(GeneratedListingCopy),
    Heuristic(GeneratedListingCopy),
}

impl ParsedCopy {
    pub fn copy(&self) -> &GeneratedListingCopy {
        match self {
            ParsedCopy::Parsed(c) | ParsedCopy::Heuristic(c) => c,
        }
    }

    pub fn into_copy(self) -> GeneratedListingCopy {
        match self {
            ParsedCopy::Parsed(c) | ParsedCopy::Heuristic(c) => c,
        }
    }

    pub fn source(&self) -> CopySource {
        match self {
            ParsedCopy::Parsed(_) => CopySource::Json,
            ParsedCopy::Heuristic(_) => CopySource::Heuristic,
        }
    }
}

/// Turn raw model text into listing copy. Never fails.
pub fn parse_response(raw: &str) -> ParsedCopy {
    match extract_object(raw) {
        Some(obj) => ParsedCopy::Parsed(copy_from_object(&obj)),
        None => {
            debug!("No decodable JSON object in model text; using line heuristic");
            ParsedCopy::Heuristic(copy_from_lines(raw))
        }
    }
}

// ── Tier 1: JSON ─────────────────────────────────────────────────────────

fn extract_object(raw: &str) -> Option<Map<String, Value>> {
    let greedy = JSON_SPAN_RE.find(raw)?;
    if let Some(obj) = decode_object(greedy.as_str()) {
        return Some(obj);
    }

    debug!("Greedy brace span did not decode; scanning balanced objects");
    let mut offset = greedy.start();
    while let Some((start, end)) = balanced_object(raw, offset) {
        if let Some(obj) = decode_object(&raw[start..end]) {
            return Some(obj);
        }
        offset = start + 1;
    }
    None
}

fn decode_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Byte range of the first balanced `{…}` starting at or after `from`.
///
/// Braces inside JSON string literals are ignored, including escaped quotes.
fn balanced_object(text: &str, from: usize) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let start = from + text.get(from..)?.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, i + 1));
                }
            }
            _ => {}
        }
    }
    None
}

fn copy_from_object(obj: &Map<String, Value>) -> GeneratedListingCopy {
    GeneratedListingCopy {
        title: text_field(obj.get("title")).unwrap_or_else(|| FALLBACK_TITLE.to_string()),
        description: text_field(obj.get("description"))
            .unwrap_or_else(|| FALLBACK_DESCRIPTION.to_string()),
        price: price_field(obj.get("price")),
        category: text_field(obj.get("category")),
        brand: text_field(obj.get("brand")),
        model: text_field(obj.get("model")),
    }
}

/// Non-blank string, or a number rendered as text. Anything else is absent.
fn text_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Finite non-zero number, from a JSON number or a numeric string.
fn price_field(value: Option<&Value>) -> Option<f64> {
    let price = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (price.is_finite() && price != 0.0).then_some(price)
}

// ── Tier 2: line heuristic ───────────────────────────────────────────────

fn copy_from_lines(raw: &str) -> GeneratedListingCopy {
    let lines: Vec<&str> = raw.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    let title_line = lines
        .iter()
        .position(|line| line.to_lowercase().contains("title"));

    let title = title_line
        .map(|i| TITLE_PREFIX_RE.replace(lines[i], "").trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| FALLBACK_TITLE.to_string());

    let description = lines
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(i, _)| Some(*i) != title_line)
        .map(|(_, line)| *line)
        .collect::<Vec<_>>()
        .join("\n");
    let description = if description.is_empty() {
        FALLBACK_DESCRIPTION.to_string()
    } else {
        description
    };

    GeneratedListingCopy::new(title, description)
}
