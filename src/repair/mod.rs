//! Best-effort repair of JSON that an LLM produced for chart payloads.
//!
//! The usual failure shapes are JSON that was escaped once or twice too
//! often, JavaScript object-literal syntax (functions, arrow functions,
//! template literals, single quotes, bare keys, trailing commas) and
//! truncated or over-closed structures. [`repair_json`] applies an ordered
//! list of transformations and stops at the first one that yields a
//! parseable object or array. If none does, the input comes back untouched.

mod literals;
mod normalize;
mod scan;


pub use scan::scan_to_closer;

use serde_json::Value;
use tracing::{debug, trace};

/// Which step of the pipeline produced the result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStrategy {
    /// Input parsed as-is
    AlreadyValid,
    /// Input was a JSON string literal wrapping a serialized object/array
    Decoded,
    /// Outer quotes removed and backslash escapes collapsed
    Unescaped,
    /// Script constructs stripped and quoting normalised
    Normalized,
    /// Unmatched braces/brackets closed or trimmed
    Balanced,
    /// First self-contained object extracted from surrounding garbage
    Extracted,
    /// Nothing worked; the text is the original input
    Unrepaired,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Repaired {
    pub text: String,
    pub strategy: RepairStrategy,
}

impl Repaired {
    fn new(text: impl Into<String>, strategy: RepairStrategy) -> Self {
        Self {
            text: text.into(),
            strategy,
        }
    }

    pub fn is_repaired(&self) -> bool {
        self.strategy != RepairStrategy::Unrepaired
    }

    /// Parse the resulting text
    pub fn value(&self) -> Option<Value> {
        try_parse(&self.text)
    }
}

/// A single guarded parse attempt
pub fn try_parse(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

fn parses_as_container(text: &str) -> bool {
    matches!(try_parse(text), Some(Value::Object(_) | Value::Array(_)))
}

/// Follow JSON string literals that themselves contain serialized JSON until
/// an object or array emerges. Returns the innermost serialized text.
fn decode_nested(value: Value) -> Option<String> {
    let mut current = value;
    let mut decoded = None;

    while let Value::String(inner) = &current {
        match try_parse(inner) {
            Some(next) => {
                decoded = Some(inner.clone());
                current = next;
            }
            None => break,
        }
    }

    match &current {
        Value::Object(_) | Value::Array(_) => decoded,
        _ => None,
    }
}

fn unwrap_outer_quotes(text: &str) -> &str {
    if text.len() >= 4 && text.starts_with("\"{") && text.ends_with("}\"") {
        &text[1..text.len() - 1]
    } else {
        text
    }
}

/// Collapse one level of backslash escaping. Quotes go first so that the
/// backslash of an escaped quote is not consumed by the `\\` rule.
fn unescape(text: &str) -> String {
    text.replace("\\\"", "\"")
        .replace("\\\\", "\\")
        .replace("\\n", "\n")
        .replace("\\r", "\r")
        .replace("\\t", "\t")
}

/// Steps four to nine on an already unwrapped candidate.
fn repair_structure(candidate: &str) -> Option<Repaired> {
    let stripped = literals::strip_function_literals(candidate);
    let stripped = literals::strip_simple_expressions(&stripped);
    let normalized = normalize::normalize_quoting(&stripped);
    if parses_as_container(&normalized) {
        return Some(Repaired::new(normalized, RepairStrategy::Normalized));
    }

    let balanced = scan::balance_brackets(&normalized);
    if parses_as_container(&balanced) {
        return Some(Repaired::new(balanced, RepairStrategy::Balanced));
    }

    let extracted = scan::object_candidates(&normalized)
        .find(|object| parses_as_container(object))
        .map(|object| Repaired::new(object, RepairStrategy::Extracted));
    extracted
}

/// Repair `input` into parseable JSON, or return it unchanged.
///
/// Never panics and keeps no state between calls. Valid JSON is returned
/// verbatim unless it is a string literal that wraps serialized JSON, in
/// which case the wrapped text is returned.
pub fn repair_json(input: &str) -> Repaired {
    if let Some(value) = try_parse(input) {
        return match decode_nested(value) {
            Some(inner) => Repaired::new(inner, RepairStrategy::Decoded),
            None => Repaired::new(input, RepairStrategy::AlreadyValid),
        };
    }

    let unwrapped = unwrap_outer_quotes(input.trim());
    let unescaped = unescape(unwrapped);
    if parses_as_container(&unescaped) {
        debug!("Repaired JSON by unescaping");
        return Repaired::new(unescaped, RepairStrategy::Unescaped);
    }

    if let Some(repaired) = repair_structure(&unescaped) {
        debug!("Repaired JSON via {:?}", repaired.strategy);
        return repaired;
    }

    // Unescaping also turns legitimate `\n` escapes inside strings into raw
    // control characters; retry on the escaped text before giving up.
    if unescaped != unwrapped {
        if let Some(repaired) = repair_structure(unwrapped) {
            debug!("Repaired JSON via {:?} without unescaping", repaired.strategy);
            return repaired;
        }
    }

    trace!("JSON repair exhausted all strategies");
    Repaired::new(input, RepairStrategy::Unrepaired)
}

/// Convenience wrapper returning only the repaired text
pub fn repair(input: &str) -> String {
    repair_json(input).text
}
