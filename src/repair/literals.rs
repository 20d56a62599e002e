//! Removal of JavaScript constructs that LLMs embed in chart configs.

use super::scan::{scan_to_closer, string_mask};
use regex::{Captures, Regex};
use std::sync::OnceLock;

const FUNCTION_PLACEHOLDER: &str = "\"[Function]\"";
const EXPRESSION_PLACEHOLDER: &str = "[Expression]";
const TEMPLATE_PLACEHOLDER: &str = "\"[Template]\"";

fn colon_function() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":\s*(?P<f>(?:async\s+)?function\b)").unwrap())
}

fn colon_arrow() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r":\s*(?P<f>(?:async\s+)?(?:\(|[A-Za-z_$][\w$]*\s*=>))").unwrap()
    })
}

fn bare_function() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?P<f>\b(?:async\s+)?function\b)").unwrap())
}

fn expression_arrow() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?P<lead>[:\[,]\s*)(?:async\s+)?(?:\([^()]*\)|[A-Za-z_$][\w$]*)\s*=>\s*(?:`[^`]*`|[^{\s,}\]][^,}\]\n]*)",
        )
        .unwrap()
    })
}

fn interpolation() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{[^}]*\}").unwrap())
}

fn template_literal() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`[^`]*`").unwrap())
}

fn skip_whitespace(text: &str, pos: usize) -> usize {
    text[pos..]
        .find(|c: char| !c.is_whitespace())
        .map_or(text.len(), |offset| pos + offset)
}

fn skip_identifier(text: &str, pos: usize) -> usize {
    text[pos..]
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
        .map_or(text.len(), |offset| pos + offset)
}

fn skip_async(text: &str, pos: usize) -> usize {
    if text[pos..].starts_with("async") {
        let after = pos + "async".len();
        let next = skip_whitespace(text, after);
        if next > after {
            return next;
        }
    }
    pos
}

/// End (exclusive) of `function [name](...) { ... }` starting at `start`.
fn function_end(text: &str, start: usize) -> Option<usize> {
    let mut pos = skip_async(text, start);
    if !text[pos..].starts_with("function") {
        return None;
    }
    pos = skip_whitespace(text, pos + "function".len());
    if text[pos..].starts_with('*') {
        pos = skip_whitespace(text, pos + 1);
    }
    pos = skip_whitespace(text, skip_identifier(text, pos));

    let params_end = scan_to_closer(text, pos, b'(', b')')?;
    let body_start = skip_whitespace(text, params_end + 1);
    let body_end = scan_to_closer(text, body_start, b'{', b'}')?;
    Some(body_end + 1)
}

/// End (exclusive) of an arrow function with a brace body starting at `start`.
fn arrow_end(text: &str, start: usize) -> Option<usize> {
    let mut pos = skip_async(text, start);
    if text[pos..].starts_with('(') {
        pos = scan_to_closer(text, pos, b'(', b')')? + 1;
    } else {
        let ident_end = skip_identifier(text, pos);
        if ident_end == pos {
            return None;
        }
        pos = ident_end;
    }

    pos = skip_whitespace(text, pos);
    if !text[pos..].starts_with("=>") {
        return None;
    }
    let body_start = skip_whitespace(text, pos + 2);
    let body_end = scan_to_closer(text, body_start, b'{', b'}')?;
    Some(body_end + 1)
}

/// Replace every construct located by `pattern` (group `f` marks its start)
/// whose extent `end_of` can determine. Matches inside string literals and
/// constructs that cannot be delimited are left alone.
fn replace_constructs<F>(
    text: &str,
    pattern: &Regex,
    end_of: fn(&str, usize) -> Option<usize>,
    accept: F,
) -> String
where
    F: Fn(&str, usize) -> bool,
{
    let mask = string_mask(text);
    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut search = 0;

    while search < text.len() {
        let Some(caps) = pattern.captures_at(text, search) else {
            break;
        };
        let whole = caps.get(0).map_or(search..text.len(), |m| m.range());
        let start = caps.name("f").map_or(whole.start, |m| m.start());

        let end = if mask[start] || !accept(text, start) {
            None
        } else {
            end_of(text, start)
        };

        match end {
            Some(end) => {
                out.push_str(&text[copied..start]);
                out.push_str(FUNCTION_PLACEHOLDER);
                copied = end;
                search = end;
            }
            None => search = whole.end.max(search + 1),
        }
    }

    out.push_str(&text[copied..]);
    out
}

fn not_after_colon(text: &str, start: usize) -> bool {
    !text[..start].trim_end().ends_with(':')
}

/// Replace function literals and brace-bodied arrow functions with
/// `"[Function]"`. Colon-prefixed functions go first, then colon-prefixed
/// arrows, then bare functions, so nested matches are consumed with their
/// enclosing construct.
pub fn strip_function_literals(text: &str) -> String {
    let text = replace_constructs(text, colon_function(), function_end, |_, _| true);
    let text = replace_constructs(&text, colon_arrow(), arrow_end, |_, _| true);
    replace_constructs(&text, bare_function(), function_end, not_after_colon)
}

/// Replace every match of `pattern` that starts outside a double-quoted
/// string with `replacement(caps)`.
fn replace_unquoted<F>(text: &str, pattern: &Regex, replacement: F) -> String
where
    F: Fn(&Captures) -> String,
{
    let mask = string_mask(text);
    pattern
        .replace_all(text, |caps: &Captures| match caps.get(0) {
            Some(whole) if !mask[whole.start()] => replacement(caps),
            Some(whole) => whole.as_str().to_string(),
            None => String::new(),
        })
        .into_owned()
}

/// Replace expression-bodied arrows, `${...}` interpolations and template
/// literals, none of which nest in practice.
pub fn strip_simple_expressions(text: &str) -> String {
    let text = replace_unquoted(text, expression_arrow(), |caps| {
        format!("{}{FUNCTION_PLACEHOLDER}", &caps["lead"])
    });
    let text = replace_unquoted(&text, interpolation(), |_| EXPRESSION_PLACEHOLDER.to_string());
    replace_unquoted(&text, template_literal(), |_| TEMPLATE_PLACEHOLDER.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_named_function_with_nested_braces() {
        let input = r#"{"cb": function format(x) { if (x) { return {v: x}; } return 0; }, "n": 1}"#;
        assert_eq!(
            strip_function_literals(input),
            r#"{"cb": "[Function]", "n": 1}"#
        );
    }

    #[test]
    fn strips_arrow_with_block_body() {
        let input = r#"{"label": (ctx) => { return ctx.raw + '%'; }}"#;
        assert_eq!(strip_function_literals(input), r#"{"label": "[Function]"}"#);

        let input = r#"{"label": async value => { return value; }}"#;
        assert_eq!(strip_function_literals(input), r#"{"label": "[Function]"}"#);
    }

    #[test]
    fn strips_bare_function_in_array() {
        let input = r#"{"hooks": [function() { return 1; }, 2]}"#;
        assert_eq!(
            strip_function_literals(input),
            r#"{"hooks": ["[Function]", 2]}"#
        );
    }

    #[test]
    fn leaves_function_words_in_strings() {
        let input = r#"{"title": "a function(x) {y} in prose"}"#;
        assert_eq!(strip_function_literals(input), input);
    }

    #[test]
    fn leaves_undelimited_function_alone() {
        let input = r#"{"cb": function(x) { return x; "#;
        assert_eq!(strip_function_literals(input), input);
    }

    #[test]
    fn strips_expression_arrows() {
        let input = r#"{"callback": (v) => v * 2, "other": 1}"#;
        assert_eq!(
            strip_simple_expressions(input),
            r#"{"callback": "[Function]", "other": 1}"#
        );
    }

    #[test]
    fn strips_templates_and_interpolations() {
        let input = r#"{"label": `Total: ${value}`}"#;
        assert_eq!(strip_simple_expressions(input), r#"{"label": "[Template]"}"#);

        let input = r#"{"label": `${value} units`, "raw": ${value}}"#;
        assert_eq!(
            strip_simple_expressions(input),
            r#"{"label": "[Template]", "raw": [Expression]}"#
        );
    }

    #[test]
    fn leaves_expressions_in_strings() {
        let input = r#"{"k": "x, y => z", "t": "${a} and `b`", "n": 1}"#;
        assert_eq!(strip_simple_expressions(input), input);
    }
}
