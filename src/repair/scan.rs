//! Structure-aware scanning over JSON-like text.
//!
//! All delimiters handled here are ASCII, so scanning bytes is safe for
//! UTF-8 input: continuation bytes never collide with them.

/// Find the byte index of the closer matching the opener at `open_idx`.
///
/// Double, single and backtick quoted literals are skipped, so delimiters
/// inside strings or function bodies with string constants do not count.
pub fn scan_to_closer(text: &str, open_idx: usize, open: u8, close: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(open_idx) != Some(&open) {
        return None;
    }

    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut escaped = false;

    for (idx, &byte) in bytes.iter().enumerate().skip(open_idx) {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == q {
                quote = None;
            }
            continue;
        }

        match byte {
            b'"' | b'\'' | b'`' => quote = Some(byte),
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }

    None
}

/// Per-byte flags marking positions inside double-quoted string literals
/// (quotes included).
pub fn string_mask(text: &str) -> Vec<bool> {
    let mut mask = vec![false; text.len()];
    let mut in_string = false;
    let mut escaped = false;

    for (idx, &byte) in text.as_bytes().iter().enumerate() {
        if in_string {
            mask[idx] = true;
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
        } else if byte == b'"' {
            in_string = true;
            mask[idx] = true;
        }
    }

    mask
}

fn closer_for(open: u8) -> u8 {
    if open == b'{' {
        b'}'
    } else {
        b']'
    }
}

/// Close unmatched braces/brackets and trim surplus closers from the tail.
///
/// Unmatched openers are closed innermost first. A string left open at the
/// end of the text is terminated before closing the containers around it.
pub fn balance_brackets(text: &str) -> String {
    let mut open_stack: Vec<u8> = Vec::new();
    let mut excess_braces = 0usize;
    let mut excess_brackets = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for &byte in text.as_bytes() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => open_stack.push(byte),
            b'}' | b']' => {
                let opener = if byte == b'}' { b'{' } else { b'[' };
                match open_stack.iter().rposition(|&o| o == opener) {
                    Some(pos) => {
                        open_stack.remove(pos);
                    }
                    None if byte == b'}' => excess_braces += 1,
                    None => excess_brackets += 1,
                }
            }
            _ => {}
        }
    }

    let mut result = text.trim_end().to_string();

    // Trim surplus closers, but only while they sit at the tail.
    while excess_braces + excess_brackets > 0 {
        let trimmed_len = result.trim_end().len();
        result.truncate(trimmed_len);
        match result.as_bytes().last() {
            Some(b'}') if excess_braces > 0 => excess_braces -= 1,
            Some(b']') if excess_brackets > 0 => excess_brackets -= 1,
            _ => break,
        }
        result.pop();
    }

    if in_string {
        result.push('"');
    }

    if !open_stack.is_empty() {
        let trimmed_len = result.trim_end().len();
        result.truncate(trimmed_len);
        if result.ends_with(',') {
            result.pop();
        }
        for &open in open_stack.iter().rev() {
            result.push(closer_for(open) as char);
        }
    }

    result
}

/// Self-contained `{ ... }` candidates, in order of their opening brace.
pub fn object_candidates(text: &str) -> impl Iterator<Item = &str> + '_ {
    text.bytes()
        .enumerate()
        .filter(|&(_, byte)| byte == b'{')
        .filter_map(move |(start, _)| {
            scan_to_closer(text, start, b'{', b'}').map(|end| &text[start..=end])
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_nested_pairs() {
        let text = "f(a, (b, c)) tail";
        assert_eq!(scan_to_closer(text, 1, b'(', b')'), Some(11));
    }

    #[test]
    fn ignores_delimiters_inside_strings() {
        let text = r#"{ "a": "}", 'b': '{', c: `}` }"#;
        assert_eq!(scan_to_closer(text, 0, b'{', b'}'), Some(text.len() - 1));
    }

    #[test]
    fn respects_escaped_quotes() {
        let text = r#"{"a": "x\"}"}"#;
        assert_eq!(scan_to_closer(text, 0, b'{', b'}'), Some(text.len() - 1));
    }

    #[test]
    fn requires_opener_at_index() {
        assert_eq!(scan_to_closer("abc", 0, b'{', b'}'), None);
        assert_eq!(scan_to_closer("{ never closed", 0, b'{', b'}'), None);
    }

    #[test]
    fn mask_covers_strings_only() {
        let mask = string_mask(r#"{"k":1}"#);
        assert_eq!(mask, vec![false, true, true, true, false, false, false]);
    }

    #[test]
    fn balance_appends_in_nesting_order() {
        assert_eq!(balance_brackets(r#"{"a": [1, 2"#), r#"{"a": [1, 2]}"#);
        assert_eq!(balance_brackets(r#"{"a": {"b": 1},"#), r#"{"a": {"b": 1}}"#);
    }

    #[test]
    fn balance_trims_excess_tail() {
        assert_eq!(balance_brackets(r#"{"a": 1}}]"#), r#"{"a": 1}"#);
    }

    #[test]
    fn balance_terminates_open_string() {
        assert_eq!(balance_brackets(r#"{"a": "trunc"#), r#"{"a": "trunc"}"#);
    }

    #[test]
    fn candidates_follow_opening_order() {
        let text = r#"junk {"a": {"b": 1}} more {"c": 2}"#;
        let found: Vec<&str> = object_candidates(text).collect();
        assert_eq!(found[0], r#"{"a": {"b": 1}}"#);
        assert_eq!(found[1], r#"{"b": 1}"#);
        assert_eq!(found[2], r#"{"c": 2}"#);
    }
}
