//! Quoting normalisation for JavaScript-object-literal syntax.

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Index one past the closing quote of the literal opened at `start`, and
/// whether the literal was terminated at all.
fn literal_end(chars: &[char], start: usize) -> (usize, bool) {
    let quote = chars[start];
    let mut idx = start + 1;
    while idx < chars.len() {
        match chars[idx] {
            '\\' => idx += 2,
            c if c == quote => return (idx + 1, true),
            _ => idx += 1,
        }
    }
    (chars.len(), false)
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars[from..].iter().copied().find(|c| !c.is_whitespace())
}

fn last_significant(out: &str) -> Option<char> {
    out.chars().rev().find(|c| !c.is_whitespace())
}

/// Rewrite single-quoted strings as double-quoted ones, drop trailing
/// commas before `}`/`]` and quote bare object keys. Double-quoted strings
/// are copied through untouched.
pub fn normalize_quoting(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut idx = 0;

    while idx < chars.len() {
        let c = chars[idx];
        match c {
            '"' => {
                let (end, _) = literal_end(&chars, idx);
                out.extend(&chars[idx..end.min(chars.len())]);
                idx = end;
            }
            '\'' => {
                let (end, terminated) = literal_end(&chars, idx);
                let inner_end = if terminated { end - 1 } else { end };
                out.push('"');
                let mut inner = idx + 1;
                while inner < inner_end.min(chars.len()) {
                    match chars[inner] {
                        '\\' if chars.get(inner + 1) == Some(&'\'') => {
                            out.push('\'');
                            inner += 2;
                        }
                        '\\' => {
                            out.push('\\');
                            if let Some(&escaped) = chars.get(inner + 1) {
                                out.push(escaped);
                            }
                            inner += 2;
                        }
                        '"' => {
                            out.push_str("\\\"");
                            inner += 1;
                        }
                        other => {
                            out.push(other);
                            inner += 1;
                        }
                    }
                }
                if terminated {
                    out.push('"');
                }
                idx = end;
            }
            ',' if matches!(next_significant(&chars, idx + 1), Some('}') | Some(']')) => {
                idx += 1;
            }
            c if is_ident_start(c) && matches!(last_significant(&out), Some('{') | Some(',')) => {
                let mut end = idx;
                while end < chars.len() && is_ident_char(chars[end]) {
                    end += 1;
                }
                let ident: String = chars[idx..end].iter().collect();
                if next_significant(&chars, end) == Some(':') {
                    out.push('"');
                    out.push_str(&ident);
                    out.push('"');
                } else {
                    out.push_str(&ident);
                }
                idx = end;
            }
            _ => {
                out.push(c);
                idx += 1;
            }
        }
    }

    out
}
