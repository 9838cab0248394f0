use super::sheet::Stylesheet;
use super::{Stage, StageContext, walk_style_rules};
use crate::error::Result;
use memchr::memchr3;

/// Marks every class and id selector as `:local(...)` unless it sits inside
/// `:global(...)` or after a `:global` switch.
pub struct LocalByDefault;

impl Stage for LocalByDefault {
    fn name(&self) -> &str {
        "local-by-default"
    }

    fn run(&self, sheet: &mut Stylesheet, ctx: &mut StageContext<'_, '_>) -> Result<()> {
        walk_style_rules(&mut sheet.nodes, &mut |rule| {
            rule.selector = localize_selector(&rule.selector)
                .map_err(|message| ctx.error(rule.line, message))?;
            Ok(())
        })
    }
}

pub fn localize_selector(selector: &str) -> Result<String, String> {
    if memchr3(b'.', b'#', b':', selector.as_bytes()).is_none() {
        return Ok(selector.to_string());
    }
    let chars: Vec<char> = selector.chars().collect();
    localize(&chars, true).map_err(|e| format!("{e} in selector `{selector}`"))
}

fn localize(chars: &[char], default_local: bool) -> Result<String, String> {
    let mut out = String::with_capacity(chars.len() + 16);
    let mut local = default_local;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                let end = skip_string(chars, i);
                out.extend(&chars[i..end]);
                i = end;
            }
            '[' => {
                let end = find_close(chars, i, '[', ']')?;
                out.extend(&chars[i..end]);
                i = end;
            }
            '\\' => {
                let end = (i + 2).min(chars.len());
                out.extend(&chars[i..end]);
                i = end;
            }
            ',' => {
                local = default_local;
                out.push(c);
                i += 1;
            }
            '.' | '#' if starts_ident(chars, i + 1) => {
                let end = scan_ident(chars, i + 1);
                if local {
                    out.push_str(":local(");
                    out.extend(&chars[i..end]);
                    out.push(')');
                } else {
                    out.extend(&chars[i..end]);
                }
                i = end;
            }
            ':' => {
                let colons = if chars.get(i + 1) == Some(&':') { 2 } else { 1 };
                let name_start = i + colons;
                let name_end = scan_ident(chars, name_start);
                let name: String = chars[name_start..name_end].iter().collect();
                let name = name.to_ascii_lowercase();
                let has_args = chars.get(name_end) == Some(&'(');

                match (colons, name.as_str(), has_args) {
                    (1, "global" | "local", true) => {
                        let close = find_close(chars, name_end, '(', ')')?;
                        out.push_str(&localize(&chars[name_end + 1..close - 1], name == "local")?);
                        i = close;
                    }
                    (1, "global" | "local", false) => {
                        local = name == "local";
                        i = name_end;
                        if out.is_empty() || out.ends_with(char::is_whitespace) {
                            while i < chars.len() && chars[i].is_whitespace() {
                                i += 1;
                            }
                        }
                    }
                    (_, "not" | "is" | "where" | "has" | "matches", true) => {
                        let close = find_close(chars, name_end, '(', ')')?;
                        out.extend(&chars[i..=name_end]);
                        out.push_str(&localize(&chars[name_end + 1..close - 1], local)?);
                        out.push(')');
                        i = close;
                    }
                    _ => {
                        let end = if has_args {
                            find_close(chars, name_end, '(', ')')?
                        } else {
                            name_end
                        };
                        out.extend(&chars[i..end]);
                        i = end;
                    }
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(out)
}

pub(crate) fn starts_ident(chars: &[char], at: usize) -> bool {
    match chars.get(at) {
        Some(&c) if c.is_alphabetic() || c == '_' || c == '\\' || !c.is_ascii() => true,
        Some(&'-') => chars
            .get(at + 1)
            .is_some_and(|&n| n.is_alphabetic() || n == '-' || n == '_' || !n.is_ascii()),
        _ => false,
    }
}

/// Index just past the identifier starting at `at`.
pub(crate) fn scan_ident(chars: &[char], at: usize) -> usize {
    let mut i = at;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            i = (i + 2).min(chars.len());
        } else if c.is_alphanumeric() || c == '-' || c == '_' || !c.is_ascii() {
            i += 1;
        } else {
            break;
        }
    }
    i
}

/// Index just past the quoted string starting at `at`.
pub(crate) fn skip_string(chars: &[char], at: usize) -> usize {
    let quote = chars[at];
    let mut i = at + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

/// Index just past the bracket closing the one at `at`.
pub(crate) fn find_close(
    chars: &[char],
    at: usize,
    open: char,
    close: char,
) -> Result<usize, String> {
    let mut depth = 0usize;
    let mut i = at;
    while i < chars.len() {
        let c = chars[i];
        if c == '"' || c == '\'' {
            i = skip_string(chars, i);
            continue;
        }
        if c == '\\' {
            i += 2;
            continue;
        }
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Ok(i + 1);
            }
        }
        i += 1;
    }
    Err(format!("missing `{close}`"))
}

/// `a\:b` -> `a:b`.
pub(crate) fn unescape(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len());
    let mut chars = ident.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
