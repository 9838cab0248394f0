//! Interchange blocks: `:import("file") { alias: name }` binds `alias` to the
//! token `name` of another file, `:export { key: value }` declares the
//! tokens of this one.

use super::sheet::{Decl, Node, Stylesheet};
use super::StageContext;
use crate::error::Result;
use crate::tokens::TokenMapping;
use ahash::AHashMap;
use std::mem;

/// Fetches every `:import`, substitutes its aliases throughout the sheet and
/// turns the `:export` blocks into the file's tokens. Both kinds of block
/// are removed from the sheet.
pub fn resolve(sheet: &mut Stylesheet, ctx: &mut StageContext<'_, '_>) -> Result<TokenMapping> {
    let mut replacements: AHashMap<String, String> = AHashMap::new();
    let mut exports: Vec<Decl> = Vec::new();
    let mut kept = Vec::with_capacity(sheet.nodes.len());

    for node in mem::take(&mut sheet.nodes) {
        let Node::Rule(rule) = node else {
            kept.push(node);
            continue;
        };
        if let Some(specifier) = import_source(&rule.selector) {
            let tokens = ctx.fetch(&specifier)?;
            for decl in rule.decls() {
                match tokens.get(decl.value.trim()) {
                    Some(value) => {
                        replacements.insert(decl.prop.clone(), value.to_string());
                    }
                    None => {
                        return Err(ctx.error(
                            decl.line,
                            format!("`{}` is not exported by \"{specifier}\"", decl.value.trim()),
                        ));
                    }
                }
            }
        } else if rule.selector.trim() == ":export" {
            exports.extend(rule.decls().cloned());
        } else {
            kept.push(Node::Rule(rule));
        }
    }
    sheet.nodes = kept;

    if !replacements.is_empty() {
        sheet.walk_decls_mut(&mut |decl| decl.value = replace_symbols(&decl.value, &replacements));
        sheet.walk_at_rules_mut(&mut |at| at.params = replace_symbols(&at.params, &replacements));
        sheet.walk_rules_mut(&mut |rule| {
            rule.selector = replace_symbols(&rule.selector, &replacements)
        });
    }

    let mut tokens = TokenMapping::new();
    for decl in exports {
        let value = replace_symbols(&decl.value, &replacements);
        tokens.insert(decl.prop, value);
    }
    Ok(tokens)
}

/// The file named by an `:import(...)` selector, without quotes.
pub fn import_source(selector: &str) -> Option<String> {
    let inner = selector
        .trim()
        .strip_prefix(":import(")?
        .strip_suffix(')')?
        .trim();
    let unquoted = unquote(inner).unwrap_or(inner);
    (!unquoted.is_empty()).then(|| unquoted.to_string())
}

pub fn unquote(text: &str) -> Option<&str> {
    let text = text.trim();
    ['"', '\''].into_iter().find_map(|q| {
        text.strip_prefix(q)
            .and_then(|rest| rest.strip_suffix(q))
    })
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || !c.is_ascii()
}

/// Replaces every whole word of `text` found in `symbols`. Quoted strings
/// and `url(...)` contents are left alone.
pub fn replace_symbols(text: &str, symbols: &AHashMap<String, String>) -> String {
    if symbols.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if c == '"' || c == '\'' {
            out.push(c);
            let mut escaped = false;
            for (_, next) in chars.by_ref() {
                out.push(next);
                if escaped {
                    escaped = false;
                } else if next == '\\' {
                    escaped = true;
                } else if next == c {
                    break;
                }
            }
            continue;
        }
        if !is_symbol_char(c) {
            out.push(c);
            continue;
        }
        let mut end = start + c.len_utf8();
        while let Some(&(i, next)) = chars.peek() {
            if !is_symbol_char(next) {
                break;
            }
            end = i + next.len_utf8();
            chars.next();
        }
        let word = &text[start..end];
        if word.eq_ignore_ascii_case("url") && chars.peek().is_some_and(|&(_, n)| n == '(') {
            out.push_str(word);
            for (_, next) in chars.by_ref() {
                out.push(next);
                if next == ')' {
                    break;
                }
            }
            continue;
        }
        match symbols.get(word) {
            Some(replacement) => out.push_str(replacement),
            None => out.push_str(word),
        }
    }
    out
}
