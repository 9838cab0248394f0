//! Renames `:local(...)` selectors and builds the export of every local name,
//! `composes` included.

use super::icss::unquote;
use super::imports::split_from;
use super::local::{find_close, scan_ident, skip_string, starts_ident, unescape};
use super::sheet::{Decl, Node, Rule, Stylesheet};
use super::{Stage, StageContext, walk_style_rules};
use crate::config::ScopedName;
use crate::error::{Error, Result};
use ahash::{AHashMap, AHashSet};
use cssparser::serialize_identifier;
use data_encoding::{BASE32_NOPAD, BASE64URL_NOPAD, HEXLOWER};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashEncoding {
    Base64,
    Base32,
    Hex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Literal(String),
    Local,
    Name,
    Ext,
    Path,
    Folder,
    Hash {
        encoding: HashEncoding,
        len: Option<usize>,
    },
}

/// Parses a scoped-name template such as `[name]__[local]___[hash:base64:5]`.
pub fn parse_template(template: &str) -> Result<Vec<Part>> {
    if template.trim().is_empty() {
        return Err(Error::config("scoped name template must not be empty"));
    }
    let mut parts = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('[') {
        if open > 0 {
            parts.push(Part::Literal(rest[..open].to_string()));
        }
        let close = rest[open..].find(']').map(|c| open + c).ok_or_else(|| {
            Error::config(format!("unclosed `[` in scoped name template `{template}`"))
        })?;
        parts.push(parse_placeholder(&rest[open + 1..close], template)?);
        rest = &rest[close + 1..];
    }
    if !rest.is_empty() {
        parts.push(Part::Literal(rest.to_string()));
    }
    if !parts
        .iter()
        .any(|p| matches!(p, Part::Local | Part::Hash { .. }))
    {
        return Err(Error::config(format!(
            "scoped name template `{template}` needs [local] or [hash]"
        )));
    }
    Ok(parts)
}

fn parse_placeholder(body: &str, template: &str) -> Result<Part> {
    let unknown = || Error::config(format!("unknown placeholder [{body}] in `{template}`"));
    let mut segments: Vec<&str> = body.split(':').collect();
    // `[sha1:hash:base64:5]` names the digest; only one digest is offered.
    if segments.len() > 1 && matches!(segments[1], "hash" | "contenthash") {
        segments.remove(0);
    }
    match segments.as_slice() {
        ["local"] => Ok(Part::Local),
        ["name"] => Ok(Part::Name),
        ["ext"] => Ok(Part::Ext),
        ["path"] => Ok(Part::Path),
        ["folder"] => Ok(Part::Folder),
        ["hash" | "contenthash", args @ ..] => {
            let mut encoding = HashEncoding::Hex;
            let mut len = None;
            for arg in args {
                match *arg {
                    "base64" => encoding = HashEncoding::Base64,
                    "base32" => encoding = HashEncoding::Base32,
                    "hex" => encoding = HashEncoding::Hex,
                    n => match n.parse::<usize>() {
                        Ok(0) => {
                            return Err(Error::config(format!(
                                "hash length must be positive in `{template}`"
                            )));
                        }
                        Ok(n) => len = Some(n),
                        Err(_) => return Err(unknown()),
                    },
                }
            }
            Ok(Part::Hash { encoding, len })
        }
        _ => Err(unknown()),
    }
}

/// Produces the scoped identifier of a local name.
#[derive(Clone)]
pub struct ScopedNameGenerator {
    strategy: ScopedName,
    parts: Vec<Part>,
    hash_prefix: String,
    root_dir: PathBuf,
}

impl ScopedNameGenerator {
    pub fn new(strategy: ScopedName, hash_prefix: String, root_dir: PathBuf) -> Result<Self> {
        let parts = match &strategy {
            ScopedName::Template(template) => parse_template(template)?,
            ScopedName::Custom(_) => Vec::new(),
        };
        Ok(Self {
            strategy,
            parts,
            hash_prefix,
            root_dir,
        })
    }

    pub fn generate(&self, local: &str, path: &Path, source: &str) -> String {
        if let ScopedName::Custom(f) = &self.strategy {
            return f(local, path, source);
        }
        let relative = path.strip_prefix(&self.root_dir).unwrap_or(path);
        let relative_str = relative.to_string_lossy().replace('\\', "/");

        let mut name = String::with_capacity(32);
        for part in &self.parts {
            match part {
                Part::Literal(text) => name.push_str(text),
                Part::Local => name.push_str(local),
                Part::Name => name.push_str(&file_part(path.file_stem())),
                Part::Ext => name.push_str(&file_part(path.extension())),
                Part::Folder => name.push_str(&file_part(
                    path.parent().and_then(Path::file_name),
                )),
                Part::Path => {
                    if let Some(dir) = relative.parent().filter(|d| !d.as_os_str().is_empty()) {
                        name.push_str(&dir.to_string_lossy().replace('\\', "/"));
                        name.push('/');
                    }
                }
                Part::Hash { encoding, len } => {
                    let content = format!("{}{}\0{}", self.hash_prefix, relative_str, local);
                    let encoded = encode(&digest(content.as_bytes()), *encoding);
                    let take = len.unwrap_or(encoded.len()).min(encoded.len());
                    name.push_str(&encoded[..take]);
                }
            }
        }
        sanitize(&name)
    }
}

fn file_part(part: Option<&std::ffi::OsStr>) -> String {
    part.map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn digest(content: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&seahash::hash(content).to_le_bytes());
    out[8..].copy_from_slice(
        &seahash::hash_seeded(content, 0x9e37_79b9, 0x7f4a_7c15, 0xf39c_c060, 0x5ced_c834)
            .to_le_bytes(),
    );
    out
}

fn encode(bytes: &[u8], encoding: HashEncoding) -> String {
    match encoding {
        HashEncoding::Base64 => BASE64URL_NOPAD.encode(bytes),
        HashEncoding::Base32 => BASE32_NOPAD.encode(bytes).to_ascii_lowercase(),
        HashEncoding::Hex => HEXLOWER.encode(bytes),
    }
}

/// Makes `name` a valid CSS identifier without escapes.
fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let bytes = out.as_bytes();
    let needs_prefix = match bytes.first() {
        None => true,
        Some(b) if b.is_ascii_digit() => true,
        Some(b'-') => bytes.get(1).is_none_or(|b| b.is_ascii_digit() || *b == b'-'),
        _ => false,
    };
    if needs_prefix {
        out.insert(0, '_');
    }
    out
}

fn escape_ident(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len() + 4);
    if serialize_identifier(name, &mut escaped).is_err() {
        return name.to_string();
    }
    escaped
}

#[derive(Clone)]
enum Target {
    Local(String),
    Raw(String),
}

/// Local names in first-seen order with their scoped identifiers.
#[derive(Default)]
struct Locals {
    order: Vec<String>,
    scoped: AHashMap<String, String>,
}

impl Locals {
    fn scoped_name(&mut self, local: String, generator: impl FnOnce(&str) -> String) -> String {
        if let Some(existing) = self.scoped.get(&local) {
            return existing.clone();
        }
        let scoped = generator(&local);
        self.scoped.insert(local.clone(), scoped.clone());
        self.order.push(local);
        scoped
    }
}

pub struct Scope {
    generator: ScopedNameGenerator,
}

impl Scope {
    pub fn new(generator: ScopedNameGenerator) -> Self {
        Self { generator }
    }
}

impl Stage for Scope {
    fn name(&self) -> &str {
        "scope"
    }

    fn run(&self, sheet: &mut Stylesheet, ctx: &mut StageContext<'_, '_>) -> Result<()> {
        let aliases: AHashSet<String> = sheet
            .nodes
            .iter()
            .filter_map(|node| match node {
                Node::Rule(rule) if rule.selector.trim_start().starts_with(":import") => {
                    Some(rule.decls().map(|d| d.prop.clone()).collect::<Vec<_>>())
                }
                _ => None,
            })
            .flatten()
            .collect();

        let from = ctx.from().to_path_buf();
        let source = ctx.source().to_string();
        let mut locals = Locals::default();
        let mut edges: AHashMap<String, Vec<Target>> = AHashMap::new();

        walk_style_rules(&mut sheet.nodes, &mut |rule| {
            let original = rule.selector.clone();
            rule.selector = scope_selector(&original, &mut |local: String| {
                locals.scoped_name(local, |l| self.generator.generate(l, &from, &source))
            })
            .map_err(|m| ctx.error(rule.line, m))?;

            let composes = take_composes(rule);
            if composes.is_empty() {
                return Ok(());
            }
            let Some(classes) = single_class_names(&original) else {
                return Err(ctx.error(
                    rule.line,
                    format!(
                        "composition is only allowed when selector is single :local class name not in \"{original}\""
                    ),
                ));
            };
            for decl in composes {
                let targets =
                    parse_composes(&decl.value, &aliases).map_err(|m| ctx.error(decl.line, m))?;
                for class in &classes {
                    edges
                        .entry(class.clone())
                        .or_default()
                        .extend(targets.iter().cloned());
                }
            }
            Ok(())
        })?;

        if locals.order.is_empty() {
            return Ok(());
        }
        let mut exports = Vec::with_capacity(locals.order.len());
        for local in &locals.order {
            let mut tokens = Vec::new();
            let mut visiting = Vec::new();
            expand(local, &locals, &edges, &mut visiting, &mut tokens)
                .map_err(|m| Error::transform(ctx.from(), m))?;
            let mut seen = AHashSet::new();
            tokens.retain(|t| seen.insert(t.clone()));
            exports.push(Node::Decl(Decl::new(local.clone(), tokens.join(" "))));
        }
        sheet.nodes.push(Node::Rule(Rule::new(":export", exports)));
        Ok(())
    }
}

fn expand(
    local: &str,
    locals: &Locals,
    edges: &AHashMap<String, Vec<Target>>,
    visiting: &mut Vec<String>,
    out: &mut Vec<String>,
) -> Result<(), String> {
    if visiting.iter().any(|v| v == local) {
        visiting.push(local.to_string());
        return Err(format!("circular composition: {}", visiting.join(" -> ")));
    }
    if let Some(scoped) = locals.scoped.get(local) {
        out.push(scoped.clone());
    }
    let Some(targets) = edges.get(local) else {
        return Ok(());
    };
    visiting.push(local.to_string());
    for target in targets {
        match target {
            Target::Raw(name) => out.push(name.clone()),
            Target::Local(name) => {
                if !locals.scoped.contains_key(name) {
                    return Err(format!("referenced class name \"{name}\" in composes not found"));
                }
                expand(name, locals, edges, visiting, out)?;
            }
        }
    }
    visiting.pop();
    Ok(())
}

fn take_composes(rule: &mut Rule) -> Vec<Decl> {
    let mut composes = Vec::new();
    rule.nodes.retain(|node| match node {
        Node::Decl(decl) if matches!(decl.prop.as_str(), "composes" | "compose-with") => {
            composes.push(decl.clone());
            false
        }
        _ => true,
    });
    composes
}

fn parse_composes(value: &str, aliases: &AHashSet<String>) -> Result<Vec<Target>, String> {
    if let Some((names, source)) = split_from(value) {
        if source == "global" {
            return Ok(names
                .split_whitespace()
                .map(|n| Target::Raw(n.to_string()))
                .collect());
        }
        let path = unquote(source).unwrap_or(source);
        return Err(format!(
            "composes from \"{path}\" was not extracted; the extract-imports stage must run before scope"
        ));
    }
    Ok(value
        .split_whitespace()
        .map(|name| {
            if let Some(global) = name
                .strip_prefix("global(")
                .and_then(|n| n.strip_suffix(')'))
            {
                Target::Raw(global.to_string())
            } else if aliases.contains(name) {
                Target::Raw(name.to_string())
            } else {
                Target::Local(name.to_string())
            }
        })
        .collect())
}

/// Class names of a selector made only of `:local(.name)` parts.
fn single_class_names(selector: &str) -> Option<Vec<String>> {
    selector
        .split(',')
        .map(|part| {
            let inner = part
                .trim()
                .strip_prefix(":local(")?
                .strip_suffix(')')?
                .trim()
                .strip_prefix('.')?;
            let chars: Vec<char> = inner.chars().collect();
            (!chars.is_empty() && scan_ident(&chars, 0) == chars.len()).then(|| unescape(inner))
        })
        .collect()
}

/// Replaces the class and id selectors inside every `:local(...)`.
fn scope_selector(
    selector: &str,
    scoped: &mut dyn FnMut(String) -> String,
) -> Result<String, String> {
    if !selector.contains(":local(") {
        return Ok(selector.to_string());
    }
    let chars: Vec<char> = selector.chars().collect();
    let mut out = String::with_capacity(selector.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '"' || c == '\'' {
            let end = skip_string(&chars, i);
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }
        if c == ':' && chars[i..].starts_with(&[':', 'l', 'o', 'c', 'a', 'l', '(']) {
            let open = i + ":local".len();
            let close = find_close(&chars, open, '(', ')')?;
            let inner = &chars[open + 1..close - 1];
            let mut j = 0;
            while j < inner.len() {
                let ch = inner[j];
                if matches!(ch, '.' | '#') && starts_ident(inner, j + 1) {
                    let end = scan_ident(inner, j + 1);
                    let raw: String = inner[j + 1..end].iter().collect();
                    out.push(ch);
                    out.push_str(&escape_ident(&scoped(unescape(&raw))));
                    j = end;
                } else {
                    out.push(ch);
                    j += 1;
                }
            }
            i = close;
            continue;
        }
        out.push(c);
        i += 1;
    }
    Ok(out.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn generator(template: &str) -> ScopedNameGenerator {
        ScopedNameGenerator::new(
            ScopedName::Template(template.into()),
            String::new(),
            PathBuf::from("/project"),
        )
        .unwrap()
    }

    #[test]
    fn templates_parse_into_parts() {
        let parts = parse_template("[name]__[local]___[hash:base64:5]").unwrap();
        assert_eq!(
            parts,
            vec![
                Part::Name,
                Part::Literal("__".into()),
                Part::Local,
                Part::Literal("___".into()),
                Part::Hash {
                    encoding: HashEncoding::Base64,
                    len: Some(5)
                },
            ]
        );
        assert!(parse_template("[sha1:hash:hex:8]").is_ok());
        assert!(parse_template("[local").is_err());
        assert!(parse_template("[hash:base99]").is_err());
    }

    #[test]
    fn zero_length_hash_is_rejected() {
        let err = parse_template("[local]_[hash:base64:0]").unwrap_err();
        assert!(err.to_string().contains("hash length must be positive"));
        assert!(parse_template("[hash:0]").is_err());
        assert!(parse_template("[hash:1]").is_ok());
    }

    #[test]
    fn hash_is_deterministic_and_sized() {
        let g = generator("[local]_[hash:base64:5]");
        let path = Path::new("/project/a.css");
        let first = g.generate("title", path, "");
        let second = g.generate("title", path, "");
        assert_eq!(first, second);
        assert!(first.starts_with("title_"));
        assert_eq!(first.len(), "title_".len() + 5);
        assert_ne!(first, g.generate("body", path, ""));
    }

    #[test]
    fn hash_prefix_changes_the_hash() {
        let plain = generator("[hash:hex:8]");
        let seeded = ScopedNameGenerator::new(
            ScopedName::Template("[hash:hex:8]".into()),
            "seed".into(),
            PathBuf::from("/project"),
        )
        .unwrap();
        let path = Path::new("/project/a.css");
        assert_ne!(plain.generate("a", path, ""), seeded.generate("a", path, ""));
    }

    #[test]
    fn path_placeholders_are_sanitized() {
        let g = generator("[path][name]-[ext]-[folder]-[local]");
        assert_eq!(
            g.generate("btn", Path::new("/project/ui/kit/button.css"), ""),
            "ui_kit_button-css-kit-btn"
        );
        assert_eq!(sanitize("1abc"), "_1abc");
        assert_eq!(sanitize("-1a"), "_-1a");
    }

    #[test]
    fn custom_generators_are_used_verbatim() {
        let g = ScopedNameGenerator::new(
            ScopedName::Custom(Arc::new(|local: &str, _: &Path, _: &str| format!("x-{local}"))),
            String::new(),
            PathBuf::from("/project"),
        )
        .unwrap();
        assert_eq!(g.generate("a", Path::new("/project/a.css"), ""), "x-a");
    }

    #[test]
    fn scope_selector_renames_locals() {
        let mut seen = Vec::new();
        let out = scope_selector(":local(.a) > :local(#b):hover, div", &mut |local| {
            seen.push(local.clone());
            format!("s_{local}")
        })
        .unwrap();
        assert_eq!(out, ".s_a > #s_b:hover, div");
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn only_single_class_selectors_may_compose() {
        assert_eq!(
            single_class_names(":local(.a), :local(.b)"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(single_class_names(":local(.a) :local(.b)"), None);
        assert_eq!(single_class_names(":local(.a):hover"), None);
    }
}
