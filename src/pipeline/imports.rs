use super::icss::unquote;
use super::sheet::{Decl, Node, Rule, Stylesheet};
use super::{Stage, StageContext, walk_style_rules};
use crate::error::Result;
use ahash::AHashMap;
use regex::Regex;
use std::sync::LazyLock;

static FROM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(.+?)\s+from\s+("[^"]*"|'[^']*'|[^\s"']+)$"#).unwrap()
});

/// Splits `a b from "./x.css"` into its names and its (still quoted) source.
pub(crate) fn split_from(value: &str) -> Option<(&str, &str)> {
    let caps = FROM.captures(value.trim())?;
    let names = caps.get(1)?.as_str().trim();
    let source = caps.get(2)?.as_str();
    Some((names, source))
}

pub(crate) fn alias_fragment(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Collected `:import` bindings, grouped by source in first-seen order.
#[derive(Default)]
pub(crate) struct ImportTable {
    sources: Vec<(String, Vec<Decl>)>,
    aliases: AHashMap<(String, String), String>,
    counter: usize,
}

impl ImportTable {
    /// The alias bound to `name` of `source`, created on first use.
    pub(crate) fn alias(&mut self, prefix: &str, source: &str, name: &str) -> String {
        let key = (source.to_string(), name.to_string());
        if let Some(alias) = self.aliases.get(&key) {
            return alias.clone();
        }
        let alias = format!("i__{prefix}_{}_{}", alias_fragment(name), self.counter);
        self.counter += 1;
        let decl = Decl::new(alias.clone(), name);
        match self.sources.iter_mut().find(|(s, _)| s == source) {
            Some((_, decls)) => decls.push(decl),
            None => self.sources.push((source.to_string(), vec![decl])),
        }
        self.aliases.insert(key, alias.clone());
        alias
    }

    /// Inserts the `:import` rules at the top of the sheet.
    pub(crate) fn prepend_to(self, sheet: &mut Stylesheet) {
        let rules = self.sources.into_iter().map(|(source, decls)| {
            let selector = format!(":import(\"{source}\")");
            Node::Rule(Rule::new(selector, decls.into_iter().map(Node::Decl).collect()))
        });
        sheet.nodes.splice(0..0, rules);
    }
}

/// Turns `composes: a b from "./x.css"` into aliases bound by `:import`.
pub struct ExtractImports;

impl Stage for ExtractImports {
    fn name(&self) -> &str {
        "extract-imports"
    }

    fn run(&self, sheet: &mut Stylesheet, _ctx: &mut StageContext<'_, '_>) -> Result<()> {
        let mut table = ImportTable::default();
        walk_style_rules(&mut sheet.nodes, &mut |rule| {
            for node in &mut rule.nodes {
                let Node::Decl(decl) = node else { continue };
                if !matches!(decl.prop.as_str(), "composes" | "compose-with") {
                    continue;
                }
                let Some((names, source)) = split_from(&decl.value) else {
                    continue;
                };
                let Some(path) = unquote(source) else {
                    // `from global` is left to the scope stage.
                    continue;
                };
                let aliases: Vec<String> = names
                    .split_whitespace()
                    .map(|name| table.alias("imported", path, name))
                    .collect();
                decl.value = aliases.join(" ");
            }
            Ok(())
        })?;
        table.prepend_to(sheet);
        Ok(())
    }
}
