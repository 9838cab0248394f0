//! `@value` definitions and imports.

use super::icss::{replace_symbols, unquote};
use super::imports::{ImportTable, split_from};
use super::sheet::{Decl, Node, Rule, Stylesheet};
use super::{Stage, StageContext};
use crate::error::Result;
use ahash::AHashMap;
use regex::Regex;
use std::mem;
use std::sync::LazyLock;

static DEFINITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\w-]+)(?:\s*:\s*|\s+)(\S.*)$").unwrap());

static IMPORTED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\w-]+)(?:\s+as\s+([\w-]+))?$").unwrap());

pub struct Values;

impl Stage for Values {
    fn name(&self) -> &str {
        "values"
    }

    fn run(&self, sheet: &mut Stylesheet, ctx: &mut StageContext<'_, '_>) -> Result<()> {
        let mut definitions: AHashMap<String, String> = AHashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut table = ImportTable::default();
        let mut kept = Vec::with_capacity(sheet.nodes.len());

        for node in mem::take(&mut sheet.nodes) {
            let at = match node {
                Node::AtRule(at) if at.name == "value" && at.nodes.is_none() => at,
                other => {
                    kept.push(other);
                    continue;
                }
            };
            if let Some((names, source)) = split_from(&at.params) {
                let path = match unquote(source) {
                    Some(path) => Some(path.to_string()),
                    None => definitions
                        .get(source)
                        .and_then(|v| unquote(v))
                        .map(str::to_string),
                };
                let Some(path) = path else {
                    ctx.warn(at.line, format!("Invalid value import source `{source}`"));
                    continue;
                };
                let mut bound = Vec::new();
                for item in names.trim_matches(|c| c == '(' || c == ')').split(',') {
                    let item = item.trim();
                    match IMPORTED_NAME.captures(item) {
                        Some(caps) => {
                            let imported = caps[1].to_string();
                            let local = caps.get(2).map_or(imported.as_str(), |m| m.as_str());
                            bound.push((local.to_string(), table.alias("value", &path, &imported)));
                        }
                        None => ctx.warn(at.line, format!("Invalid value import `{item}`")),
                    }
                }
                for (local, alias) in bound {
                    define(&mut definitions, &mut order, local, alias);
                }
            } else if let Some(caps) = DEFINITION.captures(at.params.trim()) {
                let name = caps[1].to_string();
                let value = replace_symbols(caps[2].trim(), &definitions);
                define(&mut definitions, &mut order, name, value);
            } else {
                ctx.warn(at.line, format!("Invalid value definition `{}`", at.params));
            }
        }
        sheet.nodes = kept;

        if definitions.is_empty() {
            table.prepend_to(sheet);
            return Ok(());
        }
        sheet.walk_decls_mut(&mut |decl| decl.value = replace_symbols(&decl.value, &definitions));
        sheet.walk_at_rules_mut(&mut |at| at.params = replace_symbols(&at.params, &definitions));

        let exports = order
            .iter()
            .filter_map(|name| {
                let value = definitions.get(name)?;
                Some(Node::Decl(Decl::new(name.clone(), value.clone())))
            })
            .collect();
        sheet.nodes.push(Node::Rule(Rule::new(":export", exports)));
        table.prepend_to(sheet);
        Ok(())
    }
}

fn define(
    definitions: &mut AHashMap<String, String>,
    order: &mut Vec<String>,
    name: String,
    value: String,
) {
    if !definitions.contains_key(&name) {
        order.push(name.clone());
    }
    definitions.insert(name, value);
}
