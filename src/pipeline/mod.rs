//! The transformation that turns one style file into scoped CSS and its
//! token mapping.
//!
//! A [`Pipeline`] parses the source into a [`Stylesheet`], runs its stages
//! in order and finally resolves the interchange blocks (`:import` /
//! `:export`) the stages left behind. Resolving an `:import` asks the
//! caller for the tokens of another file through the fetch callback, which
//! is how cross-file references recurse back into the engine.

pub mod icss;
pub mod imports;
pub mod local;
pub mod scope;
pub mod sheet;
pub mod values;

use crate::config::Options;
use crate::error::{Error, Result};
use crate::tokens::TokenMapping;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

pub use imports::ExtractImports;
pub use local::LocalByDefault;
pub use scope::{Scope, ScopedNameGenerator};
pub use sheet::{AtRule, Decl, Node, Rule, Stylesheet};
pub use values::Values;

/// Callback the pipeline uses to obtain the tokens of another file.
pub type Fetch<'f> = dyn FnMut(&str, &Path) -> Result<Arc<TokenMapping>> + 'f;

/// A non-fatal diagnostic produced while transforming a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.line, self.column, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    pub css: String,
    pub tokens: TokenMapping,
    pub warnings: Vec<Warning>,
}

/// One step of the transformation.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self, sheet: &mut Stylesheet, ctx: &mut StageContext<'_, '_>) -> Result<()>;
}

/// What a stage can see of the file being transformed.
pub struct StageContext<'a, 'f> {
    from: &'a Path,
    source: &'a str,
    fetch: &'a mut Fetch<'f>,
    warnings: Vec<Warning>,
}

impl<'a, 'f> StageContext<'a, 'f> {
    pub fn new(from: &'a Path, source: &'a str, fetch: &'a mut Fetch<'f>) -> Self {
        Self {
            from,
            source,
            fetch,
            warnings: Vec::new(),
        }
    }

    pub fn from(&self) -> &Path {
        self.from
    }

    pub fn source(&self) -> &str {
        self.source
    }

    /// Tokens of the file `specifier` refers to, relative to this one.
    pub fn fetch(&mut self, specifier: &str) -> Result<Arc<TokenMapping>> {
        (self.fetch)(specifier, self.from)
    }

    pub fn warn(&mut self, line: u32, message: impl Into<String>) {
        self.warnings.push(Warning {
            line,
            column: 1,
            message: message.into(),
        });
    }

    pub fn error(&self, line: u32, message: impl fmt::Display) -> Error {
        Error::transform(self.from, format!("{line}:1 {message}"))
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}

pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// `use_stages` when given, otherwise `prepend`, the default stages and
    /// `append`.
    pub fn from_options(options: &Options) -> Result<Self> {
        if let Some(stages) = &options.use_stages {
            return Ok(Self::new(stages.clone()));
        }
        let generator = ScopedNameGenerator::new(
            options.generate_scoped_name.clone(),
            options.hash_prefix.clone(),
            options.root_dir.clone(),
        )?;
        let mut stages = options.prepend.clone();
        stages.extend(default_stages(generator));
        stages.extend(options.append.iter().cloned());
        Ok(Self::new(stages))
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn process(
        &self,
        source: &str,
        from: &Path,
        fetch: &mut Fetch<'_>,
    ) -> Result<PipelineOutput> {
        let (mut sheet, parse_warnings) =
            sheet::parse(source).map_err(|w| Error::transform(from, w.to_string()))?;

        let mut ctx = StageContext::new(from, source, fetch);
        ctx.warnings.extend(parse_warnings);
        for stage in &self.stages {
            stage.run(&mut sheet, &mut ctx)?;
        }
        let tokens = icss::resolve(&mut sheet, &mut ctx)?;

        Ok(PipelineOutput {
            css: sheet.to_css(),
            tokens,
            warnings: ctx.into_warnings(),
        })
    }
}

pub fn default_stages(generator: ScopedNameGenerator) -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(Values),
        Arc::new(LocalByDefault),
        Arc::new(ExtractImports),
        Arc::new(Scope::new(generator)),
    ]
}

/// At-rules whose blocks hold rules with selectors.
pub(crate) fn has_selector_children(at: &AtRule) -> bool {
    let name = at.name.to_ascii_lowercase();
    !(name.ends_with("keyframes")
        || matches!(
            name.as_str(),
            "font-face" | "page" | "counter-style" | "property" | "font-feature-values"
        ))
}

/// `:import(...)` and `:export` blocks are not style rules.
pub(crate) fn is_interchange(selector: &str) -> bool {
    let s = selector.trim_start();
    s.starts_with(":import") || s.starts_with(":export")
}

/// Calls `f` for every style rule, descending into grouping at-rules.
pub(crate) fn walk_style_rules(
    nodes: &mut [Node],
    f: &mut dyn FnMut(&mut Rule) -> Result<()>,
) -> Result<()> {
    for node in nodes {
        match node {
            Node::Rule(rule) => {
                if is_interchange(&rule.selector) {
                    continue;
                }
                f(rule)?;
                walk_style_rules(&mut rule.nodes, f)?;
            }
            Node::AtRule(at) if has_selector_children(at) => {
                if let Some(children) = at.nodes.as_mut() {
                    walk_style_rules(children, f)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}
