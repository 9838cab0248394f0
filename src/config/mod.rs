//! Setup options for the hook, and the TOML file they can be read from.

use crate::error::{Error, Result};
use crate::pipeline::scope::parse_template;
use crate::pipeline::{PipelineOutput, Stage};
use crate::resolver::absolutize;
use crate::tokens::TokenMapping;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_EXTENSION: &str = ".css";
pub const DEFAULT_SCOPED_NAME: &str = "[name]__[local]___[hash:base64:5]";
pub const DEV_MODE_ENV: &str = "CSS_MODULES_DEV_MODE";
pub const CONFIG_FILE_NAME: &str = "csshook.toml";

pub type PreprocessFn = Arc<dyn Fn(&str, &Path) -> String + Send + Sync>;
pub type ProcessCssFn = Arc<dyn Fn(&str, &Path) + Send + Sync>;
pub type ProcessTokensFn =
    Arc<dyn Fn(TokenMapping, &Path, &PipelineOutput) -> TokenMapping + Send + Sync>;
pub type ScopedNameFn = Arc<dyn Fn(&str, &Path, &str) -> String + Send + Sync>;
pub type IgnorePredicate = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Files the hook leaves to the previously registered loader.
#[derive(Clone)]
pub enum Ignore {
    Glob(glob::Pattern),
    Regex(regex::Regex),
    Predicate(IgnorePredicate),
}

impl Ignore {
    pub fn glob(pattern: &str) -> Result<Self> {
        glob::Pattern::new(pattern)
            .map(Ignore::Glob)
            .map_err(|e| Error::config(format!("invalid ignore glob '{pattern}': {e}")))
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        regex::Regex::new(pattern)
            .map(Ignore::Regex)
            .map_err(|e| Error::config(format!("invalid ignore regex '{pattern}': {e}")))
    }

    pub fn predicate(f: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        Ignore::Predicate(Arc::new(f))
    }

    /// Globs are tried against the absolute path and against the path
    /// relative to `root_dir`.
    pub fn matches(&self, path: &Path, root_dir: &Path) -> bool {
        match self {
            Ignore::Glob(pattern) => {
                pattern.matches_path(path)
                    || path
                        .strip_prefix(root_dir)
                        .is_ok_and(|rel| pattern.matches_path(rel))
            }
            Ignore::Regex(re) => re.is_match(&path.to_string_lossy()),
            Ignore::Predicate(f) => f(path),
        }
    }
}

impl fmt::Debug for Ignore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ignore::Glob(p) => write!(f, "Glob({})", p.as_str()),
            Ignore::Regex(r) => write!(f, "Regex({})", r.as_str()),
            Ignore::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// How local class names become scoped identifiers.
#[derive(Clone)]
pub enum ScopedName {
    Template(String),
    /// Called with the local name, the absolute file path and the source.
    Custom(ScopedNameFn),
}

impl fmt::Debug for ScopedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopedName::Template(t) => write!(f, "Template({t:?})"),
            ScopedName::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Clone)]
pub struct Options {
    pub dev_mode: bool,
    pub extensions: Vec<String>,
    pub ignore: Option<Ignore>,
    pub preprocess_css: Option<PreprocessFn>,
    pub process_css: Option<ProcessCssFn>,
    pub process_tokens: Option<ProcessTokensFn>,
    pub camel_case: bool,
    pub generate_scoped_name: ScopedName,
    pub hash_prefix: String,
    pub root_dir: PathBuf,
    pub prepend: Vec<Arc<dyn Stage>>,
    pub append: Vec<Arc<dyn Stage>>,
    pub use_stages: Option<Vec<Arc<dyn Stage>>>,
    pub module_dirs: Vec<String>,
    pub verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dev_mode: dev_mode_from_env(),
            extensions: vec![DEFAULT_EXTENSION.to_string()],
            ignore: None,
            preprocess_css: None,
            process_css: None,
            process_tokens: None,
            camel_case: false,
            generate_scoped_name: ScopedName::Template(DEFAULT_SCOPED_NAME.to_string()),
            hash_prefix: String::new(),
            root_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            prepend: Vec::new(),
            append: Vec::new(),
            use_stages: None,
            module_dirs: vec!["node_modules".to_string()],
            verbose: false,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dev_mode(mut self, on: bool) -> Self {
        self.dev_mode = on;
        self
    }

    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn ignore(mut self, ignore: Ignore) -> Self {
        self.ignore = Some(ignore);
        self
    }

    pub fn preprocess_css(
        mut self,
        f: impl Fn(&str, &Path) -> String + Send + Sync + 'static,
    ) -> Self {
        self.preprocess_css = Some(Arc::new(f));
        self
    }

    pub fn process_css(mut self, f: impl Fn(&str, &Path) + Send + Sync + 'static) -> Self {
        self.process_css = Some(Arc::new(f));
        self
    }

    pub fn process_tokens(
        mut self,
        f: impl Fn(TokenMapping, &Path, &PipelineOutput) -> TokenMapping + Send + Sync + 'static,
    ) -> Self {
        self.process_tokens = Some(Arc::new(f));
        self
    }

    pub fn camel_case(mut self, on: bool) -> Self {
        self.camel_case = on;
        self
    }

    pub fn scoped_name_template(mut self, template: impl Into<String>) -> Self {
        self.generate_scoped_name = ScopedName::Template(template.into());
        self
    }

    pub fn scoped_name_fn(
        mut self,
        f: impl Fn(&str, &Path, &str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.generate_scoped_name = ScopedName::Custom(Arc::new(f));
        self
    }

    pub fn hash_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.hash_prefix = prefix.into();
        self
    }

    pub fn root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = dir.into();
        self
    }

    pub fn prepend(mut self, stage: impl Stage + 'static) -> Self {
        self.prepend.push(Arc::new(stage));
        self
    }

    pub fn append(mut self, stage: impl Stage + 'static) -> Self {
        self.append.push(Arc::new(stage));
        self
    }

    pub fn use_stages(mut self, stages: Vec<Arc<dyn Stage>>) -> Self {
        self.use_stages = Some(stages);
        self
    }

    pub fn module_dirs<I, S>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.module_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    pub fn verbose(mut self, on: bool) -> Self {
        self.verbose = on;
        self
    }

    /// Checks the options and brings extensions and `root_dir` into
    /// canonical form.
    pub fn validated(mut self) -> Result<Options> {
        if self.extensions.is_empty() {
            return Err(Error::config("at least one extension must be intercepted"));
        }
        let mut extensions: Vec<String> = Vec::with_capacity(self.extensions.len());
        for ext in &self.extensions {
            let ext = ext.trim();
            if ext.is_empty() || ext == "." {
                return Err(Error::config("extensions must not be empty"));
            }
            let ext = if ext.starts_with('.') {
                ext.to_string()
            } else {
                format!(".{ext}")
            };
            if !extensions.contains(&ext) {
                extensions.push(ext);
            }
        }
        self.extensions = extensions;

        if let ScopedName::Template(template) = &self.generate_scoped_name {
            parse_template(template)?;
        }

        self.root_dir = absolutize(&self.root_dir);
        if !self.root_dir.is_dir() {
            return Err(Error::config(format!(
                "root_dir {} is not a directory",
                self.root_dir.display()
            )));
        }

        if self.use_stages.is_some() && !(self.prepend.is_empty() && self.append.is_empty()) {
            return Err(Error::config(
                "`use` replaces the default stages and cannot be combined with `prepend` or `append`",
            ));
        }
        Ok(self)
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |stages: &[Arc<dyn Stage>]| {
            stages.iter().map(|s| s.name().to_string()).collect::<Vec<_>>()
        };
        f.debug_struct("Options")
            .field("dev_mode", &self.dev_mode)
            .field("extensions", &self.extensions)
            .field("ignore", &self.ignore)
            .field("preprocess_css", &self.preprocess_css.is_some())
            .field("process_css", &self.process_css.is_some())
            .field("process_tokens", &self.process_tokens.is_some())
            .field("camel_case", &self.camel_case)
            .field("generate_scoped_name", &self.generate_scoped_name)
            .field("hash_prefix", &self.hash_prefix)
            .field("root_dir", &self.root_dir)
            .field("prepend", &names(&self.prepend))
            .field("append", &names(&self.append))
            .field("use_stages", &self.use_stages.as_deref().map(names))
            .field("module_dirs", &self.module_dirs)
            .field("verbose", &self.verbose)
            .finish()
    }
}

fn dev_mode_from_env() -> bool {
    env::var(DEV_MODE_ENV).is_ok_and(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// The part of [`Options`] that can be written down in `csshook.toml`.
#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub dev_mode: Option<bool>,
    pub extensions: Option<OneOrMany>,
    pub ignore: Option<String>,
    pub ignore_regex: Option<String>,
    pub camel_case: Option<bool>,
    pub generate_scoped_name: Option<String>,
    pub hash_prefix: Option<String>,
    pub root_dir: Option<PathBuf>,
    pub module_dirs: Option<Vec<String>>,
    pub verbose: Option<bool>,
}

impl FileConfig {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::parse(&text)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))
    }

    /// Reads `csshook.toml` from `dir` if there is one.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(None);
        }
        Self::load(&path).map(Some)
    }

    /// Layers the file's settings over `options`; relative `root_dir`
    /// values are taken from `base_dir`.
    pub fn apply(self, mut options: Options, base_dir: &Path) -> Result<Options> {
        if let Some(on) = self.dev_mode {
            options.dev_mode = on;
        }
        if let Some(extensions) = self.extensions {
            options.extensions = extensions.into_vec();
        }
        match (self.ignore, self.ignore_regex) {
            (Some(_), Some(_)) => {
                return Err(Error::config(
                    "`ignore` and `ignore_regex` are mutually exclusive",
                ));
            }
            (Some(glob), None) => options.ignore = Some(Ignore::glob(&glob)?),
            (None, Some(re)) => options.ignore = Some(Ignore::regex(&re)?),
            (None, None) => {}
        }
        if let Some(on) = self.camel_case {
            options.camel_case = on;
        }
        if let Some(template) = self.generate_scoped_name {
            options.generate_scoped_name = ScopedName::Template(template);
        }
        if let Some(prefix) = self.hash_prefix {
            options.hash_prefix = prefix;
        }
        if let Some(root) = self.root_dir {
            options.root_dir = base_dir.join(root);
        }
        if let Some(dirs) = self.module_dirs {
            options.module_dirs = dirs;
        }
        if let Some(on) = self.verbose {
            options.verbose = on;
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Options {
        Options::new().root_dir(env::temp_dir())
    }

    #[test]
    fn extensions_are_normalized() {
        let options = base()
            .extensions(["css", ".scss", ".css"])
            .validated()
            .unwrap();
        assert_eq!(options.extensions, vec![".css", ".scss"]);
    }

    #[test]
    fn empty_extension_list_is_rejected() {
        let err = base()
            .extensions(Vec::<String>::new())
            .validated()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn template_without_placeholder_is_rejected() {
        let err = base().scoped_name_template("static").validated().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        let err = base().scoped_name_template("[nope]").validated().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn missing_root_dir_is_rejected() {
        let err = Options::new()
            .root_dir("/definitely/not/a/dir")
            .validated()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn ignore_rules_match_paths() {
        let root = Path::new("/project");
        let glob = Ignore::glob("vendor/**/*.css").unwrap();
        assert!(glob.matches(Path::new("/project/vendor/lib/a.css"), root));
        assert!(!glob.matches(Path::new("/project/src/a.css"), root));

        let re = Ignore::regex(r"\.global\.css$").unwrap();
        assert!(re.matches(Path::new("/project/reset.global.css"), root));

        let pred = Ignore::predicate(|p| p.ends_with("skip.css"));
        assert!(pred.matches(Path::new("/project/skip.css"), root));
        assert!(Ignore::regex("(").is_err());
    }

    #[test]
    fn file_config_layers_over_defaults() {
        let config = FileConfig::parse(
            r#"
            dev_mode = true
            extensions = "scss"
            ignore = "**/vendor/**"
            camel_case = true
            generate_scoped_name = "[local]_[hash:base64:5]"
            hash_prefix = "seed"
            root_dir = "."
            "#,
        )
        .unwrap();
        let options = config.apply(base(), &env::temp_dir()).unwrap();
        assert!(options.dev_mode);
        assert!(options.camel_case);
        assert_eq!(options.extensions, vec!["scss"]);
        assert_eq!(options.hash_prefix, "seed");
        assert!(options.ignore.is_some());
        assert!(matches!(
            options.generate_scoped_name,
            ScopedName::Template(ref t) if t == "[local]_[hash:base64:5]"
        ));
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        let err = FileConfig::parse("colour = true").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
