//! Plugs the engine into a module loader.
//!
//! [`ModuleLoader`] is the host side: a registry of per-extension handlers
//! that turn a file into a [`Module`]. [`CssModulesHook::install`] replaces
//! the handler of every configured extension with one that hands out lazily
//! computed tokens, keeping the previous handler for ignored files.

use crate::config::Options;
use crate::datasource::read_source;
use crate::engine::FetchEngine;
use crate::error::{Error, Result};
use crate::proxy::LazyTokens;
use crate::resolver::absolutize;
use crate::tokens::TokenMapping;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const REGISTRY_PREFIX: &str = "css-modules-hook:";
pub const ES_MODULE_FLAG: &str = "__esModule";

#[derive(Debug)]
pub struct Module {
    pub filename: PathBuf,
    pub exports: Exports,
}

#[derive(Debug)]
pub enum Exports {
    Empty,
    Source(String),
    Tokens(TokenExports),
}

impl Module {
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            exports: Exports::Empty,
        }
    }

    pub fn compile(&mut self, exports: Exports) {
        self.exports = exports;
    }

    pub fn tokens(&self) -> Option<&TokenExports> {
        match &self.exports {
            Exports::Tokens(tokens) => Some(tokens),
            _ => None,
        }
    }
}

pub trait LoadHandler: Send + Sync {
    fn load(&self, module: &mut Module, filename: &Path) -> Result<()>;
}

impl<F> LoadHandler for F
where
    F: Fn(&mut Module, &Path) -> Result<()> + Send + Sync,
{
    fn load(&self, module: &mut Module, filename: &Path) -> Result<()> {
        self(module, filename)
    }
}

/// Exposes a file's text unchanged.
pub struct SourceHandler;

impl LoadHandler for SourceHandler {
    fn load(&self, module: &mut Module, filename: &Path) -> Result<()> {
        module.compile(Exports::Source(read_source(filename)?));
        Ok(())
    }
}

#[derive(Default)]
pub struct ModuleLoader {
    handlers: AHashMap<String, Arc<dyn LoadHandler>>,
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source_handler(mut self, extension: &str) -> Self {
        self.register(extension, Arc::new(SourceHandler));
        self
    }

    /// Installs `handler` for `extension`, returning the one it replaces.
    pub fn register(
        &mut self,
        extension: &str,
        handler: Arc<dyn LoadHandler>,
    ) -> Option<Arc<dyn LoadHandler>> {
        self.handlers.insert(extension.to_string(), handler)
    }

    pub fn handler(&self, extension: &str) -> Option<Arc<dyn LoadHandler>> {
        self.handlers.get(extension).cloned()
    }

    pub fn load(&self, path: &Path) -> Result<Module> {
        let filename = absolutize(path);
        let name = filename.to_string_lossy();
        let handler = self
            .handlers
            .iter()
            .filter(|(ext, _)| name.ends_with(ext.as_str()))
            .max_by_key(|(ext, _)| ext.len())
            .map(|(_, handler)| Arc::clone(handler))
            .ok_or_else(|| Error::NoLoader {
                filename: filename.clone(),
            })?;
        let mut module = Module::new(filename.clone());
        handler.load(&mut module, &filename)?;
        Ok(module)
    }
}

type ProxyRegistry = Mutex<AHashMap<String, Arc<LazyTokens>>>;

pub struct CssModulesHook {
    engine: Arc<FetchEngine>,
    registry: Arc<ProxyRegistry>,
}

impl fmt::Debug for CssModulesHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CssModulesHook").finish_non_exhaustive()
    }
}

impl CssModulesHook {
    /// Validates `options` and takes over every configured extension of
    /// `loader`.
    pub fn install(options: Options, loader: &mut ModuleLoader) -> Result<Arc<Self>> {
        let engine = Arc::new(FetchEngine::new(options)?);
        let hook = Arc::new(Self {
            engine,
            registry: Arc::new(Mutex::new(AHashMap::new())),
        });
        for extension in &hook.engine.options().extensions {
            let previous = loader.handler(extension);
            loader.register(
                extension,
                Arc::new(InterceptHandler {
                    hook: Arc::clone(&hook),
                    extension: extension.clone(),
                    previous,
                }),
            );
        }
        Ok(hook)
    }

    pub fn engine(&self) -> &Arc<FetchEngine> {
        &self.engine
    }

    /// The tokens most recently handed out for `path`.
    pub fn proxy(&self, path: &Path) -> Option<Arc<LazyTokens>> {
        self.registry.lock().get(&registry_key(&absolutize(path))).cloned()
    }
}

pub fn registry_key(path: &Path) -> String {
    format!("{REGISTRY_PREFIX}{}", path.display())
}

struct InterceptHandler {
    hook: Arc<CssModulesHook>,
    extension: String,
    previous: Option<Arc<dyn LoadHandler>>,
}

impl LoadHandler for InterceptHandler {
    fn load(&self, module: &mut Module, filename: &Path) -> Result<()> {
        let options = self.hook.engine.options();
        let ignored = options
            .ignore
            .as_ref()
            .is_some_and(|ignore| ignore.matches(filename, &options.root_dir));
        if ignored {
            return match &self.previous {
                Some(previous) => previous.load(module, filename),
                None => Err(Error::MissingDelegateHandler {
                    extension: self.extension.clone(),
                    filename: filename.to_path_buf(),
                }),
            };
        }

        let path = absolutize(filename);
        let key = registry_key(&path);
        let proxy = Arc::new(LazyTokens::new(Arc::clone(&self.hook.engine), path));
        self.hook.registry.lock().insert(key.clone(), proxy);
        module.compile(Exports::Tokens(TokenExports {
            key,
            registry: Arc::clone(&self.hook.registry),
        }));
        Ok(())
    }
}

/// The exports of an intercepted module. Every read is forwarded to the
/// [`LazyTokens`] registered for the file.
#[derive(Clone)]
pub struct TokenExports {
    key: String,
    registry: Arc<ProxyRegistry>,
}

impl TokenExports {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn proxy(&self) -> Option<Arc<LazyTokens>> {
        self.registry.lock().get(&self.key).cloned()
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        if key == ES_MODULE_FLAG {
            return Ok(None);
        }
        match self.proxy() {
            Some(proxy) => proxy.get(key),
            None => Ok(None),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Some(proxy) = self.proxy() {
            proxy.set(key, value);
        }
    }

    /// Token modules never use default-export interop.
    pub fn is_es_module(&self) -> bool {
        false
    }

    pub fn inspect(&self) -> Result<TokenMapping> {
        match self.proxy() {
            Some(proxy) => proxy.inspect(),
            None => Ok(TokenMapping::new()),
        }
    }
}

impl fmt::Debug for TokenExports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenExports")
            .field("key", &self.key)
            .field("proxy", &self.proxy())
            .finish()
    }
}
