//! Loads style-sheet files as modules of scoped class-name tokens.
//!
//! Install a [`CssModulesHook`] on a [`ModuleLoader`]; every loaded style
//! file then exports a lazily computed [`TokenMapping`] from its local class
//! names to process-unique identifiers.

pub mod cache;
pub mod config;
pub mod datasource;
pub mod engine;
pub mod error;
pub mod hook;
pub mod pipeline;
pub mod proxy;
pub mod resolver;
pub mod tokens;
pub mod utils;
pub mod watcher;

pub use cache::{CachePolicy, TokenCache};
pub use config::{FileConfig, Ignore, Options, ScopedName};
pub use engine::FetchEngine;
pub use error::{Error, Result};
pub use hook::{CssModulesHook, Exports, LoadHandler, Module, ModuleLoader, TokenExports};
pub use pipeline::{Pipeline, PipelineOutput, Stage, StageContext, Warning};
pub use proxy::LazyTokens;
pub use resolver::FilenameResolver;
pub use tokens::TokenMapping;
