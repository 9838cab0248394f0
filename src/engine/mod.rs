//! Resolves, transforms and memoizes style files.
//!
//! [`FetchEngine::fetch`] is re-entered from inside the pipeline whenever a
//! file imports tokens of another one, so every call runs on the caller's
//! thread and no lock is held while a file is being transformed. A file that
//! is already being transformed further up the same thread's call stack
//! means the imports form a cycle, which is reported instead of recursing
//! forever.

use crate::cache::{CachePolicy, TokenCache};
use crate::config::Options;
use crate::datasource::read_source;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::resolver::{FilenameResolver, absolutize};
use crate::tokens::TokenMapping;
use crate::utils::{FetchTimings, log_transform, log_warning};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Instant;

pub struct FetchEngine {
    options: Options,
    resolver: FilenameResolver,
    cache: TokenCache,
    pipeline: Pipeline,
    in_flight: Mutex<Vec<(ThreadId, PathBuf)>>,
}

impl FetchEngine {
    pub fn new(options: Options) -> Result<Self> {
        let options = options.validated()?;
        let pipeline = Pipeline::from_options(&options)?;
        let resolver =
            FilenameResolver::new(options.module_dirs.clone(), options.extensions.clone());
        let policy = if options.dev_mode {
            CachePolicy::Live
        } else {
            CachePolicy::Persistent
        };
        Ok(Self {
            options,
            resolver,
            cache: TokenCache::new(policy),
            pipeline,
            in_flight: Mutex::new(Vec::new()),
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn is_live(&self) -> bool {
        self.cache.policy() == CachePolicy::Live
    }

    /// Tokens of the file `specifier` names, relative to the file `from`.
    pub fn fetch(&self, specifier: &str, from: &Path) -> Result<Arc<TokenMapping>> {
        let path = self.resolver.resolve(specifier, from)?;
        self.fetch_resolved(path)
    }

    /// Tokens of the file at `path`.
    pub fn fetch_file(&self, path: &Path) -> Result<Arc<TokenMapping>> {
        self.fetch_resolved(absolutize(path))
    }

    fn fetch_resolved(&self, path: PathBuf) -> Result<Arc<TokenMapping>> {
        if let Some(tokens) = self.cache.get(&path) {
            return Ok(tokens);
        }
        let _guard = InFlight::enter(&self.in_flight, &path)?;

        let total = Instant::now();
        let read = Instant::now();
        let mut source = read_source(&path)?;
        if let Some(preprocess) = &self.options.preprocess_css {
            source = preprocess(&source, &path);
        }
        let read = read.elapsed();

        let transform = Instant::now();
        let output = self.pipeline.process(&source, &path, &mut |specifier: &str, from: &Path| {
            self.fetch(specifier, from)
        })?;
        let transform = transform.elapsed();

        for warning in &output.warnings {
            log_warning(&path, warning);
        }
        if let Some(process_css) = &self.options.process_css {
            process_css(&output.css, &path);
        }

        let tokens_start = Instant::now();
        let mut tokens = if self.options.camel_case {
            output.tokens.with_camel_case()
        } else {
            output.tokens.clone()
        };
        if let Some(process_tokens) = &self.options.process_tokens {
            tokens = process_tokens(tokens, &path, &output);
        }
        let tokens = Arc::new(tokens);
        self.cache.commit(&path, Arc::clone(&tokens));

        if self.options.verbose {
            log_transform(
                &path,
                tokens.len(),
                self.is_live(),
                FetchTimings {
                    total: total.elapsed(),
                    read,
                    transform,
                    tokens: tokens_start.elapsed(),
                },
            );
        }
        Ok(tokens)
    }
}

/// Marks a file as being transformed on the current thread until dropped.
struct InFlight<'a> {
    set: &'a Mutex<Vec<(ThreadId, PathBuf)>>,
    thread: ThreadId,
    path: PathBuf,
}

impl<'a> InFlight<'a> {
    fn enter(set: &'a Mutex<Vec<(ThreadId, PathBuf)>>, path: &Path) -> Result<Self> {
        let thread = thread::current().id();
        let mut entries = set.lock();
        let mine = entries.iter().filter(|(t, _)| *t == thread).map(|(_, p)| p);
        if let Some(start) = mine.clone().position(|p| p == path) {
            let mut chain: Vec<PathBuf> = mine.skip(start).cloned().collect();
            chain.push(path.to_path_buf());
            return Err(Error::CyclicDependency { chain });
        }
        entries.push((thread, path.to_path_buf()));
        Ok(Self {
            set,
            thread,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut entries = self.set.lock();
        if let Some(i) = entries
            .iter()
            .rposition(|(t, p)| *t == self.thread && *p == self.path)
        {
            entries.remove(i);
        }
    }
}
