//! Token mappings that are computed on first read.
//!
//! A [`LazyTokens`] is handed out when a style module is loaded; the file is
//! only transformed once somebody reads a token from it. Values assigned
//! through [`LazyTokens::set`] shadow the computed ones and never touch the
//! engine's cache.

use crate::engine::FetchEngine;
use crate::error::{Error, Result};
use crate::tokens::TokenMapping;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, ThreadId};

enum State {
    Unresolved,
    Resolving(ThreadId),
    /// Resolved once; reads go through the engine's cache from now on.
    Cached,
    /// Live mode keeps its own copy so one consumer transforms the file once.
    Snapshot(Arc<TokenMapping>),
}

pub struct LazyTokens {
    engine: Arc<FetchEngine>,
    path: PathBuf,
    state: Mutex<State>,
    overrides: Mutex<AHashMap<String, String>>,
}

impl LazyTokens {
    pub fn new(engine: Arc<FetchEngine>, path: PathBuf) -> Self {
        Self {
            engine,
            path,
            state: Mutex::new(State::Unresolved),
            overrides: Mutex::new(AHashMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.state.lock(), State::Cached | State::Snapshot(_))
    }

    /// The token named `key`; `None` when the file does not export it.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(value) = self.overrides.lock().get(key) {
            return Ok(Some(value.clone()));
        }
        let tokens = self.tokens()?;
        Ok(tokens.get(key).map(str::to_string))
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.overrides.lock().insert(key.into(), value.into());
    }

    /// Everything a reader would currently see, overrides included.
    ///
    /// Uses the snapshot or cached mapping when there is one and fetches
    /// only when neither exists.
    pub fn inspect(&self) -> Result<TokenMapping> {
        let available = match &*self.state.lock() {
            State::Snapshot(tokens) => Some(Arc::clone(tokens)),
            State::Cached => self.engine.cache().get(&self.path),
            _ => None,
        };
        let mut merged = match available {
            Some(tokens) => (*tokens).clone(),
            None => (*self.tokens()?).clone(),
        };
        merged.extend(
            self.overrides
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        Ok(merged)
    }

    fn tokens(&self) -> Result<Arc<TokenMapping>> {
        let current = thread::current().id();
        {
            let mut state = self.state.lock();
            let claim = match &*state {
                State::Snapshot(tokens) => return Ok(Arc::clone(tokens)),
                State::Resolving(owner) if *owner == current => {
                    return Err(Error::ReentrantAccess {
                        path: self.path.clone(),
                    });
                }
                State::Unresolved => true,
                // Cached, or resolving on another thread: the engine serves it.
                State::Cached | State::Resolving(_) => false,
            };
            if !claim {
                drop(state);
                return self.engine.fetch_file(&self.path);
            }
            *state = State::Resolving(current);
        }

        let result = self.engine.fetch_file(&self.path);
        let mut state = self.state.lock();
        *state = match &result {
            Ok(tokens) if self.engine.is_live() => State::Snapshot(Arc::clone(tokens)),
            Ok(_) => State::Cached,
            Err(_) => State::Unresolved,
        };
        result
    }
}

impl fmt::Debug for LazyTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.lock() {
            State::Unresolved => "unresolved",
            State::Resolving(_) => "resolving",
            State::Cached => "cached",
            State::Snapshot(_) => "snapshot",
        };
        f.debug_struct("LazyTokens")
            .field("path", &self.path)
            .field("state", &state)
            .field("overrides", &self.overrides.lock().len())
            .finish()
    }
}
