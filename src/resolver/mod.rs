//! Turns import specifiers found in style files into absolute paths.
//!
//! Specifiers that start with `.`, `/`, `\` or a drive prefix are resolved
//! against the directory of the referencing file. Anything else names a
//! package and is looked up in the package directories (`node_modules` by
//! default) of the referencing file's ancestors.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FilenameResolver {
    module_dirs: Vec<String>,
    extensions: Vec<String>,
}

#[derive(Deserialize, Default)]
struct PackageManifest {
    style: Option<String>,
    main: Option<String>,
}

impl FilenameResolver {
    pub fn new(module_dirs: Vec<String>, extensions: Vec<String>) -> Self {
        Self {
            module_dirs,
            extensions,
        }
    }

    pub fn resolve(&self, specifier: &str, from: &Path) -> Result<PathBuf> {
        let base = from.parent().unwrap_or(Path::new("."));
        let found = if is_package_specifier(specifier) {
            self.resolve_package(specifier, base)
        } else {
            self.resolve_file(&absolutize(&base.join(specifier)))
        };
        found.ok_or_else(|| Error::FileNotFound {
            specifier: specifier.to_string(),
            from: from.to_path_buf(),
        })
    }

    fn resolve_file(&self, candidate: &Path) -> Option<PathBuf> {
        if candidate.is_file() {
            return Some(candidate.to_path_buf());
        }
        let name = candidate.file_name()?.to_string_lossy().into_owned();
        self.extensions
            .iter()
            .map(|ext| candidate.with_file_name(format!("{name}{ext}")))
            .find(|p| p.is_file())
    }

    fn resolve_package(&self, specifier: &str, base: &Path) -> Option<PathBuf> {
        let base = absolutize(base);
        for dir in base.ancestors() {
            for module_dir in &self.module_dirs {
                let candidate = normalize(&dir.join(module_dir).join(specifier));
                if let Some(found) = self.resolve_file(&candidate) {
                    return Some(found);
                }
                if candidate.is_dir() {
                    if let Some(found) = self.resolve_package_dir(&candidate) {
                        return Some(found);
                    }
                }
            }
        }
        None
    }

    fn resolve_package_dir(&self, dir: &Path) -> Option<PathBuf> {
        let manifest = fs::read_to_string(dir.join("package.json"))
            .ok()
            .and_then(|text| serde_json::from_str::<PackageManifest>(&text).ok())
            .unwrap_or_default();
        [manifest.style, manifest.main]
            .into_iter()
            .flatten()
            .find_map(|entry| self.resolve_file(&normalize(&dir.join(entry))))
            .or_else(|| self.resolve_file(&dir.join("index")))
    }
}

/// True for specifiers that name a package rather than a path.
pub fn is_package_specifier(specifier: &str) -> bool {
    let bytes = specifier.as_bytes();
    match bytes.first() {
        None => false,
        Some(b'.' | b'/' | b'\\') => false,
        Some(c) if c.is_ascii_alphabetic() && bytes.get(1) == Some(&b':') => false,
        Some(_) => !Path::new(specifier).is_absolute(),
    }
}

/// Absolute, lexically normalized form of `path`, relative paths being
/// taken from the current working directory.
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return normalize(path);
    }
    match env::current_dir() {
        Ok(cwd) => normalize(&cwd.join(path)),
        Err(_) => normalize(path),
    }
}

/// Removes `.` components and folds `..` into its parent without touching
/// the file system.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
