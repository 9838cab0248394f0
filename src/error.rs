use std::io;
use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Setup options were rejected before any file was processed.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("cannot find module '{specifier}' from '{}'", from.display())]
    FileNotFound { specifier: String, from: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The pipeline could not parse or transform a file.
    #[error("{}: {message}", path.display())]
    Transform { path: PathBuf, message: String },

    #[error("circular style dependency: {}", render_chain(chain))]
    CyclicDependency { chain: Vec<PathBuf> },

    /// An ignored file had no earlier handler to fall back to.
    #[error(
        "no previous loader is registered for '{extension}', cannot pass through {}",
        filename.display()
    )]
    MissingDelegateHandler { extension: String, filename: PathBuf },

    #[error("no loader is registered for {}", filename.display())]
    NoLoader { filename: PathBuf },

    #[error("tokens of {} were read while they were still being resolved", path.display())]
    ReentrantAccess { path: PathBuf },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn transform(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Transform {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }
}

fn render_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
