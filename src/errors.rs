use std::path::{Path, PathBuf};
use thiserror::Error;

/// The primary error type for all operations in `linesweep`.
///
/// Per-file variants carry the path they refer to so a batch can report
/// them without extra bookkeeping.
#[derive(Error, Debug)]
pub enum Error {
    /// The file could not be opened.
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A chunk read failed after the file was opened.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The binary probe could not read the file header. This is reported as an
    /// unprocessable file, never as "binary".
    #[error("Binary probe failed for {path}: {source}")]
    BinaryProbe {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },

    /// Writing transformed text to the staging file failed.
    #[error("Failed to stage {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Copying the staged content over the original failed. The target may be
    /// partially overwritten.
    #[error("Failed to commit {path}: {source}")]
    Copy {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file decoded with replacement characters and will not be rewritten.
    #[error("Refusing to rewrite {0}: contains malformed {1} text")]
    MalformedText(PathBuf, &'static str),

    /// A push arrived after the work queue was sealed.
    #[error("Work queue is sealed")]
    QueueSealed,

    /// The operation observed a cancelled context.
    #[error("Operation cancelled")]
    Cancelled,

    /// The requested encoding cannot be split on line-terminator bytes.
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// The path-discovery collaborator failed or panicked.
    #[error("Path discovery failed: {0}")]
    Discovery(String),

    /// An error related to file system I/O.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that occurred during regex compilation.
    #[error("Pattern compilation failed: {0}")]
    Regex(#[from] regex::Error),

    /// An error that occurred while parsing a YAML configuration file.
    #[error("Config parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A general configuration-related error.
    #[error("Config error: {0}")]
    Config(String),

    /// An error related to CSV serialization.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// An error related to JSON serialization.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A convenient type alias for `Result<T, linesweep::errors::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn open(path: &Path, source: std::io::Error) -> Self {
        Error::Open {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn read(path: &Path, source: std::io::Error) -> Self {
        Error::Read {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn write(path: &Path, source: std::io::Error) -> Self {
        Error::Write {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn copy(path: &Path, source: std::io::Error) -> Self {
        Error::Copy {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Returns `true` if the error means the file does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Open { source, .. } | Error::Read { source, .. } => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            Error::BinaryProbe { source, .. } => source.is_not_found(),
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Config(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Config(s.to_string())
    }
}
