//! `linesweep` is a library for streaming find-and-replace across many files.
//!
//! It provides the core logic for the `linesweep` command-line tool but can
//! also be used as a standalone library. The main components are:
//!
//! - `LineReader`: reads a file in fixed-size chunks and yields decoded,
//!   line-terminated segments, skipping binary files.
//! - `BoundedExecutor`: runs a worker over a queue of items that may keep
//!   growing, with a concurrency ceiling and a single completion.
//! - `ScanExecutor`: feeds paths from an incremental `PathScanner` into a
//!   `BoundedExecutor` as they are discovered.
//! - `PathReplacer`: probes, transforms, stages and commits each file, and
//!   aggregates per-file results and errors.
//! - `config`: for loading replace configurations from YAML files.
//!
//! Everything runs on a single-threaded tokio runtime; concurrency comes from
//! interleaving file I/O.

pub mod cli;
pub mod config;
pub mod errors;
pub mod executor;
pub mod line_reader;
pub mod output_formatter;
pub mod replacer;
pub mod scanner;

// Re-export main types for easier access by library users.
pub use errors::{Error, Result};
pub use executor::{BoundedExecutor, ExecutionStats, WorkQueue};
pub use line_reader::{LineReader, ReadSession};
pub use output_formatter::{OutputFormat, OutputFormatter};
pub use replacer::{FileOutcome, PathReplacer, ReplaceObserver, ReplaceOptions, ReplaceSummary, Replacement};
pub use scanner::{PathScanner, ScanExecutor, WalkScanner};
