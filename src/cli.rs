use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Streaming find-and-replace for whole project trees.
///
/// `linesweep` rewrites files line by line in fixed-size chunks, so file size
/// does not matter, and it never touches binary files.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Streaming, binary-safe find-and-replace across project trees",
    long_about = "linesweep - find-and-replace across many files without loading them into memory.

  • Chunked reads that never split a line or a multi-byte character
  • Binary files are detected and skipped
  • Line endings (LF, CRLF, CR) are preserved
  • Gitignore awareness
  • Bounded concurrency

QUICK EXAMPLES:
  linesweep replace -d . -p 'TODO' -r 'DONE'            # Simple replacement
  linesweep replace -d src -p '(\\w+)_v1' -r '${1}_v2'   # Capture groups
  linesweep replace -d . -c sweep.yaml --dry-run        # Preview changes
  linesweep probe -d .                                  # List binary files"
)]
pub struct Args {
    /// Increase log verbosity (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// The set of available commands for the `linesweep` CLI.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replace a pattern in every matching file
    ///
    /// EXAMPLES:
    ///   linesweep replace -d . -p 'TODO' -r 'DONE'
    ///   linesweep replace -d . -c sweep.yaml --dry-run
    ///   linesweep replace -d src -x rs,toml -e target -p 'old_name' -r 'new_name'
    ///
    /// Config file format (sweep.yaml):
    ///   pattern: 'console\.log\((.*)\)'
    ///   replacement: 'logger.debug($1)'
    ///   extensions: [js, ts]
    ///   exclude: [node_modules]
    Replace {
        /// Path to a YAML configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// The regex pattern to search for.
        #[arg(short, long)]
        pattern: Option<String>,

        /// The replacement text. `$1` and `${name}` expand capture groups.
        #[arg(short, long)]
        replacement: Option<String>,

        /// Insert the replacement verbatim, without expanding `$` references.
        #[arg(long)]
        literal: bool,

        /// The directories to process.
        #[arg(short, long, required = true, num_args = 1..)]
        dir: Vec<PathBuf>,

        /// A comma-separated list of file extensions to include.
        #[arg(short = 'x', long = "ext", value_delimiter = ',')]
        extensions: Vec<String>,

        /// A comma-separated list of directory names to exclude.
        #[arg(short = 'e', long = "exclude", value_delimiter = ',')]
        exclude: Vec<String>,

        /// Count matches without modifying any files.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of files processed at once.
        #[arg(short = 'j', long = "jobs", env = "LINESWEEP_JOBS")]
        concurrency: Option<usize>,

        /// Bytes read per chunk.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Encoding of the files (WHATWG label such as `utf-8` or `windows-1252`).
        #[arg(long)]
        encoding: Option<String>,

        /// Directory for temporary staging files.
        #[arg(long)]
        staging_dir: Option<PathBuf>,

        /// Report format: `text`, `json` or `csv`.
        #[arg(short = 'f', long = "format", default_value = "text")]
        format: String,
    },

    /// List files that would be skipped as binary
    ///
    /// EXAMPLES:
    ///   linesweep probe -d .
    ///   linesweep probe -d assets -x dat,bin
    Probe {
        /// The directories to probe.
        #[arg(short, long, required = true, num_args = 1..)]
        dir: Vec<PathBuf>,

        /// A comma-separated list of file extensions to include.
        #[arg(short = 'x', long = "ext", value_delimiter = ',')]
        extensions: Vec<String>,

        /// A comma-separated list of directory names to exclude.
        #[arg(short = 'e', long = "exclude", value_delimiter = ',')]
        exclude: Vec<String>,

        /// Maximum number of files probed at once.
        #[arg(short = 'j', long = "jobs", env = "LINESWEEP_JOBS")]
        concurrency: Option<usize>,
    },
}

/// Parses command-line arguments and returns the populated `Args` struct.
pub fn parse_args() -> Args {
    Args::parse()
}
