//! The main entry point for the `linesweep` command-line application.
//!
//! This file is responsible for parsing command-line arguments, setting up
//! logging and the runtime, and dispatching to the library.

use anyhow::{Context, Result};
use linesweep::cli::{self, Commands};
use linesweep::config::{ConfigLoader, ReplaceConfig};
use linesweep::output_formatter::OutputFormat;
use linesweep::{replacer, scanner};
use std::env;
use std::process;
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args_vec: Vec<String> = env::args().collect();
    if args_vec.len() == 1 {
        println!("Streaming, binary-safe find-and-replace across project trees\n");
        println!("QUICK START EXAMPLES:");
        println!("  linesweep replace -d . -p 'TODO' -r 'DONE'       # Simple replacement");
        println!("  linesweep replace -d . -c sweep.yaml --dry-run   # Preview changes");
        println!("  linesweep probe -d .                             # List binary files\n");
        println!("Run 'linesweep --help' for full command list");
        process::exit(0);
    }

    let args = cli::parse_args();
    init_tracing(args.verbose);

    // Files are processed concurrently on one thread; discovery uses the blocking pool.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    match args.command {
        Commands::Replace {
            config,
            pattern,
            replacement,
            literal,
            dir,
            extensions,
            exclude,
            dry_run,
            concurrency,
            chunk_size,
            encoding,
            staging_dir,
            format,
        } => {
            let mut merged = match config {
                Some(cfg_path) => {
                    let working_dir = dir.first().cloned().unwrap_or_default();
                    let resolved = ConfigLoader::find_config(&cfg_path, &working_dir)?;
                    debug!(path = %resolved.display(), "using config file");
                    ConfigLoader::load_replace_config(&resolved)
                        .with_context(|| format!("failed to load {}", resolved.display()))?
                }
                None => ReplaceConfig::default(),
            };
            merged.merge_cli(ReplaceConfig {
                pattern,
                replacement,
                literal,
                dry_run,
                concurrency,
                chunk_size,
                encoding,
                extensions,
                exclude,
                staging_dir,
            });

            let summary = runtime.block_on(replacer::run_replace(
                merged,
                dir,
                OutputFormat::from(format.as_str()),
            ))?;
            if !summary.errors.is_empty() {
                process::exit(1);
            }
        }
        Commands::Probe {
            dir,
            extensions,
            exclude,
            concurrency,
        } => {
            runtime.block_on(scanner::run_probe(dir, extensions, exclude, concurrency))?;
        }
    }

    Ok(())
}

/// Installs a stderr subscriber. `RUST_LOG` wins over the `-v` count.
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("linesweep={default_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
