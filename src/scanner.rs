use crate::errors::{Error, Result};
use crate::executor::{concurrency_limit, BoundedExecutor, ExecutionStats};
use crate::line_reader::LineReader;
use ignore::WalkBuilder;
use std::cell::RefCell;
use std::future::Future;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// An incremental source of candidate paths.
///
/// `scan` reports each path through `found` as soon as it is known. Returning
/// from `scan` means discovery is finished; `found` is never called after
/// that.
pub trait PathScanner {
    fn scan(&mut self, found: &mut dyn FnMut(PathBuf)) -> Result<()>;
}

impl PathScanner for Vec<PathBuf> {
    fn scan(&mut self, found: &mut dyn FnMut(PathBuf)) -> Result<()> {
        self.drain(..).for_each(found);
        Ok(())
    }
}

/// Walks directory trees with the `ignore` crate, honouring `.gitignore`,
/// an extension allow-list and a list of excluded directory names.
#[derive(Debug, Clone, Default)]
pub struct WalkScanner {
    roots: Vec<PathBuf>,
    extensions: Vec<String>,
    exclude: Vec<String>,
}

impl WalkScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            roots: vec![root.into()],
            ..Self::default()
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    /// Restricts discovery to these extensions (case-insensitive, leading dot
    /// optional). An empty list accepts every file.
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = normalize_extensions(extensions);
        self
    }

    /// Skips any directory whose name is in `exclude`.
    pub fn with_exclude(mut self, exclude: Vec<String>) -> Self {
        self.exclude = exclude;
        self
    }
}

impl PathScanner for WalkScanner {
    fn scan(&mut self, found: &mut dyn FnMut(PathBuf)) -> Result<()> {
        for root in &self.roots {
            let exclude = self.exclude.clone();
            let mut walker = WalkBuilder::new(root);
            walker
                .standard_filters(true)
                .filter_entry(move |entry| {
                    !exclude
                        .iter()
                        .any(|ex| entry.file_name() == ex.as_str())
                });

            for entry in walker.build() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("skipping unreadable entry: {e}");
                        continue;
                    }
                };
                let is_file = entry.file_type().is_some_and(|t| t.is_file());
                if is_file && should_process_file(entry.path(), &self.extensions) {
                    found(entry.into_path());
                }
            }
        }
        Ok(())
    }
}

/// Totals reported by [`ScanExecutor::execute`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Paths forwarded from the scanner to the executor.
    pub discovered: usize,
    pub execution: ExecutionStats,
}

/// Drives a [`BoundedExecutor`] from a [`PathScanner`].
///
/// Discovery runs on tokio's blocking pool and feeds the executor's queue as
/// paths appear, so work starts before the walk is complete. The queue is
/// sealed when discovery returns (or unwinds), and the forwarding handle is
/// dropped with it.
pub struct ScanExecutor<S> {
    scanner: S,
    limit: NonZeroUsize,
}

impl<S> ScanExecutor<S>
where
    S: PathScanner + Send + 'static,
{
    pub fn new(scanner: S, limit: NonZeroUsize) -> Self {
        Self { scanner, limit }
    }

    /// Runs `worker` on every discovered path.
    ///
    /// Resolves once discovery has finished and every forwarded path's worker
    /// has completed. A discovery error is returned only after the paths that
    /// were already forwarded have been processed. Cancellation is left to
    /// `worker`, as with [`BoundedExecutor::execute`].
    pub async fn execute<F, Fut>(self, worker: F) -> Result<ScanStats>
    where
        F: FnMut(PathBuf) -> Fut,
        Fut: Future<Output = ()>,
    {
        let (executor, queue) = BoundedExecutor::new(Vec::new(), self.limit);
        let mut scanner = self.scanner;

        let discovery = tokio::task::spawn_blocking(move || {
            let mut discovered = 0;
            let result = scanner.scan(&mut |path| {
                if queue.push(path).is_ok() {
                    discovered += 1;
                }
            });
            queue.seal();
            debug!(discovered, "discovery finished");
            result.map(|()| discovered)
        });

        let execution = executor.execute(worker).await;
        let discovered = match discovery.await {
            Ok(result) => result?,
            Err(e) => return Err(Error::Discovery(e.to_string())),
        };

        Ok(ScanStats {
            discovered,
            execution,
        })
    }
}

/// The main entry point for the `probe` command.
///
/// Walks `dirs` and prints every file the binary heuristic would skip.
pub async fn run_probe(
    dirs: Vec<PathBuf>,
    extensions: Vec<String>,
    exclude: Vec<String>,
    concurrency: Option<usize>,
) -> Result<()> {
    let concurrency = concurrency_limit(concurrency)?;
    let mut roots = dirs.into_iter();
    let Some(first) = roots.next() else {
        return Err("Specify at least one directory to probe".into());
    };
    let scanner = roots
        .fold(WalkScanner::new(first), WalkScanner::with_root)
        .with_extensions(extensions)
        .with_exclude(exclude);

    let binaries = RefCell::new(Vec::new());
    let unreadable = RefCell::new(0usize);

    let stats = ScanExecutor::new(scanner, concurrency)
        .execute(|path| {
            match LineReader::new(&path).probe_binary() {
                Ok(true) => binaries.borrow_mut().push(path),
                Ok(false) => {}
                Err(e) => {
                    warn!("{e}");
                    *unreadable.borrow_mut() += 1;
                }
            }
            async {}
        })
        .await?;

    let mut binaries = binaries.into_inner();
    binaries.sort();
    for path in &binaries {
        println!("{}", path.display());
    }

    info!(
        scanned = stats.discovered,
        binary = binaries.len(),
        unreadable = unreadable.into_inner(),
        "probe finished"
    );
    Ok(())
}

/// Lowercases extensions and strips leading dots.
pub fn normalize_extensions(extensions: Vec<String>) -> Vec<String> {
    extensions
        .into_iter()
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

/// A helper function to determine if a file should be processed based on its extension.
fn should_process_file(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }

    path.extension()
        .and_then(|os| os.to_str())
        .map(|s| extensions.contains(&s.to_lowercase()))
        .unwrap_or(false)
}
