use crate::config::ReplaceConfig;
use crate::errors::{Error, Result};
use crate::executor::{concurrency_limit, BoundedExecutor, DEFAULT_CONCURRENCY};
use crate::line_reader::{LineReader, CHUNK_SIZE};
use crate::output_formatter::{OutputFormat, OutputFormatter};
use crate::scanner::{PathScanner, ScanExecutor, WalkScanner};
use encoding_rs::{Encoding, UTF_8};
use indicatif::{ProgressBar, ProgressStyle};
use regex::{Captures, Regex, Replacer};
use serde::Serialize;
use std::borrow::Cow;
use std::cell::RefCell;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A file in which the pattern matched at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Replacement {
    pub path: PathBuf,
    /// Number of matches found (and, outside dry runs, replaced).
    pub replacements: usize,
}

/// A file that could not be processed.
#[derive(Debug)]
pub struct FileError {
    pub path: PathBuf,
    pub error: Error,
}

/// How a single file was handled when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// The header looked binary; the file was not read further.
    Binary,
    /// The pattern never matched.
    Unchanged,
    Replaced(Replacement),
}

/// Aggregated outcome of a batch.
///
/// `results` and `errors` are in completion order, not input order.
#[derive(Debug, Default)]
pub struct ReplaceSummary {
    pub results: Vec<Replacement>,
    pub errors: Vec<FileError>,
    pub binary_skipped: usize,
    pub unchanged: usize,
    pub dry_run: bool,
}

impl ReplaceSummary {
    fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    fn record(&mut self, path: PathBuf, outcome: Result<FileOutcome>) {
        match outcome {
            Ok(FileOutcome::Binary) => self.binary_skipped += 1,
            Ok(FileOutcome::Unchanged) => self.unchanged += 1,
            Ok(FileOutcome::Replaced(result)) => self.results.push(result),
            Err(error) => self.errors.push(FileError { path, error }),
        }
    }

    /// Number of files attempted.
    pub fn files_processed(&self) -> usize {
        self.results.len() + self.errors.len() + self.binary_skipped + self.unchanged
    }

    pub fn total_replacements(&self) -> usize {
        self.results.iter().map(|r| r.replacements).sum()
    }
}

/// Receives per-file notifications while a batch runs.
///
/// Both methods default to doing nothing.
pub trait ReplaceObserver {
    /// Called once for every file with at least one match, before the staged
    /// content is committed.
    fn path_replaced(&self, _result: &Replacement) {}

    /// Called once for every file that fails.
    fn file_error(&self, _path: &Path, _error: &Error) {}
}

struct NoopObserver;

impl ReplaceObserver for NoopObserver {}

/// Counts and applies pattern matches one segment at a time.
///
/// Matches that straddle two segments are not seen.
pub struct ReplaceTransform<'a> {
    pattern: &'a Regex,
    replacement: &'a str,
    literal: bool,
    dry_run: bool,
    replacements: usize,
}

impl<'a> ReplaceTransform<'a> {
    pub fn new(pattern: &'a Regex, replacement: &'a str, literal: bool, dry_run: bool) -> Self {
        Self {
            pattern,
            replacement,
            literal,
            dry_run,
            replacements: 0,
        }
    }

    /// Returns the segment with every match replaced (unchanged in dry runs).
    ///
    /// The segment is searched once either way.
    pub fn apply<'s>(&mut self, segment: &'s str) -> Cow<'s, str> {
        if self.dry_run {
            self.replacements += self.pattern.find_iter(segment).count();
            return Cow::Borrowed(segment);
        }

        let mut counting = CountingReplacer {
            replacement: self.replacement,
            literal: self.literal,
            matches: 0,
        };
        let text = self.pattern.replace_all(segment, counting.by_ref());
        self.replacements += counting.matches;
        text
    }

    /// Matches seen so far.
    pub fn replacements(&self) -> usize {
        self.replacements
    }
}

/// Expands (or copies verbatim) the replacement for each match and counts them.
struct CountingReplacer<'a> {
    replacement: &'a str,
    literal: bool,
    matches: usize,
}

impl Replacer for CountingReplacer<'_> {
    fn replace_append(&mut self, caps: &Captures<'_>, dst: &mut String) {
        self.matches += 1;
        if self.literal {
            dst.push_str(self.replacement);
        } else {
            caps.expand(self.replacement, dst);
        }
    }
}

/// Temporary destination for a file's transformed content.
///
/// The temp file is deleted when the `Staging` value is dropped.
pub struct Staging {
    file: NamedTempFile,
    writer: BufWriter<File>,
}

impl Staging {
    /// Creates a staging file in `dir`, or the system temp directory.
    pub fn create(dir: Option<&Path>) -> io::Result<Self> {
        let file = match dir {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        let handle = file.reopen()?;
        Ok(Self {
            writer: BufWriter::new(File::from_std(handle)),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Appends to the staging file. Only the temp file is touched, so there is
    /// nothing to cancel here; callers check between segments.
    pub async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await
    }

    /// Flushes everything written so far to the staging file.
    pub async fn finish(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }

    /// Streams the staged content over `target`.
    ///
    /// The target is truncated and rewritten in place, which keeps its
    /// permissions and inode. A failure part way through leaves it partially
    /// written. Cancellation is checked last before the target is truncated;
    /// once truncated, the copy runs to completion.
    pub async fn commit_to(mut self, target: &Path, cancel: &CancellationToken) -> Result<u64> {
        self.finish().await.map_err(|e| Error::write(target, e))?;
        let mut source = File::open(self.file.path())
            .await
            .map_err(|e| Error::write(target, e))?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut dest = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(target)
            .await
            .map_err(|e| Error::copy(target, e))?;
        let copied = tokio::io::copy(&mut source, &mut dest)
            .await
            .map_err(|e| Error::copy(target, e))?;
        dest.flush().await.map_err(|e| Error::copy(target, e))?;
        Ok(copied)
    }
}

/// Options for a [`PathReplacer`].
#[derive(Debug, Clone)]
pub struct ReplaceOptions {
    /// Count matches without touching any file.
    pub dry_run: bool,
    /// Insert the replacement verbatim instead of expanding `$1`-style references.
    pub literal: bool,
    /// Maximum number of files processed at once.
    pub concurrency: NonZeroUsize,
    /// Bytes read per chunk.
    pub chunk_size: usize,
    /// Encoding used to read and write files.
    pub encoding: &'static Encoding,
    /// Where staging files are created. `None` uses the system temp directory.
    pub staging_dir: Option<PathBuf>,
}

impl Default for ReplaceOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            literal: false,
            concurrency: DEFAULT_CONCURRENCY,
            chunk_size: CHUNK_SIZE,
            encoding: UTF_8,
            staging_dir: None,
        }
    }
}

impl ReplaceOptions {
    /// Resolves the runtime options described by a configuration.
    pub fn from_config(config: &ReplaceConfig) -> Result<Self> {
        let mut options = Self {
            dry_run: config.dry_run,
            literal: config.literal,
            staging_dir: config.staging_dir.clone(),
            ..Self::default()
        };

        options.concurrency = concurrency_limit(config.concurrency)?;
        if let Some(chunk_size) = config.chunk_size {
            if chunk_size == 0 {
                return Err("chunk_size must be at least 1".into());
            }
            options.chunk_size = chunk_size;
        }
        if let Some(label) = &config.encoding {
            options.encoding = Encoding::for_label(label.as_bytes())
                .ok_or_else(|| Error::Config(format!("unknown encoding '{label}'")))?;
        }
        Ok(options)
    }
}

/// Streams pattern replacements through many files.
///
/// Every file is probed for binary content, read in chunks, transformed
/// segment by segment into a staging file, and copied back over the original
/// only when something matched.
pub struct PathReplacer {
    options: ReplaceOptions,
    observer: Arc<dyn ReplaceObserver>,
}

impl PathReplacer {
    pub fn new(options: ReplaceOptions) -> Result<Self> {
        if !options.encoding.is_ascii_compatible() {
            return Err(Error::UnsupportedEncoding(options.encoding.name().to_string()));
        }
        Ok(Self {
            options,
            observer: Arc::new(NoopObserver),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn ReplaceObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn options(&self) -> &ReplaceOptions {
        &self.options
    }

    /// Replaces `pattern` in every path, at most `concurrency` files at a time.
    ///
    /// A failing file is recorded in the summary and never stops the batch.
    pub async fn replace_in_paths(
        &self,
        pattern: &Regex,
        replacement: &str,
        paths: Vec<PathBuf>,
        cancel: &CancellationToken,
    ) -> ReplaceSummary {
        let summary = RefCell::new(ReplaceSummary::new(self.options.dry_run));

        BoundedExecutor::sealed(paths, self.options.concurrency)
            .execute(|path| self.replace_and_record(pattern, replacement, path, cancel, &summary))
            .await;

        let summary = summary.into_inner();
        log_summary(&summary);
        summary
    }

    /// Like [`replace_in_paths`](Self::replace_in_paths), with paths arriving
    /// from `scanner` while earlier files are already being processed.
    pub async fn replace_in_scan<S>(
        &self,
        pattern: &Regex,
        replacement: &str,
        scanner: S,
        cancel: &CancellationToken,
    ) -> Result<ReplaceSummary>
    where
        S: PathScanner + Send + 'static,
    {
        let summary = RefCell::new(ReplaceSummary::new(self.options.dry_run));

        ScanExecutor::new(scanner, self.options.concurrency)
            .execute(|path| self.replace_and_record(pattern, replacement, path, cancel, &summary))
            .await?;

        let summary = summary.into_inner();
        log_summary(&summary);
        Ok(summary)
    }

    async fn replace_and_record(
        &self,
        pattern: &Regex,
        replacement: &str,
        path: PathBuf,
        cancel: &CancellationToken,
        summary: &RefCell<ReplaceSummary>,
    ) {
        let outcome = self.replace_in_file(pattern, replacement, &path, cancel).await;
        summary.borrow_mut().record(path, outcome);
    }

    /// Replaces `pattern` in a single file.
    ///
    /// Binary files are skipped without error. Failures are reported to the
    /// observer and returned.
    pub async fn replace_in_file(
        &self,
        pattern: &Regex,
        replacement: &str,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<FileOutcome> {
        let outcome = self.stage_and_commit(pattern, replacement, path, cancel).await;
        match &outcome {
            Ok(FileOutcome::Replaced(result)) => {
                debug!(path = %path.display(), replacements = result.replacements, "replaced");
            }
            Ok(other) => debug!(path = %path.display(), outcome = ?other, "skipped"),
            Err(e) => {
                warn!("{e}");
                self.observer.file_error(path, e);
            }
        }
        outcome
    }

    async fn stage_and_commit(
        &self,
        pattern: &Regex,
        replacement: &str,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<FileOutcome> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let encoding = self.options.encoding;
        let reader = LineReader::new(path)
            .with_encoding(encoding)?
            .with_chunk_size(self.options.chunk_size);

        match reader.probe_binary() {
            Ok(true) => return Ok(FileOutcome::Binary),
            Ok(false) => {}
            Err(e) => {
                return Err(Error::BinaryProbe {
                    path: path.to_path_buf(),
                    source: Box::new(e),
                });
            }
        }

        let mut staging = if self.options.dry_run {
            None
        } else {
            Some(Staging::create(self.options.staging_dir.as_deref()).map_err(|e| Error::write(path, e))?)
        };

        let mut transform =
            ReplaceTransform::new(pattern, replacement, self.options.literal, self.options.dry_run);
        let mut session = reader.start_session(cancel).await?;
        if session.is_binary() {
            return Ok(FileOutcome::Binary);
        }

        while let Some(segment) = session.next_segment(cancel).await? {
            let text = transform.apply(&segment);
            if let Some(staging) = staging.as_mut() {
                let (bytes, _, unmappable) = encoding.encode(&text);
                if unmappable {
                    return Err(Error::write(
                        path,
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("replacement text cannot be encoded as {}", encoding.name()),
                        ),
                    ));
                }
                staging.write(&bytes).await.map_err(|e| Error::write(path, e))?;
            }
        }

        let replacements = transform.replacements();
        if replacements == 0 {
            return Ok(FileOutcome::Unchanged);
        }
        if session.had_malformed() && !self.options.dry_run {
            return Err(Error::MalformedText(path.to_path_buf(), encoding.name()));
        }

        let result = Replacement {
            path: path.to_path_buf(),
            replacements,
        };
        self.observer.path_replaced(&result);

        if let Some(staging) = staging {
            staging.commit_to(path, cancel).await?;
        }

        Ok(FileOutcome::Replaced(result))
    }
}

fn log_summary(summary: &ReplaceSummary) {
    info!(
        processed = summary.files_processed(),
        changed = summary.results.len(),
        replacements = summary.total_replacements(),
        binary = summary.binary_skipped,
        errors = summary.errors.len(),
        dry_run = summary.dry_run,
        "replace finished"
    );
}

/// Ticks a spinner on stderr as files are replaced or fail.
struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    fn new(dry_run: bool) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template(spinner_template(dry_run)) {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }
}

fn spinner_template(dry_run: bool) -> &'static str {
    if dry_run {
        "{spinner} [{elapsed_precise}] {pos} files would change {msg}"
    } else {
        "{spinner} [{elapsed_precise}] {pos} files changed {msg}"
    }
}

impl ReplaceObserver for ProgressObserver {
    fn path_replaced(&self, result: &Replacement) {
        self.bar.inc(1);
        self.bar.set_message(result.path.display().to_string());
    }

    fn file_error(&self, path: &Path, _error: &Error) {
        self.bar.set_message(format!("error: {}", path.display()));
    }
}

/// The main entry point for the `replace` command.
///
/// This function orchestrates the entire replacement process:
/// 1. It compiles the pattern and resolves options from the merged config.
/// 2. It walks `dirs`, feeding files to the replacer as they are found.
/// 3. It writes a report in the requested format to standard output.
pub async fn run_replace(
    config: ReplaceConfig,
    dirs: Vec<PathBuf>,
    format: OutputFormat,
) -> Result<ReplaceSummary> {
    let pattern = config.compile_pattern()?;
    let replacement = config
        .replacement
        .clone()
        .ok_or_else(|| Error::Config("Specify a replacement with --replacement or in the config file".into()))?;

    let mut roots = dirs.into_iter();
    let Some(first) = roots.next() else {
        return Err("Specify at least one directory with --dir".into());
    };
    let scanner = roots
        .fold(WalkScanner::new(first), WalkScanner::with_root)
        .with_extensions(config.extensions.clone())
        .with_exclude(config.exclude.clone());

    let progress = Arc::new(ProgressObserver::new(config.dry_run));
    let replacer = PathReplacer::new(ReplaceOptions::from_config(&config)?)?.with_observer(progress.clone());

    let cancel = CancellationToken::new();
    let summary = replacer
        .replace_in_scan(&pattern, &replacement, scanner, &cancel)
        .await?;
    progress.bar.finish_and_clear();

    let mut stdout = std::io::stdout().lock();
    OutputFormatter::new(format).write_summary(&mut stdout, &summary)?;
    Ok(summary)
}
