use crate::errors::Result;
use regex::Regex;
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Configuration for the replace operation.
///
/// Every field is optional in the YAML file:
///
/// ```yaml
/// pattern: 'console\.log\((.*)\)'
/// replacement: 'logger.debug($1)'
/// literal: false
/// dry_run: true
/// concurrency: 8
/// chunk_size: 10240
/// encoding: utf-8
/// extensions: [js, ts]
/// exclude: [node_modules, dist]
/// ```
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ReplaceConfig {
    /// The regex pattern to search for.
    pub pattern: Option<String>,
    /// The replacement template. `$1` and `${name}` refer to capture groups
    /// unless `literal` is set.
    pub replacement: Option<String>,
    /// Insert the replacement verbatim.
    pub literal: bool,
    /// Count matches without modifying files.
    pub dry_run: bool,
    /// Maximum number of files processed at once.
    pub concurrency: Option<usize>,
    /// Bytes read per chunk.
    pub chunk_size: Option<usize>,
    /// WHATWG encoding label, e.g. `utf-8` or `windows-1252`.
    pub encoding: Option<String>,
    /// File extensions to include. Empty means every file.
    pub extensions: Vec<String>,
    /// Directory names to skip.
    pub exclude: Vec<String>,
    /// Directory for staging files. Defaults to the system temp directory.
    pub staging_dir: Option<PathBuf>,
}

impl ReplaceConfig {
    /// Applies command-line values on top of this configuration.
    ///
    /// Values given on the command line win; flags can only switch options on.
    pub fn merge_cli(&mut self, cli: ReplaceConfig) {
        if cli.pattern.is_some() {
            self.pattern = cli.pattern;
        }
        if cli.replacement.is_some() {
            self.replacement = cli.replacement;
        }
        self.literal |= cli.literal;
        self.dry_run |= cli.dry_run;
        if cli.concurrency.is_some() {
            self.concurrency = cli.concurrency;
        }
        if cli.chunk_size.is_some() {
            self.chunk_size = cli.chunk_size;
        }
        if cli.encoding.is_some() {
            self.encoding = cli.encoding;
        }
        if !cli.extensions.is_empty() {
            self.extensions = cli.extensions;
        }
        if !cli.exclude.is_empty() {
            self.exclude = cli.exclude;
        }
        if cli.staging_dir.is_some() {
            self.staging_dir = cli.staging_dir;
        }
    }

    /// Compiles the configured pattern.
    pub fn compile_pattern(&self) -> Result<Regex> {
        let pattern = self
            .pattern
            .as_deref()
            .ok_or("Specify a pattern with --pattern or in the config file")?;
        Ok(Regex::new(pattern)?)
    }
}

/// A utility for locating and loading replace configurations.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Finds the configuration file by searching in a prioritized list of locations.
    ///
    /// The search order is:
    /// 1. `config_path` as given (absolute, or relative to the current directory).
    /// 2. A path relative to the `working_dir`.
    /// 3. Inside the `~/.linesweep` directory.
    pub fn find_config(config_path: &Path, working_dir: &Path) -> Result<PathBuf> {
        if config_path.exists() {
            return Ok(config_path.to_path_buf());
        }

        let mut tried_locations = vec![config_path.to_path_buf()];

        let in_working_dir = working_dir.join(config_path);
        if in_working_dir.exists() {
            return Ok(in_working_dir);
        }
        tried_locations.push(in_working_dir);

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".linesweep").join(config_path);
            if home_config.exists() {
                return Ok(home_config);
            }
            tried_locations.push(home_config);
        }

        let tried: Vec<String> = tried_locations
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        Err(format!(
            "Config file '{}' not found. Searched in:\n  - {}",
            config_path.display(),
            tried.join("\n  - ")
        )
        .into())
    }

    /// Loads a `ReplaceConfig` from a YAML file.
    pub fn load_replace_config(path: &Path) -> Result<ReplaceConfig> {
        let file = File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }
}
