use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

pub const DATA_DIR_NAME: &str = "data";
pub const TWEETS_FILENAME: &str = "tweets.js";
pub const LEDGER_FILENAME: &str = "dumbo_log.txt";
pub const CREDENTIAL_FILENAME: &str = "dumbo_auth.json";
pub const CONFIG_FILENAME: &str = "dumbo.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

/// Every on-disk location a run reads or writes, derived from the archive directory.
#[derive(Debug, Clone)]
pub struct ArchivePaths {
    pub archive_dir: PathBuf,
    pub data_dir: PathBuf,
    pub tweets_path: PathBuf,
    pub ledger_path: PathBuf,
    pub credential_path: PathBuf,
    pub config_path: PathBuf,
    pub config_source: ValueSource,
}

impl ArchivePaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "archive_dir={}\ntweets_path={}\nledger_path={}\ncredential_path={}\nconfig_path={} ({})",
            normalize_for_display(&self.archive_dir),
            normalize_for_display(&self.tweets_path),
            normalize_for_display(&self.ledger_path),
            normalize_for_display(&self.credential_path),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }

    /// Path of the `index`-th archive part; part 0 is the unsuffixed `tweets.js`.
    pub fn tweets_part_path(&self, index: usize) -> PathBuf {
        if index == 0 {
            self.tweets_path.clone()
        } else {
            self.data_dir.join(format!("tweets-part{index}.js"))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveStatus {
    pub archive_dir_exists: bool,
    pub tweets_exists: bool,
    pub ledger_size_bytes: Option<u64>,
    pub credential_exists: bool,
    pub config_exists: bool,
    pub warnings: Vec<String>,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    archive_dir: &Path,
    config_override: Option<&Path>,
) -> Result<ArchivePaths> {
    if archive_dir.as_os_str().is_empty() {
        bail!("archive directory cannot be empty");
    }
    let archive_dir = absolutize(&context.cwd, archive_dir);
    let data_dir = archive_dir.join(DATA_DIR_NAME);
    let (config_path, config_source) = match config_override {
        Some(path) => (absolutize(&context.cwd, path), ValueSource::Flag),
        None => (archive_dir.join(CONFIG_FILENAME), ValueSource::Default),
    };

    Ok(ArchivePaths {
        tweets_path: data_dir.join(TWEETS_FILENAME),
        ledger_path: archive_dir.join(LEDGER_FILENAME),
        credential_path: archive_dir.join(CREDENTIAL_FILENAME),
        data_dir,
        archive_dir,
        config_path,
        config_source,
    })
}

pub fn inspect_archive(paths: &ArchivePaths) -> Result<ArchiveStatus> {
    let archive_dir_exists = paths.archive_dir.is_dir();
    let tweets_exists = paths.tweets_path.is_file();
    let ledger_exists = paths.ledger_path.exists();
    let ledger_size_bytes = if ledger_exists {
        let metadata = fs::metadata(&paths.ledger_path)
            .with_context(|| format!("failed to inspect {}", paths.ledger_path.display()))?;
        Some(metadata.len())
    } else {
        None
    };

    let mut warnings = Vec::new();
    if !ledger_exists {
        warnings.push("no ledger yet; every eligible post will be prompted".to_string());
    }
    let credential_exists = paths.credential_path.exists();
    if !credential_exists {
        warnings.push("no cached credential; the next run registers a new application".to_string());
    }

    Ok(ArchiveStatus {
        archive_dir_exists,
        tweets_exists,
        ledger_size_bytes,
        credential_exists,
        config_exists: paths.config_path.exists(),
        warnings,
    })
}

pub fn ensure_archive_ready(paths: &ArchivePaths, status: &ArchiveStatus) -> Result<()> {
    if !status.archive_dir_exists || !status.tweets_exists {
        bail!(
            "Archive directory {} is not usable.\nMissing required paths:\n  - {}\n  - {}\nPoint dumbo at the extracted export (the folder containing data/).",
            normalize_for_display(&paths.archive_dir),
            if status.archive_dir_exists {
                "archive dir (ok)"
            } else {
                "archive dir (missing)"
            },
            if status.tweets_exists {
                "data/tweets.js (ok)"
            } else {
                "data/tweets.js (missing)"
            },
        );
    }
    Ok(())
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}
