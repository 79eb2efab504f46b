use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::error::MigrationError;

/// Idempotency state of one source post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerState {
    Unseen,
    Skipped,
    Posted(String),
}

/// Append-only record of every decision made about a source post.
///
/// Each line is `<source id> <target id>`; a line holding only the source id
/// is an explicit skip. When an id appears more than once the last line wins.
#[derive(Debug)]
pub struct OperationLedger {
    path: PathBuf,
    entries: BTreeMap<String, Option<String>>,
}

impl OperationLedger {
    pub fn open(path: &Path) -> Result<Self> {
        let entries = load_ledger(path)?;
        debug!(entries = entries.len(), path = %path.display(), "loaded ledger");
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn entries(&self) -> &BTreeMap<String, Option<String>> {
        &self.entries
    }

    pub fn state(&self, source_id: &str) -> LedgerState {
        match self.entries.get(source_id) {
            None => LedgerState::Unseen,
            Some(None) => LedgerState::Skipped,
            Some(Some(target_id)) => LedgerState::Posted(target_id.clone()),
        }
    }

    /// Target id for a source post that was actually posted; skips and unseen ids yield `None`.
    pub fn posted_target(&self, source_id: &str) -> Option<&str> {
        self.entries.get(source_id).and_then(|target| target.as_deref())
    }

    /// Append one line and fsync it before updating the in-memory view.
    pub fn append(&mut self, source_id: &str, target_id: Option<&str>) -> Result<()> {
        validate_id(source_id, "source")?;
        if let Some(target_id) = target_id {
            validate_id(target_id, "target")?;
        }

        let line = match target_id {
            Some(target_id) => format!("{source_id} {target_id}\n"),
            None => format!("{source_id}\n"),
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;

        self.entries
            .insert(source_id.to_string(), target_id.map(ToString::to_string));
        Ok(())
    }
}

/// Read the ledger file into `source id -> target id (None = skip)`.
/// A missing file is an empty ledger.
pub fn load_ledger(path: &Path) -> Result<BTreeMap<String, Option<String>>> {
    let mut entries = BTreeMap::new();
    if !path.exists() {
        return Ok(entries);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;

    for (index, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut fields = trimmed.split_whitespace();
        let source_id = fields.next().unwrap_or_default();
        let target_id = fields.next();
        if fields.next().is_some() {
            return Err(MigrationError::Parse(format!(
                "{}:{}: expected `<source id> [target id]`, found `{trimmed}`",
                path.display(),
                index + 1
            ))
            .into());
        }
        entries.insert(source_id.to_string(), target_id.map(ToString::to_string));
    }
    Ok(entries)
}

fn validate_id(id: &str, role: &str) -> Result<()> {
    if id.is_empty() || id.chars().any(char::is_whitespace) {
        bail!("{role} id `{id}` cannot be empty or contain whitespace");
    }
    Ok(())
}
