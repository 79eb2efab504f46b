use anyhow::Result;
use serde::Serialize;

use crate::archive::{SourcePost, load_archive};
use crate::driver::{Exclusion, exclusion_for};
use crate::ledger::{LedgerState, OperationLedger};
use crate::runtime::{ArchivePaths, ensure_archive_ready, inspect_archive};

/// Offline summary of how far an archive's migration has progressed.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MigrationStatus {
    pub total_posts: usize,
    pub retweets: usize,
    pub mentions: usize,
    pub orphan_replies: usize,
    pub posted: usize,
    pub skipped: usize,
    pub pending: usize,
    pub ledger_entries: usize,
    pub ledger_size_bytes: Option<u64>,
    pub credential_cached: bool,
    pub config_exists: bool,
    pub warnings: Vec<String>,
}

pub fn migration_status(paths: &ArchivePaths) -> Result<MigrationStatus> {
    let archive = inspect_archive(paths)?;
    ensure_archive_ready(paths, &archive)?;
    let posts = load_archive(paths)?;
    let ledger = OperationLedger::open(&paths.ledger_path)?;

    let mut status = summarize(&posts, &ledger);
    status.ledger_size_bytes = archive.ledger_size_bytes;
    status.credential_cached = archive.credential_exists;
    status.config_exists = archive.config_exists;
    status.warnings = archive.warnings;
    Ok(status)
}

/// Classify every post against the ledger as it stands now. Replies whose
/// parent is still pending count as orphans until the parent is posted.
pub fn summarize(posts: &[SourcePost], ledger: &OperationLedger) -> MigrationStatus {
    let mut status = MigrationStatus {
        total_posts: posts.len(),
        ledger_entries: ledger.entries().len(),
        ..MigrationStatus::default()
    };
    for post in posts {
        match exclusion_for(post, ledger) {
            Some(Exclusion::Retweet) => status.retweets += 1,
            Some(Exclusion::Mention) => status.mentions += 1,
            Some(Exclusion::UnpostedParent) => status.orphan_replies += 1,
            None => match ledger.state(&post.id) {
                LedgerState::Posted(_) => status.posted += 1,
                LedgerState::Skipped => status.skipped += 1,
                LedgerState::Unseen => status.pending += 1,
            },
        }
    }
    status
}
