use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::archive::{Entity, SourcePost};
use crate::error::MigrationError;
use crate::ledger::OperationLedger;

/// Post content ready to send to the target platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toot {
    pub text: String,
    pub posted: DateTime<Utc>,
    pub language: Option<String>,
    pub in_reply_to_id: Option<String>,
}

impl fmt::Display for Toot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "posted: {}", self.posted.to_rfc3339())?;
        writeln!(f, "language: {}", self.language.as_deref().unwrap_or("<none>"))?;
        if let Some(parent) = &self.in_reply_to_id {
            writeln!(f, "in_reply_to: {parent}")?;
        }
        write!(f, "text: {}", self.text)
    }
}

/// Rebuild the post's text and resolve its reply target through the ledger.
pub fn render(post: &SourcePost, ledger: &OperationLedger) -> Result<Toot> {
    let in_reply_to_id = match &post.in_reply_to_id {
        None => None,
        Some(parent_id) => {
            let target = ledger.posted_target(parent_id).ok_or_else(|| {
                MigrationError::Consistency {
                    post_id: post.id.clone(),
                    parent_id: parent_id.clone(),
                }
            })?;
            Some(target.to_string())
        }
    };

    Ok(Toot {
        text: render_text(&post.id, &post.text, &post.entities),
        posted: post.created_at,
        language: post.language.clone(),
        in_reply_to_id,
    })
}

/// Replace every entity span (character offsets) with its replacement, in
/// start order, copying the text between spans verbatim. Entities that start
/// inside an already replaced span are dropped.
pub fn render_text(post_id: &str, text: &str, entities: &[Entity]) -> String {
    let mut boundaries: Vec<usize> = text.char_indices().map(|(offset, _)| offset).collect();
    boundaries.push(text.len());
    let char_count = boundaries.len() - 1;
    let byte_at = |index: usize| boundaries[index.min(char_count)];

    let mut ordered: Vec<&Entity> = entities.iter().collect();
    ordered.sort_by_key(|entity| (entity.range().start, entity.range().end));

    let mut output = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for entity in ordered {
        let range = entity.range();
        if range.start < cursor {
            warn!(
                post_id,
                start = range.start,
                end = range.end,
                "dropping entity that overlaps a previous one"
            );
            continue;
        }
        output.push_str(&text[byte_at(cursor)..byte_at(range.start)]);
        output.push_str(entity.replacement());
        cursor = range.end.max(range.start);
    }
    output.push_str(&text[byte_at(cursor)..]);
    output
}
