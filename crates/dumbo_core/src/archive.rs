use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::MigrationError;
use crate::runtime::ArchivePaths;

const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";
const UNDETERMINED_LANGUAGE: &str = "und";

/// One post from the exported archive, immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePost {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub language: Option<String>,
    pub entities: Vec<Entity>,
    pub in_reply_to_id: Option<String>,
    pub is_retweet: bool,
    pub is_mention: bool,
}

/// Annotation over a character range of a post's raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Url(UrlEntity),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlEntity {
    /// Half-open range in characters (not bytes) of the raw text.
    pub range: Range<usize>,
    pub url: String,
}

impl Entity {
    pub fn range(&self) -> Range<usize> {
        match self {
            Self::Url(entity) => entity.range.clone(),
        }
    }

    pub fn replacement(&self) -> &str {
        match self {
            Self::Url(entity) => &entity.url,
        }
    }
}

impl SourcePost {
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        created_at: DateTime<Utc>,
        language: Option<String>,
        entities: Vec<Entity>,
        in_reply_to_id: Option<String>,
    ) -> Self {
        let text = text.into();
        Self {
            id: id.into(),
            is_retweet: text.starts_with("RT @"),
            is_mention: text.starts_with('@'),
            text,
            created_at,
            language,
            entities,
            in_reply_to_id,
        }
    }

    pub fn url(&self) -> String {
        format!("https://twitter.com/twitter/status/{}", self.id)
    }
}

impl fmt::Display for SourcePost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "id: {}", self.id)?;
        writeln!(f, "created_at: {}", self.created_at.to_rfc3339())?;
        writeln!(f, "language: {}", self.language.as_deref().unwrap_or("<none>"))?;
        if let Some(parent) = &self.in_reply_to_id {
            writeln!(f, "in_reply_to: {parent}")?;
        }
        for entity in &self.entities {
            let range = entity.range();
            writeln!(
                f,
                "entity: [{}, {}) -> {}",
                range.start,
                range.end,
                entity.replacement()
            )?;
        }
        write!(f, "text: {}", self.text)
    }
}

/// Load every archive part under `paths.data_dir` in processing order.
///
/// `tweets.js` must exist; `tweets-part1.js`, `tweets-part2.js`, ... are read
/// while present.
pub fn load_archive(paths: &ArchivePaths) -> Result<Vec<SourcePost>> {
    let mut posts = Vec::new();
    let mut part = 0usize;
    loop {
        let path = paths.tweets_part_path(part);
        if part > 0 && !path.exists() {
            break;
        }
        let loaded = load_archive_part(&path, part)?;
        debug!(part, count = loaded.len(), path = %path.display(), "loaded archive part");
        posts.extend(loaded);
        part += 1;
    }
    sort_posts(&mut posts);
    Ok(posts)
}

/// Parse one archive part. The result is unsorted; `load_archive` orders the union.
pub fn load_archive_part(path: &Path, part: usize) -> Result<Vec<SourcePost>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_archive(&content, part).with_context(|| format!("failed to load {}", path.display()))
}

pub fn archive_prefix(part: usize) -> String {
    format!("window.YTD.tweets.part{part} = ")
}

pub fn parse_archive(content: &str, part: usize) -> Result<Vec<SourcePost>> {
    let prefix = archive_prefix(part);
    let body = content
        .strip_prefix('\u{feff}')
        .unwrap_or(content)
        .strip_prefix(prefix.as_str())
        .ok_or_else(|| {
            MigrationError::Parse(format!("tweets file did not start with `{prefix}`"))
        })?;
    let entries: Vec<TweetEntry> = serde_json::from_str(body)
        .map_err(|error| MigrationError::Parse(format!("invalid tweet records: {error}")))?;

    entries
        .into_iter()
        .map(|entry| entry.tweet.into_source_post())
        .collect()
}

/// Chronological, ties broken by numeric id order.
pub fn sort_posts(posts: &mut [SourcePost]) {
    posts.sort_by(|left, right| {
        left.created_at
            .cmp(&right.created_at)
            .then_with(|| compare_ids(&left.id, &right.id))
    });
}

fn compare_ids(left: &str, right: &str) -> Ordering {
    left.len().cmp(&right.len()).then_with(|| left.cmp(right))
}

#[derive(Debug, Deserialize)]
struct TweetEntry {
    tweet: TweetRecord,
}

#[derive(Debug, Deserialize)]
struct TweetRecord {
    id_str: String,
    full_text: String,
    created_at: String,
    #[serde(default)]
    lang: Option<String>,
    #[serde(default)]
    entities: EntitiesRecord,
    #[serde(default)]
    in_reply_to_status_id_str: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EntitiesRecord {
    #[serde(default)]
    urls: Vec<UrlRecord>,
}

#[derive(Debug, Deserialize)]
struct UrlRecord {
    expanded_url: String,
    indices: [IndexValue; 2],
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IndexValue {
    Number(usize),
    Text(String),
}

impl IndexValue {
    fn resolve(&self, tweet_id: &str) -> Result<usize> {
        match self {
            Self::Number(value) => Ok(*value),
            Self::Text(value) => value.trim().parse::<usize>().map_err(|_| {
                anyhow::Error::from(MigrationError::Parse(format!(
                    "tweet {tweet_id} has a non-numeric entity index `{value}`"
                )))
            }),
        }
    }
}

impl TweetRecord {
    fn into_source_post(self) -> Result<SourcePost> {
        let created_at = DateTime::parse_from_str(&self.created_at, CREATED_AT_FORMAT)
            .map_err(|error| {
                MigrationError::Parse(format!(
                    "tweet {} has unparseable created_at `{}`: {error}",
                    self.id_str, self.created_at
                ))
            })?
            .with_timezone(&Utc);

        let mut entities = Vec::with_capacity(self.entities.urls.len());
        for url in &self.entities.urls {
            let start = url.indices[0].resolve(&self.id_str)?;
            let end = url.indices[1].resolve(&self.id_str)?;
            if end < start {
                return Err(MigrationError::Parse(format!(
                    "tweet {} has an inverted entity range [{start}, {end})",
                    self.id_str
                ))
                .into());
            }
            entities.push(Entity::Url(UrlEntity {
                range: start..end,
                url: url.expanded_url.clone(),
            }));
        }

        let language = self
            .lang
            .map(|lang| lang.trim().to_string())
            .filter(|lang| !lang.is_empty() && lang != UNDETERMINED_LANGUAGE);
        let in_reply_to_id = self
            .in_reply_to_status_id_str
            .filter(|parent| !parent.trim().is_empty());

        Ok(SourcePost::new(
            self.id_str,
            self.full_text,
            created_at,
            language,
            entities,
            in_reply_to_id,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ResolutionContext, resolve_paths};
    use tempfile::tempdir;

    const SAMPLE: &str = r#"window.YTD.tweets.part0 = [
  {
    "tweet" : {
      "id_str" : "200",
      "full_text" : "second https://t.co/abc",
      "created_at" : "Thu Oct 11 08:00:00 +0000 2018",
      "lang" : "en",
      "entities" : {
        "urls" : [
          { "url" : "https://t.co/abc", "expanded_url" : "https://example.com/page", "indices" : [ "7", "23" ] }
        ]
      },
      "in_reply_to_status_id_str" : "100"
    }
  },
  {
    "tweet" : {
      "id_str" : "100",
      "full_text" : "RT @friend: first",
      "created_at" : "Wed Oct 10 20:19:24 +0000 2018",
      "lang" : "und"
    }
  }
]"#;

    #[test]
    fn parse_archive_requires_prefix() {
        let error = parse_archive("[]", 0).expect_err("must fail");
        assert!(matches!(
            error.downcast_ref::<MigrationError>(),
            Some(MigrationError::Parse(_))
        ));
        assert!(error.to_string().contains("window.YTD.tweets.part0 = "));
    }

    #[test]
    fn parse_archive_rejects_malformed_records() {
        let error = parse_archive("window.YTD.tweets.part0 = [{\"tweet\": {}}]", 0)
            .expect_err("must fail");
        assert!(matches!(
            error.downcast_ref::<MigrationError>(),
            Some(MigrationError::Parse(_))
        ));
    }

    #[test]
    fn parse_archive_maps_records_and_flags() {
        let posts = parse_archive(SAMPLE, 0).expect("parse");
        assert_eq!(posts.len(), 2);

        let reply = &posts[0];
        assert_eq!(reply.id, "200");
        assert_eq!(reply.language.as_deref(), Some("en"));
        assert_eq!(reply.in_reply_to_id.as_deref(), Some("100"));
        assert!(!reply.is_retweet);
        assert!(!reply.is_mention);
        assert_eq!(
            reply.entities,
            vec![Entity::Url(UrlEntity {
                range: 7..23,
                url: "https://example.com/page".to_string(),
            })]
        );

        let retweet = &posts[1];
        assert!(retweet.is_retweet);
        assert!(!retweet.is_mention);
        assert!(retweet.language.is_none());
        assert_eq!(
            retweet.created_at.to_rfc3339(),
            "2018-10-10T20:19:24+00:00"
        );
    }

    #[test]
    fn numeric_indices_are_accepted() {
        let content = r#"window.YTD.tweets.part0 = [{"tweet": {
            "id_str": "1", "full_text": "@a hi", "created_at": "Wed Oct 10 20:19:24 +0000 2018",
            "entities": {"urls": [{"expanded_url": "https://x.example", "indices": [0, 2]}]}
        }}]"#;
        let posts = parse_archive(content, 0).expect("parse");
        assert!(posts[0].is_mention);
        assert_eq!(posts[0].entities[0].range(), 0..2);
    }

    #[test]
    fn sort_posts_orders_by_time_then_numeric_id() {
        let at = DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        let later = at + chrono::Duration::seconds(1);
        let mut posts = vec![
            SourcePost::new("3", "c", later, None, Vec::new(), None),
            SourcePost::new("10", "b", at, None, Vec::new(), None),
            SourcePost::new("9", "a", at, None, Vec::new(), None),
        ];
        sort_posts(&mut posts);
        let ids: Vec<&str> = posts.iter().map(|post| post.id.as_str()).collect();
        assert_eq!(ids, vec!["9", "10", "3"]);
    }

    #[test]
    fn load_archive_reads_all_parts_in_order() {
        let temp = tempdir().expect("tempdir");
        let context = ResolutionContext {
            cwd: temp.path().to_path_buf(),
        };
        let paths = resolve_paths(&context, temp.path(), None).expect("paths");
        fs::create_dir_all(&paths.data_dir).expect("create data dir");
        fs::write(&paths.tweets_path, SAMPLE).expect("write part0");
        fs::write(
            paths.tweets_part_path(1),
            r#"window.YTD.tweets.part1 = [{"tweet": {
                "id_str": "50", "full_text": "oldest", "created_at": "Mon Jan 01 00:00:00 +0000 2018"
            }}]"#,
        )
        .expect("write part1");

        let posts = load_archive(&paths).expect("load");
        let ids: Vec<&str> = posts.iter().map(|post| post.id.as_str()).collect();
        assert_eq!(ids, vec!["50", "100", "200"]);
    }

    #[test]
    fn load_archive_rejects_part_with_wrong_prefix() {
        let temp = tempdir().expect("tempdir");
        let context = ResolutionContext {
            cwd: temp.path().to_path_buf(),
        };
        let paths = resolve_paths(&context, temp.path(), None).expect("paths");
        fs::create_dir_all(&paths.data_dir).expect("create data dir");
        fs::write(&paths.tweets_path, SAMPLE).expect("write part0");
        fs::write(paths.tweets_part_path(1), SAMPLE).expect("write part1");

        let error = load_archive(&paths).expect_err("must fail");
        assert!(error.downcast_ref::<MigrationError>().is_some());
        assert!(format!("{error:#}").contains("window.YTD.tweets.part1 = "));
    }
}
