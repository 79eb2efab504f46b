use anyhow::{Context, Result};
use reqwest::Url;
use serde::Serialize;
use similar::TextDiff;
use tracing::{debug, info};
use uuid::Uuid;

use crate::archive::{SourcePost, load_archive};
use crate::auth::{AuthSession, Authorization};
use crate::client::{MastodonApi, MastodonClient, MastodonClientConfig, TargetPost};
use crate::config::DumboConfig;
use crate::console::{Console, TerminalConsole};
use crate::error::MigrationError;
use crate::ledger::{LedgerState, OperationLedger};
use crate::runtime::{ArchivePaths, ensure_archive_ready, inspect_archive};
use crate::transform::{Toot, render};

pub const INPUT_YES: &str = "yes";
pub const INPUT_NO: &str = "no";
pub const INPUT_SKIP: &str = "skip";

const SEPARATOR: &str = "-------";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Confirm,
    Decline,
    PassThrough,
}

impl ReviewDecision {
    pub fn parse(input: &str) -> Result<Self, MigrationError> {
        match input {
            INPUT_YES => Ok(Self::Confirm),
            INPUT_NO => Ok(Self::Decline),
            INPUT_SKIP => Ok(Self::PassThrough),
            other => Err(MigrationError::UnrecognizedInput(other.to_string())),
        }
    }
}

/// Reasons a post is filtered out before the ledger is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    Retweet,
    Mention,
    UnpostedParent,
}

impl Exclusion {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Retweet => "do not keep retweets of posts from other authors",
            Self::Mention => "do not keep @mentions to individual accounts",
            Self::UnpostedParent => {
                "do not keep replies to posts which are not ours or which were explicitly skipped"
            }
        }
    }
}

pub fn exclusion_for(post: &SourcePost, ledger: &OperationLedger) -> Option<Exclusion> {
    if post.is_retweet {
        return Some(Exclusion::Retweet);
    }
    if post.is_mention {
        return Some(Exclusion::Mention);
    }
    match &post.in_reply_to_id {
        Some(parent_id) if ledger.posted_target(parent_id).is_none() => {
            Some(Exclusion::UnpostedParent)
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    /// Re-render already posted entries and offer an edit when the text changed.
    pub edit: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub considered: usize,
    pub excluded_retweets: usize,
    pub excluded_mentions: usize,
    pub excluded_replies: usize,
    pub previously_skipped: usize,
    pub previously_posted: usize,
    pub unchanged: usize,
    pub created: usize,
    pub edited: usize,
    pub declined: usize,
    pub passed: usize,
    pub prompts: usize,
    pub request_count: usize,
}

enum ReviewPlan {
    Create(Toot),
    Edit { existing: TargetPost, toot: Toot },
}

/// Visits posts strictly in load order; every decision is committed to the
/// ledger before the next post is considered.
pub struct MigrationDriver<'a, A: MastodonApi, C: Console> {
    api: &'a mut A,
    console: &'a mut C,
    ledger: &'a mut OperationLedger,
    authorization: &'a Authorization,
    options: MigrateOptions,
}

impl<'a, A: MastodonApi, C: Console> MigrationDriver<'a, A, C> {
    pub fn new(
        api: &'a mut A,
        console: &'a mut C,
        ledger: &'a mut OperationLedger,
        authorization: &'a Authorization,
        options: MigrateOptions,
    ) -> Self {
        Self {
            api,
            console,
            ledger,
            authorization,
            options,
        }
    }

    pub fn run(&mut self, posts: &[SourcePost]) -> Result<MigrationReport> {
        let requests_before = self.api.request_count();
        let mut report = MigrationReport::default();
        for post in posts {
            report.considered += 1;
            self.process(post, &mut report)
                .with_context(|| format!("failed to migrate post {}", post.id))?;
        }
        report.request_count = self.api.request_count().saturating_sub(requests_before);
        Ok(report)
    }

    fn process(&mut self, post: &SourcePost, report: &mut MigrationReport) -> Result<()> {
        if let Some(exclusion) = exclusion_for(post, self.ledger) {
            debug!(post_id = %post.id, "{}", exclusion.describe());
            match exclusion {
                Exclusion::Retweet => report.excluded_retweets += 1,
                Exclusion::Mention => report.excluded_mentions += 1,
                Exclusion::UnpostedParent => report.excluded_replies += 1,
            }
            return Ok(());
        }

        let plan = match self.ledger.state(&post.id) {
            LedgerState::Skipped => {
                debug!(post_id = %post.id, "explicitly skipped on an earlier run");
                report.previously_skipped += 1;
                return Ok(());
            }
            LedgerState::Posted(target_id) if !self.options.edit => {
                debug!(post_id = %post.id, target_id = %target_id, "already posted");
                report.previously_posted += 1;
                return Ok(());
            }
            LedgerState::Posted(target_id) => {
                let existing = self
                    .api
                    .get_status(self.authorization, &target_id)
                    .with_context(|| format!("failed to fetch target post {target_id}"))?;
                let toot = render(post, self.ledger)?;
                if toot.text == existing.content {
                    debug!(post_id = %post.id, target_id = %target_id, "target post is up to date");
                    report.unchanged += 1;
                    return Ok(());
                }
                ReviewPlan::Edit { existing, toot }
            }
            LedgerState::Unseen => ReviewPlan::Create(render(post, self.ledger)?),
        };

        self.show_preview(post, &plan)?;
        let prompt = match plan {
            ReviewPlan::Create(_) => "Post?",
            ReviewPlan::Edit { .. } => "Edit?",
        };
        report.prompts += 1;
        let input = self
            .console
            .read_token(&format!("{prompt} ({INPUT_YES}, {INPUT_NO}, {INPUT_SKIP}): "))?;
        let decision = ReviewDecision::parse(&input)?;

        match (decision, plan) {
            (ReviewDecision::Confirm, ReviewPlan::Create(toot)) => {
                let idempotency_key = Uuid::new_v4().to_string();
                let created = self
                    .api
                    .create_status(self.authorization, &idempotency_key, &toot)
                    .context("failed to create target post")?;
                self.ledger.append(&post.id, Some(&created.id))?;
                info!(post_id = %post.id, target_id = %created.id, "created target post");
                report.created += 1;
            }
            (ReviewDecision::Confirm, ReviewPlan::Edit { existing, toot }) => {
                let idempotency_key = Uuid::new_v4().to_string();
                let edited = self
                    .api
                    .edit_status(self.authorization, &idempotency_key, &existing.id, &toot)
                    .with_context(|| format!("failed to edit target post {}", existing.id))?;
                if edited.id != existing.id {
                    self.ledger.append(&post.id, Some(&edited.id))?;
                }
                info!(post_id = %post.id, target_id = %edited.id, "edited target post");
                report.edited += 1;
            }
            (ReviewDecision::Decline, ReviewPlan::Create(_)) => {
                self.ledger.append(&post.id, None)?;
                report.declined += 1;
            }
            // The existing target post stays in the posted set so replies to it still resolve.
            (ReviewDecision::Decline, ReviewPlan::Edit { .. }) => {
                report.declined += 1;
            }
            (ReviewDecision::PassThrough, _) => {
                report.passed += 1;
            }
        }

        self.console.show(SEPARATOR)?;
        Ok(())
    }

    fn show_preview(&mut self, post: &SourcePost, plan: &ReviewPlan) -> Result<()> {
        self.console.show(&format!("TWEET: {}", post.url()))?;
        self.console.show(&post.to_string())?;
        self.console.show("")?;
        match plan {
            ReviewPlan::Create(toot) => {
                self.console.show("TOOT:")?;
                self.console.show(&toot.to_string())?;
            }
            ReviewPlan::Edit { existing, toot } => {
                self.console.show(&format!("EDIT TOOT {}:", existing.id))?;
                self.console.show(&toot.to_string())?;
                self.console.show("")?;
                self.console.show("DIFF:")?;
                self.console.show(&text_diff(&existing.content, &toot.text))?;
            }
        }
        self.console.show("")?;
        Ok(())
    }
}

/// Line diff of the current target text against the proposed replacement.
pub fn text_diff(current: &str, proposed: &str) -> String {
    TextDiff::from_lines(current, proposed)
        .unified_diff()
        .header("current", "proposed")
        .to_string()
}

/// Migrate the archive at `paths` against a live server from the terminal.
pub fn migrate_archive(
    paths: &ArchivePaths,
    config: &DumboConfig,
    host: Url,
    options: &MigrateOptions,
) -> Result<MigrationReport> {
    let mut client = MastodonClient::new(MastodonClientConfig::from_config(host.clone(), config))?;
    let mut console = TerminalConsole::stdio();
    migrate_archive_with_api(paths, config, host, options, &mut client, &mut console)
}

pub fn migrate_archive_with_api<A: MastodonApi, C: Console>(
    paths: &ArchivePaths,
    config: &DumboConfig,
    host: Url,
    options: &MigrateOptions,
    api: &mut A,
    console: &mut C,
) -> Result<MigrationReport> {
    let requests_before = api.request_count();
    let status = inspect_archive(paths)?;
    ensure_archive_ready(paths, &status)?;
    let posts = load_archive(paths)?;
    debug!("loaded {} posts", posts.len());
    let mut ledger = OperationLedger::open(&paths.ledger_path)?;

    let authorization = AuthSession::new(api, console, host, config.client_name(), config.website())
        .establish(&paths.credential_path)?;

    let mut report = MigrationDriver::new(
        api,
        console,
        &mut ledger,
        &authorization,
        options.clone(),
    )
    .run(&posts)?;
    report.request_count = api.request_count().saturating_sub(requests_before);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, VecDeque};
    use std::fs;
    use std::path::Path;

    use anyhow::bail;
    use chrono::{DateTime, Utc};
    use tempfile::tempdir;

    use super::*;
    use crate::archive::{Entity, UrlEntity};
    use crate::client::{
        Account, ApplicationRegistration, OauthToken, RegisteredApplication, TokenRequest,
    };
    use crate::config::normalize_host;
    use crate::error::exit_code_for;
    use crate::runtime::{ResolutionContext, resolve_paths};

    #[derive(Default)]
    struct MockApi {
        statuses: BTreeMap<String, TargetPost>,
        created: Vec<(String, Toot)>,
        edited: Vec<(String, String)>,
        fetched: Vec<String>,
        next_id: u64,
        request_count: usize,
    }

    impl MockApi {
        fn with_status(mut self, id: &str, content: &str) -> Self {
            self.statuses.insert(
                id.to_string(),
                TargetPost {
                    id: id.to_string(),
                    content: content.to_string(),
                    language: None,
                    created_at: None,
                    in_reply_to_id: None,
                },
            );
            self
        }
    }

    impl MastodonApi for MockApi {
        fn create_application(
            &mut self,
            _registration: &ApplicationRegistration,
        ) -> Result<RegisteredApplication> {
            bail!("application registration is not expected")
        }

        fn create_oauth_token(&mut self, _request: &TokenRequest) -> Result<OauthToken> {
            bail!("token exchange is not expected")
        }

        fn verify_credentials(&mut self, _authorization: &Authorization) -> Result<Account> {
            self.request_count += 1;
            Ok(Account {
                id: "1".to_string(),
                username: "me".to_string(),
                acct: "me".to_string(),
            })
        }

        fn create_status(
            &mut self,
            _authorization: &Authorization,
            idempotency_key: &str,
            toot: &Toot,
        ) -> Result<TargetPost> {
            self.request_count += 1;
            self.next_id += 1;
            let post = TargetPost {
                id: format!("t{}", self.next_id),
                content: toot.text.clone(),
                language: toot.language.clone(),
                created_at: None,
                in_reply_to_id: toot.in_reply_to_id.clone(),
            };
            self.statuses.insert(post.id.clone(), post.clone());
            self.created.push((idempotency_key.to_string(), toot.clone()));
            Ok(post)
        }

        fn edit_status(
            &mut self,
            _authorization: &Authorization,
            idempotency_key: &str,
            status_id: &str,
            toot: &Toot,
        ) -> Result<TargetPost> {
            self.request_count += 1;
            let post = self
                .statuses
                .get_mut(status_id)
                .ok_or_else(|| anyhow::anyhow!("Record not found"))?;
            post.content = toot.text.clone();
            self.edited
                .push((idempotency_key.to_string(), status_id.to_string()));
            Ok(post.clone())
        }

        fn get_status(
            &mut self,
            _authorization: &Authorization,
            status_id: &str,
        ) -> Result<TargetPost> {
            self.request_count += 1;
            self.fetched.push(status_id.to_string());
            self.statuses
                .get(status_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("Record not found"))
        }

        fn request_count(&self) -> usize {
            self.request_count
        }
    }

    #[derive(Default)]
    struct ScriptedConsole {
        answers: VecDeque<String>,
        prompts: Vec<String>,
        shown: Vec<String>,
    }

    impl ScriptedConsole {
        fn answering(answers: &[&str]) -> Self {
            Self {
                answers: answers.iter().map(ToString::to_string).collect(),
                ..Self::default()
            }
        }
    }

    impl Console for ScriptedConsole {
        fn show(&mut self, text: &str) -> Result<()> {
            self.shown.push(text.to_string());
            Ok(())
        }

        fn read_token(&mut self, prompt: &str) -> Result<String> {
            self.prompts.push(prompt.to_string());
            self.answers
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("unexpected prompt: {prompt}"))
        }
    }

    fn post(id: &str, text: &str, reply_to: Option<&str>) -> SourcePost {
        let base = DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        let offset = id.parse::<i64>().unwrap_or_default();
        SourcePost::new(
            id,
            text,
            base + chrono::Duration::minutes(offset),
            Some("en".to_string()),
            Vec::new(),
            reply_to.map(ToString::to_string),
        )
    }

    fn open_ledger(dir: &Path) -> OperationLedger {
        OperationLedger::open(&dir.join("dumbo_log.txt")).expect("open ledger")
    }

    fn run(
        api: &mut MockApi,
        console: &mut ScriptedConsole,
        ledger: &mut OperationLedger,
        posts: &[SourcePost],
        edit: bool,
    ) -> Result<MigrationReport> {
        let authorization = Authorization::bearer("token");
        MigrationDriver::new(api, console, ledger, &authorization, MigrateOptions { edit })
            .run(posts)
    }

    fn ledger_lines(dir: &Path) -> Vec<String> {
        fs::read_to_string(dir.join("dumbo_log.txt"))
            .unwrap_or_default()
            .lines()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn retweet_is_excluded_and_confirmed_post_is_created_then_replayed_silently() {
        let temp = tempdir().expect("tempdir");
        let posts = vec![post("1", "RT @a hi", None), post("2", "hello world", None)];
        let mut api = MockApi::default();

        let mut console = ScriptedConsole::answering(&["yes"]);
        let mut ledger = open_ledger(temp.path());
        let report = run(&mut api, &mut console, &mut ledger, &posts, false).expect("run 1");
        assert_eq!(report.excluded_retweets, 1);
        assert_eq!(report.created, 1);
        assert_eq!(console.prompts.len(), 1);
        assert_eq!(ledger_lines(temp.path()), vec!["2 t1".to_string()]);
        assert_eq!(api.created.len(), 1);
        assert_eq!(api.created[0].1.text, "hello world");

        let mut console = ScriptedConsole::default();
        let mut ledger = open_ledger(temp.path());
        let report = run(&mut api, &mut console, &mut ledger, &posts, false).expect("run 2");
        assert!(console.prompts.is_empty());
        assert_eq!(report.excluded_retweets, 1);
        assert_eq!(report.previously_posted, 1);
        assert_eq!(report.request_count, 0);
        assert_eq!(ledger_lines(temp.path()), vec!["2 t1".to_string()]);
    }

    #[test]
    fn declined_parent_excludes_reply_without_prompt_or_ledger_write() {
        let temp = tempdir().expect("tempdir");
        let posts = vec![post("1", "hello", None), post("2", "cool", Some("1"))];
        let mut api = MockApi::default();
        let mut console = ScriptedConsole::answering(&["no"]);
        let mut ledger = open_ledger(temp.path());

        let report = run(&mut api, &mut console, &mut ledger, &posts, false).expect("run");
        assert_eq!(report.declined, 1);
        assert_eq!(report.excluded_replies, 1);
        assert_eq!(console.prompts.len(), 1);
        assert_eq!(ledger_lines(temp.path()), vec!["1".to_string()]);
        assert!(api.created.is_empty());
    }

    #[test]
    fn reply_to_posted_parent_threads_onto_target_id() {
        let temp = tempdir().expect("tempdir");
        let posts = vec![post("1", "hello", None), post("2", "cool", Some("1"))];
        let mut api = MockApi::default();
        let mut console = ScriptedConsole::answering(&["yes", "yes"]);
        let mut ledger = open_ledger(temp.path());

        run(&mut api, &mut console, &mut ledger, &posts, false).expect("run");
        assert_eq!(api.created.len(), 2);
        assert_eq!(api.created[1].1.in_reply_to_id.as_deref(), Some("t1"));
        assert_ne!(api.created[0].0, api.created[1].0);
        assert_eq!(
            ledger_lines(temp.path()),
            vec!["1 t1".to_string(), "2 t2".to_string()]
        );
    }

    #[test]
    fn pass_through_writes_nothing_and_prompts_again_next_run() {
        let temp = tempdir().expect("tempdir");
        let posts = vec![post("1", "hello", None), post("2", "cool", Some("1"))];
        let mut api = MockApi::default();

        let mut console = ScriptedConsole::answering(&["skip"]);
        let mut ledger = open_ledger(temp.path());
        let report = run(&mut api, &mut console, &mut ledger, &posts, false).expect("run 1");
        assert_eq!(report.passed, 1);
        assert_eq!(report.excluded_replies, 1);
        assert!(ledger_lines(temp.path()).is_empty());

        let mut console = ScriptedConsole::answering(&["skip"]);
        let mut ledger = open_ledger(temp.path());
        run(&mut api, &mut console, &mut ledger, &posts, false).expect("run 2");
        assert_eq!(console.prompts.len(), 1);
    }

    #[test]
    fn mentions_never_reach_the_ledger_even_when_logged() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("dumbo_log.txt"), "1 t9\n").expect("seed ledger");
        let posts = vec![post("1", "@friend hi", None)];
        let mut api = MockApi::default();
        let mut console = ScriptedConsole::default();
        let mut ledger = open_ledger(temp.path());

        let report = run(&mut api, &mut console, &mut ledger, &posts, true).expect("run");
        assert_eq!(report.excluded_mentions, 1);
        assert!(api.fetched.is_empty());
        assert_eq!(ledger_lines(temp.path()), vec!["1 t9".to_string()]);
    }

    #[test]
    fn retweets_are_excluded_before_the_ledger_is_consulted() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("dumbo_log.txt"), "1 t9\n").expect("seed ledger");
        let posts = vec![post("1", "RT @friend: hi", None)];
        let mut api = MockApi::default().with_status("t9", "something else");
        let mut console = ScriptedConsole::default();
        let mut ledger = open_ledger(temp.path());

        let report = run(&mut api, &mut console, &mut ledger, &posts, true).expect("run");
        assert_eq!(report.excluded_retweets, 1);
        assert_eq!(report.previously_posted, 0);
        assert!(api.fetched.is_empty());
        assert!(api.edited.is_empty());
        assert!(console.prompts.is_empty());
        assert_eq!(ledger_lines(temp.path()), vec!["1 t9".to_string()]);
    }

    #[test]
    fn previously_skipped_post_is_not_prompted() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("dumbo_log.txt"), "1\n").expect("seed ledger");
        let posts = vec![post("1", "hello", None)];
        let mut api = MockApi::default();
        let mut console = ScriptedConsole::default();
        let mut ledger = open_ledger(temp.path());

        let report = run(&mut api, &mut console, &mut ledger, &posts, true).expect("run");
        assert_eq!(report.previously_skipped, 1);
        assert!(console.prompts.is_empty());
    }

    #[test]
    fn unrecognized_answer_aborts_with_distinct_exit_code() {
        let temp = tempdir().expect("tempdir");
        let posts = vec![post("1", "hello", None), post("2", "later", None)];
        let mut api = MockApi::default();
        let mut console = ScriptedConsole::answering(&["maybe", "yes"]);
        let mut ledger = open_ledger(temp.path());

        let error = run(&mut api, &mut console, &mut ledger, &posts, false).expect_err("abort");
        assert!(matches!(
            error.downcast_ref::<MigrationError>(),
            Some(MigrationError::UnrecognizedInput(input)) if input == "maybe"
        ));
        assert_eq!(exit_code_for(&error), 129);
        assert_eq!(console.prompts.len(), 1);
        assert!(api.created.is_empty());
        assert!(ledger_lines(temp.path()).is_empty());
    }

    #[test]
    fn edit_mode_skips_identical_target_text() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("dumbo_log.txt"), "1 t5\n").expect("seed ledger");
        let posts = vec![post("1", "hello", None)];
        let mut api = MockApi::default().with_status("t5", "hello");
        let mut console = ScriptedConsole::default();
        let mut ledger = open_ledger(temp.path());

        let report = run(&mut api, &mut console, &mut ledger, &posts, true).expect("run");
        assert_eq!(report.unchanged, 1);
        assert_eq!(api.fetched, vec!["t5".to_string()]);
        assert!(console.prompts.is_empty());
    }

    #[test]
    fn edit_mode_offers_diff_and_edits_without_new_ledger_entry() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("dumbo_log.txt"), "1 t5\n").expect("seed ledger");
        let mut source = post("1", "read https://t.co/x", None);
        source.entities = vec![Entity::Url(UrlEntity {
            range: 5..19,
            url: "https://example.com/article".to_string(),
        })];
        let posts = vec![source];
        let mut api = MockApi::default().with_status("t5", "read https://t.co/x");
        let mut console = ScriptedConsole::answering(&["yes"]);
        let mut ledger = open_ledger(temp.path());

        let report = run(&mut api, &mut console, &mut ledger, &posts, true).expect("run");
        assert_eq!(report.edited, 1);
        assert_eq!(api.edited.len(), 1);
        let (idempotency_key, edited_id) = &api.edited[0];
        assert_eq!(edited_id, "t5");
        assert!(Uuid::parse_str(idempotency_key).is_ok());
        assert_eq!(
            api.statuses["t5"].content,
            "read https://example.com/article"
        );
        assert!(console.prompts[0].starts_with("Edit?"));
        assert!(
            console
                .shown
                .iter()
                .any(|line| line.contains("+read https://example.com/article"))
        );
        assert_eq!(ledger_lines(temp.path()), vec!["1 t5".to_string()]);
    }

    #[test]
    fn declined_edit_keeps_post_in_posted_set() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("dumbo_log.txt"), "1 t5\n").expect("seed ledger");
        let posts = vec![post("1", "new text", None), post("2", "reply", Some("1"))];
        let mut api = MockApi::default().with_status("t5", "old text");
        let mut console = ScriptedConsole::answering(&["no", "yes"]);
        let mut ledger = open_ledger(temp.path());

        let report = run(&mut api, &mut console, &mut ledger, &posts, true).expect("run");
        assert_eq!(report.declined, 1);
        assert_eq!(report.created, 1);
        assert_eq!(api.created[0].1.in_reply_to_id.as_deref(), Some("t5"));
        assert_eq!(ledger.state("1"), LedgerState::Posted("t5".to_string()));
    }

    #[test]
    fn review_decision_parses_known_answers_only() {
        assert_eq!(ReviewDecision::parse("yes").expect("yes"), ReviewDecision::Confirm);
        assert_eq!(ReviewDecision::parse("no").expect("no"), ReviewDecision::Decline);
        assert_eq!(
            ReviewDecision::parse("skip").expect("skip"),
            ReviewDecision::PassThrough
        );
        assert!(ReviewDecision::parse("YES").is_err());
    }

    #[test]
    fn text_diff_marks_removed_and_added_lines() {
        let diff = text_diff("old\n", "new\n");
        assert!(diff.contains("--- current"));
        assert!(diff.contains("+++ proposed"));
        assert!(diff.contains("-old"));
        assert!(diff.contains("+new"));
    }

    #[test]
    fn migrate_archive_with_api_loads_archive_and_uses_cached_credential() {
        let temp = tempdir().expect("tempdir");
        let context = ResolutionContext {
            cwd: temp.path().to_path_buf(),
        };
        let paths = resolve_paths(&context, temp.path(), None).expect("paths");
        fs::create_dir_all(&paths.data_dir).expect("create data dir");
        fs::write(
            &paths.tweets_path,
            r#"window.YTD.tweets.part0 = [
              {"tweet": {"id_str": "2", "full_text": "hello world", "created_at": "Wed Oct 10 20:20:00 +0000 2018", "lang": "en"}},
              {"tweet": {"id_str": "1", "full_text": "RT @a hi", "created_at": "Wed Oct 10 20:19:24 +0000 2018", "lang": "en"}}
            ]"#,
        )
        .expect("write archive");
        fs::write(
            &paths.credential_path,
            r#"{"client_id": "c", "client_secret": "s", "access_token": "tok"}"#,
        )
        .expect("write credential");

        let host = normalize_host("https://social.example").expect("host");
        let mut api = MockApi::default();
        let mut console = ScriptedConsole::answering(&["yes"]);
        let report = migrate_archive_with_api(
            &paths,
            &DumboConfig::default(),
            host,
            &MigrateOptions::default(),
            &mut api,
            &mut console,
        )
        .expect("migrate");

        assert_eq!(report.considered, 2);
        assert_eq!(report.excluded_retweets, 1);
        assert_eq!(report.created, 1);
        assert_eq!(report.request_count, 2);
        assert_eq!(
            fs::read_to_string(&paths.ledger_path).expect("ledger"),
            "2 t1\n"
        );
        assert_eq!(
            api.created[0].1.posted.to_rfc3339(),
            "2018-10-10T20:20:00+00:00"
        );
    }

    #[test]
    fn migrate_archive_with_api_rejects_bad_prefix_before_touching_ledger() {
        let temp = tempdir().expect("tempdir");
        let context = ResolutionContext {
            cwd: temp.path().to_path_buf(),
        };
        let paths = resolve_paths(&context, temp.path(), None).expect("paths");
        fs::create_dir_all(&paths.data_dir).expect("create data dir");
        fs::write(&paths.tweets_path, "[]").expect("write archive");

        let host = normalize_host("https://social.example").expect("host");
        let error = migrate_archive_with_api(
            &paths,
            &DumboConfig::default(),
            host,
            &MigrateOptions::default(),
            &mut MockApi::default(),
            &mut ScriptedConsole::default(),
        )
        .expect_err("must fail");
        assert!(matches!(
            error.downcast_ref::<MigrationError>(),
            Some(MigrationError::Parse(_))
        ));
        assert!(!paths.ledger_path.exists());
        assert!(!paths.credential_path.exists());
    }
}
