use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use chrono::SecondsFormat;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;

use crate::auth::Authorization;
use crate::config::DumboConfig;
use crate::transform::Toot;

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationRegistration {
    pub client_name: String,
    pub redirect_uris: String,
    pub scopes: String,
    pub website: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisteredApplication {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub code: String,
    pub scope: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OauthToken {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub acct: String,
}

/// A post on the target platform. `content` is the plain source text, not rendered HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPost {
    pub id: String,
    pub content: String,
    pub language: Option<String>,
    pub created_at: Option<String>,
    pub in_reply_to_id: Option<String>,
}

/// Operations consumed from the target platform.
pub trait MastodonApi {
    fn create_application(
        &mut self,
        registration: &ApplicationRegistration,
    ) -> Result<RegisteredApplication>;
    fn create_oauth_token(&mut self, request: &TokenRequest) -> Result<OauthToken>;
    fn verify_credentials(&mut self, authorization: &Authorization) -> Result<Account>;
    fn create_status(
        &mut self,
        authorization: &Authorization,
        idempotency_key: &str,
        toot: &Toot,
    ) -> Result<TargetPost>;
    fn edit_status(
        &mut self,
        authorization: &Authorization,
        idempotency_key: &str,
        status_id: &str,
        toot: &Toot,
    ) -> Result<TargetPost>;
    fn get_status(&mut self, authorization: &Authorization, status_id: &str) -> Result<TargetPost>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct MastodonClientConfig {
    pub host: Url,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl MastodonClientConfig {
    /// Env overrides > `[server]` section > built-in defaults.
    pub fn from_config(host: Url, config: &DumboConfig) -> Self {
        let server = &config.server;
        Self {
            host,
            user_agent: config.user_agent(),
            timeout_ms: env_value_u64("DUMBO_HTTP_TIMEOUT_MS", server.timeout_ms.unwrap_or(30_000)),
            rate_limit_read_ms: env_value_u64(
                "DUMBO_RATE_LIMIT_READ",
                server.rate_limit_read_ms.unwrap_or(300),
            ),
            rate_limit_write_ms: env_value_u64(
                "DUMBO_RATE_LIMIT_WRITE",
                server.rate_limit_write_ms.unwrap_or(1_000),
            ),
            max_retries: env_value_usize("DUMBO_HTTP_RETRIES", server.max_retries.unwrap_or(2)),
            max_write_retries: env_value_usize(
                "DUMBO_HTTP_WRITE_RETRIES",
                server.max_write_retries.unwrap_or(1),
            ),
            retry_delay_ms: env_value_u64(
                "DUMBO_HTTP_RETRY_DELAY_MS",
                server.retry_delay_ms.unwrap_or(500),
            ),
        }
    }
}

pub struct MastodonClient {
    client: Client,
    config: MastodonClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

struct ApiRequest<'a> {
    method: Method,
    path: String,
    authorization: Option<&'a Authorization>,
    idempotency_key: Option<&'a str>,
    form: Vec<(&'static str, String)>,
    is_write: bool,
    retry_limit: Option<usize>,
}

impl<'a> ApiRequest<'a> {
    fn read(path: impl Into<String>, authorization: Option<&'a Authorization>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            authorization,
            idempotency_key: None,
            form: Vec::new(),
            is_write: false,
            retry_limit: None,
        }
    }

    fn write(
        method: Method,
        path: impl Into<String>,
        authorization: Option<&'a Authorization>,
        form: Vec<(&'static str, String)>,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            authorization,
            idempotency_key: None,
            form,
            is_write: true,
            retry_limit: None,
        }
    }

    fn with_idempotency_key(mut self, key: &'a str) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    /// Single attempt, for requests whose effect cannot be repeated.
    fn without_retries(mut self) -> Self {
        self.retry_limit = Some(0);
        self
    }

    fn max_retries(&self, config: &MastodonClientConfig) -> usize {
        self.retry_limit.unwrap_or(if self.is_write {
            config.max_write_retries
        } else {
            config.max_retries
        })
    }
}

/// Authorization codes are single-use, so the exchange is never retried.
fn token_exchange_request(request: &TokenRequest) -> ApiRequest<'static> {
    ApiRequest::write(
        Method::POST,
        "oauth/token",
        None,
        vec![
            ("client_id", request.client_id.clone()),
            ("client_secret", request.client_secret.clone()),
            ("redirect_uri", request.redirect_uri.clone()),
            ("grant_type", "authorization_code".to_string()),
            ("code", request.code.clone()),
            ("scope", request.scope.clone()),
        ],
    )
    .without_retries()
}

fn create_status_request<'a>(
    authorization: &'a Authorization,
    idempotency_key: &'a str,
    toot: &Toot,
) -> ApiRequest<'a> {
    ApiRequest::write(
        Method::POST,
        "api/v1/statuses",
        Some(authorization),
        status_form(toot, true),
    )
    .with_idempotency_key(idempotency_key)
}

fn edit_status_request<'a>(
    authorization: &'a Authorization,
    idempotency_key: &'a str,
    status_id: &str,
    toot: &Toot,
) -> ApiRequest<'a> {
    ApiRequest::write(
        Method::PUT,
        format!("api/v1/statuses/{status_id}"),
        Some(authorization),
        status_form(toot, false),
    )
    .with_idempotency_key(idempotency_key)
}

impl MastodonClient {
    pub fn new(config: MastodonClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build Mastodon HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn request_json(&mut self, request: ApiRequest<'_>) -> Result<Value> {
        let url = self
            .config
            .host
            .join(&request.path)
            .with_context(|| format!("invalid API path: {}", request.path))?;
        let max_retries = request.max_retries(&self.config);
        let pairs: Vec<(&str, String)> = request
            .form
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| (*key, value.clone()))
            .collect();

        for attempt in 0..=max_retries {
            self.apply_rate_limit(request.is_write);
            let mut builder = self
                .client
                .request(request.method.clone(), url.clone())
                .header(USER_AGENT, self.config.user_agent.clone());
            if let Some(authorization) = request.authorization {
                builder = builder.header(AUTHORIZATION, authorization.header_value());
            }
            if let Some(key) = request.idempotency_key {
                builder = builder.header(IDEMPOTENCY_HEADER, key);
            }
            if !pairs.is_empty() {
                builder = builder.form(&pairs);
            }

            match builder.send() {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, request.is_write);
                            continue;
                        }
                        let body = response.text().unwrap_or_default();
                        bail!(
                            "{} {} failed with HTTP {status}: {}",
                            request.method,
                            request.path,
                            describe_error_body(&body)
                        );
                    }

                    let payload: Value = response
                        .json()
                        .context("failed to decode Mastodon API JSON response")?;
                    if let Some(message) = api_error_message(&payload) {
                        bail!("Mastodon API error for {}: {message}", request.path);
                    }
                    return Ok(payload);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, request.is_write);
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("failed to call Mastodon API {}", request.path));
                }
            }
        }

        bail!("Mastodon API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        sleep(Duration::from_millis(
            base.saturating_mul(multiplier).saturating_add(jitter),
        ));
    }
}

impl MastodonApi for MastodonClient {
    fn create_application(
        &mut self,
        registration: &ApplicationRegistration,
    ) -> Result<RegisteredApplication> {
        let response = self.request_json(ApiRequest::write(
            Method::POST,
            "api/v1/apps",
            None,
            vec![
                ("client_name", registration.client_name.clone()),
                ("redirect_uris", registration.redirect_uris.clone()),
                ("scopes", registration.scopes.clone()),
                ("website", registration.website.clone().unwrap_or_default()),
            ],
        ))?;
        serde_json::from_value(response).context("failed to decode application response")
    }

    fn create_oauth_token(&mut self, request: &TokenRequest) -> Result<OauthToken> {
        let response = self.request_json(token_exchange_request(request))?;
        serde_json::from_value(response).context("failed to decode token response")
    }

    fn verify_credentials(&mut self, authorization: &Authorization) -> Result<Account> {
        let response = self.request_json(ApiRequest::read(
            "api/v1/accounts/verify_credentials",
            Some(authorization),
        ))?;
        serde_json::from_value(response).context("failed to decode account response")
    }

    fn create_status(
        &mut self,
        authorization: &Authorization,
        idempotency_key: &str,
        toot: &Toot,
    ) -> Result<TargetPost> {
        let response =
            self.request_json(create_status_request(authorization, idempotency_key, toot))?;
        let status: StatusPayload =
            serde_json::from_value(response).context("failed to decode created status")?;
        Ok(status.into_target_post(toot.text.clone()))
    }

    fn edit_status(
        &mut self,
        authorization: &Authorization,
        idempotency_key: &str,
        status_id: &str,
        toot: &Toot,
    ) -> Result<TargetPost> {
        let response = self.request_json(edit_status_request(
            authorization,
            idempotency_key,
            status_id,
            toot,
        ))?;
        let status: StatusPayload =
            serde_json::from_value(response).context("failed to decode edited status")?;
        Ok(status.into_target_post(toot.text.clone()))
    }

    fn get_status(&mut self, authorization: &Authorization, status_id: &str) -> Result<TargetPost> {
        let response = self.request_json(ApiRequest::read(
            format!("api/v1/statuses/{status_id}"),
            Some(authorization),
        ))?;
        let status: StatusPayload =
            serde_json::from_value(response).context("failed to decode status")?;

        let response = self.request_json(ApiRequest::read(
            format!("api/v1/statuses/{status_id}/source"),
            Some(authorization),
        ))?;
        let source: StatusSourcePayload =
            serde_json::from_value(response).context("failed to decode status source")?;
        Ok(status.into_target_post(source.text))
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn status_form(toot: &Toot, include_thread: bool) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("status", toot.text.clone()),
        ("language", toot.language.clone().unwrap_or_default()),
    ];
    if include_thread {
        form.push((
            "created_at",
            toot.posted.to_rfc3339_opts(SecondsFormat::Secs, true),
        ));
        form.push((
            "in_reply_to_id",
            toot.in_reply_to_id.clone().unwrap_or_default(),
        ));
    }
    form
}

/// Mastodon reports failures as `{"error": "...", "error_description": "..."}`.
fn api_error_message(payload: &Value) -> Option<String> {
    let error = payload.get("error")?.as_str()?;
    match payload.get("error_description").and_then(Value::as_str) {
        Some(description) => Some(format!("{error}: {description}")),
        None => Some(error.to_string()),
    }
}

fn describe_error_body(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|payload| api_error_message(&payload))
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "<empty body>".to_string()
            } else {
                trimmed.chars().take(200).collect()
            }
        })
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    id: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    in_reply_to_id: Option<String>,
}

impl StatusPayload {
    fn into_target_post(self, content: String) -> TargetPost {
        TargetPost {
            id: self.id,
            content,
            language: self.language,
            created_at: self.created_at,
            in_reply_to_id: self.in_reply_to_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatusSourcePayload {
    text: String,
}
