//! Two-stage OAuth handshake with the target platform.
//!
//! A first run registers an application (`Registered`), asks the operator to
//! authorize it out of band and exchanges the pasted code for an access token
//! (`Authorized`). Both stages are cached in the credential file so later runs
//! go straight to `Authorized`.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::{ApplicationRegistration, MastodonApi, TokenRequest};
use crate::console::Console;
use crate::error::MigrationError;

pub const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";
pub const REQUESTED_SCOPES: &str = "read write";
pub const REQUIRED_SCOPE: &str = "write";
pub const EXPECTED_TOKEN_TYPE: &str = "Bearer";

/// Cached credential. The stage is decided once, when the file is decoded,
/// by whether `access_token` is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CredentialFile", into = "CredentialFile")]
pub enum Credential {
    Registered {
        client_id: String,
        client_secret: String,
    },
    Authorized {
        client_id: String,
        client_secret: String,
        access_token: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialFile {
    client_id: String,
    client_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
}

impl TryFrom<CredentialFile> for Credential {
    type Error = String;

    fn try_from(file: CredentialFile) -> Result<Self, Self::Error> {
        if file.client_id.trim().is_empty() || file.client_secret.trim().is_empty() {
            return Err("client_id and client_secret must be non-empty".to_string());
        }
        match file.access_token {
            Some(access_token) if access_token.trim().is_empty() => {
                Err("access_token must be non-empty when present".to_string())
            }
            Some(access_token) => Ok(Self::Authorized {
                client_id: file.client_id,
                client_secret: file.client_secret,
                access_token,
            }),
            None => Ok(Self::Registered {
                client_id: file.client_id,
                client_secret: file.client_secret,
            }),
        }
    }
}

impl From<Credential> for CredentialFile {
    fn from(credential: Credential) -> Self {
        match credential {
            Credential::Registered {
                client_id,
                client_secret,
            } => Self {
                client_id,
                client_secret,
                access_token: None,
            },
            Credential::Authorized {
                client_id,
                client_secret,
                access_token,
            } => Self {
                client_id,
                client_secret,
                access_token: Some(access_token),
            },
        }
    }
}

impl Credential {
    pub fn client_id(&self) -> &str {
        match self {
            Self::Registered { client_id, .. } | Self::Authorized { client_id, .. } => client_id,
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        match self {
            Self::Registered { .. } => None,
            Self::Authorized { access_token, .. } => Some(access_token),
        }
    }
}

/// Bearer value handed to every authenticated platform call.
#[derive(Clone, PartialEq, Eq)]
pub struct Authorization {
    access_token: String,
}

impl Authorization {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }

    pub fn header_value(&self) -> String {
        format!("{EXPECTED_TOKEN_TYPE} {}", self.access_token)
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Authorization(Bearer <redacted>)")
    }
}

pub fn load_credential(path: &Path) -> Result<Option<Credential>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let credential = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(credential))
}

/// Replace the credential file atomically: write an owner-only sibling,
/// sync it, then rename it over `path`.
pub fn store_credential(path: &Path, credential: &Credential) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(credential).context("failed to serialize credential")?;
    let staging = path.with_extension("json.tmp");

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(&staging)
        .with_context(|| format!("failed to open {}", staging.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // A leftover staging file keeps its old mode through `open`.
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to chmod {}", staging.display()))?;
    }
    file.write_all(rendered.as_bytes())
        .with_context(|| format!("failed to write {}", staging.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync {}", staging.display()))?;
    drop(file);

    fs::rename(&staging, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

pub fn authorization_url(host: &Url, client_id: &str) -> Result<Url> {
    let mut url = host
        .join("oauth/authorize")
        .context("failed to build authorization URL")?;
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("scope", REQUESTED_SCOPES)
        .append_pair("redirect_uri", OOB_REDIRECT_URI)
        .append_pair("response_type", "code");
    Ok(url)
}

/// Drives the handshake against a platform API and an operator console.
pub struct AuthSession<'a, A: MastodonApi, C: Console> {
    api: &'a mut A,
    console: &'a mut C,
    host: Url,
    registration: ApplicationRegistration,
}

impl<'a, A: MastodonApi, C: Console> AuthSession<'a, A, C> {
    pub fn new(
        api: &'a mut A,
        console: &'a mut C,
        host: Url,
        client_name: &str,
        website: Option<&str>,
    ) -> Self {
        Self {
            api,
            console,
            host,
            registration: ApplicationRegistration {
                client_name: client_name.to_string(),
                redirect_uris: OOB_REDIRECT_URI.to_string(),
                scopes: REQUESTED_SCOPES.to_string(),
                website: website.map(ToString::to_string),
            },
        }
    }

    /// Bring the cached credential at `path` to the `Authorized` stage and
    /// return the bearer value. Every stage transition is persisted before
    /// the next network call.
    pub fn establish(&mut self, path: &Path) -> Result<Authorization> {
        let credential = match load_credential(path)? {
            Some(credential) => credential,
            None => {
                let application = self
                    .api
                    .create_application(&self.registration)
                    .context("failed to register application")?;
                let credential = Credential::Registered {
                    client_id: application.client_id,
                    client_secret: application.client_secret,
                };
                store_credential(path, &credential)?;
                info!("registered application with {}", self.host);
                credential
            }
        };

        let credential = match credential {
            Credential::Registered {
                client_id,
                client_secret,
            } => {
                let credential = self.authorize(client_id, client_secret)?;
                store_credential(path, &credential)?;
                credential
            }
            authorized @ Credential::Authorized { .. } => {
                debug!(
                    client_id = authorized.client_id(),
                    "using cached access token from {}",
                    path.display()
                );
                authorized
            }
        };

        let access_token = credential.access_token().ok_or_else(|| {
            MigrationError::Auth(format!("{} holds no access token", path.display()))
        })?;
        let authorization = Authorization::bearer(access_token);
        let account = self
            .api
            .verify_credentials(&authorization)
            .context("failed to verify access token")?;
        debug!(account_id = %account.id, username = %account.username, "verified credentials");
        Ok(authorization)
    }

    fn authorize(&mut self, client_id: String, client_secret: String) -> Result<Credential> {
        let url = authorization_url(&self.host, &client_id)?;
        self.console.show(&format!("\nVisit {url} in your browser"))?;
        let code = self.console.read_token("Paste resulting code: ")?;
        self.console.show("")?;

        let token = self
            .api
            .create_oauth_token(&TokenRequest {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
                redirect_uri: OOB_REDIRECT_URI.to_string(),
                code,
                scope: REQUESTED_SCOPES.to_string(),
            })
            .context("failed to exchange authorization code")?;

        if token.token_type != EXPECTED_TOKEN_TYPE {
            return Err(MigrationError::Auth(format!(
                "expected token type `{EXPECTED_TOKEN_TYPE}`, got `{}`",
                token.token_type
            ))
            .into());
        }
        if !token
            .scope
            .split_whitespace()
            .any(|scope| scope == REQUIRED_SCOPE)
        {
            return Err(MigrationError::Auth(format!(
                "granted scope `{}` does not include `{REQUIRED_SCOPE}`",
                token.scope
            ))
            .into());
        }

        Ok(Credential::Authorized {
            client_id,
            client_secret,
            access_token: token.access_token,
        })
    }
}
