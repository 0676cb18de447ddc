//! Credential lookup and request authorization.
//!
//! Credential material is opaque: the core only needs to know whether it is
//! present and whether the upstream accepts it. Values are never logged.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::data_source::SourceError;
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::provider_config::{AuthDescriptor, AuthKind};
use crate::ProviderId;

const LOG_TARGET: &str = "fiscalis::auth";
const ENV_PREFIX: &str = "FISCALIS";
/// Tokens are refreshed this long before they expire.
const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 300;

/// Opaque credential for one provider.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Key, token, username, client id or certificate PEM depending on the auth kind.
    pub value: String,
    /// Password, client secret or private key PEM.
    pub secret: Option<String>,
}

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("value", &"<redacted>")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Supplies credentials per provider id.
pub trait CredentialSource: Send + Sync {
    fn credential(&self, provider: &ProviderId) -> Option<Credential>;
}

/// Reads `FISCALIS_<PROVIDER>_CREDENTIAL` and `FISCALIS_<PROVIDER>_SECRET` on every lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialSource;

impl EnvCredentialSource {
    pub fn variable_names(provider: &ProviderId) -> (String, String) {
        let key = provider.env_key();
        (
            format!("{ENV_PREFIX}_{key}_CREDENTIAL"),
            format!("{ENV_PREFIX}_{key}_SECRET"),
        )
    }
}

impl CredentialSource for EnvCredentialSource {
    fn credential(&self, provider: &ProviderId) -> Option<Credential> {
        let (credential_var, secret_var) = Self::variable_names(provider);
        let value = std::env::var(credential_var)
            .ok()
            .filter(|value| !value.trim().is_empty())?;
        let secret = std::env::var(secret_var)
            .ok()
            .filter(|secret| !secret.trim().is_empty());
        Some(Credential { value, secret })
    }
}

/// In-memory credentials, replaceable at runtime.
#[derive(Default)]
pub struct StaticCredentialSource {
    credentials: RwLock<HashMap<ProviderId, Credential>>,
}

impl StaticCredentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, provider: ProviderId, credential: Credential) -> Self {
        self.set(provider, credential);
        self
    }

    pub fn set(&self, provider: ProviderId, credential: Credential) {
        let mut credentials = self
            .credentials
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _ = credentials.insert(provider, credential);
    }
}

impl Debug for StaticCredentialSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let credentials = self
            .credentials
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f.debug_struct("StaticCredentialSource")
            .field("providers", &credentials.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CredentialSource for StaticCredentialSource {
    fn credential(&self, provider: &ProviderId) -> Option<Credential> {
        self.credentials
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(provider)
            .cloned()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

/// Turns a provider's [`AuthDescriptor`] into request authentication.
pub struct Authenticator {
    provider: ProviderId,
    descriptor: AuthDescriptor,
    credentials: Arc<dyn CredentialSource>,
    http_client: Arc<dyn HttpClient>,
    token: Mutex<Option<CachedToken>>,
}

impl Debug for Authenticator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("provider", &self.provider)
            .field("kind", &self.descriptor.kind.as_str())
            .field("auto_refresh", &self.descriptor.auto_refresh)
            .finish()
    }
}

impl Authenticator {
    pub fn new(
        provider: ProviderId,
        descriptor: AuthDescriptor,
        credentials: Arc<dyn CredentialSource>,
        http_client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            provider,
            descriptor,
            credentials,
            http_client,
            token: Mutex::new(None),
        }
    }

    pub const fn auto_refresh(&self) -> bool {
        self.descriptor.auto_refresh
    }

    /// Authentication for the next request. OAuth2 tokens are reused until
    /// shortly before they expire.
    pub async fn authorize(&self) -> Result<HttpAuth, SourceError> {
        match &self.descriptor.kind {
            AuthKind::None | AuthKind::Certificate => Ok(HttpAuth::None),
            AuthKind::ApiKey { header } => Ok(HttpAuth::Header {
                name: header.clone(),
                value: self.require_credential()?.value,
            }),
            AuthKind::Bearer => Ok(HttpAuth::BearerToken(self.require_credential()?.value)),
            AuthKind::Basic => {
                let credential = self.require_credential()?;
                Ok(HttpAuth::Basic {
                    username: credential.value,
                    password: credential.secret.unwrap_or_default(),
                })
            }
            AuthKind::OAuth2 { token_url, scope } => {
                let mut cached = self.token.lock().await;
                if let Some(token) = cached.as_ref() {
                    if Instant::now() < token.refresh_at {
                        return Ok(HttpAuth::BearerToken(token.token.clone()));
                    }
                }

                let fresh = self.fetch_token(token_url, scope.as_deref()).await?;
                let auth = HttpAuth::BearerToken(fresh.token.clone());
                *cached = Some(fresh);
                Ok(auth)
            }
        }
    }

    /// Drops any cached token and re-reads credentials.
    pub async fn refresh(&self) -> Result<HttpAuth, SourceError> {
        log::info!(
            target: LOG_TARGET,
            "refreshing '{}' credentials ({})",
            self.provider,
            self.descriptor.kind.as_str()
        );
        *self.token.lock().await = None;
        self.authorize().await
    }

    fn require_credential(&self) -> Result<Credential, SourceError> {
        self.credentials.credential(&self.provider).ok_or_else(|| {
            SourceError::unauthorized(format!(
                "no credential configured for provider '{}'",
                self.provider
            ))
            .with_provider(self.provider.clone())
        })
    }

    async fn fetch_token(
        &self,
        token_url: &str,
        scope: Option<&str>,
    ) -> Result<CachedToken, SourceError> {
        let credential = self.require_credential()?;
        let mut form = format!(
            "grant_type=client_credentials&client_id={}&client_secret={}",
            urlencoding::encode(&credential.value),
            urlencoding::encode(credential.secret.as_deref().unwrap_or_default())
        );
        if let Some(scope) = scope {
            form.push_str("&scope=");
            form.push_str(&urlencoding::encode(scope));
        }

        let request = HttpRequest::post(token_url)
            .with_header("content-type", "application/x-www-form-urlencoded")
            .with_header("accept", "application/json")
            .with_body(form);

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|error| SourceError::from_http(&error).with_provider(self.provider.clone()))?;

        if !response.is_success() {
            return Err(SourceError::from_status(response.status, "token endpoint refused")
                .with_provider(self.provider.clone()));
        }

        let token: TokenResponse = serde_json::from_str(&response.body).map_err(|error| {
            SourceError::invalid_response(format!("malformed token response: {error}"))
                .with_provider(self.provider.clone())
        })?;

        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS));
        log::debug!(
            target: LOG_TARGET,
            "fetched '{}' access token valid for {}s",
            self.provider,
            lifetime.as_secs()
        );

        Ok(CachedToken {
            token: token.access_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_SKEW),
        })
    }
}
