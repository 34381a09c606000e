//! Microsoft identity platform device-code flow and token refresh.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::auth::AuthDetails;
use crate::auth_store::AuthStore;
use crate::error::ConnectorError;

const LOGIN_BASE: &str = "https://login.microsoftonline.com";
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuthStart {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    pub expires_in: i64,
    pub interval: Option<i64>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

impl OAuthTokens {
    fn from_json(v: &serde_json::Value) -> Self {
        let opt_str = |key: &str| v.get(key).and_then(|s| s.as_str()).map(|s| s.to_string());
        OAuthTokens {
            access_token: v["access_token"].as_str().unwrap_or_default().to_string(),
            refresh_token: opt_str("refresh_token"),
            expires_in: v.get("expires_in").and_then(|i| i.as_i64()),
            scope: opt_str("scope"),
            token_type: opt_str("token_type"),
        }
    }

    /// Write the tokens into `auth`, recording an absolute `expires_at`.
    pub fn apply_to(&self, auth: &mut AuthDetails) {
        auth.insert("access_token".to_string(), self.access_token.clone());
        if let Some(r) = &self.refresh_token {
            auth.insert("refresh_token".to_string(), r.clone());
        }
        if let Some(ex) = self.expires_in {
            auth.insert("expires_in".to_string(), ex.to_string());
            auth.insert(
                "expires_at".to_string(),
                (now_epoch() + ex - EXPIRY_SKEW_SECS).to_string(),
            );
        }
    }
}

fn tenant_or_common(tenant_id: &str) -> &str {
    if tenant_id.is_empty() {
        "common"
    } else {
        tenant_id
    }
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

async fn post_form(
    url: String,
    body: &[(&str, String)],
    failure: &str,
) -> Result<serde_json::Value, ConnectorError> {
    let resp = reqwest::Client::new()
        .post(url)
        .form(body)
        .send()
        .await
        .map_err(ConnectorError::HttpRequest)?;
    let status = resp.status();
    let v = resp
        .json::<serde_json::Value>()
        .await
        .map_err(|e| ConnectorError::Other(e.to_string()))?;
    if !status.is_success() {
        return Err(ConnectorError::Authentication(format!("{}: {}", failure, v)));
    }
    Ok(v)
}

pub async fn ms_device_authorize(
    tenant_id: &str,
    client_id: &str,
    scopes: &str,
) -> Result<DeviceAuthStart, ConnectorError> {
    let url = format!(
        "{}/{}/oauth2/v2.0/devicecode",
        LOGIN_BASE,
        tenant_or_common(tenant_id)
    );
    let body = [
        ("client_id", client_id.to_string()),
        ("scope", scopes.to_string()),
    ];
    let v = post_form(url, &body, "device authorize failed").await?;
    Ok(DeviceAuthStart {
        device_code: v["device_code"].as_str().unwrap_or_default().to_string(),
        user_code: v["user_code"].as_str().unwrap_or_default().to_string(),
        verification_uri: v["verification_uri"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        verification_uri_complete: v
            .get("verification_uri_complete")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string()),
        expires_in: v["expires_in"].as_i64().unwrap_or(900),
        interval: v.get("interval").and_then(|i| i.as_i64()),
        message: v
            .get("message")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string()),
    })
}

pub async fn ms_device_poll(
    tenant_id: &str,
    client_id: &str,
    device_code: &str,
) -> Result<OAuthTokens, ConnectorError> {
    let url = format!(
        "{}/{}/oauth2/v2.0/token",
        LOGIN_BASE,
        tenant_or_common(tenant_id)
    );
    let body = [
        (
            "grant_type",
            "urn:ietf:params:oauth:grant-type:device_code".to_string(),
        ),
        ("client_id", client_id.to_string()),
        ("device_code", device_code.to_string()),
    ];
    let v = post_form(url, &body, "poll failed").await?;
    Ok(OAuthTokens::from_json(&v))
}

pub async fn ms_refresh_token(
    tenant_id: &str,
    client_id: &str,
    client_secret: Option<&str>,
    refresh_token: &str,
) -> Result<OAuthTokens, ConnectorError> {
    let url = format!(
        "{}/{}/oauth2/v2.0/token",
        LOGIN_BASE,
        tenant_or_common(tenant_id)
    );
    let mut body = vec![
        ("grant_type", "refresh_token".to_string()),
        ("client_id", client_id.to_string()),
        ("refresh_token", refresh_token.to_string()),
    ];
    if let Some(s) = client_secret {
        if !s.is_empty() {
            body.push(("client_secret", s.to_string()));
        }
    }
    let v = post_form(url, &body, "refresh failed").await?;
    Ok(OAuthTokens::from_json(&v))
}

/// True when `auth` holds an access token that has not reached `expires_at`.
/// A token without a recorded expiry is trusted as-is.
pub fn has_fresh_access(auth: &AuthDetails) -> bool {
    match (auth.get("access_token"), auth.get("expires_at")) {
        (Some(_), Some(exp_at)) => exp_at.parse::<i64>().unwrap_or(0) > now_epoch(),
        (Some(_), None) => !auth.contains_key("refresh_token"),
        _ => false,
    }
}

/// Return a usable access token, refreshing through the token endpoint when
/// the stored one has expired. `auth` is updated in place.
pub async fn ensure_ms_access(auth: &mut AuthDetails) -> Result<String, ConnectorError> {
    if has_fresh_access(auth) {
        if let Some(at) = auth.get("access_token") {
            return Ok(at.clone());
        }
    }
    let rt = auth
        .get("refresh_token")
        .cloned()
        .ok_or_else(|| ConnectorError::Authentication("Missing refresh_token".to_string()))?;
    let client_id = auth.get("client_id").cloned().ok_or_else(|| {
        ConnectorError::Authentication("Missing client_id for refresh".to_string())
    })?;
    let tenant_id = auth
        .get("tenant_id")
        .cloned()
        .unwrap_or_else(|| "common".to_string());
    let client_secret = auth.get("client_secret").cloned();
    debug!("refreshing Microsoft Graph access token");
    let tokens = ms_refresh_token(&tenant_id, &client_id, client_secret.as_deref(), &rt).await?;
    tokens.apply_to(auth);
    Ok(tokens.access_token)
}

/// Fields written by a token refresh.
const TOKEN_FIELDS: &[&str] = &["access_token", "refresh_token", "expires_in", "expires_at"];

fn with_token_fields(mut base: AuthDetails, refreshed: &AuthDetails) -> AuthDetails {
    for key in TOKEN_FIELDS {
        if let Some(v) = refreshed.get(*key) {
            base.insert((*key).to_string(), v.clone());
        }
    }
    base
}

/// Route refreshed tokens: `(details to persist, replacement overrides)`.
/// Only token fields reach the store, and nothing does when the refresh token
/// itself was a runtime override. Overrides holding token fields are updated
/// so a stale override does not shadow the new token.
fn split_refreshed(
    stored: AuthDetails,
    overrides: &AuthDetails,
    refreshed: &AuthDetails,
) -> (Option<AuthDetails>, Option<AuthDetails>) {
    let in_memory = TOKEN_FIELDS
        .iter()
        .any(|k| overrides.contains_key(*k))
        .then(|| with_token_fields(overrides.clone(), refreshed));
    let to_store = (!overrides.contains_key("refresh_token"))
        .then(|| with_token_fields(stored, refreshed));
    (to_store, in_memory)
}

/// Source of bearer tokens for Graph requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, ConnectorError>;
}

/// Fixed token, for tests and for callers that manage tokens themselves.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, ConnectorError> {
        Ok(self.0.clone())
    }
}

/// Tokens loaded from an [`AuthStore`], with details supplied at runtime
/// (via `auth/<provider>/set`) taking precedence. Refreshed tokens are saved back.
pub struct StoredTokenProvider {
    provider: String,
    store: Arc<dyn AuthStore>,
    overrides: RwLock<AuthDetails>,
}

impl StoredTokenProvider {
    pub fn new(provider: impl Into<String>, store: Arc<dyn AuthStore>) -> Self {
        Self {
            provider: provider.into(),
            store,
            overrides: RwLock::new(AuthDetails::new()),
        }
    }

    pub fn set_overrides(&self, details: AuthDetails) {
        if let Ok(mut guard) = self.overrides.write() {
            *guard = details;
        }
    }

    pub fn overrides(&self) -> AuthDetails {
        self.overrides
            .read()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    pub fn store(&self) -> &Arc<dyn AuthStore> {
        &self.store
    }

    /// Stored details with overrides layered on top.
    pub fn merged(&self) -> AuthDetails {
        let mut auth = self.store.load(&self.provider).unwrap_or_default();
        for (k, v) in self.overrides() {
            auth.insert(k, v);
        }
        auth
    }
}

#[async_trait]
impl TokenProvider for StoredTokenProvider {
    async fn access_token(&self) -> Result<String, ConnectorError> {
        let mut auth = self.merged();
        if !auth.contains_key("access_token") && !auth.contains_key("refresh_token") {
            return Err(ConnectorError::Authentication(
                "Outlook auth not configured; run auth_start then auth_poll".into(),
            ));
        }
        let was_fresh = has_fresh_access(&auth);
        let token = ensure_ms_access(&mut auth).await?;
        if !was_fresh {
            let overrides = self.overrides();
            let stored = self.store.load(&self.provider).unwrap_or_default();
            let (to_store, in_memory) = split_refreshed(stored, &overrides, &auth);
            if let Some(updated) = in_memory {
                self.set_overrides(updated);
            }
            if let Some(details) = to_store {
                info!(provider = %self.provider, "stored refreshed access token");
                self.store
                    .save(&self.provider, &details)
                    .map_err(|e| ConnectorError::Other(e.to_string()))?;
            }
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth_store::MemoryAuthStore;

    fn details(pairs: &[(&str, &str)]) -> AuthDetails {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn apply_to_records_expiry_with_skew() {
        let tokens = OAuthTokens {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expires_in: Some(3600),
            scope: None,
            token_type: Some("Bearer".into()),
        };
        let mut auth = AuthDetails::new();
        tokens.apply_to(&mut auth);
        let exp: i64 = auth["expires_at"].parse().unwrap();
        let now = now_epoch();
        assert!(exp > now + 3600 - 120 && exp <= now + 3600 - 60);
        assert_eq!(auth["refresh_token"], "rt");
        assert!(has_fresh_access(&auth));
    }

    #[test]
    fn expired_token_is_not_fresh() {
        let auth = details(&[
            ("access_token", "old"),
            ("refresh_token", "rt"),
            ("expires_at", "1"),
        ]);
        assert!(!has_fresh_access(&auth));
        // token pasted without expiry or refresh token is used as-is
        assert!(has_fresh_access(&details(&[("access_token", "x")])));
    }

    #[tokio::test]
    async fn stored_provider_prefers_overrides() {
        let store = Arc::new(MemoryAuthStore::new());
        store
            .save("outlook", &details(&[("access_token", "stored")]))
            .unwrap();
        let provider = StoredTokenProvider::new("outlook", store);
        assert_eq!(provider.access_token().await.unwrap(), "stored");

        provider.set_overrides(details(&[("access_token", "override")]));
        assert_eq!(provider.access_token().await.unwrap(), "override");
    }

    #[test]
    fn refresh_persists_only_token_fields() {
        let stored = details(&[("client_id", "app"), ("refresh_token", "rt-old")]);
        let overrides = details(&[("client_secret", "s3cret")]);
        let refreshed = details(&[
            ("client_id", "app"),
            ("client_secret", "s3cret"),
            ("access_token", "at-new"),
            ("refresh_token", "rt-new"),
            ("expires_at", "99"),
        ]);
        let (to_store, in_memory) = split_refreshed(stored, &overrides, &refreshed);
        let saved = to_store.unwrap();
        assert_eq!(saved["access_token"], "at-new");
        assert_eq!(saved["refresh_token"], "rt-new");
        assert_eq!(saved["client_id"], "app");
        assert!(!saved.contains_key("client_secret"));
        assert!(in_memory.is_none());
    }

    #[test]
    fn refresh_of_runtime_tokens_stays_in_memory() {
        let stored = details(&[("client_id", "app")]);
        let overrides = details(&[("refresh_token", "rt-runtime"), ("access_token", "old")]);
        let refreshed = details(&[
            ("client_id", "app"),
            ("access_token", "at-new"),
            ("refresh_token", "rt-new"),
        ]);
        let (to_store, in_memory) = split_refreshed(stored, &overrides, &refreshed);
        assert!(to_store.is_none());
        let updated = in_memory.unwrap();
        assert_eq!(updated["access_token"], "at-new");
        assert_eq!(updated["refresh_token"], "rt-new");
    }

    #[tokio::test]
    async fn stored_provider_without_tokens_is_auth_error() {
        let provider = StoredTokenProvider::new("outlook", Arc::new(MemoryAuthStore::new()));
        let err = provider.access_token().await.unwrap_err();
        assert!(matches!(err, ConnectorError::Authentication(_)));
    }
}
