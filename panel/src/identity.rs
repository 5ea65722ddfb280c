//! Admin access to the hosted identity service.
//!
//! `GoogleIdentity` talks to the Identity Toolkit REST API with an OAuth2
//! token minted from a service-account key. `MemoryIdentity` keeps accounts in
//! process for `serve --in-memory` and tests.

use std::{
    collections::BTreeMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::ServiceAccount;

const SCOPES: &str =
    "https://www.googleapis.com/auth/identitytoolkit https://www.googleapis.com/auth/cloud-platform";
const TOKEN_LIFETIME_SECS: i64 = 3600;
// Refresh this long before the reported expiry.
const TOKEN_SLACK: Duration = Duration::from_secs(60);
const PAGE_SIZE: u32 = 1000;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("cannot sign service account assertion: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("user {0} not found")]
    UserNotFound(String),

    #[error("email {0} is already registered")]
    EmailExists(String),

    #[error("identity service returned {status}: {message}")]
    Remote { status: u16, message: String },
}

impl IdentityError {
    /// The service refused the request outright, so it cannot have created
    /// an account. Timeouts and 5xx replies may hide a completed write.
    pub fn is_rejection(&self) -> bool {
        match self {
            IdentityError::Signing(_)
            | IdentityError::UserNotFound(_)
            | IdentityError::EmailExists(_) => true,
            IdentityError::Remote { status, .. } => (400..500).contains(status),
            IdentityError::Transport(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, IdentityError>;

/// Account as exposed by `GET /api/users`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityUser {
    pub uid: String,
    pub email: Option<String>,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewCredential {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

pub trait IdentityProvider: Send + Sync + 'static {
    fn list_users(&self) -> impl Future<Output = Result<Vec<IdentityUser>>> + Send;

    /// Returns the uid of the new account.
    fn create_user(&self, credential: &NewCredential) -> impl Future<Output = Result<String>> + Send;

    fn delete_user(&self, uid: &str) -> impl Future<Output = Result<()>> + Send;

    fn find_by_email(&self, email: &str)
        -> impl Future<Output = Result<Option<IdentityUser>>> + Send;
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

impl CachedToken {
    fn issued(value: String, issued_at: Instant, expires_in: u64) -> Self {
        CachedToken {
            value,
            refresh_at: issued_at + Duration::from_secs(expires_in).saturating_sub(TOKEN_SLACK),
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        now < self.refresh_at
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteUser {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
    photo_url: Option<String>,
}

impl From<RemoteUser> for IdentityUser {
    fn from(user: RemoteUser) -> Self {
        IdentityUser {
            uid: user.local_id,
            email: user.email,
            display_name: user.display_name,
            photo_url: user.photo_url,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    users: Vec<RemoteUser>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    local_id: String,
}

#[derive(Deserialize)]
struct RemoteErrorBody {
    error: RemoteErrorDetail,
}

#[derive(Deserialize)]
struct RemoteErrorDetail {
    message: String,
}

#[derive(Clone)]
pub struct GoogleIdentity {
    client: Client,
    account: Arc<ServiceAccount>,
    api_base: String,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl GoogleIdentity {
    pub fn new(account: ServiceAccount, api_base: impl Into<String>) -> Self {
        GoogleIdentity {
            client: Client::new(),
            account: Arc::new(account),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: Arc::new(Mutex::new(None)),
        }
    }

    fn accounts_url(&self, suffix: &str) -> String {
        format!(
            "{}/v1/projects/{}/accounts{}",
            self.api_base, self.account.project_id, suffix
        )
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Instant::now()) {
                return Ok(token.value.clone());
            }
        }

        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.account.client_email,
            scope: SCOPES,
            aud: &self.account.token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let key = EncodingKey::from_rsa_pem(self.account.private_key.as_bytes())?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)?;

        let response = self
            .client
            .post(&self.account.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        let token: TokenResponse = check(response).await?.json().await?;

        debug!(expires_in = token.expires_in, "Minted identity access token");
        *cached = Some(CachedToken::issued(
            token.access_token.clone(),
            Instant::now(),
            token.expires_in,
        ));
        Ok(token.access_token)
    }
}

/// Pass successful responses through; turn error bodies into `IdentityError`.
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await?;
    Err(remote_error(status.as_u16(), text))
}

/// Error for a non-success reply. The service's `{error: {message}}` body
/// is unwrapped when present; anything else is kept verbatim.
fn remote_error(status: u16, text: String) -> IdentityError {
    let message = serde_json::from_str::<RemoteErrorBody>(&text)
        .map(|body| body.error.message)
        .unwrap_or(text);
    IdentityError::Remote { status, message }
}

fn signup_error(err: IdentityError, email: &str) -> IdentityError {
    match err {
        IdentityError::Remote { message, .. } if message.starts_with("EMAIL_EXISTS") => {
            IdentityError::EmailExists(email.to_string())
        }
        other => other,
    }
}

fn delete_error(err: IdentityError, uid: &str) -> IdentityError {
    match err {
        IdentityError::Remote { status, message }
            if status == StatusCode::BAD_REQUEST.as_u16()
                && message.starts_with("USER_NOT_FOUND") =>
        {
            IdentityError::UserNotFound(uid.to_string())
        }
        other => other,
    }
}

impl IdentityProvider for GoogleIdentity {
    async fn list_users(&self) -> Result<Vec<IdentityUser>> {
        let token = self.access_token().await?;
        let mut users = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(self.accounts_url(":batchGet"))
                .bearer_auth(&token)
                .query(&[("maxResults", PAGE_SIZE.to_string())]);
            if let Some(page) = &page_token {
                request = request.query(&[("nextPageToken", page)]);
            }

            let page: BatchGetResponse = check(request.send().await?).await?.json().await?;
            users.extend(page.users.into_iter().map(IdentityUser::from));

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        Ok(users)
    }

    async fn create_user(&self, credential: &NewCredential) -> Result<String> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(self.accounts_url(""))
            .bearer_auth(&token)
            .json(&json!({
                "email": credential.email,
                "password": credential.password,
                "displayName": credential.display_name,
            }))
            .send()
            .await?;

        let response = check(response)
            .await
            .map_err(|e| signup_error(e, &credential.email))?;
        let created: SignUpResponse = response.json().await?;
        info!(uid = %created.local_id, "Created identity account");
        Ok(created.local_id)
    }

    async fn delete_user(&self, uid: &str) -> Result<()> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(self.accounts_url(":delete"))
            .bearer_auth(&token)
            .json(&json!({ "localId": uid }))
            .send()
            .await?;

        check(response).await.map_err(|e| delete_error(e, uid))?;
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<IdentityUser>> {
        #[derive(Deserialize)]
        struct LookupResponse {
            #[serde(default)]
            users: Vec<RemoteUser>,
        }

        let token = self.access_token().await?;
        let response = self
            .client
            .post(self.accounts_url(":lookup"))
            .bearer_auth(&token)
            .json(&json!({ "email": [email] }))
            .send()
            .await?;

        let found: LookupResponse = check(response).await?.json().await?;
        Ok(found.users.into_iter().next().map(IdentityUser::from))
    }
}

#[derive(Debug, Clone)]
struct MemoryAccount {
    user: IdentityUser,
    password: String,
}

/// In-process identity service. Failures can be switched on to exercise
/// error paths.
#[derive(Clone, Default)]
pub struct MemoryIdentity {
    accounts: Arc<RwLock<BTreeMap<String, MemoryAccount>>>,
    next_uid: Arc<AtomicU64>,
    offline: Arc<AtomicBool>,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with a 503.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn add_user(&self, user: IdentityUser) {
        self.accounts.write().await.insert(
            user.uid.clone(),
            MemoryAccount {
                user,
                password: String::new(),
            },
        );
    }

    pub async fn password_of(&self, uid: &str) -> Option<String> {
        self.accounts
            .read()
            .await
            .get(uid)
            .map(|account| account.password.clone())
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(IdentityError::Remote {
                status: 503,
                message: "identity service unavailable".to_string(),
            });
        }
        Ok(())
    }
}

impl IdentityProvider for MemoryIdentity {
    async fn list_users(&self) -> Result<Vec<IdentityUser>> {
        self.ensure_online()?;
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .map(|account| account.user.clone())
            .collect())
    }

    async fn create_user(&self, credential: &NewCredential) -> Result<String> {
        self.ensure_online()?;
        let mut accounts = self.accounts.write().await;
        let taken = accounts
            .values()
            .any(|account| account.user.email.as_deref() == Some(credential.email.as_str()));
        if taken {
            return Err(IdentityError::EmailExists(credential.email.clone()));
        }

        let uid = format!("uid-{}", self.next_uid.fetch_add(1, Ordering::SeqCst) + 1);
        accounts.insert(
            uid.clone(),
            MemoryAccount {
                user: IdentityUser {
                    uid: uid.clone(),
                    email: Some(credential.email.clone()),
                    display_name: Some(credential.display_name.clone()),
                    photo_url: None,
                },
                password: credential.password.clone(),
            },
        );
        Ok(uid)
    }

    async fn delete_user(&self, uid: &str) -> Result<()> {
        self.ensure_online()?;
        match self.accounts.write().await.remove(uid) {
            Some(_) => Ok(()),
            None => Err(IdentityError::UserNotFound(uid.to_string())),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<IdentityUser>> {
        self.ensure_online()?;
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .find(|account| account.user.email.as_deref() == Some(email))
            .map(|account| account.user.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(email: &str) -> NewCredential {
        NewCredential {
            email: email.to_string(),
            password: "hunter22".to_string(),
            display_name: "Field Agent".to_string(),
        }
    }

    #[tokio::test]
    async fn memory_identity_round_trip() -> anyhow::Result<()> {
        let identity = MemoryIdentity::new();
        let uid = identity.create_user(&credential("a@example.com")).await?;

        let found = identity.find_by_email("a@example.com").await?.unwrap();
        assert_eq!(found.uid, uid);
        assert_eq!(identity.list_users().await?.len(), 1);

        identity.delete_user(&uid).await?;
        assert!(identity.find_by_email("a@example.com").await?.is_none());
        assert!(matches!(
            identity.delete_user(&uid).await,
            Err(IdentityError::UserNotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() -> anyhow::Result<()> {
        let identity = MemoryIdentity::new();
        identity.create_user(&credential("a@example.com")).await?;
        assert!(matches!(
            identity.create_user(&credential("a@example.com")).await,
            Err(IdentityError::EmailExists(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn offline_identity_fails_every_call() {
        let identity = MemoryIdentity::new();
        identity.set_offline(true);
        assert!(identity.list_users().await.is_err());
        assert!(identity.create_user(&credential("b@example.com")).await.is_err());
    }

    #[test]
    fn remote_error_unwraps_service_message() {
        let body = r#"{"error":{"code":400,"message":"EMAIL_EXISTS","errors":[]}}"#;
        match remote_error(400, body.to_string()) {
            IdentityError::Remote { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "EMAIL_EXISTS");
            }
            other => panic!("unexpected {other:?}"),
        }

        match remote_error(502, "Bad Gateway".to_string()) {
            IdentityError::Remote { message, .. } => assert_eq!(message, "Bad Gateway"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn signup_maps_email_exists_to_conflict() {
        let err = signup_error(remote_error(400, r#"{"error":{"message":"EMAIL_EXISTS"}}"#.into()), "a@example.com");
        assert!(matches!(err, IdentityError::EmailExists(ref email) if email == "a@example.com"));
        assert!(err.is_rejection());

        let err = signup_error(remote_error(503, "unavailable".into()), "a@example.com");
        assert!(matches!(err, IdentityError::Remote { status: 503, .. }));
        assert!(!err.is_rejection());
    }

    #[test]
    fn delete_maps_user_not_found_only_on_bad_request() {
        let body = r#"{"error":{"message":"USER_NOT_FOUND"}}"#;
        assert!(matches!(
            delete_error(remote_error(400, body.into()), "uid-1"),
            IdentityError::UserNotFound(ref uid) if uid == "uid-1"
        ));
        assert!(matches!(
            delete_error(remote_error(500, body.into()), "uid-1"),
            IdentityError::Remote { status: 500, .. }
        ));
    }

    #[test]
    fn token_refreshes_before_expiry() {
        let issued_at = Instant::now();
        let token = CachedToken::issued("t".into(), issued_at, 3600);

        assert!(token.is_fresh(issued_at + Duration::from_secs(3000)));
        assert!(!token.is_fresh(issued_at + Duration::from_secs(3600) - TOKEN_SLACK));
        assert!(!token.is_fresh(issued_at + Duration::from_secs(3600)));

        // Lifetimes shorter than the slack are never served from cache.
        let short = CachedToken::issued("t".into(), issued_at, 30);
        assert!(!short.is_fresh(issued_at));
    }

    #[test]
    fn identity_user_serializes_with_console_field_names() {
        let user = IdentityUser {
            uid: "u1".into(),
            email: Some("u1@example.com".into()),
            display_name: None,
            photo_url: None,
        };
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["uid"], "u1");
        assert!(value.get("displayName").is_some());
        assert!(value.get("photoURL").is_some());
    }
}
