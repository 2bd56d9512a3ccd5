use crate::client::ApiError;
use crate::protocol::{LoginResponse, User};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Refresh this long before the JWT's exp claim instead of waiting for a 401.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub user: User,
}

pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Option<Credentials>;
    fn save(&self, credentials: &Credentials) -> io::Result<()>;
    fn clear(&self);
}

pub fn data_dir() -> PathBuf {
    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        return PathBuf::from(home).join(".jarvis");
    }

    PathBuf::from(".jarvis")
}

pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_path() -> PathBuf {
        data_dir().join("credentials.json")
    }
}

impl CredentialStore for FileStore {
    fn load(&self) -> Option<Credentials> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn save(&self, credentials: &Credentials) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.path)?;
        use std::io::Write;
        file.write_all(&serde_json::to_vec_pretty(credentials)?)?;
        Ok(())
    }

    fn clear(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

// In-memory store for tests and embedding; clones share the same slot.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<Credentials>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> Option<Credentials> {
        self.slot.lock().expect("credential slot poisoned").clone()
    }

    fn save(&self, credentials: &Credentials) -> io::Result<()> {
        *self.slot.lock().expect("credential slot poisoned") = Some(credentials.clone());
        Ok(())
    }

    fn clear(&self) {
        *self.slot.lock().expect("credential slot poisoned") = None;
    }
}

// Stamps every outgoing request with the stored bearer token, refreshing it
// shortly before expiry. Refresh is single-flight: callers that queue on the
// lock while a refresh is underway reuse the token it produced instead of
// issuing their own refresh request.
pub struct TokenProvider {
    store: Box<dyn CredentialStore>,
    http: reqwest::Client,
    base_url: String,
    refresh: tokio::sync::Mutex<()>,
}

impl TokenProvider {
    pub fn new(store: Box<dyn CredentialStore>, http: reqwest::Client, base_url: String) -> Self {
        Self {
            store,
            http,
            base_url,
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.store.load()
    }

    pub fn save(&self, credentials: &Credentials) -> io::Result<()> {
        self.store.save(credentials)
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub async fn bearer(&self) -> Result<String, ApiError> {
        let credentials = self.store.load().ok_or(ApiError::Unauthorized)?;
        if !needs_refresh(&credentials.access_token) {
            return Ok(credentials.access_token);
        }

        let _guard = self.refresh.lock().await;

        // Another caller may have refreshed while we waited on the lock.
        let credentials = self.store.load().ok_or(ApiError::Unauthorized)?;
        if !needs_refresh(&credentials.access_token) {
            return Ok(credentials.access_token);
        }

        self.refresh_token(&credentials).await
    }

    async fn refresh_token(&self, current: &Credentials) -> Result<String, ApiError> {
        tracing::debug!("access token near expiry, refreshing");

        let response = self
            .http
            .post(format!("{}/auth/refresh", self.base_url))
            .bearer_auth(&current.access_token)
            .send()
            .await
            .map_err(ApiError::Transport)?;

        if response.status() == StatusCode::UNAUTHORIZED {
            self.store.clear();
            return Err(ApiError::Unauthorized);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }

        let body: LoginResponse = response.json().await.map_err(ApiError::Transport)?;
        let refreshed = Credentials {
            access_token: body.access_token,
            user: body.user,
        };
        self.store.save(&refreshed)?;
        Ok(refreshed.access_token)
    }
}

fn needs_refresh(token: &str) -> bool {
    match token_expiry(token) {
        Some(expiry) => SystemTime::now() + REFRESH_MARGIN >= expiry,
        // Opaque token; let the server judge it.
        None => false,
    }
}

fn token_expiry(token: &str) -> Option<SystemTime> {
    #[derive(Deserialize)]
    struct Claims {
        exp: u64,
    }

    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    Some(UNIX_EPOCH + Duration::from_secs(claims.exp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn fake_jwt(exp: u64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(json!({ "exp": exp, "sub": "u1" }).to_string());
        format!("{header}.{payload}.sig")
    }

    fn unix_now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[test]
    fn expiry_is_read_from_the_exp_claim() {
        let token = fake_jwt(1_900_000_000);
        assert_eq!(
            token_expiry(&token),
            Some(UNIX_EPOCH + Duration::from_secs(1_900_000_000))
        );
    }

    #[test]
    fn fresh_token_does_not_need_refresh() {
        assert!(!needs_refresh(&fake_jwt(unix_now() + 3600)));
    }

    #[test]
    fn expired_and_near_expiry_tokens_need_refresh() {
        assert!(needs_refresh(&fake_jwt(unix_now().saturating_sub(10))));
        assert!(needs_refresh(&fake_jwt(unix_now() + 30)));
    }

    #[test]
    fn opaque_tokens_are_passed_through() {
        assert!(!needs_refresh("not-a-jwt"));
        assert_eq!(token_expiry("only.two"), None);
    }

    #[test]
    fn memory_store_round_trips_and_clears() {
        let store = MemoryStore::new();
        let twin = store.clone();
        let credentials = Credentials {
            access_token: "t".to_string(),
            user: User {
                id: "u1".to_string(),
                full_name: "Tony".to_string(),
                email: "tony@example.com".to_string(),
                student_id: None,
                preferences: json!({}),
                agent_config: json!({}),
            },
        };

        store.save(&credentials).unwrap();
        assert_eq!(twin.load().unwrap().access_token, "t");

        twin.clear();
        assert!(store.load().is_none());
    }
}
