use crate::auth::{Credentials, CredentialStore, TokenProvider};
use crate::protocol::{
    ChatRequest, ChatResponse, ChatSession, DataEnvelope, LoginRequest, LoginResponse,
    RegisterRequest, StoredMessage, UploadRequest, UploadResponse, User,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::future::try_join_all;
use reqwest::{Client as HttpClient, StatusCode};
use serde::de::DeserializeOwned;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed with status {status}: {body}")]
    Status { status: StatusCode, body: String },

    // 401 anywhere invalidates the whole session; stored credentials are
    // cleared before this is surfaced.
    #[error("session expired, log in again")]
    Unauthorized,

    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    // The server answered but the body is not an event stream; protocol
    // mismatch, never retried.
    #[error("server did not return an event stream")]
    NotEventStream,

    #[error("request cancelled")]
    Cancelled,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct ApiClient {
    pub(crate) http: HttpClient,
    pub(crate) base_url: String,
    pub(crate) tokens: TokenProvider,
}

impl ApiClient {
    pub fn new(base_url: &str, store: Box<dyn CredentialStore>) -> Self {
        let base_url = normalize_base_url(base_url);
        let http = HttpClient::new();
        let tokens = TokenProvider::new(store, http.clone(), base_url.clone());
        Self {
            http,
            base_url,
            tokens,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &TokenProvider {
        &self.tokens
    }

    pub fn current_user(&self) -> Option<User> {
        self.tokens.credentials().map(|credentials| credentials.user)
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<User, ApiError> {
        self.authenticate("/auth/login", request).await
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<User, ApiError> {
        self.authenticate("/auth/register", request).await
    }

    async fn authenticate<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<User, ApiError> {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        let body: LoginResponse = read_json(response).await?;
        let credentials = Credentials {
            access_token: body.access_token,
            user: body.user,
        };
        self.tokens.save(&credentials)?;
        Ok(credentials.user)
    }

    pub fn logout(&self) {
        self.tokens.clear();
    }

    pub async fn profile(&self) -> Result<User, ApiError> {
        let response = self.send_authed(self.http.get(self.url("/auth/profile"))).await?;
        read_json(response).await
    }

    pub async fn update_profile(&self, update: &serde_json::Value) -> Result<User, ApiError> {
        let response = self
            .send_authed(self.http.put(self.url("/auth/profile")).json(update))
            .await?;
        read_json(response).await
    }

    pub async fn sessions(&self) -> Result<Vec<ChatSession>, ApiError> {
        let response = self
            .send_authed(self.http.get(self.url("/agent/sessions")))
            .await?;
        let envelope: DataEnvelope<Vec<ChatSession>> = read_json(response).await?;
        Ok(envelope.data)
    }

    pub async fn session_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>, ApiError> {
        let response = self
            .send_authed(
                self.http
                    .get(self.url(&format!("/agent/sessions/{session_id}/messages"))),
            )
            .await?;
        let envelope: DataEnvelope<Vec<StoredMessage>> = read_json(response).await?;
        Ok(envelope.data)
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), ApiError> {
        let response = self
            .send_authed(
                self.http
                    .delete(self.url(&format!("/agent/sessions/{session_id}"))),
            )
            .await?;
        expect_success(response).await?;
        Ok(())
    }

    // Non-streaming chat; the streaming variant lives in stream.rs.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        let response = self
            .send_authed(self.http.post(self.url("/agent/chat")).json(request))
            .await?;
        read_json(response).await
    }

    // Uploads are issued concurrently; the joint completion is awaited so
    // the chat call only goes out once every reference is known.
    pub async fn upload_images(&self, paths: &[impl AsRef<Path>]) -> Result<Vec<String>, ApiError> {
        try_join_all(paths.iter().map(|path| self.upload_image(path.as_ref()))).await
    }

    async fn upload_image(&self, path: &Path) -> Result<String, ApiError> {
        let bytes = tokio::fs::read(path).await?;
        let request = UploadRequest {
            filename: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "image".to_string()),
            content: STANDARD.encode(&bytes),
        };

        let response = self
            .send_authed(self.http.post(self.url("/agent/uploads")).json(&request))
            .await?;
        let body: UploadResponse = read_json(response).await?;
        Ok(body.url)
    }

    pub(crate) async fn send_authed(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ApiError> {
        let token = self.tokens.bearer().await?;
        let response = builder.bearer_auth(token).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            self.tokens.clear();
            return Err(ApiError::Unauthorized);
        }

        Ok(response)
    }
}

pub(crate) async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status { status, body });
    }
    Ok(response)
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let response = expect_success(response).await?;
    Ok(response.json().await?)
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}
