#![allow(dead_code)]

use axum::Router;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jarvis::auth::{CredentialStore, Credentials, MemoryStore};
use jarvis::client::ApiClient;
use jarvis::protocol::User;
use serde_json::json;

pub fn test_user() -> User {
    User {
        id: "u1".to_string(),
        full_name: "Tony".to_string(),
        email: "tony@example.com".to_string(),
        student_id: None,
        preferences: json!({}),
        agent_config: json!({}),
    }
}

// An opaque token; the provider passes it through without trying to refresh.
pub fn test_credentials() -> Credentials {
    Credentials {
        access_token: "test-token".to_string(),
        user: test_user(),
    }
}

pub fn fake_jwt(exp: u64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({ "exp": exp, "sub": "u1" }).to_string());
    format!("{header}.{payload}.sig")
}

pub fn logged_in_client(base_url: &str) -> (ApiClient, MemoryStore) {
    let store = MemoryStore::new();
    store.save(&test_credentials()).unwrap();
    let client = ApiClient::new(base_url, Box::new(store.clone()));
    (client, store)
}

pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
