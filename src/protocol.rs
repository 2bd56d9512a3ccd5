use serde::{Deserialize, Serialize};
use serde_json::Value;

// One decoded record from the streaming chat response. The server tags each
// record with a `type` field; `thinking` and `message` chunks are cumulative,
// `done` and `error` are terminal-ish (multiple `error` chunks are tolerated).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Thinking {
        content: String,
    },
    Message {
        content: String,
    },
    ToolCall {
        name: String,
        status: ToolCallStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    Done {
        session_id: String,
    },
    Error {
        content: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Start,
    End,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_location: Option<String>,
}

impl ChatRequest {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
            images: None,
            display_message: None,
            user_location: None,
        }
    }
}

// Non-streaming reply shape from POST /agent/chat.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub thoughts: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    #[serde(default)]
    pub tool_args: Value,
    pub result: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    #[serde(default)]
    pub message_count: u64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub tool_results: Option<Vec<ToolResult>>,
    pub created_at: String,
}

// List endpoints wrap their payload in a `data` field.
#[derive(Debug, Deserialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub full_name: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub full_name: String,
    pub email: String,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub preferences: Value,
    #[serde(default)]
    pub agent_config: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadRequest {
    pub filename: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_event_decodes_tagged_payloads() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"type":"message","content":"hi"}"#).unwrap();
        assert_eq!(
            event,
            StreamEvent::Message {
                content: "hi".to_string()
            }
        );

        let event: StreamEvent = serde_json::from_str(
            r#"{"type":"tool_call","name":"weather","status":"end","result":"22C"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            StreamEvent::ToolCall {
                name: "weather".to_string(),
                status: ToolCallStatus::End,
                result: Some("22C".to_string()),
            }
        );
    }

    #[test]
    fn tool_call_start_has_no_result() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"type":"tool_call","name":"notes","status":"start"}"#)
                .unwrap();
        assert_eq!(
            event,
            StreamEvent::ToolCall {
                name: "notes".to_string(),
                status: ToolCallStatus::Start,
                result: None,
            }
        );
    }

    #[test]
    fn chat_request_skips_absent_fields() {
        let body = serde_json::to_string(&ChatRequest::text("hi")).unwrap();
        assert_eq!(body, r#"{"message":"hi"}"#);
    }
}
