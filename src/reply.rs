use crate::protocol::{StreamEvent, ToolCallStatus, ToolResult};
use serde_json::json;

pub const CANCELLED_MARKER: &str = "\n\n[cancelled]";

// Append-only accumulator for one in-flight assistant reply. Owned by the
// send that created it; events from one stream arrive in order on one task,
// so no locking is needed.
#[derive(Debug, Clone, Default)]
pub struct PendingReply {
    pub message: String,
    pub thoughts: String,
    pub tool_results: Vec<ToolResult>,
    pub tools_used: Vec<String>,
    pub session_id: Option<String>,
    pub finalized: bool,
}

impl PendingReply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Thinking { content } => self.thoughts.push_str(&content),
            StreamEvent::Message { content } => self.message.push_str(&content),
            StreamEvent::ToolCall {
                name,
                status,
                result,
            } => {
                // Start events carry no usable result at this layer.
                if status == ToolCallStatus::End {
                    self.tool_results.push(ToolResult {
                        tool_name: name.clone(),
                        tool_args: json!({}),
                        result: result.unwrap_or_default(),
                    });
                    if !self.tools_used.iter().any(|used| used == &name) {
                        self.tools_used.push(name);
                    }
                }
            }
            StreamEvent::Done { session_id } => {
                self.session_id = Some(session_id);
                self.finalized = true;
            }
            // Error chunks land in the visible reply; the stream may still
            // deliver more of them before it closes.
            StreamEvent::Error { content } => self.message.push_str(&content),
        }
    }

    pub fn cancel(&mut self) {
        self.message.push_str(CANCELLED_MARKER);
        self.finalized = true;
    }

    // Terminal failure: make it visible and renderable rather than leaving
    // the reply stuck in progress.
    pub fn fail(&mut self, error: &str) {
        if !self.message.is_empty() {
            self.message.push_str("\n\n");
        }
        self.message.push_str("Error: ");
        self.message.push_str(error);
        self.finalized = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(content: &str) -> StreamEvent {
        StreamEvent::Message {
            content: content.to_string(),
        }
    }

    fn tool_end(name: &str, result: &str) -> StreamEvent {
        StreamEvent::ToolCall {
            name: name.to_string(),
            status: ToolCallStatus::End,
            result: Some(result.to_string()),
        }
    }

    #[test]
    fn message_and_thinking_chunks_concatenate_in_order() {
        let mut reply = PendingReply::new();
        reply.apply(message("He"));
        reply.apply(StreamEvent::Thinking {
            content: "hm".to_string(),
        });
        reply.apply(message("llo"));
        reply.apply(StreamEvent::Thinking {
            content: "m".to_string(),
        });

        assert_eq!(reply.message, "Hello");
        assert_eq!(reply.thoughts, "hmm");
        assert!(!reply.finalized);
    }

    #[test]
    fn done_records_session_and_finalizes() {
        let mut reply = PendingReply::new();
        reply.apply(message("He"));
        reply.apply(message("llo"));
        reply.apply(StreamEvent::Done {
            session_id: "s1".to_string(),
        });

        assert_eq!(reply.message, "Hello");
        assert_eq!(reply.session_id.as_deref(), Some("s1"));
        assert!(reply.finalized);
    }

    #[test]
    fn tool_end_appends_result_and_dedupes_name() {
        let mut reply = PendingReply::new();
        reply.apply(tool_end("weather", "22C"));
        reply.apply(tool_end("weather", "23C"));
        reply.apply(tool_end("notes", "3 notes"));

        assert_eq!(reply.tool_results.len(), 3);
        assert_eq!(reply.tool_results[1].result, "23C");
        assert_eq!(reply.tool_results[0].tool_args, json!({}));
        assert_eq!(reply.tools_used, vec!["weather", "notes"]);
    }

    #[test]
    fn tool_start_changes_nothing() {
        let mut reply = PendingReply::new();
        reply.apply(StreamEvent::ToolCall {
            name: "weather".to_string(),
            status: ToolCallStatus::Start,
            result: None,
        });

        assert!(reply.tool_results.is_empty());
        assert!(reply.tools_used.is_empty());
    }

    #[test]
    fn error_chunks_concatenate_without_finalizing() {
        let mut reply = PendingReply::new();
        reply.apply(StreamEvent::Error {
            content: "partial ".to_string(),
        });
        reply.apply(StreamEvent::Error {
            content: "failure".to_string(),
        });

        assert_eq!(reply.message, "partial failure");
        assert!(!reply.finalized);
    }

    #[test]
    fn cancel_appends_marker_and_finalizes() {
        let mut reply = PendingReply::new();
        reply.apply(message("Hel"));
        reply.cancel();

        assert!(reply.message.ends_with(CANCELLED_MARKER));
        assert!(reply.finalized);
    }

    #[test]
    fn fail_leaves_a_renderable_terminal_state() {
        let mut reply = PendingReply::new();
        reply.apply(message("partial"));
        reply.fail("network error");

        assert_eq!(reply.message, "partial\n\nError: network error");
        assert!(reply.finalized);
    }

    // Replaying events (a retry after partial delivery) duplicates text and
    // tool results. That is the documented behavior of retry-without-resume,
    // not a bug this layer hides.
    #[test]
    fn duplicate_delivery_is_not_idempotent() {
        let events = vec![message("Hi"), tool_end("weather", "22C")];

        let mut reply = PendingReply::new();
        for event in events.iter().chain(events.iter()) {
            reply.apply(event.clone());
        }

        assert_eq!(reply.message, "HiHi");
        assert_eq!(reply.tool_results.len(), 2);
        assert_eq!(reply.tools_used, vec!["weather"]);
    }
}
