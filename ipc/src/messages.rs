use serde::{Deserialize, Serialize};

/// Sentinel appended after the final `ai_response` of a completed turn so the
/// extension knows the stream is done.
pub const STOP_SENTINEL: &str = "^^^stop^^^";

/// A message received from the extension.
///
/// The extension always wraps its payload in a `data` object:
/// `{"data":{"status":"new_chat","task":"chat","text":"hi"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionMessage {
    pub data: MessagePayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Conversation lifecycle signal, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// What the extension wants done with `text`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    NewChat,
    Abort,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Task {
    Chat,
    SummaryChat,
    Summary,
    SummariseFurther,
    Ping,
    #[serde(other)]
    Unknown,
}

/// A message sent back to the extension. Serialized untagged so each variant
/// produces exactly the wire shape the extension expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostMessage {
    Response { ai_response: String },
    Chunk { ai_response_chunk: String },
    Pong { ping: String },
    Error { error: String },
}

impl HostMessage {
    pub fn response(text: impl Into<String>) -> Self {
        HostMessage::Response {
            ai_response: text.into(),
        }
    }

    pub fn chunk(text: impl Into<String>) -> Self {
        HostMessage::Chunk {
            ai_response_chunk: text.into(),
        }
    }

    /// End-of-turn marker, sent after the full response.
    pub fn stop() -> Self {
        HostMessage::response(STOP_SENTINEL)
    }

    pub fn pong() -> Self {
        HostMessage::Pong {
            ping: "pong".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        HostMessage::Error {
            error: message.into(),
        }
    }
}

impl ExtensionMessage {
    pub fn status(&self) -> Option<Status> {
        self.data.status
    }

    pub fn task(&self) -> Option<Task> {
        self.data.task
    }

    pub fn text(&self) -> &str {
        &self.data.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_frame_parses_with_all_fields() {
        let raw = r#"{"data":{"status":"new_chat","task":"chat","text":"hi"}}"#;
        let msg: ExtensionMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.status(), Some(Status::NewChat));
        assert_eq!(msg.task(), Some(Task::Chat));
        assert_eq!(msg.text(), "hi");
    }

    #[test]
    fn missing_fields_default() {
        let raw = r#"{"data":{"text":"hello"}}"#;
        let msg: ExtensionMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.status(), None);
        assert_eq!(msg.task(), None);
        assert_eq!(msg.text(), "hello");
    }

    #[test]
    fn unknown_status_and_task_do_not_fail() {
        let raw = r#"{"data":{"status":"resumed","task":"translate","text":"x"}}"#;
        let msg: ExtensionMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.status(), Some(Status::Other));
        assert_eq!(msg.task(), Some(Task::Unknown));
    }

    #[test]
    fn kebab_case_tasks() {
        let raw = r#"{"data":{"task":"summarise-further","text":"x"}}"#;
        let msg: ExtensionMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.task(), Some(Task::SummariseFurther));

        let raw = r#"{"data":{"task":"summary-chat","text":"x"}}"#;
        let msg: ExtensionMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.task(), Some(Task::SummaryChat));
    }

    #[test]
    fn outbound_wire_shapes() {
        let json = serde_json::to_string(&HostMessage::response("hi")).unwrap();
        assert_eq!(json, r#"{"ai_response":"hi"}"#);

        let json = serde_json::to_string(&HostMessage::chunk("par")).unwrap();
        assert_eq!(json, r#"{"ai_response_chunk":"par"}"#);

        let json = serde_json::to_string(&HostMessage::pong()).unwrap();
        assert_eq!(json, r#"{"ping":"pong"}"#);

        let json = serde_json::to_string(&HostMessage::error("boom")).unwrap();
        assert_eq!(json, r#"{"error":"boom"}"#);
    }

    #[test]
    fn stop_is_an_ai_response() {
        let json = serde_json::to_string(&HostMessage::stop()).unwrap();
        assert_eq!(json, r#"{"ai_response":"^^^stop^^^"}"#);
    }
}
