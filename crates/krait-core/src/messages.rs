//! Conversation model used to build provider requests.
//!
//! A turn's context is an ordered list of [`Message`]s. Continuation
//! requests append one `Assistant` message (the streamed blocks in index
//! order) and one `ToolResult` message per invocation outcome, including
//! denial reasons.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One conversation message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// Operator prompt.
    User {
        /// Prompt text.
        content: String,
    },
    /// Assistant response, reconstructed from stream blocks.
    Assistant {
        /// Content blocks in canonical index order.
        blocks: Vec<AssistantBlock>,
    },
    /// Outcome of one tool invocation, fed back to the model.
    ToolResult {
        /// Invocation this result answers.
        #[serde(rename = "callId")]
        call_id: String,
        /// Result payload (or denial/error text).
        content: Value,
        /// Whether the tool failed.
        #[serde(rename = "isError")]
        is_error: bool,
    },
}

/// One block of an assistant response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssistantBlock {
    /// Answer text.
    Text {
        /// Accumulated text.
        text: String,
    },
    /// Internal reasoning.
    Thinking {
        /// Accumulated reasoning text.
        thinking: String,
    },
    /// A tool call the model issued.
    ToolCall {
        /// Call ID.
        id: String,
        /// Tool name.
        name: String,
        /// Parsed arguments.
        arguments: serde_json::Map<String, Value>,
    },
}

impl Message {
    /// Build a tool-result message for a terminal invocation.
    ///
    /// Denials fold the operator's reason into the content so the model
    /// sees why the call did not run; a denial is not an error.
    #[must_use]
    pub fn from_invocation(invocation: &crate::tools::ToolInvocation) -> Self {
        use crate::tools::InvocationStatus;
        match invocation.status {
            InvocationStatus::Denied => {
                let reason = invocation
                    .denial_reason
                    .as_deref()
                    .unwrap_or("Denied by operator");
                Self::ToolResult {
                    call_id: invocation.id.clone(),
                    content: Value::String(format!("Denied by operator: {reason}")),
                    is_error: false,
                }
            }
            _ => Self::ToolResult {
                call_id: invocation.id.clone(),
                content: invocation
                    .result
                    .clone()
                    .unwrap_or(Value::String(String::new())),
                is_error: invocation.is_error,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolInvocation, text_result};

    #[test]
    fn denial_folds_reason_into_content() {
        let mut inv = ToolInvocation::open("call_1", "console_exec", serde_json::Map::new());
        inv.deny("target out of scope");
        let msg = Message::from_invocation(&inv);
        match msg {
            Message::ToolResult {
                call_id,
                content,
                is_error,
            } => {
                assert_eq!(call_id, "call_1");
                assert!(content.as_str().unwrap().contains("target out of scope"));
                assert!(!is_error);
            }
            other => panic!("expected ToolResult, got {other:?}"),
        }
    }

    #[test]
    fn finished_invocation_carries_result() {
        let mut inv = ToolInvocation::open("call_2", "db_query", serde_json::Map::new());
        inv.finish(text_result("3 rows"), false);
        let msg = Message::from_invocation(&inv);
        match msg {
            Message::ToolResult { content, is_error, .. } => {
                assert_eq!(content["content"], "3 rows");
                assert!(!is_error);
            }
            other => panic!("expected ToolResult, got {other:?}"),
        }
    }

    #[test]
    fn failed_invocation_is_error() {
        let mut inv = ToolInvocation::open("call_3", "db_query", serde_json::Map::new());
        inv.fail("connection refused");
        let msg = Message::from_invocation(&inv);
        match msg {
            Message::ToolResult { is_error, .. } => assert!(is_error),
            other => panic!("expected ToolResult, got {other:?}"),
        }
    }

    #[test]
    fn message_serde_roundtrip() {
        let msg = Message::Assistant {
            blocks: vec![
                AssistantBlock::Thinking {
                    thinking: "checking ports".into(),
                },
                AssistantBlock::Text {
                    text: "Port 22 is open.".into(),
                },
            ],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["blocks"][0]["kind"], "thinking");
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(msg, back);
    }
}
