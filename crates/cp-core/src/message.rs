// SPDX-License-Identifier: MIT OR Apache-2.0
//! Conversation transcript types.

use serde::{Deserialize, Serialize};

/// The role that produced a [`ConversationMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A message typed by the human user.
    User,
    /// A message emitted by the model backend.
    Assistant,
    /// A system-level instruction (e.g. the composed prompt).
    System,
}

/// A single entry in a conversation transcript.
///
/// Immutable once appended: the orchestrator only ever pushes new messages
/// onto a transcript, never mutates an existing one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Who produced this message.
    pub role: Role,
    /// The message text.
    pub content: String,
    /// Optional free-form attributes (e.g. client-supplied metadata).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Value>,
}

impl ConversationMessage {
    /// Construct a message with no attributes.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            attributes: None,
        }
    }

    /// Construct a `user` message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Construct an `assistant` message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Construct a `system` message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
    }

    #[test]
    fn constructors_set_expected_role() {
        assert_eq!(ConversationMessage::user("hi").role, Role::User);
        assert_eq!(ConversationMessage::assistant("hi").role, Role::Assistant);
        assert_eq!(ConversationMessage::system("hi").role, Role::System);
    }

    #[test]
    fn message_without_attributes_omits_field() {
        let msg = ConversationMessage::user("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("attributes").is_none());
    }

    #[test]
    fn roundtrip() {
        let msg = ConversationMessage::assistant("reply");
        let json = serde_json::to_string(&msg).unwrap();
        let back: ConversationMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, msg.role);
        assert_eq!(back.content, msg.content);
    }
}
