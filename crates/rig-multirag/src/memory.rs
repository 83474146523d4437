//! In-process chat memory
//!
//! Conversation sessions keyed by id. The rendered history of a session is
//! what the workflow receives as `user_history`.
//!
//! Uses `tokio::sync::RwLock` so it can be shared across async handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Agent => write!(f, "agent"),
            Role::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(sender: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Sessions and their message history
#[derive(Debug, Default)]
pub struct ChatMemory {
    sessions: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl ChatMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, creating the session if needed
    pub async fn add_message(
        &self,
        session_id: &str,
        sender: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) {
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(ChatMessage::new(sender, role, content));
    }

    /// Messages of a session in insertion order; empty for unknown sessions
    pub async fn history(&self, session_id: &str) -> Vec<ChatMessage> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// History rendered as `role: content` lines
    pub async fn history_text(&self, session_id: &str) -> String {
        self.history(session_id)
            .await
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn clear(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_history_text() {
        let memory = ChatMemory::new();
        memory.add_message("s1", "alice", Role::User, "What is group relief?").await;
        memory.add_message("s1", "rag", Role::Agent, "It moves losses.").await;
        memory.add_message("s2", "bob", Role::User, "Other session").await;

        assert_eq!(
            memory.history_text("s1").await,
            "user: What is group relief?\nagent: It moves losses."
        );
        assert_eq!(memory.history("s2").await.len(), 1);
        assert_eq!(memory.history_text("missing").await, "");
        assert_eq!(memory.session_ids().await, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_clear() {
        let memory = ChatMemory::new();
        memory.add_message("s1", "alice", Role::User, "hi").await;
        assert!(memory.clear("s1").await);
        assert!(!memory.clear("s1").await);
        assert!(memory.history("s1").await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let memory = Arc::new(ChatMemory::new());
        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let memory = memory.clone();
                tokio::spawn(async move {
                    memory.add_message("shared", "user", Role::User, format!("m{i}")).await;
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(memory.history("shared").await.len(), 10);
    }
}
