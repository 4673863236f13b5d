//! Outbound notifications.
//!
//! The engine emits typed notifications through a `Notifier`; transport,
//! retries, and formatting for a particular chat surface belong to the
//! notifier implementation. Delivery failures are logged and swallowed by
//! the caller; monitoring never halts because a message did not go out.

use anyhow::Result;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Limit,
    Continued,
    Approval,
    TaskCompleted,
    Error,
}

/// One outbound message, keyed by session.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub session_id: String,
    pub session_name: String,
    pub message: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

/// Fire-and-forget delivery keyed by session.
pub trait Notifier: Send + Sync {
    fn notify(&self, session_id: &str, notification: &Notification) -> Result<()>;
}

/// Notifier that surfaces messages through structured logging. Used when no
/// chat transport is wired up.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, session_id: &str, notification: &Notification) -> Result<()> {
        info!(
            session = session_id,
            kind = ?notification.kind,
            message = %notification.message,
            "notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_serializes_with_type_tag() {
        let n = Notification {
            kind: NotificationKind::Limit,
            session_id: "s1".to_string(),
            session_name: "refactor".to_string(),
            message: "Usage limit reached".to_string(),
            metadata: serde_json::json!({"reset_time": "3:45pm"}),
        };
        let json = serde_json::to_string(&n).unwrap();
        assert!(json.contains("\"type\":\"limit\""));
        assert!(json.contains("\"reset_time\":\"3:45pm\""));
    }

    #[test]
    fn null_metadata_is_omitted() {
        let n = Notification {
            kind: NotificationKind::TaskCompleted,
            session_id: "s1".to_string(),
            session_name: "docs".to_string(),
            message: "done".to_string(),
            metadata: serde_json::Value::Null,
        };
        let json = serde_json::to_string(&n).unwrap();
        assert!(!json.contains("metadata"));
        assert!(json.contains("\"type\":\"task_completed\""));
    }

    #[test]
    fn log_notifier_always_succeeds() {
        let n = Notification {
            kind: NotificationKind::Continued,
            session_id: "s1".to_string(),
            session_name: "s1".to_string(),
            message: "resumed".to_string(),
            metadata: serde_json::Value::Null,
        };
        assert!(LogNotifier.notify("s1", &n).is_ok());
    }
}
