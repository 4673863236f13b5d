//! In-process monitor events.
//!
//! The engine publishes a small set of typed events for in-process consumers
//! (telemetry, the audit log, tests). Subscribers get their own unbounded
//! channel; emission never blocks the poll loop, and receivers that go away
//! are pruned on the next emit.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorEventKind {
    LimitDetected,
    ApprovalNeeded,
    TaskCompleted,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorEvent {
    #[serde(rename = "type")]
    pub kind: MonitorEventKind,
    pub session_id: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Local>,
}

/// Fan-out point for monitor events.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<MonitorEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. The receiver sees every event emitted
    /// after this call.
    pub fn subscribe(&self) -> Receiver<MonitorEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Deliver `event` to all live subscribers, dropping the ones whose
    /// receiver has gone away.
    pub fn emit(&self, event: MonitorEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
