//! Per-session runtime state.
//!
//! One of these lives for the duration of a session's monitoring and is
//! touched only by that session's worker. Most fields are one-shot latches
//! or cooldown anchors. The pane is shared with a human who may type at any
//! time, so these latches are what keep every side effect at-most-once per
//! logical event.

use chrono::{DateTime, Local};

#[derive(Debug, Default)]
pub struct SessionState {
    /// Last full pane snapshot seen.
    pub last_output: String,
    /// When the snapshot last changed.
    pub last_output_change: Option<DateTime<Local>>,
    /// When the current limit episode started.
    pub limit_detected_at: Option<DateTime<Local>>,
    /// True from limit detection until a continuation settles.
    pub awaiting_continuation: bool,
    /// One-shot latch: the immediate continue was already tried this episode.
    pub immediate_continue_attempted: bool,
    /// Cooldown anchor for limit re-entry.
    pub last_continuation: Option<DateTime<Local>>,
    /// Wall-clock deadline for a deferred continuation.
    pub scheduled_reset: Option<DateTime<Local>>,
    /// The quota command text is staged on the input line, un-executed.
    pub quota_command_sent: bool,
    /// Cooldown anchor for task-completion notices.
    pub last_completion_notice: Option<DateTime<Local>>,
    /// Dedup key for approval announcements.
    pub last_approval_question: Option<String>,
    /// Consecutive polling failures.
    pub retry_count: u32,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }
}
