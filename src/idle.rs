//! Idle / task-completion detection.
//!
//! When the pane has been quiet past the idle window, the prompt is empty,
//! and nothing on the last line looks like work in progress, the session has
//! most likely finished its task. A per-session cooldown keeps the
//! announcement from repeating while the pane just sits there.

use chrono::Duration;
use serde_json::json;
use tracing::info;

use crate::event::MonitorEventKind;
use crate::monitor::CycleCtx;
use crate::notify::NotificationKind;
use crate::patterns;
use crate::state::SessionState;

/// Quiet time required before the session counts as idle.
const IDLE_WINDOW_SECS: i64 = 10;
/// Minimum gap between task-completed announcements.
const NOTICE_COOLDOWN_SECS: i64 = 5 * 60;

pub(crate) fn check(ctx: &CycleCtx<'_>, state: &mut SessionState) {
    if state.awaiting_continuation {
        return;
    }
    let Some(changed_at) = state.last_output_change else {
        return;
    };
    let now = ctx.clock.now();
    let idle = now - changed_at;
    if idle <= Duration::seconds(IDLE_WINDOW_SECS) {
        return;
    }
    if !patterns::waiting_for_input(&state.last_output)
        || !patterns::not_processing(&state.last_output)
    {
        return;
    }
    if let Some(last) = state.last_completion_notice {
        if now - last <= Duration::seconds(NOTICE_COOLDOWN_SECS) {
            return;
        }
    }

    state.last_completion_notice = Some(now);
    let idle_seconds = idle.num_seconds();
    info!(session = ctx.session_id, idle_seconds, "task appears complete");
    ctx.emit(
        MonitorEventKind::TaskCompleted,
        json!({ "idle_duration_seconds": idle_seconds }),
    );
    ctx.notify(
        NotificationKind::TaskCompleted,
        format!("Session idle for {idle_seconds}s with an empty prompt; task looks finished"),
        json!({ "idle_duration_seconds": idle_seconds }),
    );
}
