//! Usage-limit recovery.
//!
//! When a limit notice lands on an active prompt, the machine tries to
//! continue immediately; if the limit is real it extracts the advertised
//! reset time and defers the continuation to that wall-clock deadline. The
//! whole episode produces at most one continue attempt, one limit
//! notification, and one schedule; the latches in `SessionState` enforce
//! that even though a human may be typing into the same pane.
//!
//! Machine shape:
//!
//! ```text
//! clear → detected → immediate_try → resolved           (limit was stale)
//!                                  → failed → scheduled  (deadline parsed)
//!                                           → watching   (no usable deadline)
//! scheduled → (deadline passes)            → resolved
//! watching  → (deadline appears on screen) → scheduled
//!           → (limit leaves the screen)    → resolved
//! ```
//!
//! `watching` is the deadline-less fallback: the poll loop re-reads the
//! snapshot every cycle, so a later repaint that carries a parseable reset
//! time arms the deferred continuation, and a screen that regains its prompt
//! without limit text closes the episode.

use anyhow::Result;
use chrono::{DateTime, Duration, Local};
use serde_json::json;
use tracing::{debug, info};

use crate::clock::local_datetime;
use crate::event::MonitorEventKind;
use crate::monitor::CycleCtx;
use crate::notify::NotificationKind;
use crate::patterns;
use crate::registry::SessionStatus;
use crate::state::SessionState;

/// Minimum gap between continuation attempts.
const REENTRY_COOLDOWN_SECS: i64 = 5 * 60;
/// Known session-window length; advertised reset times beyond it are bogus.
const MAX_RESET_AHEAD_SECS: i64 = 5 * 3600;
/// Post-continue output shorter than this means the screen did not move.
const SHORT_DIFF_CHARS: usize = 50;
/// How much of the tail to inspect when the limit text may be history.
const TAIL_LINES: usize = 15;

/// Placed in the notification when no reset time could be parsed.
pub const MONITORING_SENTINEL: &str = "Monitoring for availability";

enum ContinueOutcome {
    Resolved,
    /// Carries the post-continue capture, which tends to show a richer
    /// reset-time phrase than the original slice.
    Failed { output: String },
}

/// Feed a new output slice into the machine. Returns true when limit
/// handling engaged this cycle (a limit screen leaves no live dialog, so the
/// caller skips approval detection).
pub(crate) fn check_new_output(
    ctx: &CycleCtx<'_>,
    state: &mut SessionState,
    slice: &str,
) -> Result<bool> {
    if !(patterns::limit_present(slice) && patterns::active_terminal_state(slice)) {
        return Ok(false);
    }
    if state.awaiting_continuation {
        // One continuation pending already; deadline-less episodes are
        // advanced by `watch_for_reset` on the full snapshot.
        return Ok(true);
    }
    let now = ctx.clock.now();
    if let Some(last) = state.last_continuation {
        if now - last <= Duration::seconds(REENTRY_COOLDOWN_SECS) {
            debug!(session = ctx.session_id, "limit notice within cooldown, ignored");
            return Ok(true);
        }
    }

    state.limit_detected_at = Some(now);
    ctx.emit(MonitorEventKind::LimitDetected, json!({}));
    info!(session = ctx.session_id, "usage limit detected");

    if !state.immediate_continue_attempted {
        // The latches stay clear until the attempt has concluded: a
        // transient pane failure inside it aborts the cycle with no episode
        // half-started, and the next cycle re-runs detection from scratch.
        let outcome = attempt_immediate_continue(ctx)?;
        state.immediate_continue_attempted = true;
        state.awaiting_continuation = true;
        match outcome {
            ContinueOutcome::Resolved => mark_resolved(ctx, state)?,
            ContinueOutcome::Failed { output } => schedule_recovery(ctx, state, &output)?,
        }
    } else {
        state.awaiting_continuation = true;
        schedule_recovery(ctx, state, slice)?;
    }
    Ok(true)
}

/// Per-cycle fallback for a limit episode with no known deadline.
///
/// Reads the current snapshot rather than the new slice, so a static screen
/// cannot wedge the episode: a repaint that finally shows a parseable reset
/// time arms the deferred continuation, and a screen whose limit text is
/// gone while the prompt is back means the window reopened without our help
/// (the user continued, or the client refreshed after the reset).
pub(crate) fn watch_for_reset(ctx: &CycleCtx<'_>, state: &mut SessionState) -> Result<()> {
    if !state.awaiting_continuation || state.scheduled_reset.is_some() {
        return Ok(());
    }

    if patterns::limit_present(&state.last_output) {
        let now = ctx.clock.now();
        let deadline = patterns::extract_reset_time(&state.last_output)
            .as_deref()
            .and_then(|raw| parse_reset_time(raw, now));
        if let Some(deadline) = deadline {
            state.scheduled_reset = Some(deadline);
            info!(
                session = ctx.session_id,
                deadline = %deadline,
                "reset deadline recovered from the limit screen"
            );
        }
    } else if patterns::active_terminal_state(&state.last_output) {
        state.awaiting_continuation = false;
        state.immediate_continue_attempted = false;
        state.last_continuation = Some(ctx.clock.now());
        ctx.set_status(SessionStatus::Active)?;
        info!(session = ctx.session_id, "limit cleared externally, session active again");
    }
    Ok(())
}

/// Type `continue` into the pane and judge whether the session actually
/// moved on.
fn attempt_immediate_continue(ctx: &CycleCtx<'_>) -> Result<ContinueOutcome> {
    let before = ctx.pane.capture_plain(ctx.pane_id)?;
    ctx.pane.send_continue_sequence(ctx.pane_id)?;
    std::thread::sleep(ctx.continue_settle);
    let after = ctx.pane.capture_plain(ctx.pane_id)?;

    if !patterns::limit_present(&after) {
        return Ok(ContinueOutcome::Resolved);
    }

    let fresh = patterns::new_output_slice(&before, &after);
    if fresh.chars().count() < SHORT_DIFF_CHARS {
        // The screen barely moved: still stuck on the notice.
        return Ok(ContinueOutcome::Failed { output: after });
    }

    // Substantial new content with limit text somewhere: only the tail tells
    // whether the notice is current or scrolled history.
    let tail = last_lines(&after, TAIL_LINES);
    if patterns::limit_present(&tail) && patterns::active_terminal_state(&tail) {
        Ok(ContinueOutcome::Failed { output: after })
    } else {
        Ok(ContinueOutcome::Resolved)
    }
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

fn mark_resolved(ctx: &CycleCtx<'_>, state: &mut SessionState) -> Result<()> {
    state.last_continuation = Some(ctx.clock.now());
    state.awaiting_continuation = false;
    state.immediate_continue_attempted = false;
    ctx.set_status(SessionStatus::Active)?;
    info!(session = ctx.session_id, "session continued immediately");
    Ok(())
}

/// Defer the continuation to the advertised reset time and announce the
/// episode, exactly once.
fn schedule_recovery(ctx: &CycleCtx<'_>, state: &mut SessionState, output: &str) -> Result<()> {
    if state.scheduled_reset.is_some() {
        return Ok(());
    }

    let raw = patterns::extract_reset_time(output);
    let now = ctx.clock.now();
    let deadline = raw.as_deref().and_then(|r| parse_reset_time(r, now));
    match deadline {
        Some(deadline) => {
            state.scheduled_reset = Some(deadline);
            info!(
                session = ctx.session_id,
                deadline = %deadline,
                "continuation scheduled"
            );
        }
        None => info!(
            session = ctx.session_id,
            "no usable reset time on screen, watching the pane for availability"
        ),
    }

    let display = match raw {
        Some(ref r) => format!("reset expected at {r}"),
        None => MONITORING_SENTINEL.to_string(),
    };
    ctx.notify(
        NotificationKind::Limit,
        format!("Usage limit reached. {display}"),
        json!({ "reset_time": raw }),
    );
    ctx.set_status(SessionStatus::Waiting)?;
    Ok(())
}

/// The deferred continuation, invoked by the poll loop once the deadline has
/// passed.
pub(crate) fn perform_continuation(ctx: &CycleCtx<'_>, state: &mut SessionState) -> Result<()> {
    ctx.pane.send_continue_sequence(ctx.pane_id)?;
    state.last_continuation = Some(ctx.clock.now());
    state.awaiting_continuation = false;
    state.immediate_continue_attempted = false;
    ctx.set_status(SessionStatus::Active)?;
    ctx.notify(
        NotificationKind::Continued,
        "Session resumed after the limit window".to_string(),
        json!({}),
    );
    info!(session = ctx.session_id, "scheduled continuation fired");
    Ok(())
}

/// Turn an advertised reset time into a concrete wall-clock deadline.
///
/// The time lands on today, rolling to tomorrow when it is not in the
/// future. Deadlines five hours or more ahead are rejected: no genuine
/// session window reaches that far, so the text was misread.
pub(crate) fn parse_reset_time(raw: &str, now: DateTime<Local>) -> Option<DateTime<Local>> {
    let (hour, minute) = patterns::parse_clock_time(raw)?;
    let mut candidate = local_datetime(now.date_naive(), hour, minute)?;
    if candidate <= now {
        candidate = local_datetime(now.date_naive().succ_opt()?, hour, minute)?;
    }
    if candidate - now >= Duration::seconds(MAX_RESET_AHEAD_SECS) {
        return None;
    }
    Some(candidate)
}
