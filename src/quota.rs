//! Daily quota command.
//!
//! Two-phase: the command text is typed into the pane early and left sitting
//! on the input line, then a single Enter fires it at the scheduled time.
//! Staging ahead of time means the keystroke that matters is one token, so
//! the window opens exactly when intended even if typing were to lag. After
//! firing, the schedule rolls to the next day and the refreshed command is
//! persisted through the registry.

use anyhow::Result;
use chrono::{DateTime, Duration, Local};
use serde_json::json;
use tracing::{info, warn};

use crate::clock::local_datetime;
use crate::monitor::CycleCtx;
use crate::notify::NotificationKind;
use crate::patterns;
use crate::registry::{QuotaSchedule, SessionPatch, SessionRecord};
use crate::state::SessionState;

/// The pane needs a moment to come up before it can take input.
const STAGE_MIN_AGE_SECS: i64 = 5;

pub(crate) fn tick(
    ctx: &CycleCtx<'_>,
    state: &mut SessionState,
    record: &SessionRecord,
    schedule: &QuotaSchedule,
) -> Result<()> {
    let now = ctx.clock.now();

    if !state.quota_command_sent && now - record.created >= Duration::seconds(STAGE_MIN_AGE_SECS) {
        ctx.pane.send_raw(ctx.pane_id, &schedule.command)?;
        state.quota_command_sent = true;
        info!(
            session = ctx.session_id,
            fires_at = %schedule.next_execution,
            "quota command staged on the input line"
        );
    }

    if state.quota_command_sent && now >= schedule.next_execution {
        let Some(next) = next_occurrence(&schedule.time_of_day, now) else {
            warn!(
                session = ctx.session_id,
                time_of_day = %schedule.time_of_day,
                "unparseable quota time of day, leaving command staged"
            );
            return Ok(());
        };

        ctx.pane.send_raw(ctx.pane_id, "Enter")?;

        let command =
            patterns::rewrite_embedded_date(&schedule.command, &next.format("%Y-%m-%d").to_string());
        ctx.registry.update(
            ctx.session_id,
            SessionPatch::with_quota_schedule(Some(QuotaSchedule {
                time_of_day: schedule.time_of_day.clone(),
                command,
                next_execution: next,
            })),
        )?;
        state.quota_command_sent = false;

        info!(session = ctx.session_id, next = %next, "quota command fired");
        ctx.notify(
            NotificationKind::Continued,
            format!(
                "Daily quota command executed; next run {}",
                next.format("%Y-%m-%d %H:%M")
            ),
            json!({ "next_execution": next.to_rfc3339() }),
        );
    }

    Ok(())
}

/// Tomorrow at the configured time of day. Daily recurrence always rolls
/// forward a full day, even when today's slot is still ahead.
fn next_occurrence(time_of_day: &str, now: DateTime<Local>) -> Option<DateTime<Local>> {
    let (hour, minute) = patterns::parse_clock_time(time_of_day)?;
    local_datetime(now.date_naive().succ_opt()?, hour, minute)
}
