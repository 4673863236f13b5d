//! Approval-dialog arbitration.
//!
//! A three-part dialog in fresh output is only worth announcing when it is
//! live: the colored capture is re-read and checked for dim/grey styling so
//! pasted dialog text does not trigger anything. Distinct questions are
//! announced once; the same question seen again is ignored until its text
//! changes.

use anyhow::Result;
use serde_json::json;
use tracing::{debug, info};

use crate::event::MonitorEventKind;
use crate::monitor::CycleCtx;
use crate::notify::NotificationKind;
use crate::patterns::{self, ApprovalInfo};
use crate::registry::SessionStatus;
use crate::state::SessionState;

pub(crate) fn check_new_output(
    ctx: &CycleCtx<'_>,
    state: &mut SessionState,
    slice: &str,
) -> Result<()> {
    if !patterns::approval_dialog_present(slice) {
        return Ok(());
    }

    let colored = ctx.pane.capture_colored(ctx.pane_id)?;
    if !patterns::interactive_approval(&colored) {
        debug!(
            session = ctx.session_id,
            "approval text without live styling ignored"
        );
        return Ok(());
    }

    // Extraction reads the whole screen, not just the slice, so options that
    // scrolled in earlier are still part of the dialog.
    let info = patterns::extract_approval_info(&patterns::strip_ansi(&colored));
    if state.last_approval_question.as_deref() == Some(info.question.as_str()) {
        return Ok(());
    }
    state.last_approval_question = Some(info.question.clone());

    info!(
        session = ctx.session_id,
        tool = %info.tool,
        action = %info.action,
        "approval needed"
    );
    ctx.emit(
        MonitorEventKind::ApprovalNeeded,
        json!({
            "tool": info.tool,
            "action": info.action,
            "question": info.question,
        }),
    );
    ctx.notify(
        NotificationKind::Approval,
        format_message(&info),
        json!({
            "tool": info.tool,
            "action": info.action,
            "question": info.question,
            "options": info
                .options
                .iter()
                .map(|o| json!({
                    "number": o.number,
                    "label": o.label,
                    "shortcut": o.shortcut,
                }))
                .collect::<Vec<_>>(),
        }),
    );
    ctx.set_status(SessionStatus::WaitingApproval)?;
    Ok(())
}

fn format_message(info: &ApprovalInfo) -> String {
    let mut message = format!("{}\n{}\n", info.action, info.question);
    for option in &info.options {
        message.push_str(&format!("**{}.** {}", option.number, option.label));
        if let Some(ref shortcut) = option.shortcut {
            message.push_str(&format!(" *({shortcut})*"));
        }
        message.push('\n');
    }
    message
}
