//! Pane access for supervised sessions.
//!
//! The engine talks to panes through the `PaneAdapter` trait; the concrete
//! driver shells out to the tmux CLI. Captures come back as full visible pane
//! content, either with escape sequences stripped (`capture-pane -p`) or
//! preserved (`capture-pane -e -p`). Keystrokes go in via `send-keys`, with
//! `-l --` for literal text so punctuation is never interpreted as a key
//! name.

use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::debug;

/// Operations the engine requires from any pane binding.
///
/// `pane_exists` must resolve within its hard timeout and treat a timeout as
/// "pane gone". Every other failure surfaces as an error for the poll loop's
/// retry accounting.
pub trait PaneAdapter: Send + Sync {
    /// Full visible pane content with escape sequences stripped.
    fn capture_plain(&self, pane_id: &str) -> Result<String>;
    /// Full visible pane content with escape sequences preserved.
    fn capture_colored(&self, pane_id: &str) -> Result<String>;
    /// Probe whether the pane is still addressable.
    fn pane_exists(&self, pane_id: &str) -> bool;
    /// Type `text` literally, then submit it.
    fn send_cooked(&self, pane_id: &str, text: &str) -> Result<()>;
    /// Send a single token without submitting: a key name (`Enter`, `C-u`)
    /// or literal text.
    fn send_raw(&self, pane_id: &str, token: &str) -> Result<()>;
    /// Clear the input line, type `continue`, and submit, with short pauses
    /// so the pane has time to render between keystrokes.
    fn send_continue_sequence(&self, pane_id: &str) -> Result<()>;
}

/// Key names forwarded to tmux verbatim; anything else is sent literally.
const KEY_TOKENS: &[&str] = &[
    "Enter", "Escape", "Tab", "Space", "Up", "Down", "Left", "Right", "BSpace", "Home", "End",
    "PageUp", "PageDown",
];

fn is_key_token(token: &str) -> bool {
    KEY_TOKENS.contains(&token) || token.starts_with("C-") || token.starts_with("M-")
}

/// Pane driver over the tmux CLI.
pub struct TmuxPaneAdapter {
    /// Hard deadline for the existence probe.
    exists_timeout: Duration,
    /// Pause between the keystrokes of the continue sequence.
    key_delay: Duration,
}

impl Default for TmuxPaneAdapter {
    fn default() -> Self {
        Self {
            exists_timeout: Duration::from_secs(5),
            key_delay: Duration::from_millis(200),
        }
    }
}

fn run_tmux<I, S>(args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    Command::new("tmux")
        .args(args)
        .output()
        .context("failed to run tmux command")
}

impl TmuxPaneAdapter {
    fn capture(&self, pane_id: &str, with_escapes: bool) -> Result<String> {
        let mut args = vec!["capture-pane"];
        if with_escapes {
            args.push("-e");
        }
        args.extend(["-p", "-t", pane_id]);

        let output = run_tmux(args)
            .with_context(|| format!("failed to capture pane '{pane_id}'"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux capture-pane failed for '{pane_id}': {stderr}");
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl PaneAdapter for TmuxPaneAdapter {
    fn capture_plain(&self, pane_id: &str) -> Result<String> {
        self.capture(pane_id, false)
    }

    fn capture_colored(&self, pane_id: &str) -> Result<String> {
        self.capture(pane_id, true)
    }

    fn pane_exists(&self, pane_id: &str) -> bool {
        let child = Command::new("tmux")
            .args(["display-message", "-p", "-t", pane_id, "#{pane_id}"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let Ok(mut child) = child else {
            return false;
        };

        let deadline = Instant::now() + self.exists_timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return status.success(),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        debug!(pane = pane_id, "pane existence probe timed out");
                        let _ = child.kill();
                        let _ = child.wait();
                        return false;
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(_) => return false,
            }
        }
    }

    fn send_cooked(&self, pane_id: &str, text: &str) -> Result<()> {
        if !text.is_empty() {
            let output = run_tmux(["send-keys", "-t", pane_id, "-l", "--", text])
                .with_context(|| format!("failed to send keys to pane '{pane_id}'"))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                bail!("tmux send-keys failed: {stderr}");
            }
        }

        // Submit as a separate action so the text lands before Enter.
        let output = run_tmux(["send-keys", "-t", pane_id, "C-m"])
            .with_context(|| format!("failed to send Enter to pane '{pane_id}'"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux send-keys Enter failed: {stderr}");
        }

        debug!(pane = pane_id, text = text, "sent cooked input");
        Ok(())
    }

    fn send_raw(&self, pane_id: &str, token: &str) -> Result<()> {
        let output = if is_key_token(token) {
            run_tmux(["send-keys", "-t", pane_id, token])
        } else {
            run_tmux(["send-keys", "-t", pane_id, "-l", "--", token])
        }
        .with_context(|| format!("failed to send raw token to pane '{pane_id}'"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux send-keys raw failed: {stderr}");
        }

        debug!(pane = pane_id, token = token, "sent raw token");
        Ok(())
    }

    fn send_continue_sequence(&self, pane_id: &str) -> Result<()> {
        self.send_raw(pane_id, "C-u")?;
        std::thread::sleep(self.key_delay);
        self.send_raw(pane_id, "continue")?;
        std::thread::sleep(self.key_delay);
        self.send_raw(pane_id, "Enter")?;
        debug!(pane = pane_id, "continue sequence sent");
        Ok(())
    }
}
