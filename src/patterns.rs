//! Screen-text recognition for supervised panes.
//!
//! Every predicate and extractor here is a pure function over captured pane
//! text. This is the only module that owns regular expressions; the rest of
//! the engine asks questions like "is a usage limit showing?" and never
//! touches a pattern directly.
//!
//! The vocabulary targets the text the AI client actually paints: usage-limit
//! notices, the three-part approval dialog (question, numbered options,
//! selection marker), the input prompt, and spinner/progress markers.

use std::sync::LazyLock;

use regex::Regex;

/// Usage-limit notice anywhere in the capture.
static LIMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)limit reached|usage limit|limit[^\n]*resets").unwrap()
});

/// An input affordance: a prompt at the start of a line, a framed input box,
/// or one of the client's "you can keep going" phrases.
static ACTIVE_TERMINAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^>|[│┃]\s*>|continue this conversation|you can continue|your limit (?:will )?reset",
    )
    .unwrap()
});

/// Approval dialog question line.
static APPROVAL_QUESTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Do you want to (?:make this edit to|create|proceed)").unwrap()
});

/// A numbered "Yes" option line.
static OPTION_YES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.\s*Yes").unwrap());

/// A numbered option with an optional trailing keyboard shortcut.
static OPTION_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:❯\s*)?(\d+)\.\s+(.*?)(?:\s+\(([^()]+)\))?$").unwrap()
});

static EDIT_TARGET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"make this edit to\s+([^\s?]+)").unwrap());

static CREATE_TARGET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"create\s+([^\s?]+)").unwrap());

/// Reset-time phrase with the time-of-day captured.
static RESET_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:resets at|resets|available again at|ready at)\s+(\d{1,2}(?::\d{2})?\s*(?:am|pm)?)",
    )
    .unwrap()
});

/// Bare clock time: `H`, `H:MM`, optional am/pm suffix.
static CLOCK_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$").unwrap());

/// An empty input prompt, or the prompt with the send hint next to it.
static WAITING_INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^>(?:\s*$|.*↵\s*send)").unwrap());

/// Spinner glyphs and progress words the client shows while busy.
static PROCESSING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[◐◑◒◓⠋⠙⠹⠸]|processing|analyzing|running|executing|working|loading").unwrap()
});

/// SGR escape sequence with its parameter list captured.
static SGR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[([0-9;]*)m").unwrap());

/// ANSI escapes: CSI sequences, OSC sequences, and simple two-byte escapes.
static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[^\[\]]").unwrap()
});

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap());

const SELECTION_MARKER: char = '❯';

/// Box-drawing characters the client frames dialogs with.
const BOX_CHARS: &[char] = &[
    '│', '┃', '║', '─', '━', '═', '╭', '╮', '╰', '╯', '┌', '┐', '└', '┘', '├', '┤', '┬', '┴', '┼',
];

/// Does the capture show a usage-limit notice?
pub fn limit_present(text: &str) -> bool {
    LIMIT_RE.is_match(text)
}

/// Does the capture show an input affordance (the session can accept typing)?
pub fn active_terminal_state(text: &str) -> bool {
    ACTIVE_TERMINAL_RE.is_match(text)
}

/// Is a full approval dialog on screen?
///
/// Requires all three parts, possibly on different lines: the question, a
/// numbered `Yes` option, and the selection marker. Scanning stops as soon as
/// all three have been seen.
pub fn approval_dialog_present(text: &str) -> bool {
    let mut question = false;
    let mut option = false;
    let mut marker = false;
    for line in text.lines() {
        question = question || APPROVAL_QUESTION_RE.is_match(line);
        option = option || OPTION_YES_RE.is_match(line);
        marker = marker || line.contains(SELECTION_MARKER);
        if question && option && marker {
            return true;
        }
    }
    false
}

/// Given a capture with escape sequences intact, decide whether the approval
/// dialog on screen is live or pasted history.
///
/// A dialog line counts as live when it carries at least one non-dim color
/// escape and no dim/grey code (SGR 2, 8, 90). A capture with no escapes at
/// all is assumed interactive, since there is nothing to distinguish it by.
pub fn interactive_approval(colored: &str) -> bool {
    if !colored.contains('\x1b') {
        return true;
    }
    for line in colored.lines() {
        let plain = strip_ansi(line);
        let carries_dialog = APPROVAL_QUESTION_RE.is_match(&plain)
            || OPTION_YES_RE.is_match(&plain)
            || plain.contains(SELECTION_MARKER);
        if !carries_dialog {
            continue;
        }
        let mut has_color = false;
        let mut has_dim = false;
        for caps in SGR_RE.captures_iter(line) {
            for code in caps[1].split(';') {
                match code {
                    "2" | "8" | "90" => has_dim = true,
                    "" | "0" => {}
                    _ => has_color = true,
                }
            }
        }
        if has_color && !has_dim {
            return true;
        }
    }
    false
}

/// Extract the first reset-time string, e.g. `"3:45pm"` from
/// `"Your limit resets at 3:45pm"`.
pub fn extract_reset_time(text: &str) -> Option<String> {
    RESET_TIME_RE
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
}

/// Parse a clock time into `(hour, minute)` on a 24-hour dial.
///
/// Accepts `H`, `H:MM`, with an optional am/pm suffix; `pm` adds 12 unless
/// the hour is 12, `12am` becomes 0. Out-of-range values are rejected.
pub fn parse_clock_time(raw: &str) -> Option<(u32, u32)> {
    let caps = CLOCK_TIME_RE.captures(raw.trim())?;
    let mut hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    match caps.get(3).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(p) if p == "pm" && hour != 12 => hour += 12,
        Some(p) if p == "am" && hour == 12 => hour = 0,
        _ => {}
    }
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

/// A single numbered choice in an approval dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalOption {
    pub number: u32,
    pub label: String,
    pub shortcut: Option<String>,
}

/// What an approval dialog is asking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalInfo {
    /// Tool family the dialog gates (`Edit`, `Write`, `Bash`, or `Tool`).
    pub tool: String,
    /// Human-readable action, e.g. `Edit tmux.rs` or `Bash: cargo test`.
    pub action: String,
    /// The question line, used for de-duplication downstream.
    pub question: String,
    pub options: Vec<ApprovalOption>,
}

/// Pull the question, classified action, and numbered options out of a
/// de-ANSI'd dialog capture.
pub fn extract_approval_info(text: &str) -> ApprovalInfo {
    let deboxed: Vec<String> = text.lines().map(debox_line).collect();

    let question = deboxed
        .iter()
        .find(|line| APPROVAL_QUESTION_RE.is_match(line))
        .cloned()
        .unwrap_or_default();

    let mut options = Vec::new();
    for line in &deboxed {
        if let Some(caps) = OPTION_LINE_RE.captures(line) {
            if let Ok(number) = caps[1].parse() {
                options.push(ApprovalOption {
                    number,
                    label: caps[2].trim().to_string(),
                    shortcut: caps.get(3).map(|m| m.as_str().to_string()),
                });
            }
        }
    }

    let (tool, action) = classify_action(&question, &deboxed);

    ApprovalInfo {
        tool,
        action,
        question,
        options,
    }
}

fn classify_action(question: &str, deboxed: &[String]) -> (String, String) {
    if let Some(caps) = EDIT_TARGET_RE.captures(question) {
        return ("Edit".to_string(), format!("Edit {}", &caps[1]));
    }
    if let Some(caps) = CREATE_TARGET_RE.captures(question) {
        return ("Write".to_string(), format!("Write {}", &caps[1]));
    }
    if question.contains("proceed") && deboxed.iter().any(|l| l.contains("Bash command")) {
        if let Some(command) = deboxed.iter().find(|line| {
            !line.is_empty()
                && !line.contains("Bash command")
                && !line.contains(SELECTION_MARKER)
                && !APPROVAL_QUESTION_RE.is_match(line)
                && !OPTION_LINE_RE.is_match(line)
        }) {
            return ("Bash".to_string(), format!("Bash: {command}"));
        }
    }
    ("Tool".to_string(), "Proceed with operation".to_string())
}

fn debox_line(line: &str) -> String {
    line.replace(BOX_CHARS, " ").trim().to_string()
}

/// Is the input line empty and waiting for the user?
pub fn waiting_for_input(text: &str) -> bool {
    WAITING_INPUT_RE.is_match(text)
}

/// Heuristic: the last non-empty line carries no spinner glyph or progress
/// word. Earlier lines are deliberately not consulted.
pub fn not_processing(text: &str) -> bool {
    match text.lines().rev().find(|line| !line.trim().is_empty()) {
        Some(last) => !PROCESSING_RE.is_match(last),
        None => true,
    }
}

/// Strip ANSI escape sequences from captured output.
pub fn strip_ansi(input: &str) -> String {
    ANSI_RE.replace_all(input, "").to_string()
}

/// The part of `current` that was not yet seen in `previous`.
///
/// When `current` still contains the previous capture, only the suffix after
/// it is new; otherwise (scrolled, cleared, redrawn) the whole capture is.
pub fn new_output_slice<'a>(previous: &str, current: &'a str) -> &'a str {
    if previous.is_empty() {
        return current;
    }
    match current.find(previous) {
        Some(idx) => &current[idx + previous.len()..],
        None => current,
    }
}

/// Rewrite any embedded ISO date (`YYYY-MM-DD`) to `new_date`.
///
/// Text without such a date passes through unchanged.
pub fn rewrite_embedded_date(text: &str, new_date: &str) -> String {
    ISO_DATE_RE.replace_all(text, new_date).to_string()
}
