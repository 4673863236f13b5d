//! Shared test doubles.
//!
//! The engine's collaborators are all trait objects, so tests swap in a
//! scripted pane, an in-memory registry, a recording notifier, and a manual
//! clock, then drive cycles by hand.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Local, TimeZone};

use crate::clock::Clock;
use crate::event::EventBus;
use crate::monitor::CycleCtx;
use crate::notify::{Notification, Notifier};
use crate::pane::PaneAdapter;
use crate::registry::{InMemoryRegistry, SessionRecord, SessionRegistry, SessionStatus};

/// Keystroke record for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SentKeys {
    Cooked(String),
    Raw(String),
    ContinueSequence,
}

#[derive(Default)]
struct PaneScript {
    plain: VecDeque<String>,
    last_plain: String,
    colored: String,
    sent: Vec<SentKeys>,
}

/// Pane whose captures come from a queue; once the queue drains, the last
/// capture repeats (a pane that stopped changing).
pub(crate) struct ScriptedPane {
    script: Mutex<PaneScript>,
    exists: AtomicBool,
    fail_captures: AtomicBool,
    /// `Some(n)`: the next n plain captures succeed, then every one fails.
    plain_fail_after: Mutex<Option<usize>>,
    colored_captures: AtomicUsize,
}

impl ScriptedPane {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(PaneScript::default()),
            exists: AtomicBool::new(true),
            fail_captures: AtomicBool::new(false),
            plain_fail_after: Mutex::new(None),
            colored_captures: AtomicUsize::new(0),
        }
    }

    pub fn push_plain(&self, capture: &str) {
        self.script.lock().unwrap().plain.push_back(capture.to_string());
    }

    pub fn set_colored(&self, capture: &str) {
        self.script.lock().unwrap().colored = capture.to_string();
    }

    pub fn set_exists(&self, exists: bool) {
        self.exists.store(exists, Ordering::Relaxed);
    }

    pub fn set_fail_captures(&self, fail: bool) {
        self.fail_captures.store(fail, Ordering::Relaxed);
    }

    /// Let `calls` more plain captures succeed, then fail the rest.
    /// `None` clears the budget.
    pub fn fail_plain_after(&self, calls: Option<usize>) {
        *self.plain_fail_after.lock().unwrap() = calls;
    }

    pub fn sent(&self) -> Vec<SentKeys> {
        self.script.lock().unwrap().sent.clone()
    }

    pub fn colored_captures(&self) -> usize {
        self.colored_captures.load(Ordering::Relaxed)
    }
}

impl PaneAdapter for ScriptedPane {
    fn capture_plain(&self, _pane_id: &str) -> Result<String> {
        if self.fail_captures.load(Ordering::Relaxed) {
            bail!("scripted capture failure");
        }
        if let Some(budget) = self.plain_fail_after.lock().unwrap().as_mut() {
            if *budget == 0 {
                bail!("scripted capture failure");
            }
            *budget -= 1;
        }
        let mut script = self.script.lock().unwrap();
        if let Some(next) = script.plain.pop_front() {
            script.last_plain = next;
        }
        Ok(script.last_plain.clone())
    }

    fn capture_colored(&self, _pane_id: &str) -> Result<String> {
        if self.fail_captures.load(Ordering::Relaxed) {
            bail!("scripted capture failure");
        }
        self.colored_captures.fetch_add(1, Ordering::Relaxed);
        Ok(self.script.lock().unwrap().colored.clone())
    }

    fn pane_exists(&self, _pane_id: &str) -> bool {
        self.exists.load(Ordering::Relaxed)
    }

    fn send_cooked(&self, _pane_id: &str, text: &str) -> Result<()> {
        self.script
            .lock()
            .unwrap()
            .sent
            .push(SentKeys::Cooked(text.to_string()));
        Ok(())
    }

    fn send_raw(&self, _pane_id: &str, token: &str) -> Result<()> {
        self.script
            .lock()
            .unwrap()
            .sent
            .push(SentKeys::Raw(token.to_string()));
        Ok(())
    }

    fn send_continue_sequence(&self, _pane_id: &str) -> Result<()> {
        self.script.lock().unwrap().sent.push(SentKeys::ContinueSequence);
        Ok(())
    }
}

/// Notifier that records everything it is asked to deliver.
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn fail_deliveries(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, _session_id: &str, notification: &Notification) -> Result<()> {
        if self.fail.load(Ordering::Relaxed) {
            bail!("transport down");
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Clock pinned to a settable instant.
pub(crate) struct ManualClock {
    now: Mutex<DateTime<Local>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Local>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap()
    }

    pub fn set(&self, now: DateTime<Local>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap()
    }
}

/// One supervised session with every collaborator mocked, clock pinned to
/// 2026-08-01 12:00 local.
pub(crate) struct Harness {
    pub pane: Arc<ScriptedPane>,
    pub registry: Arc<InMemoryRegistry>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub events: EventBus,
    pub record: SessionRecord,
}

impl Harness {
    pub fn new() -> Self {
        let record = Self::record("s1");
        let registry = Arc::new(InMemoryRegistry::new());
        registry.insert(record.clone());
        Self {
            pane: Arc::new(ScriptedPane::new()),
            registry,
            notifier: Arc::new(RecordingNotifier::new()),
            clock: Arc::new(ManualClock::at(Self::start_time())),
            events: EventBus::new(),
            record,
        }
    }

    pub fn start_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
    }

    pub fn record(id: &str) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            name: format!("session {id}"),
            pane_id: "%7".to_string(),
            created: Self::start_time(),
            status: SessionStatus::Active,
            quota_schedule: None,
        }
    }

    pub fn ctx(&self) -> CycleCtx<'_> {
        CycleCtx {
            session_id: &self.record.id,
            session_name: &self.record.name,
            pane_id: &self.record.pane_id,
            pane: &*self.pane,
            registry: &*self.registry,
            notifier: &*self.notifier,
            clock: &*self.clock,
            events: &self.events,
            continue_settle: std::time::Duration::ZERO,
        }
    }

    pub fn registry_record(&self) -> SessionRecord {
        self.registry.get(&self.record.id).unwrap().unwrap()
    }

    pub fn registry_status(&self) -> SessionStatus {
        self.registry_record().status
    }
}
