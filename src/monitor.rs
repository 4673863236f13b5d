//! The session monitoring engine.
//!
//! One worker thread per supervised session drives a timed
//! capture → analyze → act cycle. Cycles across sessions run independently;
//! within a session there is never more than one cycle in flight, which is
//! what lets the per-session state stay lock-free.
//!
//! A cycle, in order: registry lookup (record gone → self-stop), pane
//! existence (pane gone → self-stop, the daemon supervisor owns the final
//! status), the scheduled-continuation gate, the quota gate, then capture
//! and analysis. Limit recovery runs before approval detection (a genuine
//! limit screen leaves no live dialog to approve), and idle detection is
//! suppressed while a continuation is pending.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::event::{EventBus, MonitorEvent, MonitorEventKind};
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::pane::PaneAdapter;
use crate::registry::{SessionPatch, SessionRegistry, SessionStatus};
use crate::state::SessionState;
use crate::{approval, idle, limits, patterns, quota};

/// Engine configuration, supplied at construction.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Delay between poll cycles per session.
    pub poll_interval: Duration,
    /// Consecutive cycle failures tolerated before the session stops.
    pub max_retries: u32,
    /// Accepted for the daemon supervisor; the engine does not consult it.
    pub auto_restart: bool,
    /// How long the immediate continue attempt waits before re-capturing.
    pub continue_settle: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            max_retries: 3,
            auto_restart: true,
            continue_settle: Duration::from_secs(3),
        }
    }
}

impl MonitorConfig {
    /// Clamp to the supported minimums (250 ms polling, one retry).
    pub fn clamped(mut self) -> Self {
        self.poll_interval = self.poll_interval.max(Duration::from_millis(250));
        self.max_retries = self.max_retries.max(1);
        self
    }
}

pub(crate) struct Shared {
    pub config: MonitorConfig,
    pub pane: Arc<dyn PaneAdapter>,
    pub registry: Arc<dyn SessionRegistry>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
}

/// Everything a single cycle step needs: the session's identity, its
/// collaborators, and the notification/event emitters. Notification failures
/// are logged and swallowed here so the detectors never see them.
pub(crate) struct CycleCtx<'a> {
    pub session_id: &'a str,
    pub session_name: &'a str,
    pub pane_id: &'a str,
    pub pane: &'a dyn PaneAdapter,
    pub registry: &'a dyn SessionRegistry,
    pub notifier: &'a dyn Notifier,
    pub clock: &'a dyn Clock,
    pub events: &'a EventBus,
    pub continue_settle: Duration,
}

impl CycleCtx<'_> {
    pub fn notify(&self, kind: NotificationKind, message: String, metadata: serde_json::Value) {
        let notification = Notification {
            kind,
            session_id: self.session_id.to_string(),
            session_name: self.session_name.to_string(),
            message,
            metadata,
        };
        if let Err(e) = self.notifier.notify(self.session_id, &notification) {
            warn!(
                session = self.session_id,
                error = %e,
                "notification delivery failed"
            );
        }
    }

    pub fn emit(&self, kind: MonitorEventKind, data: serde_json::Value) {
        self.events.emit(MonitorEvent {
            kind,
            session_id: self.session_id.to_string(),
            data,
            timestamp: self.clock.now(),
        });
    }

    pub fn set_status(&self, status: SessionStatus) -> Result<()> {
        self.registry
            .update(self.session_id, SessionPatch::with_status(status))
    }
}

/// Whether the worker keeps polling after this cycle.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CycleControl {
    Continue,
    Stop,
}

struct WorkerHandle {
    stop: Arc<AtomicBool>,
}

/// Supervises a set of sessions, one poll worker each.
pub struct SessionMonitor {
    shared: Arc<Shared>,
    workers: Mutex<HashMap<String, WorkerHandle>>,
}

impl SessionMonitor {
    pub fn new(
        config: MonitorConfig,
        pane: Arc<dyn PaneAdapter>,
        registry: Arc<dyn SessionRegistry>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: config.clamped(),
                pane,
                registry,
                notifier,
                clock,
                events: EventBus::new(),
            }),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to the engine's event stream.
    pub fn subscribe(&self) -> Receiver<MonitorEvent> {
        self.shared.events.subscribe()
    }

    /// Begin polling `session_id`. A session already being monitored is left
    /// alone.
    pub fn start_monitoring(&self, session_id: &str) {
        let mut workers = self.workers.lock().unwrap();
        workers.retain(|_, handle| !handle.stop.load(Ordering::Relaxed));
        if workers.contains_key(session_id) {
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let worker = SessionWorker::new(session_id.to_string(), self.shared.clone(), stop.clone());
        let name = format!("monitor-{session_id}");
        if let Err(e) = std::thread::Builder::new()
            .name(name)
            .spawn(move || worker.run())
        {
            warn!(session = session_id, error = %e, "failed to spawn poll worker");
            return;
        }
        workers.insert(session_id.to_string(), WorkerHandle { stop });
    }

    /// Cancel the session's next tick. A cycle already in flight completes;
    /// its side effects may still fire.
    pub fn stop_monitoring(&self, session_id: &str) {
        if let Some(handle) = self.workers.lock().unwrap().remove(session_id) {
            handle.stop.store(true, Ordering::Relaxed);
        }
    }

    /// Cancel every session.
    pub fn stop_all(&self) {
        let mut workers = self.workers.lock().unwrap();
        for (_, handle) in workers.drain() {
            handle.stop.store(true, Ordering::Relaxed);
        }
    }

    /// Sessions with a live poll worker.
    pub fn active_sessions(&self) -> Vec<String> {
        let mut workers = self.workers.lock().unwrap();
        workers.retain(|_, handle| !handle.stop.load(Ordering::Relaxed));
        workers.keys().cloned().collect()
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        self.stop_all();
    }
}

pub(crate) struct SessionWorker {
    session_id: String,
    display_name: String,
    shared: Arc<Shared>,
    pub(crate) state: SessionState,
    stop: Arc<AtomicBool>,
}

impl SessionWorker {
    pub(crate) fn new(session_id: String, shared: Arc<Shared>, stop: Arc<AtomicBool>) -> Self {
        Self {
            display_name: session_id.clone(),
            session_id,
            shared,
            state: SessionState::new(),
            stop,
        }
    }

    pub(crate) fn run(mut self) {
        info!(session = %self.session_id, "session monitoring started");
        loop {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            match self.run_cycle() {
                Ok(CycleControl::Continue) => {
                    self.state.retry_count = 0;
                }
                Ok(CycleControl::Stop) => break,
                Err(e) => {
                    self.state.retry_count += 1;
                    warn!(
                        session = %self.session_id,
                        error = %e,
                        attempt = self.state.retry_count,
                        "poll cycle failed"
                    );
                    if self.state.retry_count >= self.shared.config.max_retries {
                        self.fail(&e.to_string());
                        break;
                    }
                }
            }
            std::thread::sleep(self.shared.config.poll_interval);
        }
        self.stop.store(true, Ordering::Relaxed);
        info!(session = %self.session_id, "session monitoring stopped");
    }

    /// Retry budget exhausted: announce and stop this session. Other
    /// sessions are unaffected.
    fn fail(&self, message: &str) {
        self.shared.events.emit(MonitorEvent {
            kind: MonitorEventKind::Error,
            session_id: self.session_id.clone(),
            data: serde_json::json!({ "message": message }),
            timestamp: self.shared.clock.now(),
        });
        let notification = Notification {
            kind: NotificationKind::Error,
            session_id: self.session_id.clone(),
            session_name: self.display_name.clone(),
            message: format!("Monitoring stopped after repeated errors: {message}"),
            metadata: serde_json::Value::Null,
        };
        if let Err(e) = self.shared.notifier.notify(&self.session_id, &notification) {
            warn!(session = %self.session_id, error = %e, "notification delivery failed");
        }
    }

    pub(crate) fn run_cycle(&mut self) -> Result<CycleControl> {
        let Some(record) = self.shared.registry.get(&self.session_id)? else {
            info!(session = %self.session_id, "session record missing, stopping");
            return Ok(CycleControl::Stop);
        };
        self.display_name = record.name.clone();

        if !self.shared.pane.pane_exists(&record.pane_id) {
            // The daemon supervisor decides the session's final status.
            info!(session = %self.session_id, pane = %record.pane_id, "pane gone, stopping");
            return Ok(CycleControl::Stop);
        }

        let ctx = CycleCtx {
            session_id: &self.session_id,
            session_name: &record.name,
            pane_id: &record.pane_id,
            pane: &*self.shared.pane,
            registry: &*self.shared.registry,
            notifier: &*self.shared.notifier,
            clock: &*self.shared.clock,
            events: &self.shared.events,
            continue_settle: self.shared.config.continue_settle,
        };

        // Deferred continuation comes before anything else this cycle; the
        // next cycle resumes the normal flow.
        if let Some(deadline) = self.state.scheduled_reset {
            if ctx.clock.now() >= deadline {
                self.state.scheduled_reset = None;
                limits::perform_continuation(&ctx, &mut self.state)?;
                return Ok(CycleControl::Continue);
            }
        }

        if let Some(schedule) = record.quota_schedule.clone() {
            quota::tick(&ctx, &mut self.state, &record, &schedule)?;
        }

        let current = ctx.pane.capture_plain(&record.pane_id)?;
        if current != self.state.last_output {
            let slice =
                patterns::new_output_slice(&self.state.last_output, &current).to_string();
            let previous_output = std::mem::replace(&mut self.state.last_output, current);
            let previous_change = self.state.last_output_change;
            self.state.last_output_change = Some(ctx.clock.now());

            let detectors = match limits::check_new_output(&ctx, &mut self.state, &slice) {
                Ok(true) => Ok(()),
                Ok(false) => approval::check_new_output(&ctx, &mut self.state, &slice),
                Err(e) => Err(e),
            };
            if let Err(e) = detectors {
                // Roll the snapshot back so the next cycle re-runs detection
                // on this output instead of silently consuming it.
                self.state.last_output = previous_output;
                self.state.last_output_change = previous_change;
                return Err(e);
            }
        }

        // A limit episode with no known deadline watches the snapshot for a
        // parseable reset time or an externally cleared screen.
        limits::watch_for_reset(&ctx, &mut self.state)?;

        idle::check(&ctx, &mut self.state);

        Ok(CycleControl::Continue)
    }
}
