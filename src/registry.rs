//! Session records and the registry the engine reads them from.
//!
//! The registry owns session identity and persisted status; the engine only
//! ever `get`s a record and requests field-level merges via `update`. Two
//! drivers ship here: a JSON-file registry for the daemon and an in-memory
//! one for tests and embedding.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Lifecycle status persisted for each session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Waiting,
    WaitingApproval,
    Ended,
}

/// A recurring daily command staged into the pane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaSchedule {
    /// Time of day the command fires, e.g. `"05:00"`.
    pub time_of_day: String,
    /// The command text typed into the pane.
    pub command: String,
    /// Next wall-clock execution deadline.
    pub next_execution: DateTime<Local>,
}

/// One supervised session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub name: String,
    /// Identifier the pane adapter uses to address the multiplexer pane.
    pub pane_id: String,
    pub created: DateTime<Local>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_schedule: Option<QuotaSchedule>,
}

/// Field-level merge applied atomically to a record.
#[derive(Debug, Default, Clone)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    /// `Some(None)` clears the schedule, `Some(Some(_))` replaces it.
    pub quota_schedule: Option<Option<QuotaSchedule>>,
}

impl SessionPatch {
    pub fn with_status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_quota_schedule(schedule: Option<QuotaSchedule>) -> Self {
        Self {
            quota_schedule: Some(schedule),
            ..Self::default()
        }
    }

    fn apply(&self, record: &mut SessionRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(ref schedule) = self.quota_schedule {
            record.quota_schedule = schedule.clone();
        }
    }
}

/// Lookup and update surface the engine depends on.
pub trait SessionRegistry: Send + Sync {
    fn get(&self, session_id: &str) -> Result<Option<SessionRecord>>;
    fn update(&self, session_id: &str, patch: SessionPatch) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    sessions: Vec<SessionRecord>,
}

/// JSON-file registry. Each operation is a mutex-guarded read-modify-write of
/// the whole file, which keeps updates atomic at the record level.
pub struct FileRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records, in file order.
    pub fn all(&self) -> Result<Vec<SessionRecord>> {
        let _guard = self.lock.lock().unwrap();
        Ok(self.load()?.sessions)
    }

    /// Insert or replace a record by id.
    pub fn insert(&self, record: SessionRecord) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut file = self.load()?;
        match file.sessions.iter_mut().find(|s| s.id == record.id) {
            Some(existing) => *existing = record,
            None => file.sessions.push(record),
        }
        self.store(&file)
    }

    fn load(&self) -> Result<RegistryFile> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse registry {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RegistryFile::default()),
            Err(e) => Err(e)
                .with_context(|| format!("failed to read registry {}", self.path.display())),
        }
    }

    fn store(&self, file: &RegistryFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create registry directory {}", parent.display())
            })?;
        }
        let json =
            serde_json::to_string_pretty(file).context("failed to serialize registry")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("failed to write registry {}", self.path.display()))
    }
}

impl SessionRegistry for FileRegistry {
    fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let _guard = self.lock.lock().unwrap();
        Ok(self
            .load()?
            .sessions
            .into_iter()
            .find(|s| s.id == session_id))
    }

    fn update(&self, session_id: &str, patch: SessionPatch) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut file = self.load()?;
        let Some(record) = file.sessions.iter_mut().find(|s| s.id == session_id) else {
            bail!("unknown session '{session_id}'");
        };
        patch.apply(record);
        self.store(&file)
    }
}

/// Map-backed registry for tests and embedding.
#[derive(Default)]
pub struct InMemoryRegistry {
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: SessionRecord) {
        self.sessions
            .lock()
            .unwrap()
            .insert(record.id.clone(), record);
    }

    pub fn remove(&self, session_id: &str) {
        self.sessions.lock().unwrap().remove(session_id);
    }
}

impl SessionRegistry for InMemoryRegistry {
    fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.lock().unwrap().get(session_id).cloned())
    }

    fn update(&self, session_id: &str, patch: SessionPatch) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let Some(record) = sessions.get_mut(session_id) else {
            bail!("unknown session '{session_id}'");
        };
        patch.apply(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            name: format!("session {id}"),
            pane_id: "%7".to_string(),
            created: Local.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap(),
            status: SessionStatus::Active,
            quota_schedule: None,
        }
    }

    #[test]
    fn file_registry_round_trips_records() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = FileRegistry::new(tmp.path().join("sessions.json"));

        registry.insert(record("s1")).unwrap();
        registry.insert(record("s2")).unwrap();

        let loaded = registry.get("s1").unwrap().unwrap();
        assert_eq!(loaded.name, "session s1");
        assert_eq!(loaded.status, SessionStatus::Active);
        assert_eq!(registry.all().unwrap().len(), 2);
    }

    #[test]
    fn file_registry_missing_file_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = FileRegistry::new(tmp.path().join("nope").join("sessions.json"));
        assert!(registry.get("s1").unwrap().is_none());
        assert!(registry.all().unwrap().is_empty());
    }

    #[test]
    fn patch_merges_only_named_fields() {
        let registry = InMemoryRegistry::new();
        registry.insert(record("s1"));

        registry
            .update("s1", SessionPatch::with_status(SessionStatus::Waiting))
            .unwrap();

        let after = registry.get("s1").unwrap().unwrap();
        assert_eq!(after.status, SessionStatus::Waiting);
        assert_eq!(after.name, "session s1");
        assert!(after.quota_schedule.is_none());
    }

    #[test]
    fn patch_can_set_and_clear_quota_schedule() {
        let registry = InMemoryRegistry::new();
        registry.insert(record("s1"));

        let schedule = QuotaSchedule {
            time_of_day: "05:00".to_string(),
            command: "resume 2026-08-02".to_string(),
            next_execution: Local.with_ymd_and_hms(2026, 8, 2, 5, 0, 0).unwrap(),
        };
        registry
            .update("s1", SessionPatch::with_quota_schedule(Some(schedule.clone())))
            .unwrap();
        assert_eq!(
            registry.get("s1").unwrap().unwrap().quota_schedule,
            Some(schedule)
        );

        registry
            .update("s1", SessionPatch::with_quota_schedule(None))
            .unwrap();
        assert!(registry.get("s1").unwrap().unwrap().quota_schedule.is_none());
    }

    #[test]
    fn update_unknown_session_is_an_error() {
        let registry = InMemoryRegistry::new();
        let result = registry.update("ghost", SessionPatch::with_status(SessionStatus::Ended));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("ghost"));
    }

    #[test]
    fn file_registry_update_persists_across_instances() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sessions.json");

        {
            let registry = FileRegistry::new(&path);
            registry.insert(record("s1")).unwrap();
            registry
                .update("s1", SessionPatch::with_status(SessionStatus::WaitingApproval))
                .unwrap();
        }

        let reopened = FileRegistry::new(&path);
        assert_eq!(
            reopened.get("s1").unwrap().unwrap().status,
            SessionStatus::WaitingApproval
        );
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&SessionStatus::WaitingApproval).unwrap();
        assert_eq!(json, "\"waiting_approval\"");
    }
}
