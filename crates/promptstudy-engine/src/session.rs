use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use promptstudy_contracts::events::{EventKind, EventPayload, EventWriter, EVENTS_FILE};
use promptstudy_contracts::quota::QuotaTracker;
use promptstudy_contracts::store::SessionStore;
use promptstudy_contracts::submissions::SubmittedTaskSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identity handed over by the registration flow. Treated as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: String,
    pub display_name: String,
}

impl Participant {
    pub fn new(participant_id: &str, display_name: &str) -> Self {
        Self {
            participant_id: participant_id.trim().to_string(),
            display_name: display_name.trim().to_string(),
        }
    }
}

/// Everything that lives for exactly one participant session: who is taking
/// part, where session storage sits, and the audit log.
///
/// Session storage is a per-participant directory under the storage root, so
/// quota counts and submitted tasks never leak between participants sharing a
/// machine. Created once at login and consumed by [`SessionContext::end`].
#[derive(Debug)]
pub struct SessionContext {
    session_id: String,
    participant: Participant,
    session_dir: PathBuf,
    events: EventWriter,
}

impl SessionContext {
    pub fn start(participant: Participant, storage_root: &Path) -> Result<Self> {
        if participant.participant_id.is_empty() {
            bail!("participant id is required to start a session");
        }
        let session_dir = storage_root.join(participant_dir_name(&participant.participant_id));
        fs::create_dir_all(&session_dir).with_context(|| {
            format!("failed to create session dir {}", session_dir.display())
        })?;
        let session_id = Uuid::new_v4().to_string();
        let events = EventWriter::new(session_dir.join(EVENTS_FILE), session_id.clone());

        let mut payload = EventPayload::new();
        payload.insert(
            "participant_id".to_string(),
            Value::String(participant.participant_id.clone()),
        );
        events.emit(EventKind::SessionStarted, payload)?;
        tracing::info!(%session_id, participant_id = %participant.participant_id, "session started");

        Ok(Self {
            session_id,
            participant,
            session_dir,
            events,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    pub fn participant_id(&self) -> &str {
        &self.participant.participant_id
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn quota_tracker(&self) -> QuotaTracker {
        QuotaTracker::in_dir(&self.session_dir)
    }

    pub fn submitted_tasks(&self) -> SubmittedTaskSet {
        SubmittedTaskSet::in_dir(&self.session_dir)
    }

    /// Clears session storage. The event log is kept for the research record.
    pub fn end(self) -> Result<()> {
        SessionStore::in_dir(&self.session_dir).clear()?;
        self.events.emit(EventKind::SessionEnded, EventPayload::new())?;
        tracing::info!(session_id = %self.session_id, "session ended");
        Ok(())
    }
}

/// Directory name for a participant id. Bytes outside `[A-Za-z0-9_-]` are
/// written as `%XX`, which keeps distinct ids in distinct directories.
fn participant_dir_name(participant_id: &str) -> String {
    let mut name = String::with_capacity(participant_id.len());
    for byte in participant_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("%{byte:02X}"));
        }
    }
    name
}
