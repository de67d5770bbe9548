use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

pub const EVENTS_FILE: &str = "events.jsonl";

const RESERVED_KEYS: [&str; 4] = ["type", "session_id", "seq", "ts"];

/// Everything the session audit log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted,
    SessionEnded,
    TasksLoaded,
    TaskSelected,
    ProviderSelected,
    MessageSent,
    ReplyReceived,
    DispatchFailed,
    QuotaRejected,
    TaskSubmitted,
    SideCallFailed,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SessionStarted => "session_started",
            EventKind::SessionEnded => "session_ended",
            EventKind::TasksLoaded => "tasks_loaded",
            EventKind::TaskSelected => "task_selected",
            EventKind::ProviderSelected => "provider_selected",
            EventKind::MessageSent => "message_sent",
            EventKind::ReplyReceived => "reply_received",
            EventKind::DispatchFailed => "dispatch_failed",
            EventKind::QuotaRejected => "quota_rejected",
            EventKind::TaskSubmitted => "task_submitted",
            EventKind::SideCallFailed => "side_call_failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of `events.jsonl`.
///
/// `seq` counts up from 1 per writer, so events sharing a timestamp still
/// read back in the order they happened. Detail fields sit next to the
/// envelope and may not reuse its keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub session_id: String,
    pub seq: u64,
    pub ts: String,
    #[serde(flatten)]
    pub fields: EventPayload,
}

impl SessionEvent {
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Append-only writer for a session's `events.jsonl` audit log.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    next_seq: Mutex<u64>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                next_seq: Mutex::new(1),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, kind: EventKind, mut fields: EventPayload) -> anyhow::Result<SessionEvent> {
        for key in RESERVED_KEYS {
            if fields.remove(key).is_some() {
                tracing::debug!(%kind, key, "dropped reserved event field");
            }
        }
        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Held across the append so seq order matches line order.
        let mut next_seq = self
            .inner
            .next_seq
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let event = SessionEvent {
            kind,
            session_id: self.inner.session_id.clone(),
            seq: *next_seq,
            ts: now_utc_iso(),
            fields,
        };
        let line = serde_json::to_string(&event)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        *next_seq += 1;

        Ok(event)
    }

    /// Audit events never block a participant action; failures go to tracing.
    pub fn record(&self, kind: EventKind, fields: EventPayload) {
        if let Err(err) = self.emit(kind, fields) {
            tracing::warn!(%kind, error = %err, "failed to append session event");
        }
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
