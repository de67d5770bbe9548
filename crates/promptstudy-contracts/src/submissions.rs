use std::path::Path;

use serde_json::Value;

use crate::store::SessionStore;
use crate::tasks::TaskId;

const SUBMITTED_KEY: &str = "submitted_tasks";

/// Task ids the participant has marked complete, persisted in session storage.
#[derive(Debug, Clone)]
pub struct SubmittedTaskSet {
    store: SessionStore,
    ids: Vec<TaskId>,
}

impl SubmittedTaskSet {
    pub fn load(mut store: SessionStore) -> Self {
        let ids = store
            .get(SUBMITTED_KEY)
            .and_then(|value| serde_json::from_value::<Vec<TaskId>>(value).ok())
            .unwrap_or_default();
        let mut set = Self {
            store,
            ids: Vec::new(),
        };
        for id in ids {
            if !set.contains(&id) {
                set.ids.push(id);
            }
        }
        set
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::load(SessionStore::in_dir(dir))
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.ids.iter().any(|existing| existing == task_id)
    }

    pub fn ids(&self) -> &[TaskId] {
        self.ids.as_slice()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns `false` when the id was already present.
    pub fn insert(&mut self, task_id: TaskId) -> anyhow::Result<bool> {
        if self.contains(&task_id) {
            return Ok(false);
        }
        self.ids.push(task_id);
        self.store
            .set(SUBMITTED_KEY, serde_json::to_value(&self.ids)?)?;
        Ok(true)
    }

    pub fn clear(&mut self) -> anyhow::Result<()> {
        self.ids.clear();
        self.store.set(SUBMITTED_KEY, Value::Array(Vec::new()))
    }
}
