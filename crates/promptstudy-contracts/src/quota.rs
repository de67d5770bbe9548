use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::SessionStore;
use crate::tasks::{Task, TaskId};

pub const IMAGE_GENERATION_CEILING: u32 = 5;
const QUOTA_KEY_PREFIX: &str = "image_generation_quota:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationQuota {
    pub task_id: TaskId,
    pub count: u32,
    #[serde(default)]
    pub generation_ids: Vec<String>,
}

impl GenerationQuota {
    fn empty(task_id: &TaskId) -> Self {
        Self {
            task_id: task_id.clone(),
            count: 0,
            generation_ids: Vec::new(),
        }
    }
}

/// Per-task image generation counter kept in session storage.
///
/// Client-side guardrail only; it resets with the session directory.
#[derive(Debug, Clone)]
pub struct QuotaTracker {
    store: SessionStore,
    ceiling: u32,
}

impl QuotaTracker {
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            ceiling: IMAGE_GENERATION_CEILING,
        }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(SessionStore::in_dir(dir))
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn current_count(&mut self, task_id: &TaskId) -> u32 {
        self.load(task_id).count
    }

    pub fn remaining(&mut self, task_id: &TaskId) -> u32 {
        self.ceiling.saturating_sub(self.current_count(task_id))
    }

    /// Only image tasks can be exhausted; text tasks never block on quota.
    pub fn is_exceeded(&mut self, task: &Task) -> bool {
        task.is_image_task() && self.current_count(&task.id) >= self.ceiling
    }

    /// Counts one completed generation. Repeating a `generation_id` that was
    /// already counted changes nothing, and the count never passes the ceiling.
    pub fn increment(&mut self, task_id: &TaskId, generation_id: &str) -> anyhow::Result<u32> {
        let mut quota = self.load(task_id);
        if quota
            .generation_ids
            .iter()
            .any(|existing| existing == generation_id)
        {
            return Ok(quota.count);
        }
        if quota.count >= self.ceiling {
            tracing::warn!(task_id = %task_id, "image generation recorded past the ceiling; ignoring");
            return Ok(quota.count);
        }
        quota.count += 1;
        quota.generation_ids.push(generation_id.to_string());
        self.store
            .set(&quota_key(task_id), serde_json::to_value(&quota)?)?;
        Ok(quota.count)
    }

    fn load(&mut self, task_id: &TaskId) -> GenerationQuota {
        self.store
            .get(&quota_key(task_id))
            .and_then(|value| parse_quota(task_id, value))
            .unwrap_or_else(|| GenerationQuota::empty(task_id))
    }
}

fn quota_key(task_id: &TaskId) -> String {
    format!("{QUOTA_KEY_PREFIX}{task_id}")
}

fn parse_quota(task_id: &TaskId, value: Value) -> Option<GenerationQuota> {
    // A bare number is what an older client left behind.
    if let Some(count) = value.as_u64() {
        let mut quota = GenerationQuota::empty(task_id);
        quota.count = count.min(u64::from(IMAGE_GENERATION_CEILING)) as u32;
        return Some(quota);
    }
    serde_json::from_value(value).ok()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{QuotaTracker, IMAGE_GENERATION_CEILING};
    use crate::store::SessionStore;
    use crate::tasks::{Task, TaskId, TaskType};

    #[test]
    fn unseen_task_starts_at_zero() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut quota = QuotaTracker::in_dir(temp.path());
        assert_eq!(quota.current_count(&TaskId::from(1)), 0);
        assert_eq!(quota.remaining(&TaskId::from(1)), IMAGE_GENERATION_CEILING);
        Ok(())
    }

    #[test]
    fn increment_is_idempotent_per_generation() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut quota = QuotaTracker::in_dir(temp.path());
        let task = TaskId::from(1);
        assert_eq!(quota.increment(&task, "gen-1")?, 1);
        assert_eq!(quota.increment(&task, "gen-1")?, 1);
        assert_eq!(quota.increment(&task, "gen-2")?, 2);
        Ok(())
    }

    #[test]
    fn count_saturates_at_ceiling() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut quota = QuotaTracker::in_dir(temp.path());
        let task = Task::new(1, "Vacation", TaskType::Image);
        for idx in 0..8 {
            quota.increment(&task.id, &format!("gen-{idx}"))?;
        }
        assert_eq!(quota.current_count(&task.id), IMAGE_GENERATION_CEILING);
        assert!(quota.is_exceeded(&task));
        Ok(())
    }

    #[test]
    fn text_tasks_are_never_exceeded() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut quota = QuotaTracker::in_dir(temp.path());
        let task = Task::new(2, "Story", TaskType::Text);
        for idx in 0..5 {
            quota.increment(&task.id, &format!("gen-{idx}"))?;
        }
        assert!(!quota.is_exceeded(&task));
        Ok(())
    }

    #[test]
    fn counts_survive_reload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let task = TaskId::from(1);
        {
            let mut quota = QuotaTracker::in_dir(temp.path());
            quota.increment(&task, "gen-1")?;
            quota.increment(&task, "gen-2")?;
        }
        let mut reloaded = QuotaTracker::in_dir(temp.path());
        assert_eq!(reloaded.current_count(&task), 2);
        assert_eq!(reloaded.remaining(&task), 3);
        Ok(())
    }

    #[test]
    fn bare_number_entries_are_read() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = SessionStore::in_dir(temp.path());
        store.set("image_generation_quota:9", json!(4))?;
        let mut quota = QuotaTracker::new(store);
        assert_eq!(quota.current_count(&TaskId::from(9)), 4);
        Ok(())
    }
}
