use anyhow::bail;

use crate::messages::{Message, Notice};
use crate::tasks::{Task, TaskId};

#[derive(Debug, Clone, PartialEq)]
pub struct TaskThread {
    pub task: Task,
    pub messages: Vec<Message>,
    pub notices: Vec<Notice>,
}

impl TaskThread {
    fn new(task: Task) -> Self {
        Self {
            task,
            messages: Vec::new(),
            notices: Vec::new(),
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Task list plus one append-only message log per task.
///
/// Every write is addressed by task id, never by "whatever is selected", so a
/// reply that resolves after the participant moved on still lands in the
/// thread it belongs to.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    threads: Vec<TaskThread>,
    active: Option<TaskId>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the task list once. Later calls are ignored while tasks exist.
    /// Returns the number of tasks now held.
    pub fn seed(&mut self, tasks: Vec<Task>) -> usize {
        if self.threads.is_empty() {
            for task in tasks {
                if self.thread(&task.id).is_some() {
                    tracing::warn!(task_id = %task.id, "duplicate task id in task list; keeping first");
                    continue;
                }
                self.threads.push(TaskThread::new(task));
            }
        }
        if self.active.is_none() {
            self.active = self.threads.first().map(|thread| thread.task.id.clone());
        }
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.threads.iter().map(|thread| &thread.task)
    }

    pub fn threads(&self) -> &[TaskThread] {
        self.threads.as_slice()
    }

    pub fn thread(&self, task_id: &TaskId) -> Option<&TaskThread> {
        self.threads.iter().find(|thread| &thread.task.id == task_id)
    }

    pub fn active_task(&self) -> Option<&TaskThread> {
        self.active.as_ref().and_then(|id| self.thread(id))
    }

    pub fn active_task_id(&self) -> Option<&TaskId> {
        self.active.as_ref()
    }

    pub fn select_task(&mut self, task_id: &TaskId) -> anyhow::Result<&TaskThread> {
        if self.thread(task_id).is_none() {
            bail!("unknown task '{task_id}'");
        }
        self.active = Some(task_id.clone());
        self.thread(task_id)
            .ok_or_else(|| anyhow::anyhow!("unknown task '{task_id}'"))
    }

    pub fn append_message(
        &mut self,
        task_id: &TaskId,
        message: Message,
    ) -> anyhow::Result<&TaskThread> {
        let Some(thread) = self.thread_mut(task_id) else {
            bail!("cannot append to unknown task '{task_id}'");
        };
        thread.messages.push(message);
        Ok(&*thread)
    }

    pub fn push_notice(&mut self, task_id: &TaskId, notice: Notice) -> anyhow::Result<()> {
        let Some(thread) = self.thread_mut(task_id) else {
            bail!("cannot attach notice to unknown task '{task_id}'");
        };
        thread.notices.push(notice);
        Ok(())
    }

    /// Seeds a task's log from the backend. Only an untouched thread is
    /// restored, so live messages are never reordered or replaced.
    pub fn restore(&mut self, task_id: &TaskId, messages: Vec<Message>) -> bool {
        match self.thread_mut(task_id) {
            Some(thread) if thread.messages.is_empty() => {
                thread.messages = messages;
                true
            }
            _ => false,
        }
    }

    pub fn history(&self, task_id: &TaskId) -> Vec<Message> {
        self.thread(task_id)
            .map(|thread| thread.messages.clone())
            .unwrap_or_default()
    }

    fn thread_mut(&mut self, task_id: &TaskId) -> Option<&mut TaskThread> {
        self.threads
            .iter_mut()
            .find(|thread| &thread.task.id == task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::ConversationStore;
    use crate::messages::{Message, MessageClock, MessageType, Notice, NoticeKind};
    use crate::tasks::{Task, TaskId, TaskType};

    fn study_tasks() -> Vec<Task> {
        vec![
            Task::new(1, "Vacation", TaskType::Image),
            Task::new(2, "Story", TaskType::Text),
        ]
    }

    #[test]
    fn seed_selects_first_task_once() {
        let mut store = ConversationStore::new();
        assert!(store.active_task().is_none());
        assert_eq!(store.seed(study_tasks()), 2);
        assert_eq!(store.active_task_id(), Some(&TaskId::from(1)));

        assert_eq!(store.seed(vec![Task::new(9, "Late", TaskType::Text)]), 2);
        assert!(store.thread(&TaskId::from(9)).is_none());
    }

    #[test]
    fn seed_with_empty_list_selects_nothing() {
        let mut store = ConversationStore::new();
        assert_eq!(store.seed(Vec::new()), 0);
        assert!(store.active_task().is_none());
    }

    #[test]
    fn append_targets_named_task_only() -> anyhow::Result<()> {
        let mut store = ConversationStore::new();
        let mut clock = MessageClock::new();
        store.seed(study_tasks());
        store.select_task(&TaskId::from(2))?;

        let thread = store.append_message(
            &TaskId::from(1),
            Message::user(clock.next_id(), "a sunset on mars", MessageType::Image),
        )?;
        assert_eq!(thread.messages.len(), 1);
        assert!(store.history(&TaskId::from(2)).is_empty());
        assert_eq!(store.active_task_id(), Some(&TaskId::from(2)));
        Ok(())
    }

    #[test]
    fn unknown_task_is_rejected() {
        let mut store = ConversationStore::new();
        let mut clock = MessageClock::new();
        store.seed(study_tasks());
        assert!(store.select_task(&TaskId::from(7)).is_err());
        assert!(store
            .append_message(
                &TaskId::from(7),
                Message::user(clock.next_id(), "hi", MessageType::Text)
            )
            .is_err());
        assert_eq!(store.active_task_id(), Some(&TaskId::from(1)));
    }

    #[test]
    fn restore_only_fills_empty_threads() -> anyhow::Result<()> {
        let mut store = ConversationStore::new();
        let mut clock = MessageClock::new();
        store.seed(study_tasks());

        let restored = vec![Message::user(clock.next_id(), "earlier", MessageType::Text)];
        assert!(store.restore(&TaskId::from(2), restored.clone()));
        assert!(!store.restore(&TaskId::from(2), restored));
        assert_eq!(store.history(&TaskId::from(2)).len(), 1);
        Ok(())
    }

    #[test]
    fn notices_stay_out_of_message_log() -> anyhow::Result<()> {
        let mut store = ConversationStore::new();
        store.seed(study_tasks());
        store.push_notice(
            &TaskId::from(1),
            Notice::new(NoticeKind::QuotaExceeded, "limit reached"),
        )?;
        let thread = store
            .thread(&TaskId::from(1))
            .ok_or_else(|| anyhow::anyhow!("missing task"))?;
        assert_eq!(thread.notices.len(), 1);
        assert!(thread.messages.is_empty());
        Ok(())
    }
}
