//! In-process remote store.
//!
//! Behaves like the real backend: it assigns ids and timestamps, derives
//! score fields and answers `NotFound` for unknown ids. Call counters and
//! one-shot failure injection make it the backbone of reconciler tests, and
//! `tally --demo` runs against a seeded instance.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use super::remote::{RemoteError, RemoteStore};
use crate::core::score::Derived;
use crate::core::task::{Comment, CommentId, Feedback, Task, TaskDraft, TaskId, TaskPatch, UserId};

/// Remote operations, used to count calls and target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteCall {
    CreateTask,
    UpdateTask,
    DeleteTask,
    ToggleCompletion,
    ToggleHidden,
    SetFeedback,
    RestoreTask,
    FetchTasks,
    AddComment,
    DeleteComment,
    ListComments,
}

#[derive(Default)]
struct State {
    tasks: Vec<Task>,
    calls: HashMap<RemoteCall, usize>,
    failures: HashMap<RemoteCall, RemoteError>,
}

#[derive(Default)]
pub struct InMemoryRemote {
    state: Mutex<State>,
    latency: Option<Duration>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(tasks: Vec<Task>) -> Self {
        let remote = Self::new();
        remote.lock().tasks = tasks;
        remote
    }

    /// Delay every response, so callers can overlap requests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self, call: RemoteCall) -> usize {
        self.lock().calls.get(&call).copied().unwrap_or(0)
    }

    /// The next `call` fails with `error`; later ones succeed again.
    pub fn fail_next(&self, call: RemoteCall, error: RemoteError) {
        self.lock().failures.insert(call, error);
    }

    /// Insert or replace a record behind the client's back.
    pub fn insert(&self, task: Task) {
        let mut state = self.lock();
        match state.tasks.iter().position(|t| t.id == task.id) {
            Some(i) => state.tasks[i] = task,
            None => state.tasks.push(task),
        }
    }

    /// Remove a record behind the client's back.
    pub fn remove(&self, id: TaskId) -> Option<Task> {
        let mut state = self.lock();
        let index = state.tasks.iter().position(|t| t.id == id)?;
        Some(state.tasks.remove(index))
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.lock().tasks.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count the call, wait out the latency and surface an injected failure.
    async fn enter(&self, call: RemoteCall) -> Result<(), RemoteError> {
        let injected = {
            let mut state = self.lock();
            *state.calls.entry(call).or_insert(0) += 1;
            state.failures.remove(&call)
        };
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match injected {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn modify(&self, id: TaskId, f: impl FnOnce(&mut Task)) -> Result<Task, RemoteError> {
        let mut state = self.lock();
        let task = state
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| RemoteError::NotFound(format!("task {}", id)))?;
        f(task);
        Ok(task.clone())
    }
}

fn rejected(message: impl std::fmt::Display) -> RemoteError {
    RemoteError::Rejected {
        status: 400,
        message: message.to_string(),
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn create_task(&self, draft: &TaskDraft, user: UserId) -> Result<Task, RemoteError> {
        self.enter(RemoteCall::CreateTask).await?;
        draft.validate().map_err(rejected)?;
        let task = Task::from_draft(Uuid::new_v4(), draft, Some(user), Utc::now());
        self.lock().tasks.push(task.clone());
        Ok(task)
    }

    async fn update_task(
        &self,
        id: TaskId,
        patch: &TaskPatch,
        derived: Option<Derived>,
    ) -> Result<Option<Task>, RemoteError> {
        self.enter(RemoteCall::UpdateTask).await?;
        patch.validate().map_err(rejected)?;
        let task = self.modify(id, |task| {
            task.apply_patch(patch, Utc::now());
            if let Some(derived) = derived {
                task.total_score = derived.total;
                task.hidden = derived.hidden;
                task.dominant_category = derived.dominant;
            }
        })?;
        Ok(Some(task))
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), RemoteError> {
        self.enter(RemoteCall::DeleteTask).await?;
        self.remove(id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(format!("task {}", id)))
    }

    async fn toggle_completion(&self, id: TaskId, current: bool) -> Result<Task, RemoteError> {
        self.enter(RemoteCall::ToggleCompletion).await?;
        self.modify(id, |task| task.set_completed(!current, Utc::now()))
    }

    async fn toggle_hidden(&self, id: TaskId, current: bool) -> Result<Task, RemoteError> {
        self.enter(RemoteCall::ToggleHidden).await?;
        self.modify(id, |task| {
            task.hidden = !current;
            task.updated_at = Utc::now();
        })
    }

    async fn set_feedback(&self, id: TaskId, feedback: Option<Feedback>) -> Result<Task, RemoteError> {
        self.enter(RemoteCall::SetFeedback).await?;
        self.modify(id, |task| {
            task.feedback = feedback;
            task.updated_at = Utc::now();
        })
    }

    async fn restore_task(&self, id: TaskId) -> Result<Task, RemoteError> {
        self.enter(RemoteCall::RestoreTask).await?;
        self.modify(id, |task| task.restore(Utc::now()))
    }

    async fn fetch_tasks(&self, user: UserId, completed: bool) -> Result<Vec<Task>, RemoteError> {
        self.enter(RemoteCall::FetchTasks).await?;
        let mut tasks: Vec<Task> = self
            .lock()
            .tasks
            .iter()
            .filter(|t| t.owner == Some(user) && t.completed == completed)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn add_comment(&self, task_id: TaskId, user: UserId, text: &str) -> Result<Comment, RemoteError> {
        self.enter(RemoteCall::AddComment).await?;
        if text.trim().is_empty() {
            return Err(rejected("comment text must not be empty"));
        }
        let comment = Comment {
            id: Uuid::new_v4(),
            text: text.trim().to_string(),
            created_at: Utc::now(),
            author: Some(user),
        };
        let stored = comment.clone();
        self.modify(task_id, move |task| task.comments.push(stored))?;
        Ok(comment)
    }

    async fn delete_comment(&self, id: CommentId) -> Result<(), RemoteError> {
        self.enter(RemoteCall::DeleteComment).await?;
        let mut state = self.lock();
        for task in state.tasks.iter_mut() {
            if let Some(index) = task.comments.iter().position(|c| c.id == id) {
                task.comments.remove(index);
                return Ok(());
            }
        }
        Err(RemoteError::NotFound(format!("comment {}", id)))
    }

    async fn list_comments(&self, task_id: TaskId) -> Result<Vec<Comment>, RemoteError> {
        self.enter(RemoteCall::ListComments).await?;
        let state = self.lock();
        let task = state
            .tasks
            .iter()
            .find(|t| t.id == task_id)
            .ok_or_else(|| RemoteError::NotFound(format!("task {}", task_id)))?;
        let mut comments = task.comments.clone();
        comments.sort_by_key(|c| c.created_at);
        Ok(comments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::score::Category;

    #[tokio::test]
    async fn create_assigns_id_and_derives() {
        let remote = InMemoryRemote::new();
        let user = Uuid::new_v4();
        let x = remote
            .create_task(&TaskDraft::new("X", 5, 5, 5), user)
            .await
            .unwrap();
        assert_eq!(x.total_score, 15);
        assert!(!x.hidden);
        assert_eq!(x.dominant_category, Category::Balanced);
        assert_eq!(x.owner, Some(user));
        assert_eq!(remote.snapshot(), vec![x]);
        assert_eq!(remote.calls(RemoteCall::CreateTask), 1);
    }

    #[tokio::test]
    async fn create_rejects_invalid_drafts() {
        let remote = InMemoryRemote::new();
        let err = remote
            .create_task(&TaskDraft::new("", 3, 3, 3), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { status: 400, .. }));
        assert!(remote.snapshot().is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let remote = InMemoryRemote::new();
        let id = Uuid::new_v4();
        assert!(remote.toggle_hidden(id, false).await.unwrap_err().is_not_found());
        assert!(remote.delete_task(id).await.unwrap_err().is_not_found());
        assert!(remote.list_comments(id).await.unwrap_err().is_not_found());
        assert!(remote.delete_comment(id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let remote = InMemoryRemote::new();
        let user = Uuid::new_v4();
        remote.fail_next(RemoteCall::FetchTasks, RemoteError::Transport("offline".into()));
        assert_eq!(
            remote.fetch_tasks(user, false).await,
            Err(RemoteError::Transport("offline".into()))
        );
        assert_eq!(remote.fetch_tasks(user, false).await, Ok(Vec::new()));
        assert_eq!(remote.calls(RemoteCall::FetchTasks), 2);
    }

    #[tokio::test]
    async fn fetch_splits_by_owner_and_completion() {
        let remote = InMemoryRemote::new();
        let me = Uuid::new_v4();
        let someone = Uuid::new_v4();
        let mine = remote.create_task(&TaskDraft::new("mine", 3, 3, 3), me).await.unwrap();
        remote
            .create_task(&TaskDraft::new("theirs", 3, 3, 3), someone)
            .await
            .unwrap();
        let done = remote.create_task(&TaskDraft::new("done", 4, 4, 4), me).await.unwrap();
        remote.toggle_completion(done.id, false).await.unwrap();

        let active = remote.fetch_tasks(me, false).await.unwrap();
        let completed = remote.fetch_tasks(me, true).await.unwrap();
        assert_eq!(active, vec![mine]);
        assert_eq!(completed.len(), 1);
        assert!(completed[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn comments_round_trip_through_the_task() {
        let remote = InMemoryRemote::new();
        let me = Uuid::new_v4();
        let task = remote.create_task(&TaskDraft::new("talk", 3, 3, 3), me).await.unwrap();
        let comment = remote.add_comment(task.id, me, " hello ").await.unwrap();
        assert_eq!(comment.text, "hello");
        assert_eq!(remote.list_comments(task.id).await.unwrap(), vec![comment.clone()]);
        remote.delete_comment(comment.id).await.unwrap();
        assert!(remote.list_comments(task.id).await.unwrap().is_empty());
    }
}
