pub mod memory;
pub mod remote;
pub mod rest;
pub mod wire;

use chrono::Utc;
use futures::future::try_join;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedMutexGuard, mpsc, watch};
use tokio::time::Instant;
use uuid::Uuid;

use crate::core::score::Derived;
use crate::core::store::{Command, TaskStore};
use crate::core::task::{
    Comment, CommentId, Feedback, Operation, Task, TaskDraft, TaskId, TaskPatch, UserId,
    ValidationError,
};
pub use memory::{InMemoryRemote, RemoteCall};
pub use remote::{RemoteError, RemoteStore};
pub use rest::RestRemote;

/// Current sync status displayed in the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing,
    Synced,
    Error(String),
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::Idle
    }
}

/// Why an operation failed, as seen at the operation boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The record was gone remotely; a full resync has been run.
    #[error("{0}, resynchronized")]
    NotFound(RemoteError),
    #[error(transparent)]
    Transient(RemoteError),
}

impl From<RemoteError> for SyncError {
    fn from(e: RemoteError) -> Self {
        if e.is_not_found() {
            Self::NotFound(e)
        } else {
            Self::Transient(e)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A user-facing toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Who is acting. Passed into every operation that needs an identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Session {
    pub user_id: Option<UserId>,
}

impl Session {
    pub fn signed_in(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_signed_in(&self) -> bool {
        self.user_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Minimum gap between the end of one resync and a non-forced next one.
    pub debounce: Duration,
    /// How long `Synced` is shown before falling back to `Idle`.
    pub status_reset: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(5000),
            status_reset: Duration::from_millis(3000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InFlight,
    Debounced,
    Unauthenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncOutcome {
    Completed { active: usize, completed: usize },
    Skipped(SkipReason),
}

/// One async mutex per task id, so mutations of the same task run one at a
/// time while distinct tasks proceed concurrently.
#[derive(Default)]
pub struct TaskLocks {
    locks: Mutex<HashMap<TaskId, Arc<tokio::sync::Mutex<()>>>>,
}

impl TaskLocks {
    pub async fn acquire(&self, id: TaskId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            // Nobody holds or waits on these any more.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct ResyncGuard {
    in_flight: usize,
    last_finished: Option<Instant>,
}

/// Remote-first orchestration around a [`TaskStore`].
///
/// Local state only changes after the remote confirms. Failures leave the
/// store as it was and are reported on the notice channel; a `NotFound`
/// means the local copy is stale and triggers a full resync instead.
pub struct SyncReconciler {
    remote: Arc<dyn RemoteStore>,
    settings: SyncSettings,
    store: watch::Sender<TaskStore>,
    status: Arc<watch::Sender<SyncStatus>>,
    status_epoch: Arc<AtomicU64>,
    notices: mpsc::UnboundedSender<Notice>,
    resync: Mutex<ResyncGuard>,
    locks: TaskLocks,
}

impl SyncReconciler {
    pub fn new(remote: Arc<dyn RemoteStore>, settings: SyncSettings) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (store, _) = watch::channel(TaskStore::default());
        let (status, _) = watch::channel(SyncStatus::Idle);
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let reconciler = Self {
            remote,
            settings,
            store,
            status: Arc::new(status),
            status_epoch: Arc::new(AtomicU64::new(0)),
            notices,
            resync: Mutex::new(ResyncGuard::default()),
            locks: TaskLocks::default(),
        };
        (reconciler, notice_rx)
    }

    /// The current snapshot. Readers may see a slightly stale value.
    pub fn snapshot(&self) -> TaskStore {
        self.store.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskStore> {
        self.store.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn settings(&self) -> SyncSettings {
        self.settings
    }

    /// Create a task. Without a signed-in user it stays local.
    pub async fn create_task(&self, session: &Session, draft: TaskDraft) -> Result<Task, SyncError> {
        self.validate(draft.validate())?;

        let Some(user) = session.user_id else {
            let task = Task::from_draft(Uuid::new_v4(), &draft, None, Utc::now());
            log::info!("Created local-only task {} (not signed in)", task.id);
            self.commit(&Command::Add(task.clone()));
            return Ok(task);
        };

        match self.remote.create_task(&draft, user).await {
            Ok(task) => {
                log::debug!("Created task {}", task.id);
                self.commit(&Command::Add(task.clone()));
                self.notify(Notice::info(format!("Added \"{}\"", task.title)));
                Ok(task)
            }
            Err(e) => Err(self.handle_remote_failure(session, "Create task", e).await),
        }
    }

    pub async fn update_task(&self, session: &Session, id: TaskId, patch: TaskPatch) -> Result<(), SyncError> {
        self.validate(patch.validate())?;
        if patch.is_empty() {
            return Ok(());
        }
        let _guard = self.locks.acquire(id).await;

        // Derived fields need the full local score set to merge against.
        let derived: Option<Derived> = if patch.touches_scores() {
            let Some(task) = self.snapshot().get(id).cloned() else {
                log::debug!("Not updating scores of unknown task {}", id);
                return Ok(());
            };
            Some(patch.merged_scores(&task.scores()).derive())
        } else {
            None
        };
        let server = self
            .confirm(session, id, Operation::Update, self.remote.update_task(id, &patch, derived))
            .await?;

        let command = match server {
            Some(task) if self.snapshot().contains(id) => Command::Add(task),
            _ => Command::Update {
                id,
                patch,
                at: Utc::now(),
            },
        };
        self.commit(&command);
        Ok(())
    }

    pub async fn delete_task(&self, session: &Session, id: TaskId) -> Result<(), SyncError> {
        let _guard = self.locks.acquire(id).await;
        self.confirm(session, id, Operation::Delete, self.remote.delete_task(id))
            .await?;
        self.commit(&Command::Remove(id));
        self.notify(Notice::info("Task deleted"));
        Ok(())
    }

    pub async fn toggle_completion(&self, session: &Session, id: TaskId) -> Result<(), SyncError> {
        let _guard = self.locks.acquire(id).await;
        let Some(current) = self.snapshot().get(id).map(|t| t.completed) else {
            log::debug!("Not toggling completion of unknown task {}", id);
            return Ok(());
        };
        let task = self
            .confirm(
                session,
                id,
                Operation::ToggleCompletion,
                self.remote.toggle_completion(id, current),
            )
            .await?;
        self.commit(&Command::SetCompletion {
            id,
            completed: task.completed,
            at: task.completed_at.unwrap_or(task.updated_at),
        });
        Ok(())
    }

    /// Flips the stored flag. Not reconciled against the score threshold.
    pub async fn toggle_hidden(&self, session: &Session, id: TaskId) -> Result<(), SyncError> {
        let _guard = self.locks.acquire(id).await;
        let Some(current) = self.snapshot().get(id).map(|t| t.hidden) else {
            log::debug!("Not toggling visibility of unknown task {}", id);
            return Ok(());
        };
        let task = self
            .confirm(
                session,
                id,
                Operation::ToggleHidden,
                self.remote.toggle_hidden(id, current),
            )
            .await?;
        self.commit(&Command::SetHidden {
            id,
            hidden: task.hidden,
        });
        Ok(())
    }

    pub async fn set_feedback(
        &self,
        session: &Session,
        id: TaskId,
        feedback: Option<Feedback>,
    ) -> Result<(), SyncError> {
        let _guard = self.locks.acquire(id).await;
        let Some(completed) = self.snapshot().get(id).map(|t| t.completed) else {
            log::debug!("Not setting feedback on unknown task {}", id);
            return Ok(());
        };
        if feedback.is_some() && !completed {
            return Err(self.reject(ValidationError::FeedbackOnActiveTask));
        }
        let task = self
            .confirm(
                session,
                id,
                Operation::SetFeedback,
                self.remote.set_feedback(id, feedback),
            )
            .await?;
        self.commit(&Command::SetFeedback {
            id,
            feedback: task.feedback,
        });
        Ok(())
    }

    /// Back to active, re-targeted to the moment of restoring.
    pub async fn restore_task(&self, session: &Session, id: TaskId) -> Result<(), SyncError> {
        let _guard = self.locks.acquire(id).await;
        let task = self
            .confirm(session, id, Operation::Restore, self.remote.restore_task(id))
            .await?;
        let command = if self.snapshot().contains(id) {
            Command::Restore {
                id,
                at: task.ideal_date.unwrap_or(task.updated_at),
            }
        } else {
            Command::Add(task)
        };
        self.commit(&command);
        Ok(())
    }

    pub async fn add_comment(&self, session: &Session, task_id: TaskId, text: &str) -> Result<Comment, SyncError> {
        if text.trim().is_empty() {
            return Err(self.reject(ValidationError::EmptyComment));
        }
        let Some(user) = session.user_id else {
            return Err(self.reject(ValidationError::SignedOut));
        };
        let _guard = self.locks.acquire(task_id).await;
        let comment = self
            .confirm(
                session,
                task_id,
                Operation::Comment,
                self.remote.add_comment(task_id, user, text),
            )
            .await?;
        self.commit(&Command::AddComment {
            task_id,
            comment: comment.clone(),
        });
        Ok(comment)
    }

    /// Delete a comment, then reload the task's comment list from the remote.
    pub async fn delete_comment(
        &self,
        session: &Session,
        task_id: TaskId,
        comment_id: CommentId,
    ) -> Result<(), SyncError> {
        let _guard = self.locks.acquire(task_id).await;
        self.confirm(
            session,
            task_id,
            Operation::Comment,
            self.remote.delete_comment(comment_id),
        )
        .await?;
        self.reload_comments(session, task_id).await
    }

    pub async fn refresh_comments(&self, session: &Session, task_id: TaskId) -> Result<(), SyncError> {
        let _guard = self.locks.acquire(task_id).await;
        self.reload_comments(session, task_id).await
    }

    /// Replace the whole store with the remote's active and completed sets.
    ///
    /// A non-forced request is dropped while another resync is in flight or
    /// within the debounce window after the last one finished.
    pub async fn sync_from_remote(&self, session: &Session, force: bool) -> Result<ResyncOutcome, SyncError> {
        let Some(user) = session.user_id else {
            log::info!("Skipping resync: not signed in");
            return Ok(ResyncOutcome::Skipped(SkipReason::Unauthenticated));
        };

        {
            let mut guard = self.resync_guard();
            if !force {
                if guard.in_flight > 0 {
                    log::info!("Skipping resync: another one is in flight");
                    return Ok(ResyncOutcome::Skipped(SkipReason::InFlight));
                }
                if let Some(last) = guard.last_finished {
                    if last.elapsed() < self.settings.debounce {
                        log::info!(
                            "Skipping resync: last one finished {}ms ago",
                            last.elapsed().as_millis()
                        );
                        return Ok(ResyncOutcome::Skipped(SkipReason::Debounced));
                    }
                }
            }
            guard.in_flight += 1;
        }

        log::info!("Starting resync (forced: {})", force);
        self.set_status(SyncStatus::Syncing);

        let result = try_join(
            self.remote.fetch_tasks(user, false),
            self.remote.fetch_tasks(user, true),
        )
        .await;

        {
            let mut guard = self.resync_guard();
            guard.in_flight = guard.in_flight.saturating_sub(1);
            guard.last_finished = Some(Instant::now());
        }

        match result {
            Ok((active, completed)) => {
                let counts = (active.len(), completed.len());
                log::info!(
                    "Resync finished: {} active, {} completed",
                    counts.0,
                    counts.1
                );
                let mut all = active;
                all.extend(completed);
                self.store.send_replace(TaskStore::new(all));
                self.set_status(SyncStatus::Synced);
                self.schedule_status_reset();
                Ok(ResyncOutcome::Completed {
                    active: counts.0,
                    completed: counts.1,
                })
            }
            Err(e) => {
                log::error!("Resync failed: {}", e);
                self.set_status(SyncStatus::Error(e.to_string()));
                self.notify(Notice::error(format!("Sync failed: {}", e)));
                Err(SyncError::Transient(e))
            }
        }
    }

    // --- Private helpers ---

    /// Mark `op` pending, await the remote call, clear the flag, and route
    /// failures through [`handle_remote_failure`](Self::handle_remote_failure).
    async fn confirm<T, F>(&self, session: &Session, id: TaskId, op: Operation, call: F) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        self.commit(&Command::SetPending {
            id,
            op,
            pending: true,
        });
        let result = call.await;
        self.commit(&Command::SetPending {
            id,
            op,
            pending: false,
        });
        match result {
            Ok(value) => {
                log::debug!("{} confirmed for task {}", op.label(), id);
                Ok(value)
            }
            Err(e) => Err(self.handle_remote_failure(session, op.label(), e).await),
        }
    }

    async fn handle_remote_failure(&self, session: &Session, label: &str, error: RemoteError) -> SyncError {
        if error.is_not_found() {
            log::warn!("{} failed, record missing remotely ({}); resyncing", label, error);
            self.notify(Notice::error(format!(
                "{} failed: the task no longer exists. Reloading.",
                label
            )));
            if let Err(e) = self.sync_from_remote(session, true).await {
                log::error!("Resync after missing record failed: {}", e);
            }
        } else {
            log::error!("{} failed: {}", label, error);
            self.notify(Notice::error(format!("{} failed: {}", label, error)));
        }
        SyncError::from(error)
    }

    async fn reload_comments(&self, session: &Session, task_id: TaskId) -> Result<(), SyncError> {
        match self.remote.list_comments(task_id).await {
            Ok(comments) => {
                self.commit(&Command::ReplaceComments { task_id, comments });
                Ok(())
            }
            Err(e) => Err(self.handle_remote_failure(session, "Load comments", e).await),
        }
    }

    fn validate(&self, result: Result<(), ValidationError>) -> Result<(), SyncError> {
        result.map_err(|e| self.reject(e))
    }

    fn reject(&self, error: ValidationError) -> SyncError {
        log::debug!("Rejected locally: {}", error);
        self.notify(Notice::error(error.to_string()));
        SyncError::Validation(error)
    }

    /// Apply a transition, publishing only when it produced a new snapshot.
    fn commit(&self, command: &Command) {
        self.store.send_if_modified(|store| {
            let next = store.apply(command);
            if next.same_snapshot(store) {
                return false;
            }
            *store = next;
            true
        });
    }

    fn notify(&self, notice: Notice) {
        // No listener is fine; the error is still returned to the caller.
        let _ = self.notices.send(notice);
    }

    fn set_status(&self, status: SyncStatus) {
        self.status_epoch.fetch_add(1, Ordering::SeqCst);
        self.status.send_replace(status);
    }

    /// Fall back from `Synced` to `Idle` unless the status moved on meanwhile.
    fn schedule_status_reset(&self) {
        let epoch = self.status_epoch.load(Ordering::SeqCst);
        let current = self.status_epoch.clone();
        let status = self.status.clone();
        let delay = self.settings.status_reset;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if current.load(Ordering::SeqCst) == epoch {
                status.send_if_modified(|s| {
                    if *s == SyncStatus::Synced {
                        *s = SyncStatus::Idle;
                        true
                    } else {
                        false
                    }
                });
            }
        });
    }

    fn resync_guard(&self) -> MutexGuard<'_, ResyncGuard> {
        self.resync.lock().unwrap_or_else(|p| p.into_inner())
    }
}
