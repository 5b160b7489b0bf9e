use async_trait::async_trait;
use thiserror::Error;

use crate::core::score::Derived;
use crate::core::task::{Comment, CommentId, Feedback, Task, TaskDraft, TaskId, TaskPatch, UserId};

/// Failure reported by a remote collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("not authorized")]
    Unauthorized,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("could not decode response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// The referenced record no longer exists remotely, so local state is stale.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// The authoritative task store the reconciler talks to.
///
/// Every call returns the server's view of the record. Implementations derive
/// total, visibility and dominant category themselves unless the caller
/// passes them explicitly.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create_task(&self, draft: &TaskDraft, user: UserId) -> Result<Task, RemoteError>;

    /// `derived` carries recomputed fields when the patch touches scores.
    /// `None` in the result means the server acknowledged without a body.
    async fn update_task(
        &self,
        id: TaskId,
        patch: &TaskPatch,
        derived: Option<Derived>,
    ) -> Result<Option<Task>, RemoteError>;

    async fn delete_task(&self, id: TaskId) -> Result<(), RemoteError>;

    async fn toggle_completion(&self, id: TaskId, current: bool) -> Result<Task, RemoteError>;

    async fn toggle_hidden(&self, id: TaskId, current: bool) -> Result<Task, RemoteError>;

    async fn set_feedback(&self, id: TaskId, feedback: Option<Feedback>) -> Result<Task, RemoteError>;

    async fn restore_task(&self, id: TaskId) -> Result<Task, RemoteError>;

    async fn fetch_tasks(&self, user: UserId, completed: bool) -> Result<Vec<Task>, RemoteError>;

    async fn add_comment(&self, task_id: TaskId, user: UserId, text: &str) -> Result<Comment, RemoteError>;

    async fn delete_comment(&self, id: CommentId) -> Result<(), RemoteError>;

    async fn list_comments(&self, task_id: TaskId) -> Result<Vec<Comment>, RemoteError>;
}
