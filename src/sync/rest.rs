use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;

use super::remote::{RemoteError, RemoteStore};
use super::wire::{CommentRecord, TaskRecord, decode_comments, decode_tasks, insert_body, patch_body};
use crate::core::date::{DateNormalizer, to_wire};
use crate::core::score::Derived;
use crate::core::task::{Comment, CommentId, Feedback, Task, TaskDraft, TaskId, TaskPatch, UserId};

const TASK_SELECT: &str = "*,comments(*)";

/// PostgREST-style backend over HTTPS.
#[derive(Clone)]
pub struct RestRemote {
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    dates: Arc<DateNormalizer>,
    http: Client,
}

impl RestRemote {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .build()
            .map_err(|e| RemoteError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token: None,
            dates: Arc::new(DateNormalizer::default()),
            http,
        })
    }

    /// Authenticate as a signed-in user instead of with the bare API key.
    pub fn with_access_token(mut self, token: &str) -> Self {
        self.access_token = Some(token.to_string());
        self
    }

    pub fn with_date_normalizer(mut self, dates: Arc<DateNormalizer>) -> Self {
        self.dates = dates;
        self
    }

    /// Raw task records, undecoded, for auditing.
    pub async fn fetch_records(&self, user: UserId, completed: bool) -> Result<Vec<TaskRecord>, RemoteError> {
        let request = self.request(Method::GET, "tasks").query(&[
            ("select", TASK_SELECT.to_string()),
            ("user_id", format!("eq.{}", user)),
            ("completed", format!("eq.{}", completed)),
            ("order", "created_at.asc".to_string()),
        ]);
        self.send_json(request).await
    }

    pub fn date_normalizer(&self) -> &DateNormalizer {
        &self.dates
    }

    // --- Private helpers ---

    fn request(&self, method: Method, table: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let token = self.access_token.as_deref().unwrap_or(&self.api_key);
        self.http
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(token)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, RemoteError> {
        let resp = request
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            log::debug!("Remote returned {}: {}", status, body);
            return Err(classify_status(status, body));
        }
        resp.json::<T>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    /// PATCH or DELETE one task by id and return the stored representation.
    async fn write_task(&self, method: Method, id: TaskId, body: Option<Value>) -> Result<Vec<TaskRecord>, RemoteError> {
        let mut request = self
            .request(method, "tasks")
            .query(&[("id", format!("eq.{}", id)), ("select", TASK_SELECT.to_string())])
            .header("Prefer", "return=representation");
        if let Some(body) = body {
            request = request.json(&body);
        }
        self.send_json(request).await
    }

    async fn patch_task(&self, id: TaskId, body: Value) -> Result<Task, RemoteError> {
        let records = self.write_task(Method::PATCH, id, Some(body)).await?;
        let record = first_or_not_found(records, || format!("task {}", id))?;
        record.into_task(&self.dates)
    }
}

/// Map a non-success status to the remote error taxonomy.
fn classify_status(status: StatusCode, body: String) -> RemoteError {
    match status {
        StatusCode::NOT_FOUND => RemoteError::NotFound(body),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized,
        s => RemoteError::Rejected {
            status: s.as_u16(),
            message: body,
        },
    }
}

/// An empty representation means the filter matched nothing.
fn first_or_not_found<T>(records: Vec<T>, what: impl FnOnce() -> String) -> Result<T, RemoteError> {
    records
        .into_iter()
        .next()
        .ok_or_else(|| RemoteError::NotFound(what()))
}

#[async_trait]
impl RemoteStore for RestRemote {
    async fn create_task(&self, draft: &TaskDraft, user: UserId) -> Result<Task, RemoteError> {
        let request = self
            .request(Method::POST, "tasks")
            .query(&[("select", TASK_SELECT)])
            .header("Prefer", "return=representation")
            .json(&insert_body(draft, user));
        let records: Vec<TaskRecord> = self.send_json(request).await?;
        let record = records
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Decode("insert returned no representation".to_string()))?;
        record.into_task(&self.dates)
    }

    async fn update_task(
        &self,
        id: TaskId,
        patch: &TaskPatch,
        derived: Option<Derived>,
    ) -> Result<Option<Task>, RemoteError> {
        let body = patch_body(patch, derived, Utc::now());
        self.patch_task(id, body).await.map(Some)
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), RemoteError> {
        let records = self.write_task(Method::DELETE, id, None).await?;
        first_or_not_found(records, || format!("task {}", id)).map(|_| ())
    }

    async fn toggle_completion(&self, id: TaskId, current: bool) -> Result<Task, RemoteError> {
        let now = Utc::now();
        let completed_at = if current { None } else { Some(now) };
        let body = json!({
            "completed": !current,
            "completed_at": to_wire(completed_at),
            "updated_at": to_wire(Some(now)),
        });
        self.patch_task(id, body).await
    }

    async fn toggle_hidden(&self, id: TaskId, current: bool) -> Result<Task, RemoteError> {
        let body = json!({
            "hidden": !current,
            "updated_at": to_wire(Some(Utc::now())),
        });
        self.patch_task(id, body).await
    }

    async fn set_feedback(&self, id: TaskId, feedback: Option<Feedback>) -> Result<Task, RemoteError> {
        let body = json!({
            "feedback": feedback.map(|f| f.as_str()),
            "updated_at": to_wire(Some(Utc::now())),
        });
        self.patch_task(id, body).await
    }

    async fn restore_task(&self, id: TaskId) -> Result<Task, RemoteError> {
        let now = to_wire(Some(Utc::now()));
        let body = json!({
            "completed": false,
            "completed_at": null,
            "feedback": null,
            "ideal_date": now,
            "updated_at": now,
        });
        self.patch_task(id, body).await
    }

    async fn fetch_tasks(&self, user: UserId, completed: bool) -> Result<Vec<Task>, RemoteError> {
        let records = self.fetch_records(user, completed).await?;
        log::debug!(
            "Fetched {} {} task records",
            records.len(),
            if completed { "completed" } else { "active" }
        );
        Ok(decode_tasks(records, &self.dates))
    }

    async fn add_comment(&self, task_id: TaskId, user: UserId, text: &str) -> Result<Comment, RemoteError> {
        let request = self
            .request(Method::POST, "comments")
            .header("Prefer", "return=representation")
            .json(&json!({
                "task_id": task_id,
                "user_id": user,
                "text": text.trim(),
            }));
        let records: Vec<CommentRecord> = match self.send_json(request).await {
            Ok(records) => records,
            // Foreign key violation: the task is gone.
            Err(RemoteError::Rejected { status: 409, message }) => {
                return Err(RemoteError::NotFound(message));
            }
            Err(e) => return Err(e),
        };
        let record = records
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Decode("insert returned no representation".to_string()))?;
        record.into_comment(&self.dates)
    }

    async fn delete_comment(&self, id: CommentId) -> Result<(), RemoteError> {
        let request = self
            .request(Method::DELETE, "comments")
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation");
        let records: Vec<CommentRecord> = self.send_json(request).await?;
        first_or_not_found(records, || format!("comment {}", id)).map(|_| ())
    }

    async fn list_comments(&self, task_id: TaskId) -> Result<Vec<Comment>, RemoteError> {
        let request = self.request(Method::GET, "comments").query(&[
            ("task_id", format!("eq.{}", task_id)),
            ("order", "created_at.asc".to_string()),
        ]);
        let records: Vec<CommentRecord> = self.send_json(request).await?;
        Ok(decode_comments(records, &self.dates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(StatusCode::NOT_FOUND, true)]
    #[case(StatusCode::UNAUTHORIZED, false)]
    #[case(StatusCode::BAD_REQUEST, false)]
    #[case(StatusCode::INTERNAL_SERVER_ERROR, false)]
    fn only_404_is_not_found(#[case] status: StatusCode, #[case] not_found: bool) {
        assert_eq!(classify_status(status, String::new()).is_not_found(), not_found);
    }

    #[test]
    fn auth_failures_are_unauthorized() {
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN, "nope".into()),
            RemoteError::Unauthorized
        );
        assert_eq!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "bad".into()),
            RemoteError::Rejected {
                status: 422,
                message: "bad".into()
            }
        );
    }

    #[test]
    fn empty_representation_is_not_found() {
        let err = first_or_not_found(Vec::<TaskRecord>::new(), || "task x".into()).unwrap_err();
        assert_eq!(err, RemoteError::NotFound("task x".into()));
        assert_eq!(first_or_not_found(vec![1, 2], || String::new()), Ok(1));
    }

    #[test]
    fn base_url_is_normalized() {
        let remote = RestRemote::new("https://db.example.com/", "key").unwrap();
        assert_eq!(remote.base_url, "https://db.example.com");
        assert!(remote.access_token.is_none());
        let remote = remote.with_access_token("jwt");
        assert_eq!(remote.access_token.as_deref(), Some("jwt"));
    }
}
