//! Wire records exchanged with the REST backend.
//!
//! Dates arrive as loosely formatted strings and go through the
//! [`DateNormalizer`] before anything becomes a [`Task`]. Stored derived
//! fields are checked against the score rules and recomputed on mismatch.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::remote::RemoteError;
use crate::core::date::{DateNormalizer, Timestamp, to_wire};
use crate::core::score::{Category, Derived, MAX_SCORE, MIN_SCORE, Scores};
use crate::core::task::{Comment, Feedback, Task, TaskDraft, TaskPatch, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub title: String,
    pub consequence: i64,
    pub pride: i64,
    pub construction: i64,
    pub total_score: i64,
    #[serde(default)]
    pub ideal_date: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub dominant_category: Option<String>,
    #[serde(default)]
    pub comments: Vec<CommentRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: Uuid,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    pub text: String,
    pub created_at: String,
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

/// A stored record that disagrees with what the score rules or the date
/// parser say about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditIssue {
    ScoreOutOfRange { field: &'static str, value: i64 },
    TotalMismatch { stored: i64, computed: u8 },
    CategoryMismatch { stored: Option<String>, computed: Category },
    UnparseableDate { field: &'static str, value: String },
    UnknownFeedback(String),
}

impl fmt::Display for AuditIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScoreOutOfRange { field, value } => {
                write!(f, "{} = {} is outside {}..={}", field, value, MIN_SCORE, MAX_SCORE)
            }
            Self::TotalMismatch { stored, computed } => {
                write!(f, "stored total {} but scores add up to {}", stored, computed)
            }
            Self::CategoryMismatch { stored, computed } => write!(
                f,
                "stored category {} but scores say {}",
                stored.as_deref().unwrap_or("<none>"),
                computed
            ),
            Self::UnparseableDate { field, value } => {
                write!(f, "{} {:?} is not a recognizable date", field, value)
            }
            Self::UnknownFeedback(value) => write!(f, "unknown feedback {:?}", value),
        }
    }
}

impl TaskRecord {
    fn score_fields(&self) -> [(&'static str, i64); 3] {
        [
            ("consequence", self.consequence),
            ("pride", self.pride),
            ("construction", self.construction),
        ]
    }

    fn scores(&self) -> Option<Scores> {
        let mut values = [0u8; 3];
        for (slot, (_, value)) in values.iter_mut().zip(self.score_fields()) {
            let value = u8::try_from(value).ok()?;
            if !(MIN_SCORE..=MAX_SCORE).contains(&value) {
                return None;
            }
            *slot = value;
        }
        Some(Scores::new(values[0], values[1], values[2]))
    }

    /// Everything wrong with this record, for reporting.
    pub fn audit(&self, dates: &DateNormalizer) -> Vec<AuditIssue> {
        let mut issues = Vec::new();
        for (field, value) in self.score_fields() {
            if !(i64::from(MIN_SCORE)..=i64::from(MAX_SCORE)).contains(&value) {
                issues.push(AuditIssue::ScoreOutOfRange { field, value });
            }
        }
        if let Some(scores) = self.scores() {
            let derived = scores.derive();
            if self.total_score != i64::from(derived.total) {
                issues.push(AuditIssue::TotalMismatch {
                    stored: self.total_score,
                    computed: derived.total,
                });
            }
            let stored = self.dominant_category.as_deref().and_then(Category::parse);
            if stored != Some(derived.dominant) {
                issues.push(AuditIssue::CategoryMismatch {
                    stored: self.dominant_category.clone(),
                    computed: derived.dominant,
                });
            }
        }
        let dates_to_check = [
            ("created_at", Some(&self.created_at)),
            ("updated_at", self.updated_at.as_ref()),
            ("ideal_date", self.ideal_date.as_ref()),
            ("completed_at", self.completed_at.as_ref()),
        ];
        for (field, value) in dates_to_check {
            if let Some(value) = value {
                if dates.parse_str(value).is_none() {
                    issues.push(AuditIssue::UnparseableDate {
                        field,
                        value: value.clone(),
                    });
                }
            }
        }
        for comment in &self.comments {
            if dates.parse_str(&comment.created_at).is_none() {
                issues.push(AuditIssue::UnparseableDate {
                    field: "comment.created_at",
                    value: comment.created_at.clone(),
                });
            }
        }
        if let Some(feedback) = &self.feedback {
            if Feedback::parse(feedback).is_none() {
                issues.push(AuditIssue::UnknownFeedback(feedback.clone()));
            }
        }
        issues
    }

    /// Decode into a domain task. Derived fields are always recomputed;
    /// `hidden` is taken as stored since it may have been toggled by hand.
    pub fn into_task(self, dates: &DateNormalizer) -> Result<Task, RemoteError> {
        let scores = self.scores().ok_or_else(|| {
            RemoteError::Decode(format!(
                "task {} has scores ({}, {}, {}) outside {}..={}",
                self.id, self.consequence, self.pride, self.construction, MIN_SCORE, MAX_SCORE
            ))
        })?;
        let derived = scores.derive();
        if self.total_score != i64::from(derived.total) {
            log::warn!(
                "Task {} stored total {} but scores add up to {}, using {}",
                self.id,
                self.total_score,
                derived.total,
                derived.total
            );
        }

        let created_at = dates.parse_str(&self.created_at).ok_or_else(|| {
            RemoteError::Decode(format!(
                "task {} has unparseable created_at {:?}",
                self.id, self.created_at
            ))
        })?;
        let updated_at = self
            .updated_at
            .as_deref()
            .and_then(|s| dates.parse_str(s))
            .unwrap_or(created_at);
        let ideal_date = optional_date(dates, self.id, "ideal_date", self.ideal_date.as_deref());
        let completed_at = optional_date(dates, self.id, "completed_at", self.completed_at.as_deref());
        let feedback = self.feedback.as_deref().and_then(|s| {
            let parsed = Feedback::parse(s);
            if parsed.is_none() {
                log::warn!("Task {} has unknown feedback {:?}, dropping it", self.id, s);
            }
            parsed
        });

        let mut comments = decode_comments(self.comments, dates);
        comments.sort_by_key(|c| c.created_at);

        Ok(Task {
            id: self.id,
            title: self.title,
            consequence: scores.consequence,
            pride: scores.pride,
            construction: scores.construction,
            total_score: derived.total,
            hidden: self.hidden,
            dominant_category: derived.dominant,
            ideal_date,
            completed: self.completed,
            completed_at,
            feedback,
            comments,
            created_at,
            updated_at,
            owner: self.user_id,
            pending: BTreeMap::new(),
        })
    }
}

impl CommentRecord {
    pub fn into_comment(self, dates: &DateNormalizer) -> Result<Comment, RemoteError> {
        let created_at = dates.parse_str(&self.created_at).ok_or_else(|| {
            RemoteError::Decode(format!(
                "comment {} has unparseable created_at {:?}",
                self.id, self.created_at
            ))
        })?;
        Ok(Comment {
            id: self.id,
            text: self.text,
            created_at,
            author: self.user_id,
        })
    }
}

/// Decode a fetched batch. Records that cannot become tasks are logged and
/// skipped so one bad row does not sink the whole resync.
pub fn decode_tasks(records: Vec<TaskRecord>, dates: &DateNormalizer) -> Vec<Task> {
    records
        .into_iter()
        .filter_map(|record| {
            let id = record.id;
            match record.into_task(dates) {
                Ok(task) => Some(task),
                Err(e) => {
                    log::warn!("Skipping undecodable task {}: {}", id, e);
                    None
                }
            }
        })
        .collect()
}

pub fn decode_comments(records: Vec<CommentRecord>, dates: &DateNormalizer) -> Vec<Comment> {
    records
        .into_iter()
        .filter_map(|record| {
            let id = record.id;
            match record.into_comment(dates) {
                Ok(comment) => Some(comment),
                Err(e) => {
                    log::warn!("Skipping undecodable comment {}: {}", id, e);
                    None
                }
            }
        })
        .collect()
}

fn optional_date(dates: &DateNormalizer, id: Uuid, field: &str, value: Option<&str>) -> Option<Timestamp> {
    let value = value?;
    let parsed = dates.parse_str(value);
    if parsed.is_none() {
        log::warn!("Task {} has unparseable {} {:?}, treating as unset", id, field, value);
    }
    parsed
}

/// Body for creating a task. Derived fields are sent explicitly so the
/// backend stores what the client computed.
pub fn insert_body(draft: &TaskDraft, user: UserId) -> Value {
    let derived = draft.scores().derive();
    json!({
        "title": draft.title.trim(),
        "consequence": draft.consequence,
        "pride": draft.pride,
        "construction": draft.construction,
        "total_score": derived.total,
        "hidden": draft.hidden.unwrap_or(derived.hidden),
        "dominant_category": derived.dominant.as_str(),
        "ideal_date": to_wire(draft.ideal_date),
        "user_id": user,
    })
}

/// Body for a partial update. Only supplied fields are sent.
pub fn patch_body(patch: &TaskPatch, derived: Option<Derived>, now: Timestamp) -> Value {
    let mut body = Map::new();
    if let Some(title) = &patch.title {
        body.insert("title".into(), json!(title.trim()));
    }
    let scores = [
        ("consequence", patch.consequence),
        ("pride", patch.pride),
        ("construction", patch.construction),
    ];
    for (field, value) in scores {
        if let Some(value) = value {
            body.insert(field.into(), json!(value));
        }
    }
    if let Some(date) = patch.ideal_date {
        body.insert("ideal_date".into(), json!(to_wire(date)));
    }
    if let Some(derived) = derived {
        body.insert("total_score".into(), json!(derived.total));
        body.insert("hidden".into(), json!(derived.hidden));
        body.insert("dominant_category".into(), json!(derived.dominant.as_str()));
    }
    body.insert("updated_at".into(), json!(to_wire(Some(now))));
    Value::Object(body)
}
