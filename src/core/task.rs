use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use super::date::Timestamp;
use super::score::{Category, MAX_SCORE, MIN_SCORE, Scores};

pub type TaskId = Uuid;
pub type CommentId = Uuid;
pub type UserId = Uuid;

/// Rejected input, caught before anything leaves the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("{field} must be between 1 and 5, got {value}")]
    ScoreOutOfRange { field: &'static str, value: u8 },
    #[error("feedback can only be recorded on a completed task")]
    FeedbackOnActiveTask,
    #[error("comment text must not be empty")]
    EmptyComment,
    #[error("sign in to comment on tasks")]
    SignedOut,
}

/// How a completed task felt in hindsight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Transformed,
    Relief,
    Obligation,
}

impl Feedback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transformed => "transformed",
            Self::Relief => "relief",
            Self::Obligation => "obligation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transformed" => Some(Self::Transformed),
            "relief" => Some(Self::Relief),
            "obligation" => Some(Self::Obligation),
            _ => None,
        }
    }
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Remote operations that can be in flight for a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operation {
    Update,
    Delete,
    ToggleCompletion,
    ToggleHidden,
    SetFeedback,
    Restore,
    Comment,
}

impl Operation {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Update => "Update task",
            Self::Delete => "Delete task",
            Self::ToggleCompletion => "Toggle completion",
            Self::ToggleHidden => "Toggle visibility",
            Self::SetFeedback => "Set feedback",
            Self::Restore => "Restore task",
            Self::Comment => "Comment",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub text: String,
    pub created_at: Timestamp,
    pub author: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub consequence: u8,
    pub pride: u8,
    pub construction: u8,
    pub total_score: u8,
    pub hidden: bool,
    pub dominant_category: Category,
    pub ideal_date: Option<Timestamp>,
    pub completed: bool,
    pub completed_at: Option<Timestamp>,
    pub feedback: Option<Feedback>,
    pub comments: Vec<Comment>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub owner: Option<UserId>,
    /// In-flight remote operations, for observers that show a "pending" state.
    #[serde(skip)]
    pub pending: BTreeMap<Operation, bool>,
}

impl Task {
    /// Build a task from creation input, deriving every computed field.
    pub fn from_draft(id: TaskId, draft: &TaskDraft, owner: Option<UserId>, now: Timestamp) -> Self {
        let derived = draft.scores().derive();
        Self {
            id,
            title: draft.title.trim().to_string(),
            consequence: draft.consequence,
            pride: draft.pride,
            construction: draft.construction,
            total_score: derived.total,
            hidden: draft.hidden.unwrap_or(derived.hidden),
            dominant_category: derived.dominant,
            ideal_date: draft.ideal_date,
            completed: false,
            completed_at: None,
            feedback: None,
            comments: Vec::new(),
            created_at: now,
            updated_at: now,
            owner,
            pending: BTreeMap::new(),
        }
    }

    pub fn scores(&self) -> Scores {
        Scores::new(self.consequence, self.pride, self.construction)
    }

    /// Merge a partial update. Any score change re-derives total, visibility
    /// and dominant category from the merged scores.
    pub fn apply_patch(&mut self, patch: &TaskPatch, now: Timestamp) {
        if let Some(title) = &patch.title {
            self.title = title.trim().to_string();
        }
        if let Some(date) = patch.ideal_date {
            self.ideal_date = date;
        }
        if patch.touches_scores() {
            let merged = patch.merged_scores(&self.scores());
            let derived = merged.derive();
            self.consequence = merged.consequence;
            self.pride = merged.pride;
            self.construction = merged.construction;
            self.total_score = derived.total;
            self.hidden = derived.hidden;
            self.dominant_category = derived.dominant;
        }
        self.updated_at = now;
    }

    /// `completed_at` is stamped only on the false -> true transition.
    pub fn set_completed(&mut self, completed: bool, at: Timestamp) {
        if completed && !self.completed {
            self.completed_at = Some(at);
        } else if !completed {
            self.completed_at = None;
        }
        self.completed = completed;
        self.updated_at = at;
    }

    /// Back to active: clears completion and feedback, re-targets to `now`.
    pub fn restore(&mut self, now: Timestamp) {
        self.completed = false;
        self.completed_at = None;
        self.feedback = None;
        self.ideal_date = Some(now);
        self.updated_at = now;
    }

    pub fn is_overdue(&self, now: Timestamp) -> bool {
        self.ideal_date.is_some_and(|d| d < now)
    }

    pub fn is_pending(&self, op: Operation) -> bool {
        self.pending.get(&op).copied().unwrap_or(false)
    }

    pub fn any_pending(&self) -> bool {
        self.pending.values().any(|p| *p)
    }
}

/// Creation input ("form data").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub consequence: u8,
    pub pride: u8,
    pub construction: u8,
    pub ideal_date: Option<Timestamp>,
    /// Explicit visibility; `None` derives it from the score.
    pub hidden: Option<bool>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>, consequence: u8, pride: u8, construction: u8) -> Self {
        Self {
            title: title.into(),
            consequence,
            pride,
            construction,
            ideal_date: None,
            hidden: None,
        }
    }

    pub fn with_ideal_date(mut self, date: Timestamp) -> Self {
        self.ideal_date = Some(date);
        self
    }

    pub fn scores(&self) -> Scores {
        Scores::new(self.consequence, self.pride, self.construction)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_title(&self.title)?;
        for (field, value) in self.scores().fields() {
            check_score(field, value)?;
        }
        Ok(())
    }
}

/// Partial update. `ideal_date: Some(None)` clears the date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub consequence: Option<u8>,
    pub pride: Option<u8>,
    pub construction: Option<u8>,
    pub ideal_date: Option<Option<Timestamp>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && !self.touches_scores() && self.ideal_date.is_none()
    }

    pub fn touches_scores(&self) -> bool {
        self.consequence.is_some() || self.pride.is_some() || self.construction.is_some()
    }

    /// Supplied values override `current`; absent ones keep it.
    pub fn merged_scores(&self, current: &Scores) -> Scores {
        Scores::new(
            self.consequence.unwrap_or(current.consequence),
            self.pride.unwrap_or(current.pride),
            self.construction.unwrap_or(current.construction),
        )
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(title) = &self.title {
            check_title(title)?;
        }
        let fields = [
            ("consequence", self.consequence),
            ("pride", self.pride),
            ("construction", self.construction),
        ];
        for (field, value) in fields {
            if let Some(value) = value {
                check_score(field, value)?;
            }
        }
        Ok(())
    }
}

fn check_title(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    Ok(())
}

fn check_score(field: &'static str, value: u8) -> Result<(), ValidationError> {
    if !(MIN_SCORE..=MAX_SCORE).contains(&value) {
        return Err(ValidationError::ScoreOutOfRange { field, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn now() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn make(title: &str, c: u8, p: u8, k: u8) -> Task {
        Task::from_draft(Uuid::new_v4(), &TaskDraft::new(title, c, p, k), None, now())
    }

    #[test]
    fn creation_derives_fields() {
        let x = make("X", 5, 5, 5);
        assert_eq!(x.total_score, 15);
        assert!(!x.hidden);
        assert_eq!(x.dominant_category, Category::Balanced);

        let y = make("Y", 1, 1, 1);
        assert_eq!(y.total_score, 3);
        assert!(y.hidden);
        assert_eq!(y.dominant_category, Category::Consequence);
    }

    #[test]
    fn explicit_hidden_overrides_derivation() {
        let mut draft = TaskDraft::new("Visible anyway", 1, 1, 1);
        draft.hidden = Some(false);
        let task = Task::from_draft(Uuid::new_v4(), &draft, None, now());
        assert!(!task.hidden);
    }

    #[test]
    fn score_patch_merges_before_deriving() {
        let mut y = make("Y", 1, 1, 1);
        let patch = TaskPatch {
            construction: Some(5),
            ..Default::default()
        };
        y.apply_patch(&patch, now());
        assert_eq!((y.consequence, y.pride, y.construction), (1, 1, 5));
        assert_eq!(y.total_score, 7);
        assert!(y.hidden);
        assert_eq!(y.dominant_category, Category::Construction);
    }

    #[test]
    fn score_patch_resets_manual_hidden() {
        let mut task = make("Big", 4, 4, 4);
        task.hidden = true;
        task.apply_patch(
            &TaskPatch {
                pride: Some(5),
                ..Default::default()
            },
            now(),
        );
        assert!(!task.hidden);
    }

    #[test]
    fn title_patch_leaves_derived_fields_alone() {
        let mut task = make("Old", 1, 1, 1);
        task.hidden = false;
        task.apply_patch(
            &TaskPatch {
                title: Some("  New  ".to_string()),
                ..Default::default()
            },
            now(),
        );
        assert_eq!(task.title, "New");
        assert!(!task.hidden);
        assert_eq!(task.total_score, 3);
    }

    #[test]
    fn completion_stamps_only_on_transition() {
        let mut task = make("Ship", 3, 3, 3);
        let first = now();
        task.set_completed(true, first);
        task.set_completed(true, first + Duration::hours(1));
        assert_eq!(task.completed_at, Some(first));
        task.set_completed(false, first + Duration::hours(2));
        assert_eq!(task.completed_at, None);
    }

    #[test]
    fn restore_resets_completion_state() {
        let mut task = make("Again", 3, 3, 3);
        task.set_completed(true, now());
        task.feedback = Some(Feedback::Relief);
        let later = now() + Duration::days(3);
        task.restore(later);
        assert!(!task.completed);
        assert_eq!(task.completed_at, None);
        assert_eq!(task.feedback, None);
        assert_eq!(task.ideal_date, Some(later));
    }

    #[test]
    fn draft_validation() {
        assert_eq!(
            TaskDraft::new("   ", 3, 3, 3).validate(),
            Err(ValidationError::EmptyTitle)
        );
        assert_eq!(
            TaskDraft::new("ok", 3, 6, 3).validate(),
            Err(ValidationError::ScoreOutOfRange {
                field: "pride",
                value: 6
            })
        );
        assert!(TaskDraft::new("ok", 1, 5, 3).validate().is_ok());
    }

    #[test]
    fn patch_validation_checks_only_supplied_fields() {
        assert!(TaskPatch::default().validate().is_ok());
        let bad = TaskPatch {
            consequence: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(ValidationError::ScoreOutOfRange {
                field: "consequence",
                ..
            })
        ));
        let empty_title = TaskPatch {
            title: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(empty_title.validate(), Err(ValidationError::EmptyTitle));
    }

    #[test]
    fn overdue_needs_a_past_date() {
        let mut task = make("Late", 2, 2, 2);
        assert!(!task.is_overdue(now()));
        task.ideal_date = Some(now() - Duration::minutes(1));
        assert!(task.is_overdue(now()));
    }

    #[test]
    fn feedback_parse() {
        assert_eq!(Feedback::parse("Relief"), Some(Feedback::Relief));
        assert_eq!(Feedback::parse("meh"), None);
    }
}
