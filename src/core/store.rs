//! Immutable-snapshot task collection.
//!
//! Every mutation returns a new [`TaskStore`]; the old one is untouched, so
//! observers can detect change with [`TaskStore::same_snapshot`]. Mutations
//! addressed to an unknown id hand back the same snapshot.

use std::sync::Arc;

use super::date::Timestamp;
use super::task::{Comment, Feedback, Operation, Task, TaskId, TaskPatch};

/// A single state transition, applied by [`TaskStore::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Add(Task),
    Remove(TaskId),
    Update {
        id: TaskId,
        patch: TaskPatch,
        at: Timestamp,
    },
    SetCompletion {
        id: TaskId,
        completed: bool,
        at: Timestamp,
    },
    SetHidden {
        id: TaskId,
        hidden: bool,
    },
    SetFeedback {
        id: TaskId,
        feedback: Option<Feedback>,
    },
    Restore {
        id: TaskId,
        at: Timestamp,
    },
    AddComment {
        task_id: TaskId,
        comment: Comment,
    },
    ReplaceComments {
        task_id: TaskId,
        comments: Vec<Comment>,
    },
    SetPending {
        id: TaskId,
        op: Operation,
        pending: bool,
    },
    ReplaceAll(Vec<Task>),
}

#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    tasks: Arc<Vec<Task>>,
}

impl TaskStore {
    /// Build from a list; a later duplicate id replaces the earlier one.
    pub fn new(tasks: Vec<Task>) -> Self {
        let mut unique: Vec<Task> = Vec::with_capacity(tasks.len());
        for task in tasks {
            match unique.iter().position(|t| t.id == task.id) {
                Some(i) => unique[i] = task,
                None => unique.push(task),
            }
        }
        Self {
            tasks: Arc::new(unique),
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.get(id).is_some()
    }

    /// True when both handles point at the very same snapshot.
    pub fn same_snapshot(&self, other: &TaskStore) -> bool {
        Arc::ptr_eq(&self.tasks, &other.tasks)
    }

    pub fn active(&self) -> Vec<Task> {
        self.tasks.iter().filter(|t| !t.completed).cloned().collect()
    }

    pub fn completed(&self) -> Vec<Task> {
        self.tasks.iter().filter(|t| t.completed).cloned().collect()
    }

    /// Insert, or replace the task with the same id.
    pub fn add(&self, task: Task) -> Self {
        let mut tasks = self.tasks.as_ref().clone();
        match tasks.iter().position(|t| t.id == task.id) {
            Some(i) => tasks[i] = task,
            None => tasks.push(task),
        }
        Self {
            tasks: Arc::new(tasks),
        }
    }

    pub fn remove(&self, id: TaskId) -> Self {
        if !self.contains(id) {
            log::debug!("Ignoring removal of unknown task {}", id);
            return self.clone();
        }
        let tasks = self.tasks.iter().filter(|t| t.id != id).cloned().collect();
        Self {
            tasks: Arc::new(tasks),
        }
    }

    /// Merge a partial update; score changes re-derive within the same step.
    pub fn update(&self, id: TaskId, patch: &TaskPatch, at: Timestamp) -> Self {
        self.modify(id, |task| task.apply_patch(patch, at))
    }

    /// A cleared flag is removed so a settled task carries no pending entries.
    pub fn set_operation_pending(&self, id: TaskId, op: Operation, pending: bool) -> Self {
        if !pending && self.get(id).is_some_and(|t| !t.pending.contains_key(&op)) {
            return self.clone();
        }
        self.modify(id, |task| {
            if pending {
                task.pending.insert(op, true);
            } else {
                task.pending.remove(&op);
            }
        })
    }

    pub fn apply(&self, command: &Command) -> Self {
        match command {
            Command::Add(task) => self.add(task.clone()),
            Command::Remove(id) => self.remove(*id),
            Command::Update { id, patch, at } => self.update(*id, patch, *at),
            Command::SetCompletion { id, completed, at } => {
                self.modify(*id, |task| task.set_completed(*completed, *at))
            }
            // Not reconciled against the score threshold.
            Command::SetHidden { id, hidden } => self.modify(*id, |task| task.hidden = *hidden),
            Command::SetFeedback { id, feedback } => {
                self.modify(*id, |task| task.feedback = *feedback)
            }
            Command::Restore { id, at } => self.modify(*id, |task| task.restore(*at)),
            Command::AddComment { task_id, comment } => self.modify(*task_id, |task| {
                if !task.comments.iter().any(|c| c.id == comment.id) {
                    task.comments.push(comment.clone());
                    task.comments.sort_by_key(|c| c.created_at);
                }
            }),
            Command::ReplaceComments { task_id, comments } => self.modify(*task_id, |task| {
                let mut comments = comments.clone();
                comments.sort_by_key(|c| c.created_at);
                task.comments = comments;
            }),
            Command::SetPending { id, op, pending } => {
                self.set_operation_pending(*id, *op, *pending)
            }
            Command::ReplaceAll(tasks) => Self::new(tasks.clone()),
        }
    }

    fn modify(&self, id: TaskId, f: impl FnOnce(&mut Task)) -> Self {
        let Some(index) = self.tasks.iter().position(|t| t.id == id) else {
            log::debug!("Ignoring mutation of unknown task {}", id);
            return self.clone();
        };
        let mut tasks = self.tasks.as_ref().clone();
        f(&mut tasks[index]);
        Self {
            tasks: Arc::new(tasks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::score::Category;
    use crate::core::task::TaskDraft;
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    fn now() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 4, 2, 8, 0, 0).unwrap()
    }

    fn make(title: &str, c: u8, p: u8, k: u8) -> Task {
        Task::from_draft(Uuid::new_v4(), &TaskDraft::new(title, c, p, k), None, now())
    }

    fn comment(text: &str, minutes: i64) -> Comment {
        Comment {
            id: Uuid::new_v4(),
            text: text.to_string(),
            created_at: now() + Duration::minutes(minutes),
            author: None,
        }
    }

    #[test]
    fn mutations_return_new_snapshots() {
        let empty = TaskStore::default();
        let task = make("X", 5, 5, 5);
        let id = task.id;
        let one = empty.add(task);
        assert!(empty.is_empty());
        assert_eq!(one.len(), 1);
        assert!(!one.same_snapshot(&empty));

        let hidden = one.apply(&Command::SetHidden { id, hidden: true });
        assert!(!one.get(id).unwrap().hidden);
        assert!(hidden.get(id).unwrap().hidden);
    }

    #[test]
    fn unknown_id_is_a_noop() {
        let store = TaskStore::new(vec![make("X", 5, 5, 5)]);
        let stranger = Uuid::new_v4();
        assert!(store.remove(stranger).same_snapshot(&store));
        assert!(
            store
                .update(stranger, &TaskPatch::default(), now())
                .same_snapshot(&store)
        );
        assert!(
            store
                .apply(&Command::SetHidden {
                    id: stranger,
                    hidden: true
                })
                .same_snapshot(&store)
        );
    }

    #[test]
    fn add_keeps_ids_unique() {
        let mut task = make("First", 2, 2, 2);
        let store = TaskStore::default().add(task.clone());
        task.title = "Second".to_string();
        let store = store.add(task.clone());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(task.id).unwrap().title, "Second");
    }

    #[test]
    fn score_update_keeps_total_consistent() {
        let y = make("Y", 1, 1, 1);
        let id = y.id;
        let store = TaskStore::new(vec![y]);
        let patch = TaskPatch {
            construction: Some(5),
            ..Default::default()
        };
        let updated = store.update(id, &patch, now());
        let y = updated.get(id).unwrap();
        assert_eq!(y.total_score, y.consequence + y.pride + y.construction);
        assert_eq!(y.total_score, 7);
        assert!(y.hidden);
        assert_eq!(y.dominant_category, Category::Construction);
    }

    #[test]
    fn hidden_toggle_leaves_scores_alone() {
        let task = make("Big", 5, 4, 3);
        let id = task.id;
        let store = TaskStore::new(vec![task]);
        let toggled = store.apply(&Command::SetHidden { id, hidden: true });
        let t = toggled.get(id).unwrap();
        assert!(t.hidden);
        assert_eq!(t.total_score, 12);
        assert_eq!(t.dominant_category, Category::Consequence);
    }

    #[test]
    fn pending_flags_set_and_clear() {
        let task = make("X", 3, 3, 3);
        let id = task.id;
        let store = TaskStore::new(vec![task.clone()]);
        let busy = store.set_operation_pending(id, Operation::Delete, true);
        assert!(busy.get(id).unwrap().is_pending(Operation::Delete));
        let idle = busy.set_operation_pending(id, Operation::Delete, false);
        assert!(!idle.get(id).unwrap().any_pending());
        assert_eq!(idle.get(id).unwrap(), &task);
        assert!(idle.set_operation_pending(id, Operation::Delete, false).same_snapshot(&idle));
    }

    #[test]
    fn completion_and_restore_commands() {
        let task = make("Done soon", 3, 3, 3);
        let id = task.id;
        let store = TaskStore::new(vec![task]);
        let done = store.apply(&Command::SetCompletion {
            id,
            completed: true,
            at: now(),
        });
        let done = done.apply(&Command::SetFeedback {
            id,
            feedback: Some(Feedback::Transformed),
        });
        assert_eq!(done.completed().len(), 1);
        assert_eq!(done.get(id).unwrap().completed_at, Some(now()));

        let later = now() + Duration::days(1);
        let restored = done.apply(&Command::Restore { id, at: later });
        let t = restored.get(id).unwrap();
        assert_eq!(restored.active().len(), 1);
        assert_eq!(t.feedback, None);
        assert_eq!(t.ideal_date, Some(later));
    }

    #[test]
    fn comments_stay_in_creation_order() {
        let task = make("Discuss", 3, 3, 3);
        let id = task.id;
        let store = TaskStore::new(vec![task]);
        let second = comment("second", 5);
        let first = comment("first", 1);
        let store = store
            .apply(&Command::AddComment {
                task_id: id,
                comment: second.clone(),
            })
            .apply(&Command::AddComment {
                task_id: id,
                comment: first.clone(),
            })
            .apply(&Command::AddComment {
                task_id: id,
                comment: first.clone(),
            });
        let texts: Vec<&str> = store
            .get(id)
            .unwrap()
            .comments
            .iter()
            .map(|c| c.text.as_str())
            .collect();
        assert_eq!(texts, vec!["first", "second"]);

        let replaced = store.apply(&Command::ReplaceComments {
            task_id: id,
            comments: vec![second],
        });
        assert_eq!(replaced.get(id).unwrap().comments.len(), 1);
    }

    #[test]
    fn replace_all_swaps_everything() {
        let store = TaskStore::new(vec![make("old", 2, 2, 2)]);
        let fresh = vec![make("a", 3, 3, 3), make("b", 4, 4, 4)];
        let replaced = store.apply(&Command::ReplaceAll(fresh.clone()));
        assert_eq!(replaced.tasks(), fresh.as_slice());
    }
}
