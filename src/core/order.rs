use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::date::Timestamp;
use super::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    #[default]
    Priority,
    Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

impl SortDirection {
    pub fn reversed(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }

    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Self::Ascending => ordering,
            Self::Descending => ordering.reverse(),
        }
    }
}

/// Options for [`time_order`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeFlags {
    /// Split overdue tasks into their own section.
    pub surface_overdue: bool,
    /// Undated tasks go last regardless of direction.
    pub undated_last: bool,
}

/// Result of ordering by time. `overdue` stays empty unless surfacing is on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeView {
    pub overdue: Vec<Task>,
    pub upcoming: Vec<Task>,
}

impl TimeView {
    pub fn len(&self) -> usize {
        self.overdue.len() + self.upcoming.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Both sections, overdue first.
    pub fn into_flat(self) -> Vec<Task> {
        let mut all = self.overdue;
        all.extend(self.upcoming);
        all
    }
}

/// Order by total score, then dated before undated, then earliest date.
/// Remaining ties keep input order.
pub fn priority_order(tasks: &[Task], direction: SortDirection) -> Vec<Task> {
    let mut sorted = tasks.to_vec();
    sorted.sort_by(|a, b| compare_priority(a, b, direction));
    sorted
}

fn compare_priority(a: &Task, b: &Task, direction: SortDirection) -> Ordering {
    direction
        .apply(a.total_score.cmp(&b.total_score))
        .then_with(|| match (a.ideal_date, b.ideal_date) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

/// Order by distance from `now`, not by calendar position: "closest first"
/// puts a task one hour ahead before one two hours overdue.
pub fn time_order(tasks: &[Task], direction: SortDirection, flags: TimeFlags, now: Timestamp) -> TimeView {
    if !flags.surface_overdue {
        return TimeView {
            overdue: Vec::new(),
            upcoming: order_by_distance(tasks.to_vec(), direction, flags.undated_last, now),
        };
    }
    let (overdue, upcoming): (Vec<Task>, Vec<Task>) =
        tasks.iter().cloned().partition(|t| t.is_overdue(now));
    TimeView {
        overdue: order_by_distance(overdue, direction, flags.undated_last, now),
        upcoming: order_by_distance(upcoming, direction, flags.undated_last, now),
    }
}

fn distance_secs(task: &Task, now: Timestamp) -> i64 {
    task.ideal_date
        .map(|d| (d - now).num_seconds().abs())
        .unwrap_or_default()
}

/// Dated tasks sort by distance; undated ones by score (highest first). Unless
/// `undated_last` is set the two runs are merged, a dated task going first
/// whenever its score is at least the next undated task's.
fn order_by_distance(tasks: Vec<Task>, direction: SortDirection, undated_last: bool, now: Timestamp) -> Vec<Task> {
    let (mut dated, mut undated): (Vec<Task>, Vec<Task>) =
        tasks.into_iter().partition(|t| t.ideal_date.is_some());

    dated.sort_by(|a, b| direction.apply(distance_secs(a, now).cmp(&distance_secs(b, now))));
    undated.sort_by(|a, b| b.total_score.cmp(&a.total_score));

    if undated_last {
        dated.extend(undated);
        return dated;
    }

    let mut merged = Vec::with_capacity(dated.len() + undated.len());
    let mut dated = dated.into_iter().peekable();
    let mut undated = undated.into_iter().peekable();
    loop {
        let take_dated = match (dated.peek(), undated.peek()) {
            (Some(d), Some(u)) => d.total_score >= u.total_score,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_dated { dated.next() } else { undated.next() };
        merged.extend(next);
    }
    merged
}

/// Drop hidden tasks unless asked to show them.
pub fn visible(tasks: &[Task], show_hidden: bool) -> Vec<Task> {
    tasks
        .iter()
        .filter(|t| show_hidden || !t.hidden)
        .cloned()
        .collect()
}
