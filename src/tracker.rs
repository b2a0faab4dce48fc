//! Aggregation of attempts into per-chunk performance and path counters.
//! Nothing here schedules; callers feed in the scheduler's results.

use chrono::{DateTime, Utc};

use crate::models::{Chunk, LearningPath, MasteryLevel, Priority, UserPerformance};

pub const STRUGGLING_SCORE: f64 = 60.0;
pub const STRENGTH_SCORE: f64 = 80.0;

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

fn remove_value(list: &mut Vec<String>, value: &str) {
    list.retain(|v| v != value);
}

fn running_average(previous: f64, count_before: u32, value: f64) -> f64 {
    (previous * count_before as f64 + value) / (count_before as f64 + 1.0)
}

/// Fold one attempt into a performance record. Mastery is left untouched;
/// it depends on the repetition count the scheduler produces.
pub fn accumulate(
    perf: &mut UserPerformance,
    chunk: &Chunk,
    score: f64,
    time_spent_seconds: u64,
    now: DateTime<Utc>,
) {
    perf.average_score = running_average(perf.average_score, perf.attempts, score);
    perf.attempts += 1;
    perf.best_score = perf.best_score.max(score);
    perf.total_time_seconds += time_spent_seconds;
    perf.last_attempt = Some(now);

    let labels = std::iter::once(chunk.concept.as_str()).chain(chunk.tags.iter().map(String::as_str));
    for label in labels {
        if score < STRUGGLING_SCORE {
            push_unique(&mut perf.struggling_tags, label);
        } else if score >= STRENGTH_SCORE {
            push_unique(&mut perf.strength_tags, label);
            remove_value(&mut perf.struggling_tags, label);
        }
    }
}

/// Outcome of one attempt as seen by the owning learning path.
#[derive(Debug, Clone)]
pub struct PathUpdate<'a> {
    pub chunk_id: &'a str,
    pub score: f64,
    pub time_spent_seconds: u64,
    pub passed: bool,
    pub mastery: MasteryLevel,
    pub next_review: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

pub fn apply_to_path(path: &mut LearningPath, update: &PathUpdate<'_>) {
    path.average_score = running_average(path.average_score, path.attempts, update.score);
    path.attempts += 1;
    path.total_time_seconds += update.time_spent_seconds;

    push_unique(&mut path.completed, update.chunk_id);
    if update.mastery == MasteryLevel::Expert {
        push_unique(&mut path.mastered, update.chunk_id);
    } else {
        remove_value(&mut path.mastered, update.chunk_id);
    }
    if update.passed {
        remove_value(&mut path.struggling, update.chunk_id);
    } else {
        push_unique(&mut path.struggling, update.chunk_id);
    }

    if let Some(entry) = path.entry_mut(update.chunk_id) {
        entry.next_review = Some(update.next_review);
        entry.priority = if update.passed {
            entry.base_priority
        } else {
            Priority::High
        };
    }

    path.cursor = path
        .chunk_ids
        .iter()
        .position(|id| !path.completed.contains(id))
        .unwrap_or(path.chunk_ids.len());
    path.updated_at = update.now;
}
