//! The engine's call contract: path creation, attempt recording and the
//! due-queue queries.
//!
//! Every attempt runs the scheduler before the mastery classifier. Its reads
//! and writes of paths, repetition state and performance share one exclusive
//! store transaction, so attempts are serialized across processes too.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::db::{AttemptSnapshot, AttemptWrite, LearningStore};
use crate::error::{EngineError, Result};
use crate::mastery;
use crate::models::{
    AttemptOutcome, AttemptRecord, Chunk, ChunkPhase, ChunkReport, DeclaredDifficulty, ItemMode,
    LearnerProfile, LearningPath, NextItem, Priority, ReviewState, UserPerformance,
};
use crate::planner;
use crate::scheduler::{self, ReviewScheduler};
use crate::tracker::{self, PathUpdate};

#[derive(Debug, Clone, Default, Serialize)]
pub struct LearnerStats {
    pub paths: usize,
    pub chunks: usize,
    pub completed: usize,
    pub mastered: usize,
    pub struggling: usize,
    pub due_now: usize,
    pub attempts: u32,
    pub average_score: f64,
    pub total_time_seconds: u64,
}

pub struct Engine<S: LearningStore> {
    store: S,
    scheduler: ReviewScheduler,
    initial_ease: f64,
}

fn validate_attempt(score: f64, time_spent_seconds: i64) -> Result<()> {
    if !score.is_finite() || !(0.0..=100.0).contains(&score) {
        return Err(EngineError::InvalidScore {
            reason: format!("score must be within 0..=100, got {}", score),
        });
    }
    if time_spent_seconds < 0 {
        return Err(EngineError::InvalidScore {
            reason: format!("time spent cannot be negative, got {}", time_spent_seconds),
        });
    }
    Ok(())
}

// Due entries of one path with their sort key.
fn due_entries(path: &LearningPath, now: DateTime<Utc>) -> Vec<(Priority, DateTime<Utc>, usize, &str)> {
    path.review_schedule
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_due(now))
        .filter_map(|(pos, e)| e.next_review.map(|at| (e.priority, at, pos, e.chunk_id.as_str())))
        .collect()
}

impl<S: LearningStore> Engine<S> {
    pub fn new(store: S, config: &SchedulerConfig) -> Self {
        Self {
            store,
            scheduler: ReviewScheduler::new(config.max_interval_days),
            initial_ease: config.initial_ease,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // Path creation

    pub fn create_path(
        &self,
        user_id: &str,
        topic: &str,
        chunks: &[Chunk],
        profile: &LearnerProfile,
    ) -> Result<LearningPath> {
        self.create_path_at(user_id, topic, chunks, profile, Utc::now())
    }

    /// Plan and persist a path. Chunks are stored in the chunk table on
    /// success. An existing path for (user, topic) is returned unchanged.
    pub fn create_path_at(
        &self,
        user_id: &str,
        topic: &str,
        chunks: &[Chunk],
        profile: &LearnerProfile,
        now: DateTime<Utc>,
    ) -> Result<LearningPath> {
        let path = planner::plan(user_id, topic, chunks, profile, now)?;

        match self.store.create_path(chunks, &path)? {
            Some(existing) => {
                warn!(user_id, topic, "learning path already exists; keeping it");
                Ok(existing)
            }
            None => {
                info!(user_id, topic, chunks = path.chunk_ids.len(), "learning path created");
                Ok(path)
            }
        }
    }

    pub fn create_path_for_topic(
        &self,
        user_id: &str,
        topic: &str,
        profile: &LearnerProfile,
    ) -> Result<LearningPath> {
        self.create_path_for_topic_at(user_id, topic, profile, Utc::now())
    }

    /// Plan from the chunks already held for `topic`.
    pub fn create_path_for_topic_at(
        &self,
        user_id: &str,
        topic: &str,
        profile: &LearnerProfile,
        now: DateTime<Utc>,
    ) -> Result<LearningPath> {
        let chunks = self.store.chunks_for_topic(topic)?;
        self.create_path_at(user_id, topic, &chunks, profile, now)
    }

    // Attempts

    pub fn record_attempt(
        &self,
        user_id: &str,
        chunk_id: &str,
        score: f64,
        time_spent_seconds: i64,
        difficulty: DeclaredDifficulty,
    ) -> Result<AttemptOutcome> {
        self.record_attempt_at(user_id, chunk_id, score, time_spent_seconds, difficulty, Utc::now())
    }

    pub fn record_attempt_at(
        &self,
        user_id: &str,
        chunk_id: &str,
        score: f64,
        time_spent_seconds: i64,
        difficulty: DeclaredDifficulty,
        now: DateTime<Utc>,
    ) -> Result<AttemptOutcome> {
        validate_attempt(score, time_spent_seconds)?;
        let time_spent = time_spent_seconds as u64;

        let unknown = || EngineError::UnknownChunk {
            user_id: user_id.to_string(),
            chunk_id: chunk_id.to_string(),
        };

        let quality = scheduler::quality_from_attempt(score, difficulty);

        let (state, mastery, paths) = self.store.with_attempt(user_id, chunk_id, |snapshot| {
            let AttemptSnapshot {
                chunk,
                mut paths,
                state,
                performance,
            } = snapshot;
            let chunk = chunk.ok_or_else(unknown)?;
            if paths.is_empty() {
                return Err(unknown());
            }

            let state = state
                .unwrap_or_else(|| ReviewState::new(user_id, chunk_id, self.initial_ease, now));
            let state = self.scheduler.update(&state, quality, now);

            let mut performance =
                performance.unwrap_or_else(|| UserPerformance::new(user_id, chunk_id));
            tracker::accumulate(&mut performance, &chunk, score, time_spent, now);
            performance.mastery =
                mastery::classify(performance.average_score, performance.attempts, state.repetitions);

            // A chunk shared by several topics stays in step on each path.
            let update = PathUpdate {
                chunk_id,
                score,
                time_spent_seconds: time_spent,
                passed: quality.is_pass(),
                mastery: performance.mastery,
                next_review: state.next_review,
                now,
            };
            for path in &mut paths {
                tracker::apply_to_path(path, &update);
            }

            let record = AttemptRecord {
                user_id: user_id.to_string(),
                chunk_id: chunk_id.to_string(),
                score,
                time_spent_seconds: time_spent,
                difficulty,
                quality: quality.value(),
                attempted_at: now,
            };
            let out = (state.clone(), performance.mastery, paths.len());
            Ok((
                AttemptWrite {
                    paths,
                    state,
                    performance,
                    record,
                },
                out,
            ))
        })?;

        info!(
            user_id,
            chunk_id,
            paths,
            quality = quality.value(),
            interval_days = state.interval_days,
            mastery = mastery.as_str(),
            "attempt recorded"
        );

        Ok(AttemptOutcome {
            state,
            mastery,
            quality: quality.value(),
        })
    }

    // Queue queries

    pub fn due_chunks(&self, user_id: &str) -> Result<Vec<String>> {
        self.due_chunks_at(user_id, Utc::now())
    }

    /// Chunk ids due for review across all of a user's paths, highest
    /// priority first and earliest due within a priority.
    pub fn due_chunks_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<String>> {
        let paths = self.store.paths_for_user(user_id)?;
        let mut due: Vec<(Priority, DateTime<Utc>, &str, usize, &str)> = paths
            .iter()
            .flat_map(|p| {
                due_entries(p, now)
                    .into_iter()
                    .map(move |(prio, at, pos, id)| (prio, at, p.topic.as_str(), pos, id))
            })
            .collect();
        due.sort();

        let mut ids: Vec<String> = Vec::with_capacity(due.len());
        for (_, _, _, _, id) in due {
            if !ids.iter().any(|seen| seen == id) {
                ids.push(id.to_string());
            }
        }
        debug!(user_id, due = ids.len(), "due chunks computed");
        Ok(ids)
    }

    pub fn next_item(&self, user_id: &str, topic: &str) -> Result<NextItem> {
        self.next_item_at(user_id, topic, Utc::now())
    }

    /// Reviews always win over new material.
    pub fn next_item_at(&self, user_id: &str, topic: &str, now: DateTime<Utc>) -> Result<NextItem> {
        let path = self.require_path(user_id, topic)?;

        if let Some((_, _, _, chunk_id)) = due_entries(&path, now).into_iter().min() {
            return Ok(NextItem::Item {
                chunk_id: chunk_id.to_string(),
                mode: ItemMode::Review,
            });
        }

        match path.next_uncompleted() {
            Some(chunk_id) => Ok(NextItem::Item {
                chunk_id: chunk_id.to_string(),
                mode: ItemMode::New,
            }),
            None => Ok(NextItem::CaughtUp),
        }
    }

    // Chunk maintenance

    /// Returns how many chunks were new.
    pub fn import_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        let inserted = self.store.put_chunks(chunks)?;
        info!(received = chunks.len(), inserted, "chunks imported");
        Ok(inserted)
    }

    pub fn update_chunk_content(&self, chunk_id: &str, content: &serde_json::Value) -> Result<bool> {
        Ok(self.store.update_chunk_content(chunk_id, content)?)
    }

    /// Existing paths keep the chunk; new paths skip it.
    pub fn deprecate_chunk(&self, chunk_id: &str) -> Result<bool> {
        let found = self.store.deprecate_chunk(chunk_id)?;
        if found {
            info!(chunk_id, "chunk deprecated");
        }
        Ok(found)
    }

    // Reads

    pub fn path(&self, user_id: &str, topic: &str) -> Result<Option<LearningPath>> {
        Ok(self.store.get_path(user_id, topic)?)
    }

    fn require_path(&self, user_id: &str, topic: &str) -> Result<LearningPath> {
        self.store
            .get_path(user_id, topic)?
            .ok_or_else(|| EngineError::PathNotFound {
                user_id: user_id.to_string(),
                topic: topic.to_string(),
            })
    }

    pub fn chunk_report(&self, user_id: &str, chunk_id: &str) -> Result<ChunkReport> {
        let chunk = self
            .store
            .get_chunk(chunk_id)?
            .ok_or_else(|| EngineError::UnknownChunk {
                user_id: user_id.to_string(),
                chunk_id: chunk_id.to_string(),
            })?;
        let state = self.store.get_review_state(user_id, chunk_id)?;
        let performance = self.store.get_performance(user_id, chunk_id)?;
        let phase = state.as_ref().map_or(ChunkPhase::Unseen, |s| s.phase);
        Ok(ChunkReport {
            chunk,
            state,
            performance,
            phase,
        })
    }

    pub fn history(&self, user_id: &str, chunk_id: &str) -> Result<Vec<AttemptRecord>> {
        Ok(self.store.history(user_id, chunk_id)?)
    }

    pub fn stats(&self, user_id: &str) -> Result<LearnerStats> {
        self.stats_at(user_id, Utc::now())
    }

    pub fn stats_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<LearnerStats> {
        let paths = self.store.paths_for_user(user_id)?;
        let mut stats = LearnerStats {
            paths: paths.len(),
            ..LearnerStats::default()
        };
        let mut weighted_score = 0.0;
        for p in &paths {
            stats.chunks += p.chunk_ids.len();
            stats.completed += p.completed.len();
            stats.mastered += p.mastered.len();
            stats.struggling += p.struggling.len();
            stats.due_now += due_entries(p, now).len();
            stats.attempts += p.attempts;
            stats.total_time_seconds += p.total_time_seconds;
            weighted_score += p.average_score * p.attempts as f64;
        }
        if stats.attempts > 0 {
            stats.average_score = weighted_score / stats.attempts as f64;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{DifficultyTier, MasteryLevel, SkillLevel};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap()
    }

    fn engine() -> Engine<Database> {
        let db = Database::open(":memory:").expect("Failed to create in-memory database");
        db.init().expect("Failed to initialize database");
        Engine::new(db, &SchedulerConfig::default())
    }

    fn chunk(id: &str, concept: &str, prereqs: &[&str]) -> Chunk {
        Chunk {
            id: id.to_string(),
            title: id.to_uppercase(),
            concept: concept.to_string(),
            difficulty: DifficultyTier::Beginner,
            estimated_minutes: 10,
            prerequisites: prereqs.iter().map(|s| s.to_string()).collect(),
            next: vec![],
            content: serde_json::Value::Null,
            topic: "rust".to_string(),
            subtopic: None,
            tags: vec![],
            deprecated: false,
        }
    }

    fn profile(weak: &[&str]) -> LearnerProfile {
        LearnerProfile {
            skill_level: SkillLevel::Beginner,
            daily_minutes: 45,
            weak_areas: weak.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn seeded(weak: &[&str]) -> Engine<Database> {
        let e = engine();
        let chunks = vec![
            chunk("a", "basics", &[]),
            chunk("b", "loops", &["a"]),
            chunk("c", "traits", &["a"]),
        ];
        e.create_path_at("u1", "rust", &chunks, &profile(weak), t0())
            .unwrap();
        e
    }

    mod validation_tests {
        use super::*;

        #[test]
        fn rejects_out_of_range_scores() {
            assert!(validate_attempt(-0.1, 0).is_err());
            assert!(validate_attempt(100.5, 0).is_err());
            assert!(validate_attempt(f64::NAN, 0).is_err());
            assert!(validate_attempt(0.0, 0).is_ok());
            assert!(validate_attempt(100.0, 0).is_ok());
        }

        #[test]
        fn rejects_negative_time() {
            assert!(matches!(
                validate_attempt(50.0, -1),
                Err(EngineError::InvalidScore { .. })
            ));
        }
    }

    mod create_path_tests {
        use super::*;

        #[test]
        fn stores_chunks_and_path() {
            let e = seeded(&[]);
            let p = e.path("u1", "rust").unwrap().unwrap();
            assert_eq!(p.chunk_ids, vec!["a", "b", "c"]);
            assert!(e.store().get_chunk("b").unwrap().is_some());
        }

        #[test]
        fn cycle_persists_nothing() {
            let e = engine();
            let chunks = vec![chunk("a", "x", &["b"]), chunk("b", "y", &["a"])];
            let err = e
                .create_path_at("u1", "rust", &chunks, &profile(&[]), t0())
                .unwrap_err();
            assert!(matches!(err, EngineError::CyclicPrerequisite { .. }));
            assert!(e.path("u1", "rust").unwrap().is_none());
            assert!(e.store().get_chunk("a").unwrap().is_none());
        }

        #[test]
        fn second_create_returns_existing() {
            let e = seeded(&[]);
            let again = e
                .create_path_at("u1", "rust", &[chunk("z", "x", &[])], &profile(&[]), t0())
                .unwrap();
            assert_eq!(again.chunk_ids, vec!["a", "b", "c"]);
        }

        #[test]
        fn create_from_stored_topic_chunks() {
            let e = seeded(&[]);
            let p = e
                .create_path_for_topic_at("u2", "rust", &profile(&["traits"]), t0())
                .unwrap();
            assert_eq!(p.chunk_ids, vec!["a", "c", "b"]);
        }

        #[test]
        fn deprecated_chunk_stays_on_existing_paths() {
            let e = seeded(&[]);
            assert!(e.deprecate_chunk("b").unwrap());
            assert!(!e.deprecate_chunk("missing").unwrap());
            assert_eq!(e.path("u1", "rust").unwrap().unwrap().chunk_ids, vec!["a", "b", "c"]);

            let fresh = e
                .create_path_for_topic_at("u2", "rust", &profile(&[]), t0())
                .unwrap();
            assert_eq!(fresh.chunk_ids, vec!["a", "c"]);
            assert!(e
                .record_attempt_at("u1", "b", 70.0, 10, DeclaredDifficulty::Medium, t0())
                .is_ok());
        }
    }

    mod attempt_tests {
        use super::*;

        #[test]
        fn unknown_chunk_is_rejected() {
            let e = seeded(&[]);
            let err = e
                .record_attempt_at("u1", "nope", 80.0, 60, DeclaredDifficulty::Medium, t0())
                .unwrap_err();
            assert!(matches!(err, EngineError::UnknownChunk { .. }));
        }

        #[test]
        fn chunk_off_the_users_path_is_rejected() {
            let e = seeded(&[]);
            let err = e
                .record_attempt_at("u2", "a", 80.0, 60, DeclaredDifficulty::Medium, t0())
                .unwrap_err();
            assert!(matches!(err, EngineError::UnknownChunk { .. }));
        }

        #[test]
        fn invalid_score_leaves_records_untouched() {
            let e = seeded(&[]);
            e.record_attempt_at("u1", "a", 85.0, 60, DeclaredDifficulty::Medium, t0())
                .unwrap();
            let path_before = e.path("u1", "rust").unwrap();
            let state_before = e.store().get_review_state("u1", "a").unwrap();
            let perf_before = e.store().get_performance("u1", "a").unwrap();

            assert!(e
                .record_attempt_at("u1", "a", 140.0, 60, DeclaredDifficulty::Medium, t0())
                .is_err());
            assert!(e
                .record_attempt_at("u1", "a", 50.0, -5, DeclaredDifficulty::Medium, t0())
                .is_err());

            assert_eq!(e.path("u1", "rust").unwrap(), path_before);
            assert_eq!(e.store().get_review_state("u1", "a").unwrap(), state_before);
            assert_eq!(e.store().get_performance("u1", "a").unwrap(), perf_before);
            assert_eq!(e.history("u1", "a").unwrap().len(), 1);
        }

        #[test]
        fn first_attempt_updates_everything() {
            let e = seeded(&[]);
            let out = e
                .record_attempt_at("u1", "a", 85.0, 90, DeclaredDifficulty::Medium, t0())
                .unwrap();
            assert_eq!(out.quality, 4);
            assert_eq!(out.state.repetitions, 1);
            assert_eq!(out.state.next_review, t0() + Duration::days(1));
            assert_eq!(out.mastery, MasteryLevel::Novice);

            let p = e.path("u1", "rust").unwrap().unwrap();
            assert_eq!(p.completed, vec!["a"]);
            assert_eq!(p.cursor, 1);
            assert_eq!(p.entry("a").unwrap().next_review, Some(t0() + Duration::days(1)));

            let report = e.chunk_report("u1", "a").unwrap();
            assert_eq!(report.phase, ChunkPhase::Reviewing);
            assert_eq!(report.performance.unwrap().total_time_seconds, 90);
        }

        #[test]
        fn mastery_reads_fresh_repetition_count() {
            let e = seeded(&[]);
            let mut now = t0();
            let mut last = None;
            for _ in 0..3 {
                let out = e
                    .record_attempt_at("u1", "a", 95.0, 30, DeclaredDifficulty::Medium, now)
                    .unwrap();
                now = out.state.next_review;
                last = Some(out);
            }
            // third pass brings repetitions to 3 in the same attempt
            let out = last.unwrap();
            assert_eq!(out.state.repetitions, 3);
            assert_eq!(out.mastery, MasteryLevel::Expert);
            assert_eq!(e.path("u1", "rust").unwrap().unwrap().mastered, vec!["a"]);
        }

        #[test]
        fn shared_chunk_stays_in_step_across_paths() {
            let e = engine();
            let shared = vec![chunk("x", "ownership", &[])];
            e.create_path_at("u1", "alpha", &shared, &profile(&[]), t0())
                .unwrap();
            e.create_path_at("u1", "beta", &shared, &profile(&[]), t0())
                .unwrap();

            e.record_attempt_at("u1", "x", 90.0, 30, DeclaredDifficulty::Medium, t0())
                .unwrap();

            for topic in ["alpha", "beta"] {
                let p = e.path("u1", topic).unwrap().unwrap();
                assert_eq!(p.completed, vec!["x"]);
                assert_eq!(p.entry("x").unwrap().next_review, Some(t0() + Duration::days(1)));
            }

            let later = t0() + Duration::days(2);
            assert_eq!(
                e.next_item_at("u1", "beta", later).unwrap(),
                NextItem::Item {
                    chunk_id: "x".into(),
                    mode: ItemMode::Review
                }
            );
            assert_eq!(e.due_chunks_at("u1", later).unwrap(), vec!["x"]);
        }
    }

    mod queue_tests {
        use super::*;

        #[test]
        fn new_items_follow_path_order() {
            let e = seeded(&[]);
            assert_eq!(
                e.next_item_at("u1", "rust", t0()).unwrap(),
                NextItem::Item {
                    chunk_id: "a".into(),
                    mode: ItemMode::New
                }
            );
        }

        #[test]
        fn due_review_beats_new_material() {
            let e = seeded(&[]);
            e.record_attempt_at("u1", "a", 85.0, 30, DeclaredDifficulty::Medium, t0())
                .unwrap();

            // not yet due: next new chunk
            let soon = t0() + Duration::hours(1);
            assert_eq!(
                e.next_item_at("u1", "rust", soon).unwrap(),
                NextItem::Item {
                    chunk_id: "b".into(),
                    mode: ItemMode::New
                }
            );

            let tomorrow = t0() + Duration::days(1);
            assert_eq!(
                e.next_item_at("u1", "rust", tomorrow).unwrap(),
                NextItem::Item {
                    chunk_id: "a".into(),
                    mode: ItemMode::Review
                }
            );
        }

        #[test]
        fn priority_then_due_time_orders_reviews() {
            let e = seeded(&["traits"]);
            // c is high priority (weak), a and b low
            e.record_attempt_at("u1", "a", 85.0, 30, DeclaredDifficulty::Medium, t0())
                .unwrap();
            e.record_attempt_at("u1", "b", 85.0, 30, DeclaredDifficulty::Medium, t0() + Duration::hours(1))
                .unwrap();
            e.record_attempt_at("u1", "c", 85.0, 30, DeclaredDifficulty::Medium, t0() + Duration::hours(2))
                .unwrap();

            let later = t0() + Duration::days(3);
            assert_eq!(e.due_chunks_at("u1", later).unwrap(), vec!["c", "a", "b"]);
            assert_eq!(
                e.next_item_at("u1", "rust", later).unwrap(),
                NextItem::Item {
                    chunk_id: "c".into(),
                    mode: ItemMode::Review
                }
            );
        }

        #[test]
        fn failure_escalates_review_priority() {
            let e = seeded(&[]);
            e.record_attempt_at("u1", "a", 85.0, 30, DeclaredDifficulty::Medium, t0())
                .unwrap();
            e.record_attempt_at("u1", "b", 20.0, 30, DeclaredDifficulty::Medium, t0() + Duration::hours(1))
                .unwrap();
            let later = t0() + Duration::days(2);
            assert_eq!(e.due_chunks_at("u1", later).unwrap(), vec!["b", "a"]);
        }

        #[test]
        fn caught_up_when_complete_and_nothing_due() {
            let e = seeded(&[]);
            for id in ["a", "b", "c"] {
                e.record_attempt_at("u1", id, 90.0, 30, DeclaredDifficulty::Medium, t0())
                    .unwrap();
            }
            assert_eq!(e.next_item_at("u1", "rust", t0()).unwrap(), NextItem::CaughtUp);
            assert!(e.due_chunks_at("u1", t0()).unwrap().is_empty());
        }

        #[test]
        fn missing_path_is_an_error() {
            let e = engine();
            assert!(matches!(
                e.next_item_at("u1", "rust", t0()),
                Err(EngineError::PathNotFound { .. })
            ));
        }

        #[test]
        fn stats_aggregate_paths() {
            let e = seeded(&[]);
            e.record_attempt_at("u1", "a", 80.0, 100, DeclaredDifficulty::Medium, t0())
                .unwrap();
            e.record_attempt_at("u1", "b", 40.0, 50, DeclaredDifficulty::Medium, t0())
                .unwrap();
            let s = e.stats_at("u1", t0() + Duration::days(1)).unwrap();
            assert_eq!(s.paths, 1);
            assert_eq!(s.chunks, 3);
            assert_eq!(s.completed, 2);
            assert_eq!(s.struggling, 1);
            assert_eq!(s.due_now, 2);
            assert_eq!(s.attempts, 2);
            assert_eq!(s.total_time_seconds, 150);
            assert!((s.average_score - 60.0).abs() < 1e-9);
        }
    }
}
