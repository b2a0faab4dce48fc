use crate::models::{ChunkPhase, MasteryLevel};

/// Classify mastery of one chunk. First matching rule wins.
///
/// Every threshold is a lower bound, so raising any input can only move the
/// result up.
pub fn classify(average_score: f64, attempts: u32, repetitions: u32) -> MasteryLevel {
    if average_score >= 90.0 && repetitions >= 3 {
        MasteryLevel::Expert
    } else if average_score >= 80.0 && repetitions >= 2 {
        MasteryLevel::Proficient
    } else if average_score >= 70.0 && attempts >= 2 {
        MasteryLevel::Developing
    } else {
        MasteryLevel::Novice
    }
}

impl ChunkPhase {
    /// Transition after a scored attempt. Mastered chunks stay in `Reviewing`;
    /// mastery is a label, not a terminal phase.
    pub fn after_attempt(self, passed: bool) -> ChunkPhase {
        match (self, passed) {
            (_, true) => ChunkPhase::Reviewing,
            (ChunkPhase::Unseen | ChunkPhase::InProgress, false) => ChunkPhase::InProgress,
            (ChunkPhase::Reviewing | ChunkPhase::Relearning, false) => ChunkPhase::Relearning,
        }
    }
}
