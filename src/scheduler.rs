//! SM-2 derived review scheduling.
//!
//! `ReviewScheduler::update` is total: any `ReviewState` and any `Quality`
//! produce a new state. Range checking of raw scores happens at the engine
//! boundary before a quality is ever derived.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::models::{DeclaredDifficulty, ReviewState};

pub const MIN_EASE_FACTOR: f64 = 1.3;
pub const DEFAULT_EASE_FACTOR: f64 = 2.5;

/// Attempt quality on the 0..=5 SM-2 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Quality(u8);

impl Quality {
    pub const MAX: u8 = 5;

    /// Values above 5 are clamped.
    pub fn new(value: u8) -> Self {
        Quality(value.min(Self::MAX))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_pass(self) -> bool {
        self.0 >= 3
    }
}

/// Map a raw attempt onto the quality scale.
///
/// One quality step per 20 points, plus one for a strong result at a declared
/// difficulty (easy at 80+, hard at 60+).
pub fn quality_from_attempt(score: f64, difficulty: DeclaredDifficulty) -> Quality {
    let base = (score / 20.0).floor() as i32;
    let bonus = match difficulty {
        DeclaredDifficulty::Easy if score >= 80.0 => 1,
        DeclaredDifficulty::Hard if score >= 60.0 => 1,
        _ => 0,
    };
    Quality((base + bonus).clamp(0, Quality::MAX as i32) as u8)
}

pub fn next_ease(ease: f64, quality: Quality) -> f64 {
    let miss = (Quality::MAX - quality.value()) as f64;
    (ease + (0.1 - miss * (0.08 + miss * 0.02))).max(MIN_EASE_FACTOR)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewScheduler {
    max_interval_days: Option<u32>,
}

impl ReviewScheduler {
    pub fn new(max_interval_days: Option<u32>) -> Self {
        Self { max_interval_days }
    }

    pub fn update(&self, state: &ReviewState, quality: Quality, now: DateTime<Utc>) -> ReviewState {
        let ease_factor = next_ease(state.ease_factor, quality);

        let (interval_days, repetitions) = if quality.is_pass() {
            let repetitions = state.repetitions + 1;
            let interval = match repetitions {
                1 => 1,
                2 => 6,
                _ => {
                    let grown = (state.interval_days as f64 * ease_factor).round();
                    grown.min(u32::MAX as f64) as u32
                }
            };
            (self.cap(interval), repetitions)
        } else {
            (1, 0)
        };

        debug!(
            chunk_id = %state.chunk_id,
            quality = quality.value(),
            interval_days,
            repetitions,
            ease_factor,
            "review state updated"
        );

        ReviewState {
            user_id: state.user_id.clone(),
            chunk_id: state.chunk_id.clone(),
            interval_days,
            ease_factor,
            repetitions,
            next_review: now
                .checked_add_signed(Duration::days(interval_days as i64))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            phase: state.phase.after_attempt(quality.is_pass()),
        }
    }

    fn cap(&self, interval: u32) -> u32 {
        match self.max_interval_days {
            Some(max) => interval.min(max).max(1),
            None => interval.max(1),
        }
    }
}
