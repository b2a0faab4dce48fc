use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Difficulty tier a chunk was authored at
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyTier {
    Beginner,
    Intermediate,
    Advanced,
}

impl DifficultyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyTier::Beginner => "beginner",
            DifficultyTier::Intermediate => "intermediate",
            DifficultyTier::Advanced => "advanced",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "beginner" | "b" => Some(DifficultyTier::Beginner),
            "intermediate" | "i" => Some(DifficultyTier::Intermediate),
            "advanced" | "a" => Some(DifficultyTier::Advanced),
            _ => None,
        }
    }
}

// How hard the learner said an attempt felt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclaredDifficulty {
    Easy,
    Medium,
    Hard,
}

impl DeclaredDifficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclaredDifficulty::Easy => "easy",
            DeclaredDifficulty::Medium => "medium",
            DeclaredDifficulty::Hard => "hard",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "easy" | "e" => Some(DeclaredDifficulty::Easy),
            "medium" | "m" => Some(DeclaredDifficulty::Medium),
            "hard" | "h" => Some(DeclaredDifficulty::Hard),
            _ => None,
        }
    }
}

// Learner's self-declared skill level for a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl SkillLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillLevel::Beginner => "beginner",
            SkillLevel::Intermediate => "intermediate",
            SkillLevel::Advanced => "advanced",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "beginner" => Some(SkillLevel::Beginner),
            "intermediate" => Some(SkillLevel::Intermediate),
            "advanced" => Some(SkillLevel::Advanced),
            _ => None,
        }
    }

    /// The chunk tier a learner at this level is comfortable with.
    pub fn comfortable_tier(&self) -> DifficultyTier {
        match self {
            SkillLevel::Beginner => DifficultyTier::Beginner,
            SkillLevel::Intermediate => DifficultyTier::Intermediate,
            SkillLevel::Advanced => DifficultyTier::Advanced,
        }
    }
}

/// Mastery of a single chunk, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasteryLevel {
    Novice,
    Developing,
    Proficient,
    Expert,
}

impl MasteryLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MasteryLevel::Novice => "novice",
            MasteryLevel::Developing => "developing",
            MasteryLevel::Proficient => "proficient",
            MasteryLevel::Expert => "expert",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "novice" => Some(MasteryLevel::Novice),
            "developing" => Some(MasteryLevel::Developing),
            "proficient" => Some(MasteryLevel::Proficient),
            "expert" => Some(MasteryLevel::Expert),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MasteryLevel::Novice => "Novice",
            MasteryLevel::Developing => "Developing",
            MasteryLevel::Proficient => "Proficient",
            MasteryLevel::Expert => "Mastered",
        }
    }
}

/// Review priority. Variant order is the rank: `High` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "high" | "h" => Some(Priority::High),
            "medium" | "m" => Some(Priority::Medium),
            "low" | "l" => Some(Priority::Low),
            _ => None,
        }
    }
}

// Per-(user, chunk) position in the review state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkPhase {
    Unseen,
    InProgress,
    Reviewing,
    Relearning,
}

impl ChunkPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkPhase::Unseen => "unseen",
            ChunkPhase::InProgress => "in_progress",
            ChunkPhase::Reviewing => "reviewing",
            ChunkPhase::Relearning => "relearning",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unseen" => Some(ChunkPhase::Unseen),
            "in_progress" | "in-progress" => Some(ChunkPhase::InProgress),
            "reviewing" => Some(ChunkPhase::Reviewing),
            "relearning" => Some(ChunkPhase::Relearning),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChunkPhase::Unseen => "Unseen",
            ChunkPhase::InProgress => "In Progress",
            ChunkPhase::Reviewing => "Reviewing",
            ChunkPhase::Relearning => "Relearning",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pace {
    Slow,
    Normal,
    Fast,
}

impl Pace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pace::Slow => "slow",
            Pace::Normal => "normal",
            Pace::Fast => "fast",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyPreference {
    Easier,
    Standard,
    Challenging,
}

impl DifficultyPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyPreference::Easier => "easier",
            DifficultyPreference::Standard => "standard",
            DifficultyPreference::Challenging => "challenging",
        }
    }
}

// A unit of learning content as produced by the content generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub title: String,
    pub concept: String,
    pub difficulty: DifficultyTier,
    pub estimated_minutes: u32,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub next: Vec<String>,
    #[serde(default)]
    pub content: serde_json::Value,
    pub topic: String,
    #[serde(default)]
    pub subtopic: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub deprecated: bool,
}

/// SM-2 repetition state, private to one (user, chunk) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewState {
    pub user_id: String,
    pub chunk_id: String,
    pub interval_days: u32,
    pub ease_factor: f64,
    pub repetitions: u32,
    pub next_review: DateTime<Utc>,
    pub phase: ChunkPhase,
}

impl ReviewState {
    /// State on first exposure: one-day interval, nothing repeated yet.
    pub fn new(user_id: &str, chunk_id: &str, initial_ease: f64, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            chunk_id: chunk_id.to_string(),
            interval_days: 1,
            ease_factor: initial_ease,
            repetitions: 0,
            next_review: now,
            phase: ChunkPhase::Unseen,
        }
    }
}

// Aggregated attempt history for one (user, chunk) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPerformance {
    pub user_id: String,
    pub chunk_id: String,
    pub attempts: u32,
    pub best_score: f64,
    pub average_score: f64,
    pub total_time_seconds: u64,
    pub last_attempt: Option<DateTime<Utc>>,
    pub mastery: MasteryLevel,
    pub struggling_tags: Vec<String>,
    pub strength_tags: Vec<String>,
}

impl UserPerformance {
    pub fn new(user_id: &str, chunk_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            chunk_id: chunk_id.to_string(),
            attempts: 0,
            best_score: 0.0,
            average_score: 0.0,
            total_time_seconds: 0,
            last_attempt: None,
            mastery: MasteryLevel::Novice,
            struggling_tags: vec![],
            strength_tags: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnerProfile {
    pub skill_level: SkillLevel,
    pub daily_minutes: u32,
    #[serde(default)]
    pub weak_areas: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptiveSettings {
    pub pace: Pace,
    pub difficulty: DifficultyPreference,
    pub session_minutes: u32,
}

// One row of a path's review schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewEntry {
    pub chunk_id: String,
    pub base_priority: Priority,
    pub priority: Priority,
    pub next_review: Option<DateTime<Utc>>,
}

impl ReviewEntry {
    /// Never-attempted entries have no review time and are not due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.next_review, Some(at) if at <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningPath {
    pub user_id: String,
    pub topic: String,
    pub chunk_ids: Vec<String>,
    pub cursor: usize,
    pub completed: Vec<String>,
    pub mastered: Vec<String>,
    pub struggling: Vec<String>,
    pub total_time_seconds: u64,
    pub attempts: u32,
    pub average_score: f64,
    pub settings: AdaptiveSettings,
    pub review_schedule: Vec<ReviewEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LearningPath {
    pub fn contains(&self, chunk_id: &str) -> bool {
        self.chunk_ids.iter().any(|id| id == chunk_id)
    }

    pub fn is_completed(&self, chunk_id: &str) -> bool {
        self.completed.iter().any(|id| id == chunk_id)
    }

    pub fn entry(&self, chunk_id: &str) -> Option<&ReviewEntry> {
        self.review_schedule.iter().find(|e| e.chunk_id == chunk_id)
    }

    pub fn entry_mut(&mut self, chunk_id: &str) -> Option<&mut ReviewEntry> {
        self.review_schedule
            .iter_mut()
            .find(|e| e.chunk_id == chunk_id)
    }

    /// First chunk in path order that has never been attempted.
    pub fn next_uncompleted(&self) -> Option<&str> {
        self.chunk_ids
            .iter()
            .find(|id| !self.is_completed(id))
            .map(String::as_str)
    }

    pub fn is_complete(&self) -> bool {
        self.next_uncompleted().is_none()
    }

    pub fn progress_percent(&self) -> f64 {
        if self.chunk_ids.is_empty() {
            100.0
        } else {
            (self.completed.len() as f64 / self.chunk_ids.len() as f64) * 100.0
        }
    }
}

/// One accepted attempt, as appended to the history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub user_id: String,
    pub chunk_id: String,
    pub score: f64,
    pub time_spent_seconds: u64,
    pub difficulty: DeclaredDifficulty,
    pub quality: u8,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptOutcome {
    pub state: ReviewState,
    pub mastery: MasteryLevel,
    pub quality: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemMode {
    New,
    Review,
}

impl ItemMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemMode::New => "new",
            ItemMode::Review => "review",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NextItem {
    Item { chunk_id: String, mode: ItemMode },
    CaughtUp,
}

// Everything known about one chunk for one learner
#[derive(Debug, Clone, Serialize)]
pub struct ChunkReport {
    pub chunk: Chunk,
    pub state: Option<ReviewState>,
    pub performance: Option<UserPerformance>,
    pub phase: ChunkPhase,
}

// JSON output wrapper for CLI
#[derive(Debug, Serialize)]
pub struct JsonOutput<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> JsonOutput<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
