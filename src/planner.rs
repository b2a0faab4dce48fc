//! Learning-path planning over a topic's prerequisite graph.
//!
//! Chunks and their prerequisite/next edges form a DAG. The planner emits a
//! topological order in which weak-area chunks surface as soon as their
//! prerequisites are met, with generation order breaking every tie.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::models::{
    AdaptiveSettings, Chunk, DifficultyPreference, LearnerProfile, LearningPath, Pace, Priority,
    ReviewEntry, SkillLevel,
};

const MAX_SESSION_MINUTES: u32 = 30;

impl AdaptiveSettings {
    pub fn derive(profile: &LearnerProfile) -> Self {
        let pace = if profile.daily_minutes < 30 {
            Pace::Slow
        } else if profile.daily_minutes > 60 {
            Pace::Fast
        } else {
            Pace::Normal
        };
        let difficulty = match profile.skill_level {
            SkillLevel::Beginner => DifficultyPreference::Easier,
            SkillLevel::Advanced => DifficultyPreference::Challenging,
            SkillLevel::Intermediate => DifficultyPreference::Standard,
        };
        Self {
            pace,
            difficulty,
            session_minutes: profile.daily_minutes.min(MAX_SESSION_MINUTES),
        }
    }
}

fn is_weak(chunk: &Chunk, weak_areas: &HashSet<String>) -> bool {
    weak_areas.contains(&chunk.concept.to_lowercase())
}

/// Planning-time review priority for one chunk.
pub fn assign_priority(chunk: &Chunk, profile: &LearnerProfile) -> Priority {
    let concept = chunk.concept.to_lowercase();
    let weak = profile
        .weak_areas
        .iter()
        .any(|w| w.to_lowercase() == concept);
    if weak {
        Priority::High
    } else if chunk.difficulty > profile.skill_level.comfortable_tier() {
        Priority::Medium
    } else {
        Priority::Low
    }
}

// Adjacency over generation indices.
struct Graph {
    successors: Vec<BTreeSet<usize>>,
    predecessors: Vec<BTreeSet<usize>>,
}

impl Graph {
    fn build(chunks: &[&Chunk]) -> Self {
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, c) in chunks.iter().enumerate() {
            index.entry(c.id.as_str()).or_insert(i);
        }

        let n = chunks.len();
        let mut successors = vec![BTreeSet::new(); n];
        let mut predecessors = vec![BTreeSet::new(); n];
        let mut link = |from: usize, to: usize| {
            successors[from].insert(to);
            predecessors[to].insert(from);
        };

        for (i, c) in chunks.iter().enumerate() {
            for p in &c.prerequisites {
                match index.get(p.as_str()) {
                    Some(&from) => link(from, i),
                    None => warn!(chunk_id = %c.id, prerequisite = %p, "dropping edge to unknown prerequisite"),
                }
            }
            for nx in &c.next {
                match index.get(nx.as_str()) {
                    Some(&to) => link(i, to),
                    None => warn!(chunk_id = %c.id, next = %nx, "dropping edge to unknown dependent"),
                }
            }
        }

        Self {
            successors,
            predecessors,
        }
    }

    fn ancestors_of(&self, seeds: &[usize]) -> HashSet<usize> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<usize> = seeds.iter().copied().collect();
        while let Some(node) = queue.pop_front() {
            for &p in &self.predecessors[node] {
                if seen.insert(p) {
                    queue.push_back(p);
                }
            }
        }
        seen
    }

    // Unplaced nodes that survive repeated sink peeling lie on, or
    // between, cycles.
    fn cyclic_core(&self, placed: &[bool]) -> Vec<usize> {
        let mut alive: Vec<bool> = placed.iter().map(|p| !p).collect();
        loop {
            let sinks: Vec<usize> = (0..alive.len())
                .filter(|&i| alive[i] && !self.successors[i].iter().any(|&s| alive[s]))
                .collect();
            if sinks.is_empty() {
                break;
            }
            for i in sinks {
                alive[i] = false;
            }
        }
        (0..alive.len()).filter(|&i| alive[i]).collect()
    }
}

/// Order chunk ids for a learner, or fail on a cyclic prerequisite graph.
///
/// Deprecated chunks still constrain the order and take part in cycle
/// detection, but are left out of the result, as are repeated ids. Ready
/// chunks are taken weak-area first,
/// then prerequisites of pending weak-area chunks, then everything else; each
/// class in generation order.
pub fn order_chunks(chunks: &[Chunk], weak_areas: &[String]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let active: Vec<&Chunk> = chunks
        .iter()
        .filter(|c| seen.insert(c.id.as_str()))
        .collect();
    let graph = Graph::build(&active);
    let weak: HashSet<String> = weak_areas.iter().map(|w| w.to_lowercase()).collect();

    let weak_nodes: Vec<usize> = (0..active.len())
        .filter(|&i| is_weak(active[i], &weak))
        .collect();
    let feeders = graph.ancestors_of(&weak_nodes);

    let class = |i: usize| -> u8 {
        if is_weak(active[i], &weak) {
            0
        } else if feeders.contains(&i) {
            1
        } else {
            2
        }
    };

    let mut in_degree: Vec<usize> = graph.predecessors.iter().map(BTreeSet::len).collect();
    let mut ready: BTreeSet<(u8, usize)> = (0..active.len())
        .filter(|&i| in_degree[i] == 0)
        .map(|i| (class(i), i))
        .collect();

    let mut order = Vec::with_capacity(active.len());
    let mut placed = vec![false; active.len()];
    while let Some(next) = ready.pop_first() {
        let (_, node) = next;
        order.push(node);
        placed[node] = true;
        for &s in &graph.successors[node] {
            in_degree[s] -= 1;
            if in_degree[s] == 0 {
                ready.insert((class(s), s));
            }
        }
    }

    if order.len() < active.len() {
        let chunk_ids: Vec<String> = graph
            .cyclic_core(&placed)
            .into_iter()
            .map(|i| active[i].id.clone())
            .collect();
        return Err(EngineError::CyclicPrerequisite { chunk_ids });
    }

    Ok(order
        .into_iter()
        .filter(|&i| !active[i].deprecated)
        .map(|i| active[i].id.clone())
        .collect())
}

/// Build a fresh learning path for one learner and topic.
pub fn plan(
    user_id: &str,
    topic: &str,
    chunks: &[Chunk],
    profile: &LearnerProfile,
    now: DateTime<Utc>,
) -> Result<LearningPath> {
    let chunk_ids = order_chunks(chunks, &profile.weak_areas)?;
    let mut by_id: HashMap<&str, &Chunk> = HashMap::new();
    for c in chunks {
        by_id.entry(c.id.as_str()).or_insert(c);
    }

    let review_schedule = chunk_ids
        .iter()
        .filter_map(|id| by_id.get(id.as_str()))
        .map(|c| {
            let priority = assign_priority(c, profile);
            ReviewEntry {
                chunk_id: c.id.clone(),
                base_priority: priority,
                priority,
                next_review: None,
            }
        })
        .collect();

    let settings = AdaptiveSettings::derive(profile);
    debug!(user_id, topic, chunks = chunk_ids.len(), pace = settings.pace.as_str(), "planned path");

    Ok(LearningPath {
        user_id: user_id.to_string(),
        topic: topic.to_string(),
        chunk_ids,
        cursor: 0,
        completed: vec![],
        mastered: vec![],
        struggling: vec![],
        total_time_seconds: 0,
        attempts: 0,
        average_score: 0.0,
        settings,
        review_schedule,
        created_at: now,
        updated_at: now,
    })
}
