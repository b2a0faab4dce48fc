use std::path::Path;

use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::de::DeserializeOwned;

use crate::error::StoreError;
use crate::models::{
    AttemptRecord, Chunk, ChunkPhase, DeclaredDifficulty, DifficultyTier, LearningPath,
    MasteryLevel, ReviewState, UserPerformance,
};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// What one attempt reads, taken inside the attempt's transaction.
#[derive(Debug, Clone)]
pub struct AttemptSnapshot {
    pub chunk: Option<Chunk>,
    /// Every path of the user that holds the chunk, by topic.
    pub paths: Vec<LearningPath>,
    pub state: Option<ReviewState>,
    pub performance: Option<UserPerformance>,
}

/// The records one attempt rewrites, plus its history row.
#[derive(Debug, Clone)]
pub struct AttemptWrite {
    pub paths: Vec<LearningPath>,
    pub state: ReviewState,
    pub performance: UserPerformance,
    pub record: AttemptRecord,
}

/// Persistent tables behind the engine, keyed by chunk id, (user, chunk)
/// and (user, topic).
pub trait LearningStore: Send + Sync {
    /// Insert new chunks. Existing ids only get their content replaced.
    fn put_chunks(&self, chunks: &[Chunk]) -> StoreResult<usize>;
    fn get_chunk(&self, id: &str) -> StoreResult<Option<Chunk>>;
    /// Chunks of a topic in generation order, deprecated ones included.
    fn chunks_for_topic(&self, topic: &str) -> StoreResult<Vec<Chunk>>;
    fn update_chunk_content(&self, id: &str, content: &serde_json::Value) -> StoreResult<bool>;
    fn deprecate_chunk(&self, id: &str) -> StoreResult<bool>;

    fn get_path(&self, user_id: &str, topic: &str) -> StoreResult<Option<LearningPath>>;
    /// Store a new path together with its chunks. When the user already has
    /// a path for the topic nothing is written and that path is returned.
    fn create_path(&self, chunks: &[Chunk], path: &LearningPath)
        -> StoreResult<Option<LearningPath>>;
    fn paths_for_user(&self, user_id: &str) -> StoreResult<Vec<LearningPath>>;

    fn get_review_state(&self, user_id: &str, chunk_id: &str) -> StoreResult<Option<ReviewState>>;
    fn get_performance(&self, user_id: &str, chunk_id: &str)
        -> StoreResult<Option<UserPerformance>>;

    /// Read the records of one attempt, let `apply` compute their
    /// replacements and write them back, all in one exclusive transaction.
    /// Nothing is written when `apply` fails.
    fn with_attempt<T, E, F>(&self, user_id: &str, chunk_id: &str, apply: F) -> Result<T, E>
    where
        F: FnOnce(AttemptSnapshot) -> Result<(AttemptWrite, T), E>,
        E: From<StoreError>;
    fn history(&self, user_id: &str, chunk_id: &str) -> StoreResult<Vec<AttemptRecord>>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(StoreError::InvalidData(msg)))
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn enum_col<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conversion_error(idx, format!("unrecognised value '{}'", raw)))
}

const CHUNK_COLUMNS: &str = "id, title, concept, difficulty, estimated_minutes, prerequisites, next_ids, content, topic, subtopic, tags, deprecated";

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    Ok(Chunk {
        id: row.get(0)?,
        title: row.get(1)?,
        concept: row.get(2)?,
        difficulty: enum_col(row, 3, DifficultyTier::from_str)?,
        estimated_minutes: row.get(4)?,
        prerequisites: json_col(row, 5)?,
        next: json_col(row, 6)?,
        content: json_col(row, 7)?,
        topic: row.get(8)?,
        subtopic: row.get(9)?,
        tags: json_col(row, 10)?,
        deprecated: row.get(11)?,
    })
}

const PATH_COLUMNS: &str = "user_id, topic, chunk_ids, cursor, completed, mastered, struggling, total_time_seconds, attempts, average_score, settings, review_schedule, created_at, updated_at";

fn path_from_row(row: &Row<'_>) -> rusqlite::Result<LearningPath> {
    let cursor: i64 = row.get(3)?;
    Ok(LearningPath {
        user_id: row.get(0)?,
        topic: row.get(1)?,
        chunk_ids: json_col(row, 2)?,
        cursor: cursor.max(0) as usize,
        completed: json_col(row, 4)?,
        mastered: json_col(row, 5)?,
        struggling: json_col(row, 6)?,
        total_time_seconds: row.get(7)?,
        attempts: row.get(8)?,
        average_score: row.get(9)?,
        settings: json_col(row, 10)?,
        review_schedule: json_col(row, 11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn state_from_row(row: &Row<'_>) -> rusqlite::Result<ReviewState> {
    Ok(ReviewState {
        user_id: row.get(0)?,
        chunk_id: row.get(1)?,
        interval_days: row.get(2)?,
        ease_factor: row.get(3)?,
        repetitions: row.get(4)?,
        next_review: row.get(5)?,
        phase: enum_col(row, 6, ChunkPhase::from_str)?,
    })
}

fn performance_from_row(row: &Row<'_>) -> rusqlite::Result<UserPerformance> {
    Ok(UserPerformance {
        user_id: row.get(0)?,
        chunk_id: row.get(1)?,
        attempts: row.get(2)?,
        best_score: row.get(3)?,
        average_score: row.get(4)?,
        total_time_seconds: row.get(5)?,
        last_attempt: row.get(6)?,
        mastery: enum_col(row, 7, MasteryLevel::from_str)?,
        struggling_tags: json_col(row, 8)?,
        strength_tags: json_col(row, 9)?,
    })
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn init(&self) -> StoreResult<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                concept TEXT NOT NULL,
                difficulty TEXT NOT NULL CHECK(difficulty IN ('beginner', 'intermediate', 'advanced')),
                estimated_minutes INTEGER NOT NULL DEFAULT 0,
                prerequisites TEXT NOT NULL DEFAULT '[]',
                next_ids TEXT NOT NULL DEFAULT '[]',
                content TEXT NOT NULL DEFAULT 'null',
                topic TEXT NOT NULL,
                subtopic TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                deprecated INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Repetition state is private to each (user, chunk)
            CREATE TABLE IF NOT EXISTS review_states (
                user_id TEXT NOT NULL,
                chunk_id TEXT NOT NULL,
                interval_days INTEGER NOT NULL CHECK(interval_days >= 1),
                ease_factor REAL NOT NULL CHECK(ease_factor >= 1.3),
                repetitions INTEGER NOT NULL DEFAULT 0,
                next_review TEXT NOT NULL,
                phase TEXT NOT NULL CHECK(phase IN ('unseen', 'in_progress', 'reviewing', 'relearning')),
                PRIMARY KEY (user_id, chunk_id)
            );

            CREATE TABLE IF NOT EXISTS performances (
                user_id TEXT NOT NULL,
                chunk_id TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                best_score REAL NOT NULL DEFAULT 0,
                average_score REAL NOT NULL DEFAULT 0,
                total_time_seconds INTEGER NOT NULL DEFAULT 0,
                last_attempt TEXT,
                mastery TEXT NOT NULL DEFAULT 'novice',
                struggling_tags TEXT NOT NULL DEFAULT '[]',
                strength_tags TEXT NOT NULL DEFAULT '[]',
                PRIMARY KEY (user_id, chunk_id)
            );

            CREATE TABLE IF NOT EXISTS learning_paths (
                user_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                chunk_ids TEXT NOT NULL,
                cursor INTEGER NOT NULL DEFAULT 0,
                completed TEXT NOT NULL DEFAULT '[]',
                mastered TEXT NOT NULL DEFAULT '[]',
                struggling TEXT NOT NULL DEFAULT '[]',
                total_time_seconds INTEGER NOT NULL DEFAULT 0,
                attempts INTEGER NOT NULL DEFAULT 0,
                average_score REAL NOT NULL DEFAULT 0,
                settings TEXT NOT NULL,
                review_schedule TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, topic)
            );

            -- Append-only log of accepted attempts
            CREATE TABLE IF NOT EXISTS attempt_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                chunk_id TEXT NOT NULL,
                score REAL NOT NULL,
                time_spent_seconds INTEGER NOT NULL,
                difficulty TEXT NOT NULL CHECK(difficulty IN ('easy', 'medium', 'hard')),
                quality INTEGER NOT NULL,
                attempted_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_topic ON chunks(topic);
            CREATE INDEX IF NOT EXISTS idx_review_states_due ON review_states(user_id, next_review);
            CREATE INDEX IF NOT EXISTS idx_history_user_chunk ON attempt_history(user_id, chunk_id);
            "#,
        )?;
        Ok(())
    }
}

// Statements shared by plain calls and transactions. A `Transaction`
// derefs to `Connection`, so both pass through here.

fn select_chunk(conn: &Connection, id: &str) -> StoreResult<Option<Chunk>> {
    let chunk = conn
        .query_row(
            &format!("SELECT {} FROM chunks WHERE id = ?1", CHUNK_COLUMNS),
            params![id],
            chunk_from_row,
        )
        .optional()?;
    Ok(chunk)
}

fn select_path(conn: &Connection, user_id: &str, topic: &str) -> StoreResult<Option<LearningPath>> {
    let path = conn
        .query_row(
            &format!(
                "SELECT {} FROM learning_paths WHERE user_id = ?1 AND topic = ?2",
                PATH_COLUMNS
            ),
            params![user_id, topic],
            path_from_row,
        )
        .optional()?;
    Ok(path)
}

fn select_paths(conn: &Connection, user_id: &str) -> StoreResult<Vec<LearningPath>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM learning_paths WHERE user_id = ?1 ORDER BY topic",
        PATH_COLUMNS
    ))?;
    let rows = stmt.query_map(params![user_id], path_from_row)?;
    let paths = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(paths)
}

fn select_state(conn: &Connection, user_id: &str, chunk_id: &str) -> StoreResult<Option<ReviewState>> {
    let state = conn
        .query_row(
            r#"
            SELECT user_id, chunk_id, interval_days, ease_factor, repetitions, next_review, phase
            FROM review_states
            WHERE user_id = ?1 AND chunk_id = ?2
            "#,
            params![user_id, chunk_id],
            state_from_row,
        )
        .optional()?;
    Ok(state)
}

fn select_performance(
    conn: &Connection,
    user_id: &str,
    chunk_id: &str,
) -> StoreResult<Option<UserPerformance>> {
    let perf = conn
        .query_row(
            r#"
            SELECT user_id, chunk_id, attempts, best_score, average_score, total_time_seconds,
                   last_attempt, mastery, struggling_tags, strength_tags
            FROM performances
            WHERE user_id = ?1 AND chunk_id = ?2
            "#,
            params![user_id, chunk_id],
            performance_from_row,
        )
        .optional()?;
    Ok(perf)
}

fn insert_chunks(conn: &Connection, chunks: &[Chunk]) -> StoreResult<usize> {
    let mut inserted = 0;
    for chunk in chunks {
        let rows = conn.execute(
            r#"
            INSERT INTO chunks (id, title, concept, difficulty, estimated_minutes,
                                prerequisites, next_ids, content, topic, subtopic, tags, deprecated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO NOTHING
            "#,
            params![
                chunk.id,
                chunk.title,
                chunk.concept,
                chunk.difficulty.as_str(),
                chunk.estimated_minutes,
                serde_json::to_string(&chunk.prerequisites)?,
                serde_json::to_string(&chunk.next)?,
                serde_json::to_string(&chunk.content)?,
                chunk.topic,
                chunk.subtopic,
                serde_json::to_string(&chunk.tags)?,
                chunk.deprecated,
            ],
        )?;
        if rows > 0 {
            inserted += 1;
        } else {
            conn.execute(
                "UPDATE chunks SET content = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![serde_json::to_string(&chunk.content)?, chunk.id],
            )?;
        }
    }
    Ok(inserted)
}

fn insert_path(conn: &Connection, path: &LearningPath) -> StoreResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO learning_paths ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            PATH_COLUMNS
        ),
        params![
            path.user_id,
            path.topic,
            serde_json::to_string(&path.chunk_ids)?,
            path.cursor as i64,
            serde_json::to_string(&path.completed)?,
            serde_json::to_string(&path.mastered)?,
            serde_json::to_string(&path.struggling)?,
            path.total_time_seconds,
            path.attempts,
            path.average_score,
            serde_json::to_string(&path.settings)?,
            serde_json::to_string(&path.review_schedule)?,
            path.created_at,
            path.updated_at,
        ],
    )?;
    Ok(())
}

fn write_attempt(conn: &Connection, write: &AttemptWrite) -> StoreResult<()> {
    let AttemptWrite {
        paths,
        state,
        performance,
        record,
    } = write;

    conn.execute(
        r#"
        INSERT INTO review_states (user_id, chunk_id, interval_days, ease_factor, repetitions, next_review, phase)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(user_id, chunk_id) DO UPDATE SET
            interval_days = excluded.interval_days,
            ease_factor = excluded.ease_factor,
            repetitions = excluded.repetitions,
            next_review = excluded.next_review,
            phase = excluded.phase
        "#,
        params![
            state.user_id,
            state.chunk_id,
            state.interval_days,
            state.ease_factor,
            state.repetitions,
            state.next_review,
            state.phase.as_str(),
        ],
    )?;

    conn.execute(
        r#"
        INSERT INTO performances (user_id, chunk_id, attempts, best_score, average_score,
                                  total_time_seconds, last_attempt, mastery, struggling_tags, strength_tags)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(user_id, chunk_id) DO UPDATE SET
            attempts = excluded.attempts,
            best_score = excluded.best_score,
            average_score = excluded.average_score,
            total_time_seconds = excluded.total_time_seconds,
            last_attempt = excluded.last_attempt,
            mastery = excluded.mastery,
            struggling_tags = excluded.struggling_tags,
            strength_tags = excluded.strength_tags
        "#,
        params![
            performance.user_id,
            performance.chunk_id,
            performance.attempts,
            performance.best_score,
            performance.average_score,
            performance.total_time_seconds,
            performance.last_attempt,
            performance.mastery.as_str(),
            serde_json::to_string(&performance.struggling_tags)?,
            serde_json::to_string(&performance.strength_tags)?,
        ],
    )?;

    for path in paths {
        let rows = conn.execute(
            r#"
            UPDATE learning_paths
            SET cursor = ?1,
                completed = ?2,
                mastered = ?3,
                struggling = ?4,
                total_time_seconds = ?5,
                attempts = ?6,
                average_score = ?7,
                review_schedule = ?8,
                updated_at = ?9
            WHERE user_id = ?10 AND topic = ?11
            "#,
            params![
                path.cursor as i64,
                serde_json::to_string(&path.completed)?,
                serde_json::to_string(&path.mastered)?,
                serde_json::to_string(&path.struggling)?,
                path.total_time_seconds,
                path.attempts,
                path.average_score,
                serde_json::to_string(&path.review_schedule)?,
                path.updated_at,
                path.user_id,
                path.topic,
            ],
        )?;
        if rows == 0 {
            return Err(StoreError::InvalidData(format!(
                "no learning path for user '{}' and topic '{}'",
                path.user_id, path.topic
            )));
        }
    }

    conn.execute(
        r#"
        INSERT INTO attempt_history (user_id, chunk_id, score, time_spent_seconds, difficulty, quality, attempted_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            record.user_id,
            record.chunk_id,
            record.score,
            record.time_spent_seconds,
            record.difficulty.as_str(),
            record.quality,
            record.attempted_at,
        ],
    )?;
    Ok(())
}

impl LearningStore for Database {
    // Chunk operations
    fn put_chunks(&self, chunks: &[Chunk]) -> StoreResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let inserted = insert_chunks(&tx, chunks)?;
        tx.commit()?;
        Ok(inserted)
    }

    fn get_chunk(&self, id: &str) -> StoreResult<Option<Chunk>> {
        select_chunk(&self.conn.lock(), id)
    }

    fn chunks_for_topic(&self, topic: &str) -> StoreResult<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chunks WHERE topic = ?1 ORDER BY rowid",
            CHUNK_COLUMNS
        ))?;
        let rows = stmt.query_map(params![topic], chunk_from_row)?;
        let chunks = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    fn update_chunk_content(&self, id: &str, content: &serde_json::Value) -> StoreResult<bool> {
        let rows = self.conn.lock().execute(
            "UPDATE chunks SET content = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![serde_json::to_string(content)?, id],
        )?;
        Ok(rows > 0)
    }

    fn deprecate_chunk(&self, id: &str) -> StoreResult<bool> {
        let rows = self.conn.lock().execute(
            "UPDATE chunks SET deprecated = 1, updated_at = datetime('now') WHERE id = ?1",
            params![id],
        )?;
        Ok(rows > 0)
    }

    // Learning path operations
    fn get_path(&self, user_id: &str, topic: &str) -> StoreResult<Option<LearningPath>> {
        select_path(&self.conn.lock(), user_id, topic)
    }

    fn create_path(
        &self,
        chunks: &[Chunk],
        path: &LearningPath,
    ) -> StoreResult<Option<LearningPath>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Some(existing) = select_path(&tx, &path.user_id, &path.topic)? {
            return Ok(Some(existing));
        }
        insert_chunks(&tx, chunks)?;
        insert_path(&tx, path)?;
        tx.commit()?;
        Ok(None)
    }

    fn paths_for_user(&self, user_id: &str) -> StoreResult<Vec<LearningPath>> {
        select_paths(&self.conn.lock(), user_id)
    }

    // Per-(user, chunk) records
    fn get_review_state(&self, user_id: &str, chunk_id: &str) -> StoreResult<Option<ReviewState>> {
        select_state(&self.conn.lock(), user_id, chunk_id)
    }

    fn get_performance(
        &self,
        user_id: &str,
        chunk_id: &str,
    ) -> StoreResult<Option<UserPerformance>> {
        select_performance(&self.conn.lock(), user_id, chunk_id)
    }

    fn with_attempt<T, E, F>(&self, user_id: &str, chunk_id: &str, apply: F) -> Result<T, E>
    where
        F: FnOnce(AttemptSnapshot) -> Result<(AttemptWrite, T), E>,
        E: From<StoreError>,
    {
        let mut conn = self.conn.lock();
        // IMMEDIATE takes the write lock up front, so another connection
        // cannot interleave between the reads and the writes.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;

        let snapshot = AttemptSnapshot {
            chunk: select_chunk(&tx, chunk_id)?,
            paths: select_paths(&tx, user_id)?
                .into_iter()
                .filter(|p| p.contains(chunk_id))
                .collect(),
            state: select_state(&tx, user_id, chunk_id)?,
            performance: select_performance(&tx, user_id, chunk_id)?,
        };

        // Dropping `tx` on any early return rolls back.
        let (write, out) = apply(snapshot)?;
        write_attempt(&tx, &write)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(out)
    }

    fn history(&self, user_id: &str, chunk_id: &str) -> StoreResult<Vec<AttemptRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT user_id, chunk_id, score, time_spent_seconds, difficulty, quality, attempted_at
            FROM attempt_history
            WHERE user_id = ?1 AND chunk_id = ?2
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map(params![user_id, chunk_id], |row| {
            Ok(AttemptRecord {
                user_id: row.get(0)?,
                chunk_id: row.get(1)?,
                score: row.get(2)?,
                time_spent_seconds: row.get(3)?,
                difficulty: enum_col(row, 4, DeclaredDifficulty::from_str)?,
                quality: row.get(5)?,
                attempted_at: row.get(6)?,
            })
        })?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}
