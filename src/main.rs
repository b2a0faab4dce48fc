use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};

use chunkpath::db::LearningStore;
use chunkpath::models::{
    Chunk, DeclaredDifficulty, JsonOutput, LearnerProfile, LearningPath, NextItem, SkillLevel,
};
use chunkpath::{Config, Database, Engine};

#[derive(Parser)]
#[command(name = "chunkpath")]
#[command(about = "Spaced-repetition scheduler and learning-path planner for chunked content")]
#[command(version)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging on stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Config file (defaults to <config dir>/chunkpath/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage learning chunks
    #[command(subcommand)]
    Chunk(ChunkCommands),

    /// Manage learning paths
    #[command(subcommand)]
    Path(PathCommands),

    /// Record an attempt at a chunk
    Attempt {
        /// User ID
        user: String,

        /// Chunk ID
        chunk: String,

        /// Score from 0 to 100
        #[arg(long, short, allow_negative_numbers = true)]
        score: f64,

        /// Time spent in seconds
        #[arg(long, short, default_value_t = 0, allow_negative_numbers = true)]
        time: i64,

        /// Declared difficulty: easy/medium/hard
        #[arg(long, short, default_value = "medium")]
        difficulty: String,
    },

    /// List chunks due for review across all paths
    Due {
        /// User ID
        user: String,
    },

    /// Get the next item to study on a path
    Next {
        /// User ID
        user: String,

        /// Topic
        topic: String,
    },

    /// Show learning statistics
    Stats {
        /// User ID
        user: String,
    },
}

#[derive(Subcommand)]
enum ChunkCommands {
    /// Import chunks from a JSON array file
    Import {
        /// Path to the JSON file
        file: PathBuf,
    },

    /// Show chunk details
    Show {
        /// Chunk ID
        id: String,

        /// Include this user's progress on the chunk
        #[arg(long, short)]
        user: Option<String>,
    },

    /// Replace a chunk's content with the JSON in a file
    Edit {
        /// Chunk ID
        id: String,

        /// Path to the JSON content file
        file: PathBuf,
    },

    /// Exclude a chunk from newly created paths
    Deprecate {
        /// Chunk ID
        id: String,
    },
}

#[derive(Subcommand)]
enum PathCommands {
    /// Plan a learning path from the imported chunks of a topic
    Create {
        /// User ID
        user: String,

        /// Topic
        topic: String,

        /// Skill level: beginner/intermediate/advanced
        #[arg(long, short, default_value = "beginner")]
        skill: String,

        /// Daily study minutes
        #[arg(long, short, default_value_t = 30)]
        minutes: u32,

        /// Comma-separated weak areas
        #[arg(long, short)]
        weak: Option<String>,
    },

    /// Show a learning path
    Show {
        /// User ID
        user: String,

        /// Topic
        topic: String,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_json<T: Serialize>(data: T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string(&JsonOutput::ok(data))?);
    Ok(())
}

fn print_not_found(json: bool, what: &str) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string(&JsonOutput::<()>::err(format!("{} not found", what)))?);
    } else {
        println!("{} not found.", what);
    }
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(cli.config.as_deref())?;
    let db_path = config.db_path();
    let db = Database::open(&db_path)?;
    db.init()?;
    let engine = Engine::new(db, &config.scheduler);

    match cli.command {
        Commands::Init => {
            if cli.json {
                print_json(serde_json::json!({ "database": db_path.display().to_string() }))?;
            } else {
                println!("Database initialized at: {}", db_path.display());
            }
        }

        Commands::Chunk(chunk_cmd) => match chunk_cmd {
            ChunkCommands::Import { file } => {
                let chunks: Vec<Chunk> = read_json(&file)?;
                let inserted = engine.import_chunks(&chunks)?;
                if cli.json {
                    print_json(serde_json::json!({
                        "received": chunks.len(),
                        "inserted": inserted
                    }))?;
                } else {
                    println!(
                        "Imported {} chunks ({} new, {} content updates).",
                        chunks.len(),
                        inserted,
                        chunks.len() - inserted
                    );
                }
            }

            ChunkCommands::Show { id, user } => {
                let Some(chunk) = engine.store().get_chunk(&id)? else {
                    print_not_found(cli.json, "Chunk")?;
                    return Ok(());
                };
                let report = match &user {
                    Some(u) => Some(engine.chunk_report(u, &id)?),
                    None => None,
                };

                if cli.json {
                    match report {
                        Some(r) => print_json(&r)?,
                        None => print_json(&chunk)?,
                    }
                } else {
                    print_chunk(&chunk);
                    if let Some(r) = report {
                        println!();
                        println!("--- Progress ---");
                        println!("Phase: {}", r.phase.label());
                        if let Some(p) = &r.performance {
                            println!("Mastery: {}", p.mastery.label());
                            println!(
                                "Attempts: {} (avg {:.1}, best {:.0})",
                                p.attempts, p.average_score, p.best_score
                            );
                            if !p.struggling_tags.is_empty() {
                                println!("Struggling with: {}", p.struggling_tags.join(", "));
                            }
                        }
                        if let Some(s) = &r.state {
                            println!(
                                "Interval: {} days, ease {:.2}, {} repetitions",
                                s.interval_days, s.ease_factor, s.repetitions
                            );
                            println!("Next review: {}", s.next_review);
                        }
                    }
                }
            }

            ChunkCommands::Edit { id, file } => {
                let content: serde_json::Value = read_json(&file)?;
                if engine.update_chunk_content(&id, &content)? {
                    if cli.json {
                        print_json(())?;
                    } else {
                        println!("Content of chunk {} updated.", id);
                    }
                } else {
                    print_not_found(cli.json, "Chunk")?;
                }
            }

            ChunkCommands::Deprecate { id } => {
                if engine.deprecate_chunk(&id)? {
                    if cli.json {
                        print_json(())?;
                    } else {
                        println!("Chunk {} deprecated.", id);
                    }
                } else {
                    print_not_found(cli.json, "Chunk")?;
                }
            }
        },

        Commands::Path(path_cmd) => match path_cmd {
            PathCommands::Create {
                user,
                topic,
                skill,
                minutes,
                weak,
            } => {
                let skill_level = SkillLevel::from_str(&skill).ok_or_else(|| {
                    format!(
                        "Invalid skill level '{}'. Use: beginner, intermediate, or advanced",
                        skill
                    )
                })?;
                let profile = LearnerProfile {
                    skill_level,
                    daily_minutes: minutes,
                    weak_areas: weak.as_deref().map(parse_list).unwrap_or_default(),
                };

                let path = engine.create_path_for_topic(&user, &topic, &profile)?;
                if cli.json {
                    print_json(&path)?;
                } else {
                    println!(
                        "Path for '{}' on '{}': {} chunks, {} pace, {} minute sessions.",
                        user,
                        topic,
                        path.chunk_ids.len(),
                        path.settings.pace.as_str(),
                        path.settings.session_minutes
                    );
                    print_path(&path);
                }
            }

            PathCommands::Show { user, topic } => match engine.path(&user, &topic)? {
                Some(path) => {
                    if cli.json {
                        print_json(&path)?;
                    } else {
                        print_path(&path);
                    }
                }
                None => print_not_found(cli.json, "Learning path")?,
            },
        },

        Commands::Attempt {
            user,
            chunk,
            score,
            time,
            difficulty,
        } => {
            let declared = DeclaredDifficulty::from_str(&difficulty).ok_or_else(|| {
                format!(
                    "Invalid difficulty '{}'. Use: easy, medium, or hard",
                    difficulty
                )
            })?;

            let outcome = engine.record_attempt(&user, &chunk, score, time, declared)?;

            if cli.json {
                print_json(&outcome)?;
            } else {
                println!("Attempt recorded for chunk {} (quality {}).", chunk, outcome.quality);
                println!("Mastery: {}", outcome.mastery.label());
                println!(
                    "Next review in {} days: {}",
                    outcome.state.interval_days, outcome.state.next_review
                );
            }
        }

        Commands::Due { user } => {
            let due = engine.due_chunks(&user)?;
            if cli.json {
                print_json(&due)?;
            } else if due.is_empty() {
                println!("Nothing due for review.");
            } else {
                println!("=== Due for Review ===");
                for (i, id) in due.iter().enumerate() {
                    println!("{:>3}. {}", i + 1, id);
                }
            }
        }

        Commands::Next { user, topic } => {
            let next = engine.next_item(&user, &topic)?;
            if cli.json {
                print_json(&next)?;
            } else {
                match next {
                    NextItem::Item { chunk_id, mode } => {
                        let title = engine
                            .store()
                            .get_chunk(&chunk_id)?
                            .map(|c| c.title)
                            .unwrap_or_default();
                        println!("=== Next ({}) ===", mode.as_str());
                        println!("Chunk: {} ({})", title, chunk_id);
                        println!();
                        println!("After studying, record the attempt with:");
                        println!(
                            "  chunkpath attempt {} {} --score <0-100> --time <seconds>",
                            user, chunk_id
                        );
                    }
                    NextItem::CaughtUp => println!("All caught up on '{}'.", topic),
                }
            }
        }

        Commands::Stats { user } => {
            let stats = engine.stats(&user)?;
            if cli.json {
                print_json(&stats)?;
            } else {
                println!("=== Learning Statistics for {} ===", user);
                println!("Paths: {}", stats.paths);
                println!("Chunks: {} ({} completed)", stats.chunks, stats.completed);
                println!("Mastered: {}", stats.mastered);
                println!("Struggling: {}", stats.struggling);
                println!("Due for review: {}", stats.due_now);
                println!("Attempts: {}", stats.attempts);
                println!("Average score: {:.1}", stats.average_score);
                println!("Time spent: {} min", stats.total_time_seconds / 60);
            }
        }
    }

    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(
    file: &Path,
) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(file)
        .map_err(|e| format!("failed to read {}: {}", file.display(), e))?;
    Ok(serde_json::from_str(&raw)?)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn print_chunk(chunk: &Chunk) {
    println!("Chunk: {}", chunk.title);
    println!("ID: {}", chunk.id);
    println!("Concept: {}", chunk.concept);
    println!("Topic: {}", chunk.topic);
    if let Some(sub) = &chunk.subtopic {
        println!("Subtopic: {}", sub);
    }
    println!("Difficulty: {}", chunk.difficulty.as_str());
    println!("Estimated: {} min", chunk.estimated_minutes);
    println!(
        "Prerequisites: {}",
        if chunk.prerequisites.is_empty() {
            "-".to_string()
        } else {
            chunk.prerequisites.join(", ")
        }
    );
    if chunk.deprecated {
        println!("Deprecated: yes");
    }
}

fn print_path(path: &LearningPath) {
    println!(
        "Progress: {:.0}% ({} of {} completed, {} mastered)",
        path.progress_percent(),
        path.completed.len(),
        path.chunk_ids.len(),
        path.mastered.len()
    );
    println!();
    println!("{:<4} {:<30} {:<10} {:<8} NEXT REVIEW", "#", "CHUNK", "STATUS", "PRIORITY");
    println!("{}", "-".repeat(75));
    for (i, id) in path.chunk_ids.iter().enumerate() {
        let status = if path.mastered.contains(id) {
            "mastered"
        } else if path.struggling.contains(id) {
            "struggling"
        } else if path.is_completed(id) {
            "done"
        } else if i == path.cursor {
            "next"
        } else {
            "-"
        };
        let entry = path.entry(id);
        let priority = entry.map_or("-", |e| e.priority.as_str());
        let next_review = entry
            .and_then(|e| e.next_review)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<4} {:<30} {:<10} {:<8} {}",
            i + 1,
            truncate(id, 28),
            status,
            priority,
            next_review
        );
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    mod truncate_tests {
        use super::*;

        #[test]
        fn truncate_short_string() {
            assert_eq!(truncate("loops", 10), "loops");
        }

        #[test]
        fn truncate_long_string() {
            assert_eq!(truncate("ownership-basics", 8), "owner...");
        }

        #[test]
        fn truncate_multibyte() {
            assert_eq!(truncate("größenordnung", 6), "grö...");
        }
    }

    mod parse_list_tests {
        use super::*;

        #[test]
        fn splits_and_trims() {
            assert_eq!(parse_list("traits, lifetimes ,,"), vec!["traits", "lifetimes"]);
        }

        #[test]
        fn empty_input() {
            assert!(parse_list("").is_empty());
        }
    }

    mod cli_parsing_tests {
        use super::*;

        #[test]
        fn parse_init_with_json() {
            let cli = Cli::try_parse_from(["chunkpath", "--json", "init"]).unwrap();
            assert!(cli.json);
            assert!(!cli.verbose);
            assert!(matches!(cli.command, Commands::Init));
        }

        #[test]
        fn parse_global_flags_after_subcommand() {
            let cli = Cli::try_parse_from(["chunkpath", "due", "u1", "--json", "-v"]).unwrap();
            assert!(cli.json);
            assert!(cli.verbose);
            match cli.command {
                Commands::Due { user } => assert_eq!(user, "u1"),
                _ => panic!("Expected Due command"),
            }
        }

        #[test]
        fn parse_config_path() {
            let cli =
                Cli::try_parse_from(["chunkpath", "--config", "/tmp/c.toml", "stats", "u1"]).unwrap();
            assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        }

        #[test]
        fn parse_chunk_import() {
            let cli = Cli::try_parse_from(["chunkpath", "chunk", "import", "chunks.json"]).unwrap();
            match cli.command {
                Commands::Chunk(ChunkCommands::Import { file }) => {
                    assert_eq!(file, PathBuf::from("chunks.json"));
                }
                _ => panic!("Expected Chunk Import command"),
            }
        }

        #[test]
        fn parse_chunk_show_with_user() {
            let cli = Cli::try_parse_from(["chunkpath", "chunk", "show", "c1", "-u", "u1"]).unwrap();
            match cli.command {
                Commands::Chunk(ChunkCommands::Show { id, user }) => {
                    assert_eq!(id, "c1");
                    assert_eq!(user, Some("u1".to_string()));
                }
                _ => panic!("Expected Chunk Show command"),
            }
        }

        #[test]
        fn parse_chunk_edit() {
            let cli =
                Cli::try_parse_from(["chunkpath", "chunk", "edit", "c1", "body.json"]).unwrap();
            match cli.command {
                Commands::Chunk(ChunkCommands::Edit { id, file }) => {
                    assert_eq!(id, "c1");
                    assert_eq!(file, PathBuf::from("body.json"));
                }
                _ => panic!("Expected Chunk Edit command"),
            }
        }

        #[test]
        fn parse_path_create_defaults() {
            let cli = Cli::try_parse_from(["chunkpath", "path", "create", "u1", "rust"]).unwrap();
            match cli.command {
                Commands::Path(PathCommands::Create {
                    user,
                    topic,
                    skill,
                    minutes,
                    weak,
                }) => {
                    assert_eq!(user, "u1");
                    assert_eq!(topic, "rust");
                    assert_eq!(skill, "beginner");
                    assert_eq!(minutes, 30);
                    assert!(weak.is_none());
                }
                _ => panic!("Expected Path Create command"),
            }
        }

        #[test]
        fn parse_path_create_full() {
            let cli = Cli::try_parse_from([
                "chunkpath",
                "path",
                "create",
                "u1",
                "rust",
                "--skill",
                "advanced",
                "--minutes",
                "90",
                "--weak",
                "traits,lifetimes",
            ])
            .unwrap();
            match cli.command {
                Commands::Path(PathCommands::Create {
                    skill,
                    minutes,
                    weak,
                    ..
                }) => {
                    assert_eq!(skill, "advanced");
                    assert_eq!(minutes, 90);
                    assert_eq!(weak, Some("traits,lifetimes".to_string()));
                }
                _ => panic!("Expected Path Create command"),
            }
        }

        #[test]
        fn parse_attempt() {
            let cli = Cli::try_parse_from([
                "chunkpath", "attempt", "u1", "c1", "--score", "85", "--time", "120", "-d", "hard",
            ])
            .unwrap();
            match cli.command {
                Commands::Attempt {
                    user,
                    chunk,
                    score,
                    time,
                    difficulty,
                } => {
                    assert_eq!(user, "u1");
                    assert_eq!(chunk, "c1");
                    assert_eq!(score, 85.0);
                    assert_eq!(time, 120);
                    assert_eq!(difficulty, "hard");
                }
                _ => panic!("Expected Attempt command"),
            }
        }

        #[test]
        fn parse_attempt_accepts_negative_values() {
            // range checks happen in the engine
            let cli = Cli::try_parse_from([
                "chunkpath", "attempt", "u1", "c1", "--score", "-5", "--time", "-1",
            ])
            .unwrap();
            match cli.command {
                Commands::Attempt { score, time, difficulty, .. } => {
                    assert_eq!(score, -5.0);
                    assert_eq!(time, -1);
                    assert_eq!(difficulty, "medium");
                }
                _ => panic!("Expected Attempt command"),
            }
        }

        #[test]
        fn parse_next() {
            let cli = Cli::try_parse_from(["chunkpath", "next", "u1", "rust"]).unwrap();
            match cli.command {
                Commands::Next { user, topic } => {
                    assert_eq!(user, "u1");
                    assert_eq!(topic, "rust");
                }
                _ => panic!("Expected Next command"),
            }
        }

        #[test]
        fn parse_missing_required_arg_fails() {
            assert!(Cli::try_parse_from(["chunkpath", "attempt", "u1", "c1"]).is_err());
            assert!(Cli::try_parse_from(["chunkpath", "next", "u1"]).is_err());
            assert!(Cli::try_parse_from(["chunkpath", "path", "create", "u1"]).is_err());
        }

        #[test]
        fn parse_invalid_command_fails() {
            assert!(Cli::try_parse_from(["chunkpath", "topic", "list"]).is_err());
        }
    }
}
