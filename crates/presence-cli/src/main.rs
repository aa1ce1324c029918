use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use presence_core::{Embedding, Roster};
use presence_ledger::{SessionRecord, SessionStore};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "presence", about = "Presence monitor roster and ledger tools")]
struct Cli {
    /// Ledger database (default: $PRESENCE_DB_PATH or the data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Known-face roster (default: $PRESENCE_ROSTER_PATH or the data directory)
    #[arg(long, global = true)]
    roster: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a known face from a precomputed encoding
    Enroll {
        /// Name to show for this person
        #[arg(short, long)]
        name: String,
        /// JSON file holding the face encoding as an array of numbers
        #[arg(short, long)]
        encoding: PathBuf,
    },
    /// List known faces
    List,
    /// Remove a known face
    Remove {
        /// Name to remove
        name: String,
    },
    /// List recorded sessions, newest first
    Sessions {
        /// Only sessions still open
        #[arg(long)]
        open: bool,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// List zone movements of one session
    Movements {
        session_id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Show roster and ledger status
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let roster_path = cli.roster.unwrap_or_else(presence_core::default_roster_path);
    let db_path = cli.db.unwrap_or_else(presence_core::default_db_path);
    tracing::debug!(db = %db_path.display(), roster = %roster_path.display(), "resolved paths");

    match cli.command {
        Commands::Enroll { name, encoding } => {
            let encoding = read_encoding(&encoding)?;
            let mut roster = Roster::load(&roster_path)?;
            let replaced = roster.enroll(&name, encoding, chrono::Utc::now())?;
            roster.save(&roster_path)?;
            if replaced {
                println!("Updated {name} ({} known faces)", roster.len());
            } else {
                println!("Enrolled {name} ({} known faces)", roster.len());
            }
        }
        Commands::List => {
            let roster = Roster::load(&roster_path)?;
            if roster.is_empty() {
                println!("No faces enrolled");
            }
            for entry in roster.entries() {
                println!("{:<24} enrolled {}", entry.name, entry.enrolled_at.to_rfc3339());
            }
        }
        Commands::Remove { name } => {
            let mut roster = Roster::load(&roster_path)?;
            if !roster.remove(&name) {
                bail!("{name:?} is not in the roster");
            }
            roster.save(&roster_path)?;
            println!("Removed {name}");
        }
        Commands::Sessions { open, limit, json } => {
            let store = open_store(&db_path)?;
            let sessions = store.sessions(open, limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else if sessions.is_empty() {
                println!("No sessions recorded");
            } else {
                for session in &sessions {
                    println!("{}", format_session(session));
                }
            }
        }
        Commands::Movements { session_id, json } => {
            let store = open_store(&db_path)?;
            if store.session(session_id)?.is_none() {
                bail!("no session {session_id}");
            }
            let movements = store.movements(session_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&movements)?);
            } else if movements.is_empty() {
                println!("No movements recorded for session {session_id}");
            } else {
                for m in &movements {
                    println!("{}  {}", m.timestamp.to_rfc3339(), m.area);
                }
            }
        }
        Commands::Status => {
            let roster = Roster::load(&roster_path)?;
            println!("roster:   {} ({} faces, dimension {})", roster_path.display(), roster.len(), roster.dimension());
            let store = open_store(&db_path)?;
            println!(
                "ledger:   {} ({} sessions, {} open)",
                db_path.display(),
                store.session_count()?,
                store.open_session_count()?
            );
        }
    }

    Ok(())
}

fn open_store(path: &Path) -> Result<SessionStore> {
    SessionStore::open(path).with_context(|| format!("opening ledger {}", path.display()))
}

/// Read a face encoding: either a bare JSON array or `{"encoding": [...]}`.
fn read_encoding(path: &Path) -> Result<Embedding> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading encoding {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing encoding {}", path.display()))?;
    let values = match value {
        serde_json::Value::Object(mut map) => map.remove("encoding").unwrap_or_default(),
        other => other,
    };
    let values: Vec<f32> = serde_json::from_value(values)
        .with_context(|| format!("{} does not hold an array of numbers", path.display()))?;
    Ok(Embedding::new(values))
}

fn format_session(session: &SessionRecord) -> String {
    let exit = session
        .exit_time
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "(present)".to_string());
    format!(
        "#{:<6} {:<20} in {}  out {}",
        session.id,
        session.name,
        session.entry_time.to_rfc3339(),
        exit
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_read_encoding_accepts_both_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let bare = dir.path().join("bare.json");
        let wrapped = dir.path().join("wrapped.json");
        std::fs::write(&bare, "[0.5, -0.25]").unwrap();
        std::fs::write(&wrapped, r#"{"encoding": [1, 2, 3]}"#).unwrap();

        assert_eq!(read_encoding(&bare).unwrap().values, vec![0.5, -0.25]);
        assert_eq!(read_encoding(&wrapped).unwrap().values, vec![1.0, 2.0, 3.0]);

        std::fs::write(&bare, r#"{"name": "x"}"#).unwrap();
        assert!(read_encoding(&bare).is_err());
    }

    #[test]
    fn test_format_open_session() {
        let session = SessionRecord {
            id: 3,
            name: "Jane".into(),
            entry_time: Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap(),
            exit_time: None,
        };
        let line = format_session(&session);
        assert!(line.starts_with("#3"));
        assert!(line.contains("Jane"));
        assert!(line.ends_with("(present)"));
    }
}
