use std::fmt;

use exam_core::model::UserId;
use services::{AppServices, Clock, EngineSettings, SessionConfig};
use storage::remote::RemoteConfig;
use storage::sqlite::SqliteRepository;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod console;
mod seed;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidId { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidId { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_id(args: &mut impl Iterator<Item = String>, flag: &'static str) -> Result<u64, ArgsError> {
    let value = require_value(args, flag)?;
    value
        .parse()
        .map_err(|_| ArgsError::InvalidId { flag, raw: value })
}

fn env_id(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[derive(Debug)]
struct Args {
    db_url: String,
    user_id: UserId,
    exam_id: u64,
    subtopic_id: u64,
    remote: bool,
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- exam     [--db <sqlite_url>] [--user <id>] [--exam <id>] [--remote]");
    eprintln!("  cargo run -p app -- practice [--db <sqlite_url>] [--user <id>] [--subtopic <id>] [--remote]");
    eprintln!("  cargo run -p app -- seed     [--db <sqlite_url>] [--exam <id>] [--subtopic <id>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:dev.sqlite3  --user 1  --exam 1  --subtopic 1");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  EXAM_DB_URL, EXAM_USER_ID");
    eprintln!("  EXAM_PORTAL_URL, EXAM_PORTAL_TOKEN, EXAM_PORTAL_TIMEOUT_SECS (with --remote)");
    eprintln!("  EXAM_TICK_MS, EXAM_PRACTICE_SIZE, EXAM_RECORD_ATTEMPTS");
    eprintln!("  RUST_LOG (default: services=info,storage=info,app=info)");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Exam,
    Practice,
    Seed,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "exam" => Some(Self::Exam),
            "practice" => Some(Self::Practice),
            "seed" => Some(Self::Seed),
            _ => None,
        }
    }
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("EXAM_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://dev.sqlite3".into(), normalize_sqlite_url);
        let mut user_id = UserId::new(env_id("EXAM_USER_ID").unwrap_or(1));
        let mut exam_id = 1;
        let mut subtopic_id = 1;
        let mut remote = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--user" => user_id = UserId::new(parse_id(args, "--user")?),
                "--exam" => exam_id = parse_id(args, "--exam")?,
                "--subtopic" => subtopic_id = parse_id(args, "--subtopic")?,
                "--remote" => remote = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            user_id,
            exam_id,
            subtopic_id,
            remote,
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("services=info,storage=info,app=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None => Command::Exam,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Exam,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };
    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let parsed = Args::parse(&mut argv.into_iter()).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let settings = EngineSettings::from_env();
    let clock = Clock::system();

    if cmd == Command::Seed {
        prepare_sqlite_file(&parsed.db_url)?;
        let repo = SqliteRepository::connect(&parsed.db_url).await?;
        repo.migrate().await?;
        seed::seed_demo(&repo, parsed.exam_id, parsed.subtopic_id).await?;
        println!(
            "seeded exam {} and subtopic {} into {}",
            parsed.exam_id, parsed.subtopic_id, parsed.db_url
        );
        return Ok(());
    }

    let services = if parsed.remote {
        let config = RemoteConfig::from_env().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "--remote needs EXAM_PORTAL_URL",
            )
        })?;
        info!(base_url = %config.base_url, "using remote portal");
        AppServices::new_remote(config, clock, settings)?
    } else {
        // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
        prepare_sqlite_file(&parsed.db_url)?;
        AppServices::new_sqlite(&parsed.db_url, clock, settings).await?
    };

    let config = match cmd {
        Command::Practice => SessionConfig::practice(parsed.user_id, parsed.subtopic_id)
            .with_shuffle(true),
        _ => SessionConfig::exam(parsed.user_id, parsed.exam_id),
    };
    let session = services.launcher().start_session(&config).await?;
    console::drive(session, services.settings()).await
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_after_subcommand() {
        let mut args = ["--user", "4", "--exam", "9", "--remote"]
            .into_iter()
            .map(String::from);
        let parsed = Args::parse(&mut args).unwrap();
        assert_eq!(parsed.user_id, UserId::new(4));
        assert_eq!(parsed.exam_id, 9);
        assert!(parsed.remote);
    }

    #[test]
    fn rejects_bad_ids() {
        let mut args = ["--subtopic", "abc"].into_iter().map(String::from);
        assert!(matches!(
            Args::parse(&mut args),
            Err(ArgsError::InvalidId { flag: "--subtopic", .. })
        ));
    }

    #[test]
    fn memory_url_is_kept() {
        assert_eq!(normalize_sqlite_url("sqlite::memory:".into()), "sqlite::memory:");
    }
}
