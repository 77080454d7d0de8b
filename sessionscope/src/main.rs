//! sessionscope - inspect AI coding-agent session logs
//!
//! Parses Codex and Gemini CLI session logs, checks them against the
//! repository's AGENTS rules, and answers questions about them.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/sessionscope/data.db (~/.local/share/sessionscope/data.db)
//! - Config: $XDG_CONFIG_HOME/sessionscope/config.toml (~/.config/sessionscope/config.toml)
//! - Logs: $XDG_STATE_HOME/sessionscope/sessionscope.YYYY-MM-DD.log

mod report;
mod session;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use sessionscope_core::context::ContextRequest;
use sessionscope_core::detect::RangeRequest;
use sessionscope_core::{
    ask, build_chat_context, create_chat_client, detect_misalignments, Config, Database,
    MisalignmentStatus, RulesCache,
};
use std::path::{Path, PathBuf};

use crate::session::LoadedSession;

#[derive(Parser)]
#[command(name = "sessionscope")]
#[command(about = "Inspect AI coding-agent session logs against AGENTS rules")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a session log and summarize it
    Parse {
        /// Session log (JSONL, or a Gemini JSON document)
        file: PathBuf,

        /// Print the parsed session as JSON
        #[arg(long)]
        json: bool,

        /// Stop after this many unparseable lines (default: from config)
        #[arg(long)]
        max_errors: Option<usize>,
    },

    /// List the AGENTS rules found under a repository root
    Rules {
        /// Repository root
        root: PathBuf,

        /// Print rules as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a session against AGENTS rules
    Check {
        /// Session log
        file: PathBuf,

        /// Repository root holding the rules (default: the session's cwd)
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// First event index to check
        #[arg(long, allow_hyphen_values = true)]
        from: Option<i64>,

        /// Last event index to check
        #[arg(long, allow_hyphen_values = true)]
        to: Option<i64>,

        /// Print records as JSON
        #[arg(long)]
        json: bool,

        /// Save the session and its records to the local database
        #[arg(long)]
        store: bool,
    },

    /// Change the review status of a stored misalignment
    Status {
        /// Misalignment ID
        id: String,

        /// new, acknowledged or dismissed
        status: String,
    },

    /// List stored sessions
    Sessions,

    /// Print the chat assistant prompt for a session
    Context {
        /// Session log
        file: PathBuf,

        /// Repository root holding the rules (default: the session's cwd)
        #[arg(short, long)]
        root: Option<PathBuf>,
    },

    /// Ask the chat assistant about a session
    Ask {
        /// Session log
        file: PathBuf,

        /// Question to ask
        question: String,

        /// Repository root holding the rules (default: the session's cwd)
        #[arg(short, long)]
        root: Option<PathBuf>,
    },

    /// Show stored chat history for a session
    History {
        /// Session ID
        session_id: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    // Initialize logging
    let _log_guard =
        sessionscope_core::logging::init(&config.logging).context("failed to initialize logging")?;

    match args.command {
        Command::Parse {
            file,
            json,
            max_errors,
        } => cmd_parse(&config, &file, json, max_errors),
        Command::Rules { root, json } => cmd_rules(&config, &root, json),
        Command::Check {
            file,
            root,
            from,
            to,
            json,
            store,
        } => {
            let range = (from.is_some() || to.is_some()).then_some(RangeRequest {
                start_index: from,
                end_index: to,
            });
            cmd_check(&config, &file, root, range, json, store)
        }
        Command::Status { id, status } => cmd_status(&id, &status),
        Command::Sessions => cmd_sessions(),
        Command::Context { file, root } => cmd_context(&config, &file, root),
        Command::Ask {
            file,
            question,
            root,
        } => cmd_ask(&config, &file, root, &question),
        Command::History { session_id } => cmd_history(&session_id),
    }
}

fn open_database() -> Result<Database> {
    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;
    Ok(db)
}

fn cmd_parse(config: &Config, file: &Path, json: bool, max_errors: Option<usize>) -> Result<()> {
    let mut options = config.parser.options();
    if max_errors.is_some() {
        options.max_errors = max_errors;
    }
    let loaded = LoadedSession::load(file, &options)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&loaded.parsed)?);
    } else {
        report::print_parse_summary(&loaded);
    }
    Ok(())
}

fn cmd_rules(config: &Config, root: &Path, json: bool) -> Result<()> {
    let mut cache = RulesCache::new(config.rules.clone());
    let loaded = cache
        .load(root)
        .with_context(|| format!("failed to load rules under {}", root.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&loaded.rules)?);
    } else {
        report::print_rules(loaded);
    }
    Ok(())
}

fn cmd_check(
    config: &Config,
    file: &Path,
    root: Option<PathBuf>,
    range: Option<RangeRequest>,
    json: bool,
    store: bool,
) -> Result<()> {
    let loaded = LoadedSession::load(file, &config.parser.options())?;
    let root = loaded.rules_root(root)?;

    let mut cache = RulesCache::new(config.rules.clone());
    let rules = cache
        .load(&root)
        .with_context(|| format!("failed to load rules under {}", root.display()))?
        .rules
        .clone();

    let snapshot = loaded.snapshot();
    let (checked, clamped) = session::restrict_to_range(&snapshot, range);
    let records = detect_misalignments(&checked, &rules, Utc::now());
    tracing::info!(
        session = %snapshot.session_id,
        rules = rules.len(),
        records = records.len(),
        "Checked session"
    );

    let records = if store {
        let db = open_database()?;
        db.upsert_snapshot(&snapshot, Some(file))
            .context("failed to store session")?;
        db.upsert_misalignments(&records)
            .context("failed to store misalignments")?;
        // Stored records carry any status set in an earlier review
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        db.list_misalignments(&snapshot.session_id)?
            .into_iter()
            .filter(|r| ids.contains(&r.id.as_str()))
            .collect()
    } else {
        records
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        report::print_check(&snapshot.session_id, &rules, &records, clamped);
        if store {
            println!("\nStored in {}", Config::database_path().display());
        }
    }
    Ok(())
}

fn cmd_status(id: &str, status: &str) -> Result<()> {
    let next: MisalignmentStatus = status.parse()?;
    let db = open_database()?;
    let record = db
        .update_misalignment_status(id, next, Utc::now())
        .with_context(|| format!("failed to update {}", id))?;
    println!("{} is now {}", record.id, record.status);
    Ok(())
}

fn cmd_sessions() -> Result<()> {
    let db = open_database()?;
    let sessions = db.list_snapshots()?;
    if sessions.is_empty() {
        println!("No stored sessions.");
        println!("Run 'sessionscope check <file> --store' to save one.");
        return Ok(());
    }
    report::print_sessions(&sessions);
    Ok(())
}

fn cmd_context(config: &Config, file: &Path, root: Option<PathBuf>) -> Result<()> {
    let loaded = LoadedSession::load(file, &config.parser.options())?;
    let root = loaded.rules_root(root)?;
    let mut cache = RulesCache::new(config.rules.clone());
    let rules = cache.load(&root)?.rules.clone();

    let snapshot = loaded.snapshot();
    let records = detect_misalignments(&snapshot, &rules, Utc::now());
    let history = session::stored_history(&snapshot.session_id)?;

    let mut request = ContextRequest::new(&snapshot);
    request.misalignments = &records;
    request.history = &history;
    request.rules = &rules;
    let context = build_chat_context(&request, &config.chat)?;

    println!("{}", context.prompt);
    eprintln!(
        "\n[{} of {} tokens, {} section(s) trimmed]",
        context.used_tokens,
        context.budget_tokens,
        context.trimmed_section_ids.len()
    );
    Ok(())
}

fn cmd_ask(config: &Config, file: &Path, root: Option<PathBuf>, question: &str) -> Result<()> {
    let Some(llm) = config.llm.as_ref() else {
        bail!(
            "no [llm] section in {}; configure a provider to use the assistant",
            Config::config_path().display()
        );
    };
    let client = create_chat_client(llm, &config.chat)?;

    let loaded = LoadedSession::load(file, &config.parser.options())?;
    let root = loaded.rules_root(root)?;
    let mut cache = RulesCache::new(config.rules.clone());
    let rules = cache.load(&root)?.rules.clone();

    let snapshot = loaded.snapshot();
    let records = detect_misalignments(&snapshot, &rules, Utc::now());

    let db = open_database()?;
    db.upsert_snapshot(&snapshot, Some(file))?;
    let history = db.list_chat_messages(&snapshot.session_id)?;

    let mut request = ContextRequest::new(&snapshot);
    request.misalignments = &records;
    request.history = &history;
    request.rules = &rules;
    let exchange = ask(client.as_ref(), &request, &config.chat, question)?;

    db.append_chat_message(&exchange.question)?;
    db.append_chat_message(&exchange.answer)?;
    println!("{}", exchange.answer.content);
    Ok(())
}

fn cmd_history(session_id: &str) -> Result<()> {
    let db = open_database()?;
    db.require_snapshot(session_id)?;
    let messages = db.list_chat_messages(session_id)?;
    if messages.is_empty() {
        println!("No chat history for {}.", session_id);
        return Ok(());
    }
    for message in &messages {
        println!(
            "[{}] {}: {}",
            message.created_at.format("%Y-%m-%d %H:%M"),
            message.role.as_str(),
            message.content
        );
    }
    Ok(())
}
