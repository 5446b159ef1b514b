//! Mnemo CLI
//!
//! Command-line interface for inspecting and maintaining assistant memory.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use directories::ProjectDirs;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mnemo_core::consolidation::ConsolidationReport;
use mnemo_core::memory::{Belief, BeliefInput, Fact, FactCategory, FactFilter, FactInput, FactType};
use mnemo_core::snapshot::Guarded;
use mnemo_core::{EngineConfig, MemoryEngine, SessionId, Storage};

/// Mnemo - assistant memory CLI
#[derive(Parser)]
#[command(name = "mnemo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CLI for the Mnemo assistant memory engine")]
struct Cli {
    /// Database file (defaults to the platform data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Session whose memory to operate on
    #[arg(long, global = true, default_value = "default")]
    session: String,

    /// JSON config file (defaults to the platform config directory, then MNEMO_* variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show memory statistics
    Stats,

    /// Search live facts
    Search {
        query: String,
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Add a fact (deduplicated against existing facts)
    Add {
        content: String,
        /// Fact type (fact, preference, habit, goal, demographic, skill, opinion, world_fact)
        #[arg(long = "type", default_value = "fact")]
        fact_type: String,
        /// Category (work, personal, health, finance, learning, other)
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value = "1.0")]
        confidence: f64,
    },

    /// Form a belief (reinforces an existing equivalent one)
    Belief {
        text: String,
        #[arg(long, default_value = "0.6")]
        confidence: f64,
    },

    /// Run one consolidation pass
    Consolidate,

    /// Apply heat and confidence decay
    Decay,

    /// List the hottest facts
    Hot {
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// List facts below a heat threshold
    Cold {
        #[arg(long, default_value = "0.1")]
        threshold: f64,
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Archive cold memories (retention policy only, nothing is deleted)
    Archive,

    /// Show what a snapshot would capture, or run a guarded consolidation
    Snapshot {
        /// Consolidate under the snapshot and roll back if live facts shrink
        #[arg(long)]
        consolidate: bool,
    },

    /// Run consolidation (including decay) and archival on a timer
    Maintain {
        /// Seconds between runs
        #[arg(long, default_value = "3600")]
        every: u64,
        /// Stop after this many runs
        #[arg(long)]
        iterations: Option<u64>,
    },

    /// Export live facts and active beliefs as JSON or JSONL
    Export {
        /// Output file path
        output: PathBuf,
        /// Export format: json or jsonl
        #[arg(long, default_value = "json")]
        format: String,
        /// Only export records created on or after this date (YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,
    },

    /// Delete everything the session owns
    Clear {
        /// Skip confirmation
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let session = SessionId::new(cli.session.clone())?;
    let engine = open_engine(cli.db.clone(), cli.config.as_deref())?;

    match cli.command {
        Commands::Stats => run_stats(&engine, &session),
        Commands::Search { query, limit } => run_search(&engine, &session, &query, limit),
        Commands::Add {
            content,
            fact_type,
            category,
            confidence,
        } => run_add(&engine, &session, content, &fact_type, category.as_deref(), confidence),
        Commands::Belief { text, confidence } => run_belief(&engine, &session, text, confidence),
        Commands::Consolidate => run_consolidate(&engine, &session),
        Commands::Decay => run_decay(&engine, &session),
        Commands::Hot { limit } => run_hot(&engine, &session, limit),
        Commands::Cold { threshold, limit } => run_cold(&engine, &session, threshold, limit),
        Commands::Archive => run_archive(&engine, &session),
        Commands::Snapshot { consolidate } => run_snapshot(&engine, &session, consolidate),
        Commands::Maintain { every, iterations } => run_maintain(engine, session, every, iterations),
        Commands::Export { output, format, since } => {
            run_export(&engine, &session, &output, &format, since.as_deref())
        }
        Commands::Clear { yes } => run_clear(&engine, &session, yes),
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Explicit file, else the platform config file when present, else environment
fn load_config(explicit: Option<&Path>) -> anyhow::Result<EngineConfig> {
    if let Some(path) = explicit {
        return Ok(EngineConfig::from_json_file(path)?);
    }
    if let Some(dirs) = ProjectDirs::from("com", "mnemo", "core") {
        let path = dirs.config_dir().join("config.json");
        if path.exists() {
            info!("Loading config from {}", path.display());
            return Ok(EngineConfig::from_json_file(&path)?);
        }
    }
    Ok(EngineConfig::from_env()?)
}

fn open_engine(db: Option<PathBuf>, config: Option<&Path>) -> anyhow::Result<MemoryEngine> {
    let config = load_config(config)?;
    let builder = MemoryEngine::builder(Storage::new(db)?).config(config);

    #[cfg(feature = "embeddings")]
    let builder = match mnemo_core::embeddings::LocalEmbedder::new() {
        Ok(embedder) => builder.embedder(Arc::new(embedder)),
        Err(e) => {
            warn!("Local embeddings unavailable, using text search: {}", e);
            builder
        }
    };

    Ok(builder.build())
}

fn run_stats(engine: &MemoryEngine, session: &SessionId) -> anyhow::Result<()> {
    let stats = engine.manager(session).stats()?;
    let memory = &stats.memory;

    println!("{}", format!("=== Mnemo Memory [{}] ===", session).cyan().bold());
    println!();
    println!("{}: {} ({} live)", "Facts".white().bold(), memory.facts_total, memory.facts_live);
    println!("{}: {}", "Persona Attributes".white().bold(), memory.persona_attributes);
    println!("{}: {}", "Experiences".white().bold(), memory.experiences);
    println!("{}: {}", "Procedures".white().bold(), memory.procedures);
    println!("{}: {}", "Entities".white().bold(), memory.entities);
    println!("{}: {}", "Relationships".white().bold(), memory.relationships);
    println!("{}: {} ({} active)", "Beliefs".white().bold(), memory.beliefs_total, memory.beliefs_active);
    println!("{}: {}", "Topics".white().bold(), memory.topics);
    println!("{}: {}", "Keywords".white().bold(), memory.keywords);
    println!("{}: {}", "Links".white().bold(), memory.links);
    println!("{}: {}", "Messages".white().bold(), memory.messages);
    println!("{}: {}", "Logged Operations".white().bold(), memory.operations);
    println!("{}: {:.1}%", "Average Fact Confidence".white().bold(), memory.avg_fact_confidence * 100.0);
    println!("{}: {:.2}", "Average Fact Heat".white().bold(), memory.avg_fact_heat);
    println!(
        "{}: {}",
        "Embeddings".white().bold(),
        if engine.embeddings().is_available() {
            format!("{} ({})", memory.embeddings, engine.embeddings().model_name()).green()
        } else {
            "disabled".dimmed()
        }
    );

    let scheduling = &stats.scheduling;
    println!();
    println!("{}", "=== Heat Distribution ===".yellow().bold());
    let total = (scheduling.hot + scheduling.warm + scheduling.cold).max(0) as usize;
    print_distribution_bar("Hot", scheduling.hot as usize, total, "red");
    print_distribution_bar("Warm", scheduling.warm as usize, total, "yellow");
    print_distribution_bar("Cold", scheduling.cold as usize, total, "cyan");
    println!("{}: {}", "Scheduled (24h)".white(), scheduling.recently_scheduled);

    Ok(())
}

fn print_distribution_bar(label: &str, count: usize, total: usize, color: &str) {
    let percentage = if total > 0 {
        (count as f64 / total as f64) * 100.0
    } else {
        0.0
    };

    let bar_width: usize = 30;
    let filled = ((percentage / 100.0) * bar_width as f64) as usize;
    let bar = format!("{}{}", "#".repeat(filled), "-".repeat(bar_width.saturating_sub(filled)));
    let colored_bar = match color {
        "red" => bar.red(),
        "yellow" => bar.yellow(),
        "cyan" => bar.cyan(),
        _ => bar.white(),
    };

    println!("  {:6} [{:30}] {:>4} ({:>5.1}%)", label, colored_bar, count, percentage);
}

fn run_search(engine: &MemoryEngine, session: &SessionId, query: &str, limit: usize) -> anyhow::Result<()> {
    let hits = engine.facts(session).search(query, limit, &FactFilter::default())?;

    println!("{}", format!("=== Search: {} ===", query).cyan().bold());
    if hits.is_empty() {
        println!("{}", "No matching facts.".dimmed());
        return Ok(());
    }
    for hit in hits {
        println!(
            "  {} {} {}",
            format!("[{:.2} {}]", hit.score, hit.method).dimmed(),
            hit.item.content,
            format!("({:.0}%)", hit.item.confidence * 100.0).green()
        );
        println!("    {}", hit.item.id.dimmed());
    }
    Ok(())
}

fn run_add(
    engine: &MemoryEngine,
    session: &SessionId,
    content: String,
    fact_type: &str,
    category: Option<&str>,
    confidence: f64,
) -> anyhow::Result<()> {
    let mut input = FactInput::new(content)
        .with_type(fact_type.parse::<FactType>()?)
        .with_confidence(confidence);
    if let Some(category) = category {
        input = input.with_category(category.parse::<FactCategory>()?);
    }

    let result = engine.facts(session).add(input)?;
    let fact = result.record();
    if result.is_merged() {
        println!(
            "{} {} ({:.0}%)",
            "Merged into existing fact".yellow().bold(),
            fact.id,
            fact.confidence * 100.0
        );
    } else {
        println!("{} {}", "Added fact".green().bold(), fact.id);
    }
    Ok(())
}

fn run_belief(engine: &MemoryEngine, session: &SessionId, text: String, confidence: f64) -> anyhow::Result<()> {
    let result = engine
        .beliefs(session)
        .form(BeliefInput::new(text).with_confidence(confidence))?;
    let belief = result.record();
    let verb = if result.is_merged() { "Reinforced belief" } else { "Formed belief" };
    println!("{} {} ({:.0}%)", verb.green().bold(), belief.id, belief.confidence * 100.0);
    Ok(())
}

fn print_report(report: &ConsolidationReport) {
    for (step, result) in &report.steps {
        match result {
            Ok(outcome) if outcome.is_skipped() => {
                println!("  {:20} {}", step.as_str(), "skipped".dimmed());
            }
            Ok(outcome) => {
                println!("  {:20} {} ({})", step.as_str(), "ok".green(), outcome.affected());
            }
            Err(e) => {
                println!("  {:20} {} {}", step.as_str(), "failed".red().bold(), e.message.red());
            }
        }
    }
    println!();
    let summary = format!(
        "Consolidation finished in {}ms: {} records affected, {} failed steps",
        report.duration_ms,
        report.total_affected(),
        report.failed_steps().len()
    );
    if report.is_complete() {
        println!("{}", summary.green());
    } else {
        println!("{}", summary.yellow());
    }
}

fn run_consolidate(engine: &MemoryEngine, session: &SessionId) -> anyhow::Result<()> {
    println!("{}", "=== Mnemo Consolidation ===".cyan().bold());
    println!();
    let report = engine.manager(session).consolidate();
    print_report(&report);
    Ok(())
}

fn run_decay(engine: &MemoryEngine, session: &SessionId) -> anyhow::Result<()> {
    let counts = engine.scheduler(session).apply_decay()?;
    println!(
        "{} {} facts, {} beliefs",
        "Decayed".green().bold(),
        counts.facts,
        counts.beliefs
    );
    Ok(())
}

fn run_hot(engine: &MemoryEngine, session: &SessionId, limit: usize) -> anyhow::Result<()> {
    let facts = engine.scheduler(session).hot_memories(limit)?;
    println!("{}", "=== Hot Memories ===".red().bold());
    if facts.is_empty() {
        println!("{}", "No hot memories.".dimmed());
    }
    for fact in facts {
        println!("  {:>5.2}  {}", fact.heat_score, fact.content);
    }
    Ok(())
}

fn run_cold(engine: &MemoryEngine, session: &SessionId, threshold: f64, limit: usize) -> anyhow::Result<()> {
    let facts = engine.scheduler(session).cold_memories(threshold, limit)?;
    println!("{}", format!("=== Cold Memories (< {:.2}) ===", threshold).cyan().bold());
    if facts.is_empty() {
        println!("{}", "No cold memories.".dimmed());
    }
    for fact in facts {
        println!("  {:>5.2}  {}", fact.heat_score, fact.content);
    }
    Ok(())
}

fn run_archive(engine: &MemoryEngine, session: &SessionId) -> anyhow::Result<()> {
    let archived = engine.scheduler(session).archive_with_defaults()?;
    println!("{} {} memories", "Archived".green().bold(), archived.len());
    for id in archived {
        println!("  {}", id.dimmed());
    }
    Ok(())
}

fn run_snapshot(engine: &MemoryEngine, session: &SessionId, consolidate: bool) -> anyhow::Result<()> {
    let snapshots = engine.snapshots(session);

    if !consolidate {
        let snapshot = snapshots.create_snapshot("cli preview")?;
        println!("{}", "=== Snapshot ===".cyan().bold());
        println!("{}: {}", "Id".white().bold(), snapshot.id);
        println!("{}: {}", "Facts".white().bold(), snapshot.facts.len());
        println!("{}: {}", "Beliefs".white().bold(), snapshot.beliefs.len());
        println!("{}: {}", "Relationships".white().bold(), snapshot.relationships.len());
        return Ok(());
    }

    let manager = engine.manager(session);
    let live_before = manager.stats()?.memory.facts_live;
    let outcome = snapshots.guarded(
        "guarded consolidation",
        || Ok(manager.consolidate()),
        |_| {
            manager
                .stats()
                .map(|s| s.memory.facts_live >= live_before)
                .unwrap_or(false)
        },
    )?;

    match outcome {
        Guarded::Kept(report) => {
            print_report(&report);
            println!("{}", "Health check passed, changes kept.".green());
        }
        Guarded::RolledBack { value, summary } => {
            print_report(&value);
            println!(
                "{} snapshot {}: {} re-inserted, {} restored",
                "Health check failed, rolled back".red().bold(),
                summary.snapshot_id,
                summary.reinserted,
                summary.restored
            );
        }
    }
    Ok(())
}

fn run_maintain(engine: MemoryEngine, session: SessionId, every: u64, iterations: Option<u64>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(maintain_loop(Arc::new(engine), session, every.max(1), iterations))
}

async fn maintain_loop(
    engine: Arc<MemoryEngine>,
    session: SessionId,
    every: u64,
    iterations: Option<u64>,
) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(Duration::from_secs(every));
    let mut runs = 0u64;

    println!(
        "{}",
        format!("Maintaining session '{}' every {}s (ctrl-c to stop)", session, every).cyan()
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Maintenance loop interrupted");
                break;
            }
        }

        let engine = Arc::clone(&engine);
        let session = session.clone();
        let result = tokio::task::spawn_blocking(move || {
            let report = engine.manager(&session).consolidate();
            let archived = engine.scheduler(&session).archive_with_defaults();
            (report, archived)
        })
        .await?;

        let (report, archived) = result;
        runs += 1;
        match archived {
            Ok(ids) => info!(
                run = runs,
                affected = report.total_affected(),
                failed = report.failed_steps().len(),
                archived = ids.len(),
                "Maintenance run complete"
            ),
            Err(e) => warn!(run = runs, "Archival failed: {}", e),
        }
        println!(
            "  run {}: {} affected, {} failed steps",
            runs,
            report.total_affected(),
            report.failed_steps().len()
        );

        if iterations.is_some_and(|max| runs >= max) {
            break;
        }
    }

    println!("{}", format!("Maintenance stopped after {} runs", runs).green());
    Ok(())
}

/// Active beliefs read for one export
const EXPORT_BELIEF_LIMIT: usize = 100_000;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportDocument {
    session: String,
    exported_at: DateTime<Utc>,
    facts: Vec<Fact>,
    beliefs: Vec<Belief>,
}

/// One JSONL line
#[derive(Serialize)]
#[serde(tag = "kind", content = "record", rename_all = "lowercase")]
enum ExportLine<'a> {
    Fact(&'a Fact),
    Belief(&'a Belief),
}

fn parse_since(raw: Option<&str>) -> anyhow::Result<Option<DateTime<Utc>>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("Invalid date '{}': {}. Use YYYY-MM-DD format.", raw, e))?;
    Ok(date.and_hms_opt(0, 0, 0).map(|midnight| midnight.and_utc()))
}

fn collect_export(
    engine: &MemoryEngine,
    session: &SessionId,
    since: Option<DateTime<Utc>>,
) -> anyhow::Result<ExportDocument> {
    let now = Utc::now();
    let storage = engine.storage();
    let kept = |created_at: DateTime<Utc>| since.is_none_or(|since| created_at >= since);

    let mut facts = Vec::new();
    storage.scan_live_facts(session.as_str(), now, |fact| {
        if kept(fact.created_at) {
            facts.push(fact);
        }
        true
    })?;
    let beliefs = storage
        .active_beliefs(session.as_str(), 0.0, &[], EXPORT_BELIEF_LIMIT)?
        .into_iter()
        .filter(|belief| kept(belief.created_at))
        .collect();

    Ok(ExportDocument {
        session: session.to_string(),
        exported_at: now,
        facts,
        beliefs,
    })
}

fn write_export<W: Write>(writer: &mut W, document: &ExportDocument, format: &str) -> anyhow::Result<()> {
    match format {
        "json" => {
            serde_json::to_writer_pretty(&mut *writer, document)?;
            writer.write_all(b"\n")?;
        }
        "jsonl" => {
            let lines = document
                .facts
                .iter()
                .map(ExportLine::Fact)
                .chain(document.beliefs.iter().map(ExportLine::Belief));
            for line in lines {
                serde_json::to_writer(&mut *writer, &line)?;
                writer.write_all(b"\n")?;
            }
        }
        other => anyhow::bail!("Invalid format '{}'. Must be 'json' or 'jsonl'.", other),
    }
    writer.flush()?;
    Ok(())
}

fn run_export(
    engine: &MemoryEngine,
    session: &SessionId,
    output: &Path,
    format: &str,
    since: Option<&str>,
) -> anyhow::Result<()> {
    if format != "json" && format != "jsonl" {
        anyhow::bail!("Invalid format '{}'. Must be 'json' or 'jsonl'.", format);
    }
    let document = collect_export(engine, session, parse_since(since)?)?;

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut writer = BufWriter::new(std::fs::File::create(output)?);
    write_export(&mut writer, &document, format)?;

    println!("{}", "=== Mnemo Export ===".cyan().bold());
    println!("{}: {}", "Format".white().bold(), format);
    if let Some(since) = since {
        println!("{}: {}", "Since".white().bold(), since);
    }
    println!(
        "{}",
        format!(
            "Exported {} facts and {} beliefs to {}",
            document.facts.len(),
            document.beliefs.len(),
            output.display()
        )
        .green()
    );
    Ok(())
}

fn run_clear(engine: &MemoryEngine, session: &SessionId, yes: bool) -> anyhow::Result<()> {
    if !yes {
        println!(
            "{}",
            format!("This deletes all memory of session '{}'. Re-run with --yes to confirm.", session).yellow()
        );
        return Ok(());
    }
    let removed = engine.manager(session).clear_session()?;
    println!("{} {} rows", "Cleared".green().bold(), removed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["mnemo", "search", "tea", "--limit", "3", "--session", "alice"]).unwrap();
        assert_eq!(cli.session, "alice");
        assert!(matches!(cli.command, Commands::Search { limit: 3, .. }));
    }

    #[test]
    fn test_cli_maintain_defaults() {
        let cli = Cli::try_parse_from(["mnemo", "maintain"]).unwrap();
        match cli.command {
            Commands::Maintain { every, iterations } => {
                assert_eq!(every, 3600);
                assert!(iterations.is_none());
            }
            _ => panic!("expected maintain"),
        }
    }

    #[test]
    fn test_explicit_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"snapshotCapacity": 7}"#).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.snapshot_capacity, 7);
    }

    #[test]
    fn test_export_since_filters_and_writes_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(Some(dir.path().join("mnemo.db")), None).unwrap();
        let session = SessionId::default();
        engine.facts(&session).add(FactInput::new("User collects vinyl records")).unwrap();
        engine
            .beliefs(&session)
            .form(BeliefInput::new("User enjoys analog music"))
            .unwrap();

        assert!(parse_since(Some("31/12/2024")).is_err());
        let future = parse_since(Some("2999-01-01")).unwrap();
        assert!(collect_export(&engine, &session, future).unwrap().facts.is_empty());

        let document = collect_export(&engine, &session, parse_since(Some("2000-01-01")).unwrap()).unwrap();
        assert_eq!(document.facts.len(), 1);
        assert_eq!(document.beliefs.len(), 1);

        let mut out = Vec::new();
        write_export(&mut out, &document, "jsonl").unwrap();
        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "fact");
        assert_eq!(lines[1]["kind"], "belief");

        assert!(write_export(&mut Vec::new(), &document, "xml").is_err());
    }

    #[test]
    fn test_maintain_loop_stops_after_iterations() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(Some(dir.path().join("mnemo.db")), None).unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime
            .block_on(maintain_loop(Arc::new(engine), SessionId::default(), 1, Some(1)))
            .unwrap();
    }
}
