//! Command-line front-end for the cleanup engine.

use std::process::ExitCode;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use reclaimd::{
    human_bytes, CleanResult, CleanupSession, EngineConfig, EngineError, ItemOutcome, Manifest,
    ScanCategories, ScanResults,
};

const EXIT_OK: u8 = 0;
const EXIT_NOTHING_TO_DO: u8 = 3;
const EXIT_PARTIAL: u8 = 4;
const EXIT_FATAL: u8 = 5;

#[derive(Parser)]
#[command(name = "reclaimd", version, about = "On-device disk cleanup engine")]
struct Cli {
    /// Emit a single machine-readable JSON document
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover reclaimable files and print recommendations
    Scan {
        /// Category filter: safe, developer, all, or a comma list
        #[arg(long, default_value = "safe")]
        categories: String,
        /// Include developer caches and build artifacts as well
        #[arg(long)]
        aggressive: bool,
    },
    /// Scan, then delete everything at or above the safe threshold
    Clean {
        #[arg(long, default_value = "safe")]
        categories: String,
        #[arg(long)]
        aggressive: bool,
        /// Report what would be deleted without touching anything
        #[arg(long)]
        dry_run: bool,
        /// Confirm deletions above the byte threshold
        #[arg(long)]
        yes: bool,
    },
    /// Scan and clean in one pass with configured defaults
    Auto {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        yes: bool,
    },
    /// Print the backup manifest a clean would hand to the provider
    Backup {
        #[arg(long, default_value = "safe")]
        categories: String,
    },
    /// Print the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(cli: Cli) -> Result<u8, EngineError> {
    match cli.command {
        Commands::Scan {
            categories,
            aggressive,
        } => {
            let session = open_session(&categories, aggressive, false)?;
            let results = session.scan(&CancellationToken::new(), None).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&results).unwrap_or_default());
            } else {
                print_scan_summary(&results);
                for rec in session.recommend(&results) {
                    println!(
                        "  [{}] {}: {}",
                        format!("{:?}", rec.priority).to_lowercase(),
                        rec.title,
                        rec.description
                    );
                }
            }
            if results.items.is_empty() {
                return Ok(EXIT_NOTHING_TO_DO);
            }
            Ok(EXIT_OK)
        }
        Commands::Clean {
            categories,
            aggressive,
            dry_run,
            yes,
        } => {
            let session = open_session(&categories, aggressive, dry_run)?;
            let results = session.scan(&CancellationToken::new(), None).await?;
            let safe: Vec<_> = results.safe_items().into_iter().cloned().collect();
            if safe.is_empty() {
                if !cli.json {
                    println!("nothing to clean");
                }
                return Ok(EXIT_NOTHING_TO_DO);
            }
            let mut options = session.clean_options();
            options.dry_run = dry_run;
            options.confirmed = yes;
            let outcome = session
                .clean(safe, &options, &CancellationToken::new())
                .await?;
            report_clean(&outcome, cli.json);
            Ok(clean_exit_code(&outcome))
        }
        Commands::Auto { dry_run, yes } => {
            let mut config = EngineConfig::default();
            config.dry_run = dry_run;
            let session = session_from(config)?;
            let (results, outcome) = session.auto(yes, &CancellationToken::new()).await?;
            if !cli.json {
                print_scan_summary(&results);
            }
            report_clean(&outcome, cli.json);
            if results.items.is_empty() {
                return Ok(EXIT_NOTHING_TO_DO);
            }
            Ok(clean_exit_code(&outcome))
        }
        Commands::Backup { categories } => {
            let session = open_session(&categories, false, true)?;
            let results = session.scan(&CancellationToken::new(), None).await?;
            let safe: Vec<_> = results.safe_items().into_iter().cloned().collect();
            if safe.is_empty() {
                return Ok(EXIT_NOTHING_TO_DO);
            }
            let manifest = Manifest::for_items(results.session_id.as_str(), &safe);
            println!("{}", serde_json::to_string_pretty(&manifest).unwrap_or_default());
            Ok(EXIT_OK)
        }
        Commands::Config => {
            let config = EngineConfig::default();
            let home = config.resolve_home()?;
            config.validate(&home)?;
            println!("{}", serde_json::to_string_pretty(&config).unwrap_or_default());
            Ok(EXIT_OK)
        }
    }
}

fn open_session(
    categories: &str,
    aggressive: bool,
    dry_run: bool,
) -> Result<CleanupSession, EngineError> {
    let mut config = EngineConfig::default();
    config.categories = if aggressive {
        ScanCategories::all()
    } else {
        ScanCategories::from_str(categories).map_err(EngineError::Configuration)?
    };
    config.dry_run = dry_run;
    session_from(config)
}

fn session_from(config: EngineConfig) -> Result<CleanupSession, EngineError> {
    let data_dir = dirs::data_dir()
        .map(|dir| dir.join("reclaimd"))
        .ok_or_else(|| EngineError::Configuration("could not determine data directory".into()))?;
    CleanupSession::new(
        config,
        data_dir.join("audit.ndjson"),
        Some(data_dir.join("index.json")),
    )
}

fn print_scan_summary(results: &ScanResults) {
    println!(
        "session {}: {} item(s), {} total, {} safe to clean{}",
        results.session_id,
        results.items.len(),
        human_bytes(results.total_size),
        human_bytes(results.safe_total_size),
        if results.cancelled { " (partial)" } else { "" }
    );
    for report in results.category_reports() {
        println!(
            "  {:<16} {:>10}  ({} item(s))",
            report.name,
            human_bytes(report.size),
            report.count
        );
    }
}

fn report_clean(outcome: &CleanResult, json: bool) {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome).unwrap_or_default());
        return;
    }
    println!(
        "transaction {}: {} reclaimed{}{}",
        outcome.transaction_id,
        human_bytes(outcome.reclaimed_bytes),
        if outcome.dry_run { " (dry run)" } else { "" },
        if outcome.aborted { " [rolled back]" } else { "" }
    );
    let deleted = outcome.outcome_count(ItemOutcome::Deleted);
    let skipped = outcome.outcome_count(ItemOutcome::SkippedUnsafe);
    let failed = outcome.outcome_count(ItemOutcome::Failed);
    println!("  {deleted} deleted, {skipped} skipped, {failed} failed");
    if let Some(reference) = &outcome.backup_ref {
        println!("  backup: {reference}");
    }
}

fn clean_exit_code(outcome: &CleanResult) -> u8 {
    let troubled = outcome.aborted
        || outcome.outcomes.iter().any(|o| {
            matches!(
                o.outcome,
                ItemOutcome::Failed | ItemOutcome::RolledBack | ItemOutcome::RolledBackPartial
            )
        });
    if troubled {
        EXIT_PARTIAL
    } else {
        EXIT_OK
    }
}
