use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};

use trainrisk::audit::AuditReport;
use trainrisk::export::{self, DateRange, ExportFormat};
use trainrisk::logging::init_logging;
use trainrisk::{
    CalculationStrategy, CancellationToken, DerivedStore, DivergenceRecord, EngineConfig, InMemorySource,
    InMemoryStore, MethodSelector, RiskLevel, RolloutStage, UserHistory,
};

/// TrainRisk - Training Load Injury Risk CLI
///
/// Computes acute:chronic workload ratios for mechanical and physiological
/// load and flags days where the two diverge.
#[derive(Parser)]
#[command(name = "trainrisk")]
#[command(author = "TrainRisk Contributors")]
#[command(version)]
#[command(about = "Training load injury risk analytics", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one user's history and show recent days
    Analyze {
        /// User history JSON file
        #[arg(short, long)]
        input: PathBuf,

        /// Number of recent days to show
        #[arg(short, long, default_value = "14")]
        days: usize,

        /// Extend the analysis to this date with rest days (YYYY-MM-DD)
        #[arg(long)]
        as_of: Option<NaiveDate>,

        /// Force the enhanced (stream) method regardless of rollout
        #[arg(long, conflicts_with = "legacy")]
        enhanced: bool,

        /// Force the legacy (average HR) method regardless of rollout
        #[arg(long)]
        legacy: bool,
    },

    /// Recalculate every user in a batch file
    Recalculate {
        /// JSON array of user histories
        #[arg(short, long)]
        input: PathBuf,

        /// Rollout stage to recalculate under, compared against the configured one
        #[arg(short, long)]
        stage: Option<RolloutStage>,

        /// Worker threads
        #[arg(short, long)]
        threads: Option<usize>,

        /// Derive records through this date with trailing rest days (YYYY-MM-DD)
        #[arg(long)]
        as_of: Option<NaiveDate>,

        /// Write the changed days of the --stage comparison as CSV
        #[arg(long, value_name = "FILE", requires = "stage")]
        audit_out: Option<PathBuf>,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Export derived records for every user in a batch file
    Export {
        /// JSON array of user histories
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Export format (csv, json)
        #[arg(short = 'f', long, default_value = "csv")]
        format: ExportFormat,

        /// Date range start (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Date range end (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Derive records through this date with trailing rest days (YYYY-MM-DD)
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },

    /// Show or initialize the configuration file
    Config {
        /// Write the built-in defaults to the config path
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long)]
        force: bool,

        /// Print the config path only
        #[arg(long)]
        path: bool,
    },
}

#[derive(Tabled)]
struct DayRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Ext ACWR")]
    external_acwr: String,
    #[tabled(rename = "Int ACWR")]
    internal_acwr: String,
    #[tabled(rename = "Divergence")]
    divergence: String,
    #[tabled(rename = "Risk")]
    risk: String,
    #[tabled(rename = "Method")]
    method: String,
    #[tabled(rename = "Rest Due")]
    rest_due: String,
}

impl DayRow {
    fn from_record(record: &DivergenceRecord) -> Self {
        let ratio = |v: Option<rust_decimal::Decimal>| v.map_or("-".to_string(), |r| format!("{:.2}", r));
        DayRow {
            date: record.date.to_string(),
            external_acwr: ratio(record.external_acwr),
            internal_acwr: ratio(record.internal_acwr),
            divergence: format!("{:+.3}", record.divergence_value),
            risk: record.risk_level.to_string(),
            method: record.calculation_method.to_string(),
            rest_due: if record.rest_day_due { "yes" } else { "" }.to_string(),
        }
    }
}

fn colored_risk(level: RiskLevel) -> ColoredString {
    match level {
        RiskLevel::InsufficientData => level.to_string().dimmed(),
        RiskLevel::Low => level.to_string().green(),
        RiskLevel::Moderate => level.to_string().yellow(),
        RiskLevel::High => level.to_string().red().bold(),
    }
}

fn load_history(path: &Path) -> Result<UserHistory> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read user history: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse user history: {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = EngineConfig::load_or_default(cli.config.as_deref());
    config.logging.level = config.logging.level.raised_by(cli.verbose);
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Analyze {
            input,
            days,
            as_of,
            enhanced,
            legacy,
        } => {
            let history = load_history(&input)?;
            let strategy = if enhanced {
                CalculationStrategy::Enhanced
            } else if legacy {
                CalculationStrategy::Legacy
            } else {
                config.rollout.strategy_for(&history.profile.user_id)
            };

            let records = config
                .pipeline()
                .run_window(&history, None, as_of, strategy)?;

            println!(
                "{} {} ({} strategy, {} tier)",
                "Analysis for".cyan().bold(),
                history.profile.user_id.to_string().bold(),
                strategy,
                records.tier.as_str()
            );

            if records.is_empty() {
                println!("{}", "No activities found".yellow());
                return Ok(());
            }

            let skip = records.divergence.len().saturating_sub(days);
            let recent = &records.divergence[skip..];
            let rows: Vec<DayRow> = recent.iter().map(DayRow::from_record).collect();
            println!("{}", Table::new(rows).with(Style::rounded()));

            if let Some(latest) = recent.last() {
                println!(
                    "Latest: {} ({})",
                    colored_risk(latest.risk_level),
                    latest.risk_level.description()
                );
                if latest.rest_day_due {
                    println!("{}", "A rest day is due".yellow());
                }
            }
        }

        Commands::Recalculate {
            input,
            stage,
            threads,
            as_of,
            audit_out,
            no_progress,
        } => {
            let source = InMemorySource::from_json_file(&input)?;
            if threads.is_some() {
                config.batch.num_threads = threads;
            }
            if as_of.is_some() {
                config.batch.as_of = as_of;
            }
            config.batch.show_progress = !no_progress;

            let orchestrator = config.orchestrator();
            let store = InMemoryStore::new();
            let cancel = CancellationToken::new();

            println!("{}", "Recalculating under configured rollout...".blue().bold());
            let baseline = orchestrator.recalculate_all(&source, &config.rollout, &store, &cancel)?;
            print_summary(&baseline);

            if let Some(stage) = stage {
                let mut plan = config.rollout.clone();
                plan.stage = stage;
                println!(
                    "{}",
                    format!("Comparing stage {} -> {}", config.rollout.stage, stage).blue().bold()
                );

                let mut reports = Vec::new();
                for user in store.users()? {
                    let report = orchestrator.preview_user(&user, &source, &plan, &store)?;
                    if !report.is_noop() {
                        print_audit(&report);
                        reports.push(report);
                    }
                }

                if let Some(path) = audit_out {
                    let rows = export::csv::export_audits(&reports, &path)?;
                    println!("{} {} changed days to {}", "✓ Wrote".green(), rows, path.display());
                }

                let summary = orchestrator.recalculate_all(&source, &plan, &store, &cancel)?;
                print_summary(&summary);
            }
        }

        Commands::Export {
            input,
            output,
            format,
            from,
            to,
            as_of,
        } => {
            let source = InMemorySource::from_json_file(&input)?;
            config.batch.show_progress = false;
            if as_of.is_some() {
                config.batch.as_of = as_of;
            }
            let orchestrator = config.orchestrator();
            let store = InMemoryStore::new();

            let summary = orchestrator.recalculate_all(&source, &config.rollout, &store, &CancellationToken::new())?;
            let rows = export::export_records(&store.snapshot()?, format, &DateRange::new(from, to), &output)?;

            println!(
                "{} {} rows for {} users to {}",
                "✓ Exported".green(),
                rows,
                summary.succeeded(),
                output.display()
            );
            if !summary.failed.is_empty() {
                print_summary(&summary);
            }
        }

        Commands::Config { init, force, path } => {
            let config_path = cli.config.clone().unwrap_or_else(EngineConfig::default_config_path);

            if path {
                println!("{}", config_path.display());
            } else if init {
                if config_path.exists() && !force {
                    anyhow::bail!(
                        "Config file already exists: {} (use --force to overwrite)",
                        config_path.display()
                    );
                }
                EngineConfig::default().save_to_file(&config_path)?;
                println!("{} {}", "✓ Wrote default configuration to".green(), config_path.display());
            } else {
                print!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

fn print_summary(summary: &trainrisk::BatchSummary) {
    println!("{}", summary.to_string_pretty());
    for (user, reason) in &summary.failed {
        println!("  {} {}: {}", "✗".red(), user, reason);
    }
}

fn print_audit(report: &AuditReport) {
    println!(
        "  {} {:?} -> {}: {} days changed method, {} changed risk, internal load {:+}",
        report.user_id.to_string().bold(),
        report.strategy_before,
        report.strategy_after,
        report.days_with_method_change(),
        report.days_with_risk_change(),
        report.total_internal_delta()
    );
}
