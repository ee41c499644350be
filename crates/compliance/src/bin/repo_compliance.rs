//! Repository compliance CLI.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::builder::BoolishValueParser;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use compliance::{format_summary_text, GitHubClient, RunConfig, RunCoordinator, RunSummary};

/// Scan organization repositories for compliance and reconcile labels and
/// tracking issues.
#[derive(Parser)]
#[command(name = "repo-compliance")]
#[command(about = "Repository compliance scanner", version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan every repository of an organization.
    Scan(ScanArgs),
}

#[derive(clap::Args)]
struct ScanArgs {
    /// Organization to scan (or set `TARGET_ORG`).
    #[arg(long, env = "TARGET_ORG")]
    org: Option<String>,

    /// Compute mutations without applying them (or set `DRY_RUN`).
    #[arg(
        long,
        env = "DRY_RUN",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    dry_run: Option<bool>,

    /// Apply mutations. Takes precedence over `--dry-run` and `DRY_RUN`.
    #[arg(long)]
    apply: bool,

    /// Whether to touch labels and issues at all (or set `FIX_ISSUES`).
    #[arg(
        long,
        env = "FIX_ISSUES",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    fix_issues: Option<bool>,

    /// GitHub token (or set `GITHUB_TOKEN`).
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Repository holding tracking issues (or set `TRACKING_REPO`).
    #[arg(long, env = "TRACKING_REPO")]
    tracking_repo: Option<String>,

    /// JSON config file. Flags and environment override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Repositories processed concurrently.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Timeout per API call in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Write the JSON summary to this path.
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

impl ScanArgs {
    /// Merge file config (if any) with flags and environment.
    fn into_config(self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => RunConfig::default(),
        };

        if let Some(org) = self.org {
            config.target_organization = org;
        }
        if self.apply {
            config.dry_run = false;
        } else if let Some(dry_run) = self.dry_run {
            config.dry_run = dry_run;
        }
        if let Some(fix_issues) = self.fix_issues {
            config.fix_issues = fix_issues;
        }
        if let Some(tracking_repo) = self.tracking_repo {
            config.tracking_repository = tracking_repo;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(timeout) = self.timeout {
            config.request_timeout_secs = timeout;
        }
        config.token = self.token.filter(|t| !t.trim().is_empty());

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn init_tracing(verbose: bool, log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("compliance=debug,repo_compliance=debug")
        } else {
            EnvFilter::new("compliance=info,repo_compliance=info")
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Scan(args) => scan(args).await,
    }
}

async fn scan(args: ScanArgs) -> Result<()> {
    let format = args.format;
    let report_path = args.report.clone();
    let config = args.into_config()?;

    info!(
        org = %config.target_organization,
        dry_run = config.dry_run,
        fix_issues = config.fix_issues,
        tracking_repository = %config.tracking_repository,
        "Starting compliance scan"
    );

    let client = Arc::new(GitHubClient::new(&config).context("Failed to build GitHub client")?);
    let coordinator = RunCoordinator::from_config(&config, client.clone());

    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight work");
            cancel.cancel();
        }
    });

    let summary = coordinator
        .scan(client, config.dry_run)
        .await
        .context("Compliance scan failed")?;

    match format {
        OutputFormat::Json => {
            let json =
                serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?;
            println!("{json}");
        }
        OutputFormat::Text => print_text(&summary),
    }

    if let Some(path) = report_path {
        summary
            .write_report(&path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }

    if !summary.errors.is_empty() {
        bail!(
            "{} repositories could not be processed",
            summary.errors.len()
        );
    }
    Ok(())
}

fn print_text(summary: &RunSummary) {
    let non_compliant = summary.non_compliant_count();
    let headline = format!(
        "{}/{} repositories compliant ({:.1}%)",
        summary.repositories_scanned - non_compliant,
        summary.repositories_scanned,
        summary.compliance_rate()
    );
    if non_compliant == 0 && summary.errors.is_empty() {
        println!("{} {}", "✓".green(), headline.green().bold());
    } else {
        println!("{} {}", "✗".red(), headline.yellow().bold());
    }
    if summary.dry_run {
        println!("{}", "Dry run: no changes were made".dimmed());
    }
    println!();
    print!("{}", format_summary_text(summary));
}
