//! Ripple-Harvest main entry point
//!
//! This is the command-line interface for the Ripple-Harvest collection harvester.

use anyhow::{bail, Context};
use clap::Parser;
use ripple_harvest::config::{load_config_with_hash, validate, CollectionConfig, Config, Credentials};
use ripple_harvest::harvest::normalize_target;
use ripple_harvest::output::{
    load_statistics, print_follow_check_summary, print_statistics, print_summary,
};
use ripple_harvest::{
    run_follow_check, run_harvest, ConfigError, FollowCheckOptions, FollowCheckOutput, HarvestError,
    HarvestOptions,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Ripple-Harvest: a resumable collection harvester
///
/// Ripple-Harvest pages through a community's members or a user's following
/// list, appending every new account to a deduplicated CSV file and saving
/// the pagination cursor after each page so interrupted runs can resume.
/// With --target it instead checks which accounts of the records file follow
/// a given user.
#[derive(Parser, Debug)]
#[command(name = "ripple-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A resumable collection harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Continue from the saved cursor
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Start from the first page (existing records are still deduplicated against)
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Stop after this many new records (with --target: checked members)
    #[arg(long, value_name = "N")]
    limit: Option<u64>,

    /// Records file, overriding `records-path` (with --target: the results file)
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Community to harvest, overriding `community-id`
    #[arg(long, value_name = "ID", conflicts_with = "user_id")]
    community_id: Option<String>,

    /// User whose following list to harvest, overriding `user-id`
    #[arg(long, value_name = "ID", conflicts_with = "community_id")]
    user_id: Option<String>,

    /// Do not query the collection size before paging
    #[arg(long)]
    skip_info: bool,

    /// Replace an unreadable checkpoint instead of failing
    #[arg(long)]
    discard_checkpoint: bool,

    /// Check which accounts of the records file follow this username
    #[arg(long, value_name = "USERNAME", conflicts_with = "stats")]
    target: Option<String>,

    /// With --target, write username lists of followers and non-followers
    #[arg(long, requires = "target")]
    separate: bool,

    /// Validate config and show what would be harvested without fetching anything
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the checkpoint and records file and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Tokens may live in a .env file next to the config
    dotenvy::dotenv().ok();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Maps an error chain to the process exit status
fn exit_code_for(error: &anyhow::Error) -> u8 {
    if let Some(e) = error.downcast_ref::<HarvestError>() {
        return e.exit_code();
    }
    if error.downcast_ref::<ConfigError>().is_some() {
        return 4;
    }
    1
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    apply_overrides(&mut config, &cli)?;

    if cli.dry_run {
        handle_dry_run(&config, &cli);
        return Ok(0);
    }
    if cli.stats {
        handle_stats(&config)?;
        return Ok(0);
    }
    if let Some(target) = &cli.target {
        return handle_follow_check(config, target, &cli).await;
    }

    handle_harvest(config, config_hash, &cli).await
}

/// Applies command-line overrides and re-validates the result
fn apply_overrides(config: &mut Config, cli: &Cli) -> anyhow::Result<()> {
    if let Some(limit) = cli.limit {
        config.harvest.limit = Some(limit);
    }
    if let (Some(output), None) = (&cli.output, &cli.target) {
        config.output.records_path = output.to_string_lossy().into_owned();
    }
    if cli.separate {
        config.follow_check.separate = true;
    }

    let id_override = match (&config.collection, &cli.community_id, &cli.user_id) {
        (CollectionConfig::CommunityMembers { .. }, Some(id), None)
        | (CollectionConfig::Following { .. }, None, Some(id)) => Some(id.clone()),
        (_, None, None) => None,
        (collection, _, _) => bail!(ConfigError::Validation(format!(
            "--community-id/--user-id does not match collection kind '{}'",
            collection.kind()
        ))),
    };
    if let Some(id) = id_override {
        config.collection.set_target_id(&id);
    }

    validate(config)?;
    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ripple_harvest=info,warn"),
            1 => EnvFilter::new("ripple_harvest=debug,info"),
            2 => EnvFilter::new("ripple_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows what would be harvested
fn handle_dry_run(config: &Config, cli: &Cli) {
    println!("=== Ripple-Harvest Dry Run ===\n");

    println!("Collection:");
    println!("  Kind: {}", config.collection.kind());
    println!("  Id: {}", config.collection.target_id());
    match &config.collection {
        CollectionConfig::CommunityMembers {
            fetch_info,
            salvage,
            ..
        } => {
            println!("  Fetch member count: {}", *fetch_info && !cli.skip_info);
            println!("  Salvage: {:?}", salvage);
        }
        CollectionConfig::Following {
            page_size, salvage, ..
        } => {
            println!("  Page size: {}", page_size);
            println!("  Salvage: {:?}", salvage);
        }
    }

    println!("\nSession:");
    println!("  Base URL: {}", config.session.base_url);
    println!("  Bearer token from: ${}", config.session.bearer_token_env);
    println!("  Auth token from: ${}", config.session.auth_token_env);
    println!("  CSRF token from: ${}", config.session.csrf_token_env);

    println!("\nHarvest:");
    match config.harvest.limit {
        Some(limit) => println!("  Limit: {} new records", limit),
        None => println!("  Limit: none"),
    }
    println!("  Page delay: {}ms", config.harvest.page_delay_ms);
    println!("  Duplicate policy: {:?}", config.harvest.duplicate_policy);
    println!("  Max empty pages: {}", config.harvest.max_empty_pages);

    println!("\nRetry:");
    println!(
        "  Rate limit fallback: {}s (max {}s, escalate: {})",
        config.retry.rate_limit_fallback_secs,
        config.retry.rate_limit_max_wait_secs,
        config.retry.escalate_rate_limit_wait
    );
    println!(
        "  Network attempts: {} (delay {}s to {}s)",
        config.retry.max_network_attempts,
        config.retry.network_base_delay_secs,
        config.retry.network_max_delay_secs
    );

    println!("\nOutput:");
    println!("  Records: {}", config.output.records_path);
    println!("  Checkpoint: {}", config.checkpoint_path().display());
    println!("  Response logs: {}", config.output.archive_dir);

    if let Some(target) = &cli.target {
        println!("\nFollow check:");
        println!("  Target: @{}", target.trim().trim_start_matches('@'));
        println!("  Members from: {}", config.output.records_path);
        println!("  Page size: {}", config.follow_check.page_size);
        match config.follow_check.max_pages {
            Some(max) => println!("  Max pages per member: {}", max),
            None => println!("  Max pages per member: none"),
        }
        println!("  Separate lists: {}", config.follow_check.separate);
    }

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would {} harvesting {}",
        if cli.resume { "resume" } else { "start" },
        config.collection.target_id()
    );
}

/// Handles the --stats mode: shows statistics from the checkpoint and records
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let stats = load_statistics(&config.records_path(), &config.checkpoint_path())
        .context("Failed to load statistics")?;
    print_statistics(&stats);
    Ok(())
}

/// Handles --target: checks which harvested accounts follow one user
async fn handle_follow_check(config: Config, target: &str, cli: &Cli) -> anyhow::Result<u8> {
    let target = normalize_target(target)?;
    let credentials =
        Credentials::from_env(&config.session).context("Failed to read session credentials")?;

    let output = FollowCheckOutput::for_members(
        &config.records_path(),
        &target,
        cli.output.as_deref(),
        config.follow_check.separate,
    );
    if cli.output.is_some() && config.follow_check.separate {
        tracing::warn!("--output is ignored when writing separate lists");
    }
    let options = FollowCheckOptions::from_config(&config, &target);

    tracing::info!("Checking who follows @{}", target);
    for path in output.paths() {
        tracing::info!("Results will be saved to: {}", path.display());
    }

    let report = run_follow_check(&config, credentials, output, options)
        .await
        .context("Follow check failed")?;

    if !cli.quiet {
        print_follow_check_summary(&report);
    }

    Ok(report.outcome.exit_code())
}

/// Handles the main harvest operation
async fn handle_harvest(config: Config, config_hash: String, cli: &Cli) -> anyhow::Result<u8> {
    let credentials =
        Credentials::from_env(&config.session).context("Failed to read session credentials")?;

    let options = HarvestOptions {
        resume: cli.resume,
        discard_corrupt_checkpoint: cli.discard_checkpoint,
        fetch_info: config.collection.fetch_info() && !cli.skip_info,
        config_hash: Some(config_hash),
        ..HarvestOptions::from_config(&config)
    };

    if cli.resume {
        tracing::info!("Resuming harvest from the saved checkpoint");
    } else {
        tracing::info!("Starting harvest from the first page");
    }
    tracing::info!("Output will be saved to: {}", config.output.records_path);
    tracing::info!("Response logs will be saved to: {}", config.output.archive_dir);

    let report = run_harvest(&config, credentials, options)
        .await
        .context("Harvest failed")?;

    if !cli.quiet {
        print_summary(&report);
    }

    Ok(report.outcome.exit_code())
}
