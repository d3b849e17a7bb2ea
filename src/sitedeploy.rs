use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use site_deploy::profile::{Environment, ProfileConfigFile, ProfileFiles};
use site_deploy::{
    ParallelUploadManager, ParallelUploadProgress, ProfileCache, S3ClientFactory, SiteRegistry,
    SiteUploadResult, UploadConfig, UploadOptions, UploadStats, YamlSiteRegistry, format_size,
};

#[derive(Parser, Debug)]
#[command(
    name = "sitedeploy",
    version = env!("CARGO_PKG_VERSION"),
    author = "Tyr Chen <tyr.chen@gmail.com>",
    about = "Deploy static sites to AWS S3, uploading only what changed",
    long_about = "Deploys one or more static sites described in a sites.yaml registry to S3. \
                  Unchanged files are skipped by comparing ETags, large files use multipart uploads, \
                  and several sites are deployed in parallel. Configure the bucket via .env.",
    after_help = "Examples:\n  \
                  sitedeploy                                  # Deploy every site in sites.yaml\n  \
                  sitedeploy -s docs,blog                     # Deploy selected sites\n  \
                  sitedeploy -s docs --profile prod           # Use a named AWS profile\n  \
                  sitedeploy -x '*.map' -x 'drafts/**'        # Exclude files from every site\n  \
                  sitedeploy --dry-run --json                 # Show the plan as JSON\n\n\
                  Configuration (.env):\n  \
                  AWS_REGION=us-west-2\n  \
                  S3_BUCKET=my-bucket\n  \
                  SITE_DEPLOY_MAX_RETRIES=3\n  \
                  SITE_DEPLOY_FILE_CONCURRENCY=4"
)]
struct Cli {
    /// Sites to deploy (comma-separated); all registered sites when omitted
    #[arg(long, short = 's', value_delimiter = ',')]
    sites: Vec<String>,

    /// AWS profile to use, overriding AWS_PROFILE
    #[arg(long, short = 'p')]
    profile: Option<String>,

    /// Glob patterns to exclude from every site
    #[arg(long = "exclude", short = 'x', value_delimiter = ',')]
    exclude: Vec<String>,

    /// Maximum number of sites deployed concurrently
    #[arg(long, short = 'c', default_value = "3")]
    max_concurrent: usize,

    /// Traverse sites and report what would be deployed, without uploading
    #[arg(long)]
    dry_run: bool,

    /// Path to the site registry
    #[arg(long, short = 'r', default_value = "sites.yaml")]
    registry: PathBuf,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct SiteSummary<'a> {
    site: &'a str,
    success: bool,
    duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<&'a UploadStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct DeploySummary<'a> {
    dry_run: bool,
    total_sites: usize,
    succeeded: usize,
    failed: usize,
    sites: Vec<SiteSummary<'a>>,
}

impl<'a> DeploySummary<'a> {
    fn new(results: &'a [SiteUploadResult], dry_run: bool) -> Self {
        let sites: Vec<_> = results
            .iter()
            .map(|r| SiteSummary {
                site: &r.site_name,
                success: r.is_success(),
                duration_ms: r.duration.as_millis(),
                stats: r.stats(),
                error: r.error().map(|e| e.to_string()),
            })
            .collect();
        let succeeded = sites.iter().filter(|s| s.success).count();

        Self {
            dry_run,
            total_sites: sites.len(),
            succeeded,
            failed: sites.len() - succeeded,
            sites,
        }
    }
}

fn print_summary(results: &[SiteUploadResult], dry_run: bool) {
    println!("\n{}", style("═".repeat(70)).dim());

    for result in results {
        match (result.stats(), result.error()) {
            (Some(stats), _) => {
                let detail = if dry_run {
                    format!(
                        "{} file(s) planned ({})",
                        stats.total_files,
                        format_size(stats.total_bytes)
                    )
                } else {
                    format!(
                        "{} uploaded ({}), {} skipped",
                        stats.uploaded_files,
                        format_size(stats.uploaded_bytes),
                        stats.skipped_files
                    )
                };
                println!(
                    "{}  {}: {} {}",
                    style("✅").green(),
                    style(&result.site_name).bold(),
                    detail,
                    style(format!("[{:.2}s]", result.duration.as_secs_f64())).dim()
                );
            }
            (None, Some(e)) => {
                eprintln!(
                    "{}  {}: {}",
                    style("❌").red(),
                    style(&result.site_name).bold(),
                    e.user_message()
                );
            }
            (None, None) => {}
        }
    }

    let failed = results.iter().filter(|r| !r.is_success()).count();
    let uploaded_bytes: u64 = results
        .iter()
        .filter_map(|r| r.stats())
        .map(|s| s.uploaded_bytes)
        .sum();

    println!();
    let summary = format!(
        "Summary: {} site(s) deployed, {} failed, {} transferred",
        results.len() - failed,
        failed,
        format_size(uploaded_bytes)
    );
    if failed == 0 {
        println!("{}", style(summary).green().bold());
    } else {
        println!("{}", style(summary).red().bold());
    }
}

/// Warn when an explicit profile is missing from the shared AWS files
fn check_profile(profile: &str, environment: &Environment) {
    let files = ProfileFiles::from_environment(environment);
    let known = ProfileConfigFile::load(&files);
    if !known.contains(profile) {
        warn!(
            "Profile '{}' not found in AWS credentials or config files; the SDK may fail to load credentials",
            profile
        );
    }
}

fn progress_bar(total: usize, hidden: bool) -> Result<ProgressBar> {
    if hidden {
        return Ok(ProgressBar::hidden());
    }

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("#>-"),
    );
    pb.set_message("Deploying sites...");
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    Ok(pb)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file early to get LOG_LEVEL
    dotenv::dotenv().ok();

    let log_level = std::env::var("LOG_LEVEL")
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    info!("Site Deploy v{}", env!("CARGO_PKG_VERSION"));

    let config = UploadConfig::from_env().context("Failed to load upload configuration")?;
    let registry = YamlSiteRegistry::load(&cli.registry)
        .with_context(|| format!("Failed to load site registry {}", cli.registry.display()))?;

    let sites = if cli.sites.is_empty() {
        registry.site_names()
    } else {
        cli.sites.clone()
    };

    let environment: Environment = std::env::vars().collect();
    if let Some(profile) = &cli.profile {
        check_profile(profile, &environment);
    }

    if !cli.json {
        println!(
            "{}",
            style(format!(
                "📦 Target: s3://{} ({} site(s), up to {} in parallel)",
                config.bucket,
                sites.len(),
                cli.max_concurrent
            ))
            .cyan()
            .bold()
        );
        if cli.dry_run {
            println!(
                "{}",
                style("🔍 DRY RUN MODE - No files will be uploaded")
                    .yellow()
                    .bold()
            );
        }
    }

    let manager = Arc::new(
        ParallelUploadManager::new(
            Arc::new(registry),
            Arc::new(S3ClientFactory::new()),
            config,
            Arc::new(ProfileCache::default()),
        )
        .with_max_concurrent_uploads(cli.max_concurrent),
    );

    let shutdown = Arc::clone(&manager);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling remaining uploads");
            shutdown.shutdown();
        }
    });

    let pb = progress_bar(sites.len(), cli.json)?;
    let pb_callback = pb.clone();
    let options = UploadOptions {
        profile: cli.profile.clone(),
        environment: Some(environment),
        dry_run: cli.dry_run,
        exclude_patterns: cli.exclude.clone(),
        progress_callback: Some(Arc::new(move |progress: &ParallelUploadProgress| {
            pb_callback.set_position((progress.completed_sites + progress.failed_sites) as u64);
            pb_callback.set_message(format!(
                "{} ok, {} failed",
                progress.completed_sites, progress.failed_sites
            ));
        })),
    };

    let results = match manager.upload_sites(&sites, options).await {
        Ok(results) => results,
        Err(e) => {
            pb.finish_and_clear();
            eprintln!("{} {}", style("Error:").red().bold(), e.user_message());
            std::process::exit(1);
        }
    };
    pb.finish_and_clear();

    if cli.json {
        let summary = DeploySummary::new(&results, cli.dry_run);
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&results, cli.dry_run);
    }

    if results.iter().any(|r| !r.is_success()) {
        std::process::exit(1);
    }

    Ok(())
}
