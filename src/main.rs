//! ami-warden: scheduled AMI backups with tag-driven retention for EC2
//!
//! Designed to be invoked from an external scheduler (cron, EventBridge,
//! systemd timer); one invocation runs one best-effort pass and exits.

use ami_warden::aws::tags;
use ami_warden::aws::{get_current_account_id, AwsContext, Ec2Client};
use ami_warden::config::{AwsSettings, RetentionPolicy, RunConfig, TagConfig};
use ami_warden::report::{BackupReport, CleanupReport};
use ami_warden::retention::group_by_instance;
use ami_warden::{backup, cleanup};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ami-warden")]
#[command(about = "Scheduled AMI backups with tag-driven retention for EC2")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct AwsArgs {
    /// AWS region
    #[arg(long, default_value = "us-east-2", env = "AWS_REGION")]
    region: String,

    /// AWS profile to use (overrides AWS_PROFILE env var)
    #[arg(long)]
    aws_profile: Option<String>,
}

#[derive(clap::Args, Debug)]
struct TagArgs {
    /// Tag key that opts an instance into scheduled backups
    #[arg(long, default_value = tags::DEFAULT_OPT_IN_KEY)]
    opt_in_tag_key: String,

    /// Required value of the opt-in tag
    #[arg(long, default_value = tags::DEFAULT_OPT_IN_VALUE)]
    opt_in_tag_value: String,

    /// Tag key marking images managed by this tool
    #[arg(long, default_value = tags::TAG_MANAGED)]
    marker_tag_key: String,

    /// Tag key storing the owning instance id on each managed image
    #[arg(long, default_value = tags::TAG_SOURCE_INSTANCE)]
    owner_tag_key: String,
}

impl From<TagArgs> for TagConfig {
    fn from(args: TagArgs) -> Self {
        Self {
            opt_in_key: args.opt_in_tag_key,
            opt_in_value: args.opt_in_tag_value,
            marker_key: args.marker_tag_key,
            owner_key: args.owner_tag_key,
        }
    }
}

#[derive(clap::Args, Debug)]
struct RetentionArgs {
    /// Number of most-recent backups to keep per instance (0 keeps none)
    #[arg(long, default_value_t = 7)]
    retain: usize,

    /// Leave EBS snapshots intact when deregistering images
    #[arg(long)]
    keep_snapshots: bool,
}

impl From<RetentionArgs> for RetentionPolicy {
    fn from(args: RetentionArgs) -> Self {
        Self {
            retain_count: args.retain,
            delete_snapshots: !args.keep_snapshots,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one scheduled pass: back up opt-in instances, then enforce retention
    Run {
        #[command(flatten)]
        aws: AwsArgs,
        #[command(flatten)]
        tags: TagArgs,
        #[command(flatten)]
        retention: RetentionArgs,
    },

    /// Create backup images for opt-in instances without touching retention
    Backup {
        #[command(flatten)]
        aws: AwsArgs,
        #[command(flatten)]
        tags: TagArgs,
    },

    /// Enforce retention on managed images (dry-run unless --execute)
    Cleanup {
        #[command(flatten)]
        aws: AwsArgs,
        #[command(flatten)]
        tags: TagArgs,
        #[command(flatten)]
        retention: RetentionArgs,

        /// Actually deregister images and delete snapshots
        #[arg(long)]
        execute: bool,
    },

    /// List managed backup images grouped by source instance
    Scan {
        #[command(flatten)]
        aws: AwsArgs,
        #[command(flatten)]
        tags: TagArgs,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Run {
            aws,
            tags,
            retention,
        } => {
            let config = build_config(aws, tags, retention.into(), false);
            handle_run(config).await?;
        }

        Command::Backup { aws, tags } => {
            let config = build_config(
                aws,
                tags,
                RetentionPolicy {
                    retain_count: 0,
                    delete_snapshots: false,
                },
                false,
            );
            let ec2 = connect(&config.aws).await?;
            let report = backup::run_backup_pass(&ec2, &config).await?;
            print_backup_report(&report);
        }

        Command::Cleanup {
            aws,
            tags,
            retention,
            execute,
        } => {
            let config = build_config(aws, tags, retention.into(), !execute);
            let ec2 = connect(&config.aws).await?;
            let report = cleanup::run_cleanup_pass(&ec2, &config).await?;
            print_cleanup_report(&report, config.dry_run);
        }

        Command::Scan { aws, tags, format } => {
            let config = build_config(
                aws,
                tags,
                RetentionPolicy {
                    retain_count: 0,
                    delete_snapshots: false,
                },
                true,
            );
            handle_scan(&config, &format).await?;
        }
    }

    Ok(())
}

fn build_config(
    aws: AwsArgs,
    tags: TagArgs,
    retention: RetentionPolicy,
    dry_run: bool,
) -> RunConfig {
    RunConfig {
        aws: AwsSettings {
            region: aws.region,
            profile: aws.aws_profile,
        },
        tags: tags.into(),
        retention,
        dry_run,
    }
}

/// Load AWS config, validate credentials, and build the EC2 client.
async fn connect(aws: &AwsSettings) -> Result<Ec2Client> {
    let ctx = AwsContext::with_profile(&aws.region, aws.profile.as_deref()).await;
    get_current_account_id(ctx.sdk_config()).await?;
    Ok(Ec2Client::from_context(&ctx))
}

/// Handle the run command: both passes, independently.
///
/// A discovery failure aborts only its own pass; the invocation fails only
/// when neither pass could make progress.
async fn handle_run(config: RunConfig) -> Result<()> {
    info!(
        region = %config.aws.region,
        retain_count = config.retention.retain_count,
        delete_snapshots = config.retention.delete_snapshots,
        "Starting scheduled backup run"
    );

    let ec2 = connect(&config.aws).await?;

    let backup_result = backup::run_backup_pass(&ec2, &config).await;
    let cleanup_result = cleanup::run_cleanup_pass(&ec2, &config).await;

    match &backup_result {
        Ok(report) => print_backup_report(report),
        Err(e) => warn!(error = ?e, "Backup pass aborted"),
    }
    match &cleanup_result {
        Ok(report) => print_cleanup_report(report, config.dry_run),
        Err(e) => warn!(error = ?e, "Cleanup pass aborted"),
    }

    if let (Err(backup_err), Err(_)) = (backup_result, cleanup_result) {
        return Err(backup_err.context("Both discovery passes failed, no progress was possible"));
    }

    Ok(())
}

/// Handle the scan command
async fn handle_scan(config: &RunConfig, format: &str) -> Result<()> {
    let ec2 = connect(&config.aws).await?;

    let images = ec2
        .images_with_tag(&config.tags.marker_key, tags::TAG_MANAGED_VALUE)
        .await
        .context("Failed to discover managed backup images")?;

    let total = images.len();
    let mut grouped = group_by_instance(images, &config.tags.owner_key);
    for (_, group) in &mut grouped.groups {
        group.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }

    if total == 0 {
        println!("No managed backup images found.");
        return Ok(());
    }

    if format == "json" {
        let json_images: Vec<_> = grouped
            .groups
            .iter()
            .flat_map(|(instance_id, group)| {
                group.iter().map(move |image| {
                    serde_json::json!({
                        "instance_id": instance_id,
                        "image_id": image.image_id,
                        "created_at": image.created_at.to_rfc3339(),
                        "snapshots": image.snapshot_ids,
                    })
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json_images)?);
    } else {
        println!(
            "{:<22} {:<24} {:<20} {:<10}",
            "INSTANCE", "IMAGE", "CREATED_AT", "SNAPSHOTS"
        );
        println!("{}", "-".repeat(78));
        for (instance_id, group) in &grouped.groups {
            for image in group {
                println!(
                    "{:<22} {:<24} {:<20} {:<10}",
                    instance_id,
                    image.image_id,
                    image.created_at.format("%Y-%m-%d %H:%M:%S"),
                    image.snapshot_ids.len(),
                );
            }
        }
        println!(
            "\nTotal: {} images across {} instances ({} untracked)",
            total,
            grouped.groups.len(),
            grouped.untracked.len()
        );
    }

    Ok(())
}

fn print_backup_report(report: &BackupReport) {
    println!("\n=== Backup Report ===");
    println!("Instances discovered:      {}", report.instances_found);
    println!("Images created and tagged: {}", report.tagged());
    println!("Creation failures:         {}", report.creation_failures());
    println!("Tagging failures:          {}", report.tagging_failures());
}

fn print_cleanup_report(report: &CleanupReport, dry_run: bool) {
    println!("\n=== Cleanup Report ===");
    println!("Mode: {}", if dry_run { "DRY-RUN" } else { "EXECUTE" });
    println!();
    println!("Managed images found: {}", report.images_found);
    println!("  Untracked (no owner tag): {}", report.untracked);
    println!("  Retention groups:         {}", report.groups);
    println!("  Within window:            {}", report.retained);
    println!();
    if dry_run {
        println!("Would deregister: {} (dry-run mode)", report.skipped());
        println!();
        println!("Run with --execute to actually delete backups.");
    } else {
        println!("Images deregistered: {}", report.deregistered());
        println!("Deregister failures: {}", report.deregister_failures());
        println!("Snapshots deleted:   {}", report.snapshots_deleted());
        println!("Snapshot failures:   {}", report.snapshots_failed());
    }
}
