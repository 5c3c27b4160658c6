//! Live-AWS integration tests
//!
//! These hit real AWS APIs and require credentials; they are ignored in
//! regular test runs. They only read (or dry-run), never mutate.
//!
//! Run with: `cargo test --test aws_integration -- --ignored`

use ami_warden::aws::{get_current_account_id, AwsContext, Ec2Client};
use ami_warden::cleanup::run_cleanup_pass;
use ami_warden::config::{AwsSettings, RetentionPolicy, RunConfig, TagConfig};

/// Get the AWS region for tests.
///
/// Checks AWS_REGION then AWS_DEFAULT_REGION, falling back to us-east-2.
fn get_test_region() -> String {
    std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        .unwrap_or_else(|_| "us-east-2".to_string())
}

fn test_config(region: &str) -> RunConfig {
    RunConfig {
        aws: AwsSettings {
            region: region.to_string(),
            profile: None,
        },
        tags: TagConfig::default(),
        retention: RetentionPolicy {
            retain_count: 7,
            delete_snapshots: true,
        },
        dry_run: true,
    }
}

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn credentials_resolve_to_an_account() {
    let ctx = AwsContext::new(&get_test_region()).await;
    let account = get_current_account_id(ctx.sdk_config()).await.unwrap();
    assert_eq!(account.len(), 12);
}

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn tag_filtered_discovery_succeeds() {
    let region = get_test_region();
    let ec2 = Ec2Client::new(&region).await.unwrap();

    // Both discovery reads must succeed against an arbitrary account,
    // whether or not any resources match the filters
    let instances = ec2.instances_with_tag("Backup", "Yes").await.unwrap();
    let images = ec2
        .images_with_tag("ami-warden:managed", "true")
        .await
        .unwrap();

    // Managed images always carry parseable metadata
    for image in &images {
        assert!(image.image_id.starts_with("ami-"));
    }
    let _ = instances;
}

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn dry_run_cleanup_is_read_only() {
    let region = get_test_region();
    let ec2 = Ec2Client::new(&region).await.unwrap();
    let config = test_config(&region);

    let report = run_cleanup_pass(&ec2, &config).await.unwrap();

    // Dry run never deregisters anything
    assert_eq!(report.deregistered(), 0);
    assert_eq!(report.snapshots_deleted(), 0);
}
