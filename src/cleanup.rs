//! Cleanup pass: retention enforcement and cascading deletes
//!
//! Discovers managed backup images by their marker tag, groups them by
//! source instance, and deletes the overflow beyond the retention window.
//! Snapshot deletion cascades from image deregistration and is only ever
//! attempted after the deregister call has returned success.

use crate::aws::error::classify_anyhow_error;
use crate::aws::tags::TAG_MANAGED_VALUE;
use crate::aws::{BackupImage, Ec2Operations};
use crate::config::{RetentionPolicy, RunConfig};
use crate::report::{CleanupOutcome, CleanupReport, ImageCleanup};
use crate::retention::{group_by_instance, select_overflow};
use anyhow::{Context, Result};
use futures::future::join_all;
use tracing::{debug, info, warn};

/// Run one cleanup pass over all managed backup images.
///
/// Returns an error only if image discovery itself fails; every per-image
/// and per-snapshot outcome lands in the report. Distinct images are
/// processed concurrently.
pub async fn run_cleanup_pass<E: Ec2Operations>(
    ec2: &E,
    config: &RunConfig,
) -> Result<CleanupReport> {
    let images = ec2
        .images_with_tag(&config.tags.marker_key, TAG_MANAGED_VALUE)
        .await
        .context("Failed to discover managed backup images")?;

    let images_found = images.len();
    let grouped = group_by_instance(images, &config.tags.owner_key);

    let mut report = CleanupReport {
        images_found,
        untracked: grouped.untracked.len(),
        groups: grouped.groups.len(),
        ..Default::default()
    };

    let mut deletions: Vec<(String, BackupImage)> = Vec::new();
    for (instance_id, group) in grouped.groups {
        let backups = group.len();
        let (retained, expired) = select_overflow(group, config.retention.retain_count);
        report.retained += retained.len();

        if expired.is_empty() {
            info!(
                instance_id = %instance_id,
                backups,
                "Cleanup not required, not enough backups in window yet"
            );
            continue;
        }

        info!(
            instance_id = %instance_id,
            backups,
            expired = expired.len(),
            retain_count = config.retention.retain_count,
            "Backups exceed retention window"
        );
        deletions.extend(expired.into_iter().map(|image| (instance_id.clone(), image)));
    }

    report.outcomes = join_all(deletions.into_iter().map(|(instance_id, image)| {
        delete_backup(ec2, &config.retention, config.dry_run, instance_id, image)
    }))
    .await;

    Ok(report)
}

/// Delete one expired backup: deregister the image, then cascade to its
/// snapshots.
///
/// If deregistration fails the snapshots are never touched; the image is
/// rediscovered and reconsidered on the next scheduled run.
async fn delete_backup<E: Ec2Operations>(
    ec2: &E,
    retention: &RetentionPolicy,
    dry_run: bool,
    instance_id: String,
    image: BackupImage,
) -> ImageCleanup {
    info!(
        image_id = %image.image_id,
        created_at = %image.created_at,
        instance_id = %instance_id,
        "Found expired backup"
    );

    if dry_run {
        info!(image_id = %image.image_id, "[DRY RUN] Would deregister");
        return ImageCleanup {
            instance_id,
            image_id: image.image_id,
            created_at: image.created_at,
            outcome: CleanupOutcome::SkippedDryRun,
        };
    }

    if let Err(e) = ec2.deregister_image(&image.image_id).await {
        warn!(
            image_id = %image.image_id,
            error = ?e,
            "Failed to deregister image, snapshots left untouched"
        );
        return ImageCleanup {
            instance_id,
            image_id: image.image_id,
            created_at: image.created_at,
            outcome: CleanupOutcome::DeregisterFailed {
                error: format!("{e:#}"),
            },
        };
    }

    let (snapshots_deleted, snapshots_failed) = if retention.delete_snapshots {
        delete_snapshots(ec2, &image).await
    } else {
        (0, 0)
    };

    ImageCleanup {
        instance_id,
        image_id: image.image_id,
        created_at: image.created_at,
        outcome: CleanupOutcome::Deregistered {
            snapshots_deleted,
            snapshots_failed,
        },
    }
}

/// Delete every snapshot referenced by a deregistered image's device
/// mappings. Failures are independent; a snapshot that is already gone
/// counts as deleted.
async fn delete_snapshots<E: Ec2Operations>(ec2: &E, image: &BackupImage) -> (usize, usize) {
    let results = join_all(
        image
            .snapshot_ids
            .iter()
            .map(|snapshot_id| ec2.delete_snapshot(snapshot_id)),
    )
    .await;

    let mut deleted = 0;
    let mut failed = 0;
    for (snapshot_id, result) in image.snapshot_ids.iter().zip(results) {
        match result {
            Ok(()) => deleted += 1,
            Err(e) if classify_anyhow_error(&e).is_not_found() => {
                debug!(snapshot_id = %snapshot_id, "Snapshot already deleted");
                deleted += 1;
            }
            Err(e) => {
                warn!(snapshot_id = %snapshot_id, error = ?e, "Failed to delete snapshot");
                failed += 1;
            }
        }
    }

    (deleted, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::ec2::MockEc2Operations;
    use crate::config::{AwsSettings, RetentionPolicy, TagConfig};
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashMap;

    fn test_config(retain_count: usize, delete_snapshots: bool) -> RunConfig {
        RunConfig {
            aws: AwsSettings {
                region: "us-east-2".to_string(),
                profile: None,
            },
            tags: TagConfig::default(),
            retention: RetentionPolicy {
                retain_count,
                delete_snapshots,
            },
            dry_run: false,
        }
    }

    fn image(image_id: &str, instance_id: Option<&str>, age_days: i64, snapshots: &[&str]) -> BackupImage {
        let mut tags = HashMap::new();
        tags.insert("ami-warden:managed".to_string(), "true".to_string());
        if let Some(id) = instance_id {
            tags.insert("ami-warden:source-instance".to_string(), id.to_string());
        }
        BackupImage {
            image_id: image_id.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
                - Duration::days(age_days),
            tags,
            snapshot_ids: snapshots.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn expired_images_cascade_to_their_snapshots() {
        // i-1 has backups at T-3d, T-2d, T-1d with 2 snapshots each and
        // retain=1: the two oldest go, along with their 4 snapshots
        let images = vec![
            image("ami-t3", Some("i-1"), 3, &["snap-t3-a", "snap-t3-b"]),
            image("ami-t2", Some("i-1"), 2, &["snap-t2-a", "snap-t2-b"]),
            image("ami-t1", Some("i-1"), 1, &["snap-t1-a", "snap-t1-b"]),
        ];

        let mut ec2 = MockEc2Operations::new();
        ec2.expect_images_with_tag()
            .withf(|key, value| key == "ami-warden:managed" && value == "true")
            .returning(move |_, _| Ok(images.clone()));
        ec2.expect_deregister_image()
            .withf(|image_id| image_id == "ami-t2" || image_id == "ami-t3")
            .times(2)
            .returning(|_| Ok(()));
        ec2.expect_delete_snapshot()
            .withf(|snapshot_id| {
                snapshot_id.starts_with("snap-t2") || snapshot_id.starts_with("snap-t3")
            })
            .times(4)
            .returning(|_| Ok(()));

        let report = run_cleanup_pass(&ec2, &test_config(1, true)).await.unwrap();

        assert_eq!(report.images_found, 3);
        assert_eq!(report.groups, 1);
        assert_eq!(report.retained, 1);
        assert_eq!(report.deregistered(), 2);
        assert_eq!(report.snapshots_deleted(), 4);
        assert_eq!(report.snapshots_failed(), 0);
    }

    #[tokio::test]
    async fn snapshot_deletion_disabled_never_touches_snapshots() {
        let images = vec![
            image("ami-old", Some("i-1"), 5, &["snap-a", "snap-b"]),
            image("ami-new", Some("i-1"), 1, &["snap-c"]),
        ];

        let mut ec2 = MockEc2Operations::new();
        ec2.expect_images_with_tag()
            .returning(move |_, _| Ok(images.clone()));
        ec2.expect_deregister_image()
            .times(1)
            .returning(|_| Ok(()));
        ec2.expect_delete_snapshot().never();

        let report = run_cleanup_pass(&ec2, &test_config(1, false)).await.unwrap();
        assert_eq!(report.deregistered(), 1);
        assert_eq!(report.snapshots_deleted(), 0);
    }

    #[tokio::test]
    async fn deregister_failure_leaves_snapshots_untouched() {
        let images = vec![image("ami-stuck", Some("i-1"), 5, &["snap-a", "snap-b"])];

        let mut ec2 = MockEc2Operations::new();
        ec2.expect_images_with_tag()
            .returning(move |_, _| Ok(images.clone()));
        ec2.expect_deregister_image()
            .returning(|_| Err(anyhow::anyhow!("image is in use")));
        ec2.expect_delete_snapshot().never();

        let report = run_cleanup_pass(&ec2, &test_config(0, true)).await.unwrap();
        assert_eq!(report.deregister_failures(), 1);
        assert_eq!(report.deregistered(), 0);
    }

    #[tokio::test]
    async fn deregister_failure_does_not_block_sibling_images() {
        let images = vec![
            image("ami-bad", Some("i-1"), 5, &["snap-bad-a"]),
            image("ami-good", Some("i-1"), 4, &["snap-good-a", "snap-good-b"]),
        ];

        let mut ec2 = MockEc2Operations::new();
        ec2.expect_images_with_tag()
            .returning(move |_, _| Ok(images.clone()));
        ec2.expect_deregister_image()
            .times(2)
            .returning(|image_id| {
                if image_id == "ami-bad" {
                    Err(anyhow::anyhow!("image is in use"))
                } else {
                    Ok(())
                }
            });
        ec2.expect_delete_snapshot()
            .withf(|snapshot_id| snapshot_id.starts_with("snap-good"))
            .times(2)
            .returning(|_| Ok(()));

        let report = run_cleanup_pass(&ec2, &test_config(0, true)).await.unwrap();
        assert_eq!(report.deregistered(), 1);
        assert_eq!(report.deregister_failures(), 1);
        assert_eq!(report.snapshots_deleted(), 2);
    }

    #[tokio::test]
    async fn snapshot_delete_happens_only_after_deregister() {
        let images = vec![image("ami-1", Some("i-1"), 5, &["snap-1"])];

        let mut ec2 = MockEc2Operations::new();
        let mut seq = mockall::Sequence::new();
        ec2.expect_images_with_tag()
            .returning(move |_, _| Ok(images.clone()));
        ec2.expect_deregister_image()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        ec2.expect_delete_snapshot()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let report = run_cleanup_pass(&ec2, &test_config(0, true)).await.unwrap();
        assert_eq!(report.deregistered(), 1);
        assert_eq!(report.snapshots_deleted(), 1);
    }

    #[tokio::test]
    async fn snapshot_failures_are_isolated_per_snapshot() {
        let images = vec![image("ami-1", Some("i-1"), 5, &["snap-a", "snap-b", "snap-c"])];

        let mut ec2 = MockEc2Operations::new();
        ec2.expect_images_with_tag()
            .returning(move |_, _| Ok(images.clone()));
        ec2.expect_deregister_image().returning(|_| Ok(()));
        ec2.expect_delete_snapshot()
            .times(3)
            .returning(|snapshot_id| {
                if snapshot_id == "snap-b" {
                    Err(anyhow::anyhow!("snapshot is in use"))
                } else {
                    Ok(())
                }
            });

        let report = run_cleanup_pass(&ec2, &test_config(0, true)).await.unwrap();
        assert_eq!(report.snapshots_deleted(), 2);
        assert_eq!(report.snapshots_failed(), 1);
    }

    #[tokio::test]
    async fn missing_snapshot_counts_as_deleted() {
        let images = vec![image("ami-1", Some("i-1"), 5, &["snap-gone"])];

        let mut ec2 = MockEc2Operations::new();
        ec2.expect_images_with_tag()
            .returning(move |_, _| Ok(images.clone()));
        ec2.expect_deregister_image().returning(|_| Ok(()));
        ec2.expect_delete_snapshot().returning(|_| {
            Err(anyhow::anyhow!(
                r#"service error: code: Some("InvalidSnapshot.NotFound")"#
            ))
        });

        let report = run_cleanup_pass(&ec2, &test_config(0, true)).await.unwrap();
        assert_eq!(report.snapshots_deleted(), 1);
        assert_eq!(report.snapshots_failed(), 0);
    }

    #[tokio::test]
    async fn untracked_images_are_never_deleted() {
        let images = vec![
            image("ami-orphan", None, 100, &["snap-orphan"]),
            image("ami-owned", Some("i-1"), 1, &[]),
        ];

        let mut ec2 = MockEc2Operations::new();
        ec2.expect_images_with_tag()
            .returning(move |_, _| Ok(images.clone()));
        ec2.expect_deregister_image()
            .withf(|image_id| image_id == "ami-owned")
            .times(1)
            .returning(|_| Ok(()));
        ec2.expect_delete_snapshot().never();

        let report = run_cleanup_pass(&ec2, &test_config(0, true)).await.unwrap();
        assert_eq!(report.untracked, 1);
        assert_eq!(report.deregistered(), 1);
    }

    #[tokio::test]
    async fn dry_run_issues_no_mutations() {
        let images = vec![image("ami-old", Some("i-1"), 5, &["snap-a"])];

        let mut ec2 = MockEc2Operations::new();
        ec2.expect_images_with_tag()
            .returning(move |_, _| Ok(images.clone()));
        ec2.expect_deregister_image().never();
        ec2.expect_delete_snapshot().never();

        let mut config = test_config(0, true);
        config.dry_run = true;

        let report = run_cleanup_pass(&ec2, &config).await.unwrap();
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.deregistered(), 0);
    }

    #[tokio::test]
    async fn discovery_failure_aborts_the_pass() {
        let mut ec2 = MockEc2Operations::new();
        ec2.expect_images_with_tag()
            .returning(|_, _| Err(anyhow::anyhow!("RequestLimitExceeded")));
        ec2.expect_deregister_image().never();

        assert!(run_cleanup_pass(&ec2, &test_config(1, true)).await.is_err());
    }
}
