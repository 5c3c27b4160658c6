//! Backup pass: image creation for opt-in instances
//!
//! Discovers instances carrying the opt-in tag and requests a no-reboot
//! image of each, then tags the image with its provenance. Per-instance
//! failures are isolated; one bad instance never blocks the rest.

use crate::aws::tags::{format_image_timestamp, TAG_MANAGED_VALUE};
use crate::aws::Ec2Operations;
use crate::config::{RunConfig, TagConfig};
use crate::report::{BackupOutcome, BackupReport, InstanceBackup};
use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use tracing::{info, warn};

/// Run one backup pass over the fleet.
///
/// Returns an error only if instance discovery itself fails; every
/// per-instance outcome lands in the report.
pub async fn run_backup_pass<E: Ec2Operations>(ec2: &E, config: &RunConfig) -> Result<BackupReport> {
    let instance_ids = ec2
        .instances_with_tag(&config.tags.opt_in_key, &config.tags.opt_in_value)
        .await
        .context("Failed to discover opt-in instances")?;

    info!(count = instance_ids.len(), "Discovered opt-in instances");

    let outcomes = join_all(
        instance_ids
            .iter()
            .map(|instance_id| backup_instance(ec2, &config.tags, instance_id)),
    )
    .await;

    Ok(BackupReport {
        instances_found: instance_ids.len(),
        outcomes,
    })
}

/// Create and tag one backup image.
///
/// Two requests back to back: CreateImage, then CreateTags on the new image.
/// A tagging failure leaves an image without the marker tag; it will never
/// be seen by a cleanup pass again.
async fn backup_instance<E: Ec2Operations>(
    ec2: &E,
    tags: &TagConfig,
    instance_id: &str,
) -> InstanceBackup {
    let name = format!(
        "ami-warden-{}-{}",
        instance_id,
        format_image_timestamp(Utc::now())
    );
    let description = format!("Scheduled backup of {instance_id}");

    let image_id = match ec2.create_image(instance_id, &name, &description, true).await {
        Ok(image_id) => image_id,
        Err(e) => {
            warn!(instance_id = %instance_id, error = ?e, "Failed to create image");
            return InstanceBackup {
                instance_id: instance_id.to_string(),
                outcome: BackupOutcome::CreationFailed {
                    error: format!("{e:#}"),
                },
            };
        }
    };

    let image_tags = vec![
        (
            "Name".to_string(),
            format!("ami-warden backup of {instance_id}"),
        ),
        (tags.marker_key.clone(), TAG_MANAGED_VALUE.to_string()),
        (tags.owner_key.clone(), instance_id.to_string()),
    ];

    match ec2.create_tags(&image_id, image_tags).await {
        Ok(()) => {
            info!(instance_id = %instance_id, image_id = %image_id, "Created and tagged backup image");
            InstanceBackup {
                instance_id: instance_id.to_string(),
                outcome: BackupOutcome::Tagged { image_id },
            }
        }
        Err(e) => {
            warn!(
                instance_id = %instance_id,
                image_id = %image_id,
                error = ?e,
                "Failed to tag image, it is now invisible to retention passes"
            );
            InstanceBackup {
                instance_id: instance_id.to_string(),
                outcome: BackupOutcome::TaggingFailed {
                    image_id,
                    error: format!("{e:#}"),
                },
            }
        }
    }
}
