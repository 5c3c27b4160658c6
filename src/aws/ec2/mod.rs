//! EC2 image and snapshot management

mod operations;
mod types;

pub use operations::Ec2Operations;
pub use types::BackupImage;

#[cfg(test)]
pub use operations::MockEc2Operations;

use crate::aws::context::AwsContext;
use crate::aws::tags::{extract_ec2_tags, parse_creation_date};
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{Filter, Tag};
use aws_sdk_ec2::Client;
use chrono::Utc;
use tracing::{debug, info};

/// EC2 client for managing backup images and their snapshots
pub struct Ec2Client {
    client: Client,
}

impl Ec2Client {
    /// Create a new EC2 client (loads AWS config from environment)
    pub async fn new(region: &str) -> Result<Self> {
        let ctx = AwsContext::new(region).await;
        Ok(Self::from_context(&ctx))
    }

    /// Create an EC2 client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.ec2_client(),
        }
    }

    /// List ids of instances carrying the given tag key/value.
    ///
    /// Paginates through all reservations. Instances are matched in any
    /// state; an opted-in stopped instance still gets backed up.
    pub async fn instances_with_tag(&self, tag_key: &str, tag_value: &str) -> Result<Vec<String>> {
        let mut instance_ids = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut request = self.client.describe_instances().filters(
                Filter::builder()
                    .name(format!("tag:{tag_key}"))
                    .values(tag_value)
                    .build(),
            );
            if let Some(token) = &next_token {
                request = request.next_token(token);
            }

            let response = request
                .send()
                .await
                .context("Failed to describe instances")?;

            for reservation in response.reservations() {
                for instance in reservation.instances() {
                    if let Some(instance_id) = instance.instance_id() {
                        instance_ids.push(instance_id.to_string());
                    }
                }
            }

            match response.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        debug!(count = instance_ids.len(), tag_key, "Found tagged instances");
        Ok(instance_ids)
    }

    /// List this account's images carrying the given tag key/value.
    ///
    /// Tags and device-mapping snapshot ids are captured here since they are
    /// unavailable once an image is deregistered.
    pub async fn images_with_tag(&self, tag_key: &str, tag_value: &str) -> Result<Vec<BackupImage>> {
        let mut images = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut request = self.client.describe_images().owners("self").filters(
                Filter::builder()
                    .name(format!("tag:{tag_key}"))
                    .values(tag_value)
                    .build(),
            );
            if let Some(token) = &next_token {
                request = request.next_token(token);
            }

            let response = request.send().await.context("Failed to describe images")?;

            for image in response.images() {
                let Some(image_id) = image.image_id() else {
                    continue;
                };

                let created_at = image
                    .creation_date()
                    .and_then(parse_creation_date)
                    .unwrap_or_else(Utc::now);

                let snapshot_ids = image
                    .block_device_mappings()
                    .iter()
                    .filter_map(|mapping| mapping.ebs())
                    .filter_map(|ebs| ebs.snapshot_id())
                    .map(|id| id.to_string())
                    .collect();

                images.push(BackupImage {
                    image_id: image_id.to_string(),
                    created_at,
                    tags: extract_ec2_tags(image.tags()),
                    snapshot_ids,
                });
            }

            match response.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        debug!(count = images.len(), tag_key, "Found tagged images");
        Ok(images)
    }

    /// Request a new image of an instance.
    ///
    /// `no_reboot` must stay true for scheduled backups so running workloads
    /// are never disrupted.
    pub async fn create_image(
        &self,
        instance_id: &str,
        name: &str,
        description: &str,
        no_reboot: bool,
    ) -> Result<String> {
        let response = self
            .client
            .create_image()
            .instance_id(instance_id)
            .name(name)
            .description(description)
            .no_reboot(no_reboot)
            .send()
            .await
            .context("Failed to create image")?;

        let image_id = response
            .image_id()
            .context("No image ID in CreateImage response")?;

        info!(instance_id = %instance_id, image_id = %image_id, "Image creation requested");

        Ok(image_id.to_string())
    }

    /// Apply tags to a resource.
    pub async fn create_tags(&self, resource_id: &str, tags: Vec<(String, String)>) -> Result<()> {
        let mut request = self.client.create_tags().resources(resource_id);
        for (key, value) in &tags {
            request = request.tags(Tag::builder().key(key).value(value).build());
        }

        request.send().await.context("Failed to create tags")?;

        debug!(resource_id = %resource_id, count = tags.len(), "Tagged resource");
        Ok(())
    }

    /// Deregister an image. Its snapshots are left intact.
    pub async fn deregister_image(&self, image_id: &str) -> Result<()> {
        self.client
            .deregister_image()
            .image_id(image_id)
            .send()
            .await
            .context("Failed to deregister image")?;

        info!(image_id = %image_id, "Image deregistered");
        Ok(())
    }

    /// Delete an EBS snapshot.
    pub async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.client
            .delete_snapshot()
            .snapshot_id(snapshot_id)
            .send()
            .await
            .context("Failed to delete snapshot")?;

        info!(snapshot_id = %snapshot_id, "Snapshot deleted");
        Ok(())
    }
}
