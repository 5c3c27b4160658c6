//! EC2 operations trait for testing

use super::types::BackupImage;
use anyhow::Result;

/// Trait for EC2 operations that can be mocked in tests.
///
/// This trait abstracts the EC2 client operations to enable unit testing
/// of the backup and cleanup passes without hitting real AWS.
///
/// Note: tag lists use owned `Vec<(String, String)>` to work around mockall
/// lifetime limitations.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on trait are sufficient
#[cfg_attr(test, mockall::automock)]
pub trait Ec2Operations: Send + Sync {
    /// List ids of instances carrying the given tag key/value
    async fn instances_with_tag(&self, tag_key: &str, tag_value: &str) -> Result<Vec<String>>;

    /// List images carrying the given tag key/value, with tags and
    /// device-mapping snapshot ids populated
    async fn images_with_tag(&self, tag_key: &str, tag_value: &str) -> Result<Vec<BackupImage>>;

    /// Request a new image of an instance; returns the new image id
    async fn create_image(
        &self,
        instance_id: &str,
        name: &str,
        description: &str,
        no_reboot: bool,
    ) -> Result<String>;

    /// Apply tags to a resource
    async fn create_tags(&self, resource_id: &str, tags: Vec<(String, String)>) -> Result<()>;

    /// Deregister an image
    async fn deregister_image(&self, image_id: &str) -> Result<()>;

    /// Delete an EBS snapshot
    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()>;
}

impl Ec2Operations for super::Ec2Client {
    async fn instances_with_tag(&self, tag_key: &str, tag_value: &str) -> Result<Vec<String>> {
        super::Ec2Client::instances_with_tag(self, tag_key, tag_value).await
    }

    async fn images_with_tag(&self, tag_key: &str, tag_value: &str) -> Result<Vec<BackupImage>> {
        super::Ec2Client::images_with_tag(self, tag_key, tag_value).await
    }

    async fn create_image(
        &self,
        instance_id: &str,
        name: &str,
        description: &str,
        no_reboot: bool,
    ) -> Result<String> {
        super::Ec2Client::create_image(self, instance_id, name, description, no_reboot).await
    }

    async fn create_tags(&self, resource_id: &str, tags: Vec<(String, String)>) -> Result<()> {
        super::Ec2Client::create_tags(self, resource_id, tags).await
    }

    async fn deregister_image(&self, image_id: &str) -> Result<()> {
        super::Ec2Client::deregister_image(self, image_id).await
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        super::Ec2Client::delete_snapshot(self, snapshot_id).await
    }
}
