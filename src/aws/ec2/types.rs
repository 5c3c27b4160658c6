//! EC2 domain types for backup images

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// A managed backup image discovered from EC2.
///
/// Device-mapping snapshot ids are captured at discovery time since they are
/// unavailable once the image is deregistered.
#[derive(Debug, Clone)]
pub struct BackupImage {
    /// AMI id
    pub image_id: String,
    /// Parsed `CreationDate`; unparsable dates fall back to "now" so an
    /// image of unknown age is treated as fresh and never selected for
    /// deletion by mistake
    pub created_at: DateTime<Utc>,
    /// All tags on the image
    pub tags: HashMap<String, String>,
    /// EBS snapshot ids referenced by the image's device mappings
    pub snapshot_ids: Vec<String>,
}

impl BackupImage {
    /// Look up the owning instance id from the configured owner tag.
    pub fn source_instance(&self, owner_tag_key: &str) -> Option<&str> {
        self.tags.get(owner_tag_key).map(String::as_str)
    }
}
