//! AWS resource tag constants for ami-warden
//!
//! Managed backup images are tagged with these standard tags to enable
//! discovery, retention accounting, and cleanup without any local state.
//!
//! ## Tag Schema
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `ami-warden:managed` | Marker identifying images created by this tool ("true") |
//! | `ami-warden:source-instance` | Instance id the image was created from |
//! | `Name` | Human-readable backup name |
//!
//! Instances opt into backups with a separate tag (default `Backup=Yes`);
//! all keys are overridable from the CLI.

use std::collections::HashMap;

/// Tag key marking an image as managed by this tool
pub const TAG_MANAGED: &str = "ami-warden:managed";

/// Fixed sentinel value of the managed marker tag
pub const TAG_MANAGED_VALUE: &str = "true";

/// Tag key storing the owning instance id on a managed image
pub const TAG_SOURCE_INSTANCE: &str = "ami-warden:source-instance";

/// Default tag key that opts an instance into scheduled backups
pub const DEFAULT_OPT_IN_KEY: &str = "Backup";

/// Default required value of the opt-in tag
pub const DEFAULT_OPT_IN_VALUE: &str = "Yes";

/// Helper to format a UTC timestamp for image names
pub fn format_image_timestamp(time: chrono::DateTime<chrono::Utc>) -> String {
    time.format("%Y%m%d-%H%M%S").to_string()
}

/// Helper to parse an AMI CreationDate (RFC 3339) into a UTC timestamp
pub fn parse_creation_date(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

/// Extract EC2 tags into a key/value map, skipping tags with missing fields.
pub fn extract_ec2_tags(tags: &[aws_sdk_ec2::types::Tag]) -> HashMap<String, String> {
    tags.iter()
        .filter_map(|t| match (t.key(), t.value()) {
            (Some(k), Some(v)) => Some((k.to_string(), v.to_string())),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::types::Tag;

    #[test]
    fn parse_aws_creation_date_formats() {
        // EC2 returns millisecond-precision RFC 3339 with a Z suffix
        let dt = parse_creation_date("2024-03-01T12:30:45.000Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-01T12:30:45+00:00");

        // Offset form is equally valid RFC 3339
        assert!(parse_creation_date("2024-03-01T12:30:45+02:00").is_some());

        assert!(parse_creation_date("yesterday").is_none());
        assert!(parse_creation_date("").is_none());
    }

    #[test]
    fn extract_skips_incomplete_tags() {
        let tags = vec![
            Tag::builder().key("a").value("1").build(),
            Tag::builder().key("no-value").build(),
            Tag::builder().value("no-key").build(),
        ];
        let map = extract_ec2_tags(&tags);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("a").map(String::as_str), Some("1"));
    }
}
