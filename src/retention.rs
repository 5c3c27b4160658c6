//! Retention grouping and overflow selection
//!
//! Pure functions over discovered backup images. All state is rebuilt from
//! tags on every run; nothing here persists between invocations.

use crate::aws::BackupImage;
use tracing::debug;

/// Images partitioned by owning instance
#[derive(Debug, Default)]
pub struct GroupedImages {
    /// Instance id to that instance's images, in first-seen instance order
    pub groups: Vec<(String, Vec<BackupImage>)>,
    /// Images lacking the owner tag. They take no part in retention
    /// accounting and are never selected for deletion.
    pub untracked: Vec<BackupImage>,
}

/// Partition images by the owning-instance id carried in `owner_tag_key`.
///
/// Group order follows the first appearance of each instance id in the
/// input, which keeps logs stable across runs against an unchanged fleet.
pub fn group_by_instance(images: Vec<BackupImage>, owner_tag_key: &str) -> GroupedImages {
    let mut grouped = GroupedImages::default();

    for image in images {
        let Some(instance_id) = image.source_instance(owner_tag_key).map(str::to_string) else {
            debug!(image_id = %image.image_id, "Image has no owner tag, excluded from retention");
            grouped.untracked.push(image);
            continue;
        };

        match grouped
            .groups
            .iter_mut()
            .find(|(id, _)| *id == instance_id)
        {
            Some((_, group)) => group.push(image),
            None => grouped.groups.push((instance_id, vec![image])),
        }
    }

    grouped
}

/// Split one group into (retained, expired) under the retention policy.
///
/// Images are ordered newest-first by creation timestamp; every image at
/// index >= `retain_count` is expired. Equal timestamps break by image id
/// descending, a stable rule independent of provider return order.
pub fn select_overflow(
    mut images: Vec<BackupImage>,
    retain_count: usize,
) -> (Vec<BackupImage>, Vec<BackupImage>) {
    images.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.image_id.cmp(&a.image_id))
    });

    if images.len() <= retain_count {
        return (images, Vec::new());
    }

    let expired = images.split_off(retain_count);
    (images, expired)
}
