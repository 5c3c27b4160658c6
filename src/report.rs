//! Per-resource outcomes and aggregated pass reports
//!
//! Every failure is captured at the smallest granularity (one instance, one
//! image, one snapshot) as a value here; nothing aborts the surrounding pass.

use chrono::{DateTime, Utc};

/// Outcome of the backup attempt for one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// Image created and fully tagged
    Tagged { image_id: String },
    /// CreateImage failed; nothing was created for this instance
    CreationFailed { error: String },
    /// Image created but tagging failed. The image has no marker tag and is
    /// invisible to future retention passes.
    TaggingFailed { image_id: String, error: String },
}

/// Backup-pass record for one instance
#[derive(Debug, Clone)]
pub struct InstanceBackup {
    pub instance_id: String,
    pub outcome: BackupOutcome,
}

/// Aggregated result of one backup pass
#[derive(Debug, Default)]
pub struct BackupReport {
    pub instances_found: usize,
    pub outcomes: Vec<InstanceBackup>,
}

impl BackupReport {
    pub fn tagged(&self) -> usize {
        self.count(|o| matches!(o, BackupOutcome::Tagged { .. }))
    }

    pub fn creation_failures(&self) -> usize {
        self.count(|o| matches!(o, BackupOutcome::CreationFailed { .. }))
    }

    pub fn tagging_failures(&self) -> usize {
        self.count(|o| matches!(o, BackupOutcome::TaggingFailed { .. }))
    }

    fn count(&self, pred: impl Fn(&BackupOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }
}

/// Outcome of the cleanup attempt for one expired image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Image deregistered; snapshot counters cover its device mappings
    Deregistered {
        snapshots_deleted: usize,
        snapshots_failed: usize,
    },
    /// Deregister failed; the image and all its snapshots were left intact
    DeregisterFailed { error: String },
    /// Dry-run mode; nothing was touched
    SkippedDryRun,
}

/// Cleanup-pass record for one expired image
#[derive(Debug, Clone)]
pub struct ImageCleanup {
    pub instance_id: String,
    pub image_id: String,
    pub created_at: DateTime<Utc>,
    pub outcome: CleanupOutcome,
}

/// Aggregated result of one cleanup pass
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Managed images discovered via the marker tag
    pub images_found: usize,
    /// Images excluded from retention accounting (missing owner tag)
    pub untracked: usize,
    /// Retention groups (distinct source instances)
    pub groups: usize,
    /// Images within their group's retention window
    pub retained: usize,
    pub outcomes: Vec<ImageCleanup>,
}

impl CleanupReport {
    pub fn deregistered(&self) -> usize {
        self.count(|o| matches!(o, CleanupOutcome::Deregistered { .. }))
    }

    pub fn deregister_failures(&self) -> usize {
        self.count(|o| matches!(o, CleanupOutcome::DeregisterFailed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, CleanupOutcome::SkippedDryRun))
    }

    pub fn snapshots_deleted(&self) -> usize {
        self.sum_snapshots(|deleted, _| deleted)
    }

    pub fn snapshots_failed(&self) -> usize {
        self.sum_snapshots(|_, failed| failed)
    }

    fn count(&self, pred: impl Fn(&CleanupOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }

    fn sum_snapshots(&self, pick: impl Fn(usize, usize) -> usize) -> usize {
        self.outcomes
            .iter()
            .filter_map(|o| match o.outcome {
                CleanupOutcome::Deregistered {
                    snapshots_deleted,
                    snapshots_failed,
                } => Some(pick(snapshots_deleted, snapshots_failed)),
                _ => None,
            })
            .sum()
    }
}
