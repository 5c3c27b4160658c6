//! ami-warden: scheduled AMI backups with tag-driven retention for EC2
//!
//! Each invocation runs up to two independent passes over the same tag
//! namespace:
//!
//! - a **backup pass** that creates and tags a no-reboot AMI for every
//!   instance carrying the opt-in tag
//! - a **cleanup pass** that groups managed AMIs by source instance, keeps
//!   the N newest per group, and deregisters the rest, cascading to their
//!   EBS snapshots
//!
//! All state is rebuilt from resource tags at the start of each run; there
//! is no database. Failures are isolated per resource and surface in a run
//! report; re-running on the next schedule tick is the only retry mechanism.

pub mod aws;
pub mod backup;
pub mod cleanup;
pub mod config;
pub mod report;
pub mod retention;
