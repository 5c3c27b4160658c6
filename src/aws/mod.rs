//! AWS client modules
//!
//! This module provides wrappers around AWS SDK clients for:
//! - EC2: image and snapshot lifecycle, tag-filtered discovery
//! - STS: account ID lookup and credential validation

pub mod account;
pub mod context;
pub mod ec2;
pub mod error;
pub mod tags;

// Core clients
pub use account::{get_current_account_id, AccountId};
pub use context::AwsContext;
pub use ec2::{BackupImage, Ec2Client, Ec2Operations};

// Error handling
pub use error::{classify_anyhow_error, classify_aws_error, AwsError};
