//! AWS error classification and handling
//!
//! Provides typed errors for AWS SDK operations using the `.code()` method
//! instead of string matching on Debug format.

use thiserror::Error;

/// AWS error categories for cleanup and reporting logic
#[derive(Debug, Error)]
pub enum AwsError {
    /// Resource was not found (safe to treat as already deleted in cleanup)
    #[error("Resource not found: {resource_type} '{resource_id}'")]
    NotFound {
        resource_type: &'static str,
        resource_id: String,
    },

    /// Rate limit exceeded; the next scheduled run will retry the work
    #[error("Rate limit exceeded")]
    Throttled,

    /// The provider rejected the request parameters (e.g. a bad filter)
    #[error("Request rejected: {message}")]
    Rejected { message: String },

    /// Generic AWS SDK error with code and message
    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    /// Check if this is a rate-limit error
    pub fn is_throttled(&self) -> bool {
        matches!(self, AwsError::Throttled)
    }

    /// Check if the provider rejected the request parameters
    pub fn is_rejected(&self) -> bool {
        matches!(self, AwsError::Rejected { .. })
    }
}

/// Known EC2 error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &[
    "InvalidAMIID.NotFound",
    "InvalidAMIID.Unavailable",
    "InvalidSnapshot.NotFound",
    "InvalidInstanceID.NotFound",
];

/// Known AWS error codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException", "RequestLimitExceeded"];

/// Known AWS error codes for rejected request parameters
const REJECTED_CODES: &[&str] = &[
    "InvalidParameterValue",
    "InvalidParameterCombination",
    "InvalidFilter",
];

/// Classify an AWS SDK error using the error code.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound {
            resource_type: "resource",
            resource_id: message.clone(),
        },
        Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled,
        Some(c) if REJECTED_CODES.contains(&c) => AwsError::Rejected { message },
        _ => AwsError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// Classify an error from an anyhow::Error by extracting the AWS error code.
///
/// Walks the error chain using `ProvideErrorMetadata` to extract `.code()` and
/// `.message()` from any EC2 SDK error. Falls back to string matching on the
/// Debug representation if no typed error is found.
pub fn classify_anyhow_error(error: &anyhow::Error) -> AwsError {
    use aws_sdk_ec2::error::ProvideErrorMetadata;

    macro_rules! try_classify {
        ($cause:expr, $op:ty) => {
            if let Some(e) = $cause.downcast_ref::<aws_sdk_ec2::error::SdkError<$op>>() {
                let meta = ProvideErrorMetadata::meta(e);
                return classify_aws_error(meta.code(), meta.message());
            }
        };
    }

    for cause in error.chain() {
        try_classify!(
            cause,
            aws_sdk_ec2::operation::describe_instances::DescribeInstancesError
        );
        try_classify!(
            cause,
            aws_sdk_ec2::operation::describe_images::DescribeImagesError
        );
        try_classify!(cause, aws_sdk_ec2::operation::create_image::CreateImageError);
        try_classify!(cause, aws_sdk_ec2::operation::create_tags::CreateTagsError);
        try_classify!(
            cause,
            aws_sdk_ec2::operation::deregister_image::DeregisterImageError
        );
        try_classify!(
            cause,
            aws_sdk_ec2::operation::delete_snapshot::DeleteSnapshotError
        );
    }

    // Fallback: extract error code from debug string representation
    let debug_str = format!("{:?}", error);
    if let Some(code) = extract_error_code(&debug_str) {
        return classify_aws_error(Some(&code), Some(&debug_str));
    }

    AwsError::Sdk {
        code: None,
        message: error.to_string(),
    }
}

/// All known AWS error codes for extraction from debug strings (flat list)
const ALL_KNOWN_CODES: &[&str] = &[
    // Not found
    "InvalidAMIID.NotFound",
    "InvalidAMIID.Unavailable",
    "InvalidSnapshot.NotFound",
    "InvalidInstanceID.NotFound",
    // Throttling
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    // Rejected parameters
    "InvalidParameterValue",
    "InvalidParameterCombination",
    "InvalidFilter",
    // Image lifecycle
    "InvalidAMIName.Duplicate",
    "InvalidAMIName.Malformed",
    "ResourceCountExceeded",
    "SnapshotCreationPerVolumeRateExceeded",
];

/// Extract an AWS error code from a debug string representation
fn extract_error_code(debug_str: &str) -> Option<String> {
    for code in ALL_KNOWN_CODES {
        if debug_str.contains(code) {
            return Some((*code).to_string());
        }
    }

    // Try to extract any code from `code: Some("...")` pattern
    if let Some(start) = debug_str.find("code: Some(\"") {
        let rest = &debug_str[start + 12..];
        if let Some(end) = rest.find('"') {
            return Some(rest[..end].to_string());
        }
    }

    None
}
