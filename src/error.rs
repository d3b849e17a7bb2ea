use std::fmt;
use thiserror::Error;

/// Stage of a multipart upload, used to report where it broke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartStage {
    Create,
    UploadPart(i32),
    Complete,
}

impl fmt::Display for MultipartStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::UploadPart(n) => write!(f, "part {}", n),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Errors that can occur while deploying sites
#[derive(Error, Debug)]
pub enum DeployError {
    /// Site root directory does not exist
    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: String },

    /// Site root exists but cannot be enumerated
    #[error("Failed to enumerate directory {path}: {message}")]
    EnumeratorCreation { path: String, message: String },

    /// Exclude pattern could not be compiled
    #[error("Invalid exclude pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Requested sites are not in the registry
    #[error("Unknown site(s): {}", .0.join(", "))]
    InvalidSites(Vec<String>),

    /// Requested sites appear more than once
    #[error("Duplicate site(s): {}", .0.join(", "))]
    DuplicateSites(Vec<String>),

    /// Invalid or missing configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Site registry could not be loaded
    #[error("Registry error: {0}")]
    Registry(String),

    /// Network-related error
    #[error("Network error: {message}")]
    Network { message: String },

    /// S3 access denied
    #[error("S3 access denied for bucket '{bucket}': {message}")]
    S3AccessDenied { bucket: String, message: String },

    /// An operation kept failing after every retry
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<DeployError>,
    },

    /// A multipart upload stage failed
    #[error("Multipart upload of '{key}' failed at {stage}: {source}")]
    Multipart {
        key: String,
        stage: MultipartStage,
        #[source]
        source: Box<DeployError>,
    },

    /// Upload was cancelled before it finished
    #[error("Upload cancelled")]
    Cancelled,

    /// Site task panicked
    #[error("Site task aborted: {0}")]
    TaskAborted(String),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// Classify an AWS SDK error, recognizing access-denied responses
    pub fn from_aws_error<E: fmt::Display>(bucket: &str, error: E) -> Self {
        let error_str = error.to_string();
        let lower = error_str.to_lowercase();
        if lower.contains("access denied") || lower.contains("forbidden") {
            Self::S3AccessDenied {
                bucket: bucket.to_string(),
                message: error_str,
            }
        } else {
            Self::Network { message: error_str }
        }
    }

    /// Whether the retry helper should try the operation again
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Cancelled
                | Self::InvalidSites(_)
                | Self::DuplicateSites(_)
                | Self::InvalidPattern { .. }
                | Self::Config(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::DirectoryNotFound { path } => {
                format!(
                    "Directory not found: {}\n\nPossible solutions:\n  \
                     1. Build the site before deploying\n  \
                     2. Check the `directory` entry in sites.yaml",
                    path
                )
            }
            Self::InvalidSites(names) => {
                format!(
                    "Unknown site(s): {}\n\nPossible solutions:\n  \
                     1. Check the spelling of --sites\n  \
                     2. Add the site to sites.yaml",
                    names.join(", ")
                )
            }
            Self::S3AccessDenied { bucket, message } => {
                format!(
                    "Access denied for bucket '{}': {}\n\nPossible solutions:\n  \
                     1. Check your AWS credentials: aws sts get-caller-identity\n  \
                     2. Verify bucket permissions for your IAM user/role\n  \
                     3. Pass the right profile with --profile or AWS_PROFILE",
                    bucket, message
                )
            }
            Self::Network { message } => {
                format!(
                    "Network error: {}\n\nPossible solutions:\n  \
                     1. Check your internet connection\n  \
                     2. Verify AWS region is correct\n  \
                     3. Try again with --max-concurrent 1",
                    message
                )
            }
            Self::RetriesExhausted { source, .. } | Self::Multipart { source, .. } => {
                format!("{}\n\n{}", self, source.user_message())
            }
            _ => self.to_string(),
        }
    }
}

/// Result type for deployment operations
pub type Result<T> = std::result::Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_aws_error_access_denied() {
        let err = DeployError::from_aws_error("site-bucket", "AccessDenied: Access Denied");
        assert!(matches!(err, DeployError::S3AccessDenied { .. }));

        let err = DeployError::from_aws_error("site-bucket", "dispatch failure: timeout");
        assert!(matches!(err, DeployError::Network { .. }));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(DeployError::Network {
            message: "reset".into()
        }
        .is_retryable());
        assert!(!DeployError::Cancelled.is_retryable());
        assert!(!DeployError::InvalidSites(vec!["docs".into()]).is_retryable());
    }

    #[test]
    fn test_site_list_display() {
        let err = DeployError::DuplicateSites(vec!["blog".into(), "docs".into()]);
        assert_eq!(err.to_string(), "Duplicate site(s): blog, docs");
    }

    #[test]
    fn test_user_message_nested() {
        let err = DeployError::RetriesExhausted {
            operation: "PUT docs/index.html".into(),
            attempts: 4,
            source: Box::new(DeployError::Network {
                message: "connection reset".into(),
            }),
        };
        let message = err.user_message();
        assert!(message.contains("failed after 4 attempt(s)"));
        assert!(message.contains("Check your internet connection"));
    }
}
