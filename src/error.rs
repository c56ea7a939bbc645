use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("AWS CLI error: {0}")]
    AwsCli(String),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid ARN: {0}")]
    InvalidArn(String),
    #[error("Profile error: {0}")]
    Profile(String),
    #[error("Stack {stack} failed to delete: {reason}")]
    StackDeleteFailed { stack: String, reason: String },
    #[error("Timed out after {secs}s waiting for stack {stack} to delete")]
    DeleteTimeout { stack: String, secs: u64 },
    #[error("Interrupted")]
    Interrupted,
    #[error("Aborted: {0}")]
    Aborted(String),
    #[error("CDK error: {0}")]
    Cdk(String),
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// True when the aws binary reported that the stack is not there.
    pub fn is_stack_missing(&self) -> bool {
        matches!(self, Self::AwsCli(msg) if msg.contains("does not exist"))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
