use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Envelope decode error: {0}")]
    EnvelopeDecode(String),

    #[error("Publish to {0} failed: {1}")]
    PublishFailed(String, String),

    #[error("Stage {0} failed: {1}")]
    StageFailed(String, String),

    #[error("Processed check failed: {0}")]
    ProcessedCheckFailed(String),

    #[error("Log sink failed: {0}")]
    LogSinkFailed(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}
