use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid event request: {0}")]
    InvalidRequest(String),

    #[error("Device assignment not found: {0}")]
    AssignmentNotFound(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid search criteria: {0}")]
    InvalidCriteria(String),

    #[error("Channel unavailable for tenant {0}")]
    ChannelUnavailable(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Storage failure: {0}")]
    StorageFailure(String),

    #[error("Transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

pub type DomainResult<T> = Result<T, DomainError>;
