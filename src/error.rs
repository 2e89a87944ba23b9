use thiserror::Error;

/// Every error the engine can surface, matching the kinds called out in the
/// design doc's error handling section.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("failed to fetch metadata for {schema}.{table}: {source}")]
    MetadataFetchFailed {
        schema: String,
        table: String,
        #[source]
        source: Box<TransferError>,
    },

    #[error("failed to compile rule for {schema}.{table}: {source}")]
    RuleCompileFailed {
        schema: String,
        table: String,
        source: String,
    },

    #[error("destination unavailable: {0}")]
    DestinationUnavailable(String),

    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("failed to persist position: {0}")]
    PositionPersistFailed(String),

    #[error("mysql error: {0}")]
    Mysql(#[from] mysql_async::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TransferError>;
