use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Schema has no columns")]
    EmptySchema,

    #[error("Duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("Invalid table capacity: {0} (must be positive)")]
    InvalidCapacity(usize),

    #[error("Row does not match schema for table '{table}': {reason}")]
    SchemaMismatch { table: String, reason: String },

    #[error("A table named '{0}' is already hosted")]
    DuplicateName(String),

    #[error("No table named '{0}' is hosted")]
    NoSuchTable(String),

    #[error("Loop dispatcher has already been configured")]
    DispatcherAlreadySet,

    #[error("Loop dispatcher has not been configured")]
    DispatcherNotSet,

    #[error("Cross-thread call did not complete within {0:?}")]
    DispatchTimeout(std::time::Duration),

    #[error("Worker loop has shut down")]
    LoopClosed,

    #[error("Source dataset is empty")]
    EmptySource,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse source dataset: {0}")]
    SourceParse(String),

    #[error("Source dataset error: {0}")]
    SourceCsv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, TableError>;
