use thiserror::Error;

/// Application-specific errors for the CLI
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Missing required argument: {arg}")]
    MissingArgument { arg: String },

    #[error("Invalid post window: {value}. Expected YYYY-MM-DD_YYYY-MM-DD")]
    InvalidPostWindow { value: String },

    #[error("{count} admin units failed: {units}")]
    UnitsFailed { count: usize, units: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pipeline(#[from] dmgmap::Error),
}
