use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Corrupt column {column}: {message}")]
    CorruptColumn { column: String, message: String },
}

pub type Result<T> = std::result::Result<T, LibraryError>;
