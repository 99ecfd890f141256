use authz::PersistenceError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// A domain-level failure raised while serving a repository call.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl From<DatabaseError> for PersistenceError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Persistence(inner) => inner,
            DatabaseError::Serialization(e) => PersistenceError::Serialization(e),
            DatabaseError::Connection(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                PersistenceError::duplicate("row", db.message().to_string())
            }
            other => PersistenceError::Storage(other.to_string()),
        }
    }
}
