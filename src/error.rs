use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("missing configuration variable {0}")]
    Config(String),

    #[error("failed to get {url}: {reason}")]
    Retrieval { url: String, reason: String },

    #[error("{what}, line {line}: {reason}")]
    Parse {
        what: String,
        line: u64,
        reason: String,
    },

    #[error("could not connect to database {path}: {err}")]
    DatabaseConnection {
        path: String,
        #[source]
        err: duckdb::Error,
    },

    #[error("database write failed: {0}")]
    DatabaseWrite(#[from] duckdb::Error),

    #[error("notification failed after {attempts} attempt(s): {reason}")]
    Notification { attempts: u32, reason: String },
}

impl EtlError {
    /// True for failures of the extract/transform stage.
    pub fn is_extract(&self) -> bool {
        matches!(self, EtlError::Retrieval { .. } | EtlError::Parse { .. })
    }
}
