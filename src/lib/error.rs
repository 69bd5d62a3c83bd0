use mysql_async::Error as MySQLError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    MySQLError(#[from] MySQLError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Cannot coerce {value:?} as {target} in {column} column")]
    Coercion {
        column: String,
        value: String,
        target: &'static str,
    },
    #[error("Malformed document: {0}")]
    MalformedDocument(String),
    #[error("Schema for {0}.{1} is not available")]
    SchemaNotFound(String, String),
    #[error("Binary log position is not available on the source server")]
    BinlogPositionMissing,
    #[error("Database {db} is not parsed yet, missing: {missing}")]
    DatabaseNotParsed { db: String, missing: &'static str },
    #[error("Tables are not loaded yet: {0:?}")]
    TablesNotLoaded(Vec<String>),
    #[error("Store failure: {0}")]
    Store(String),
    #[error("Dump failure: {0}")]
    Dump(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// What a worker does when an operation fails with a given error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Record-level failure, logged and the record is skipped.
    SkipAndLog,
    /// Connection or protocol failure, worker stops and returns the error.
    AbortWorker,
    /// Resumability is broken or the process is misconfigured.
    AbortProcess,
}

impl Error {
    pub fn policy(&self) -> ErrorPolicy {
        match self {
            Self::Coercion { .. } | Self::MalformedDocument(_) | Self::SchemaNotFound(..) => {
                ErrorPolicy::SkipAndLog
            }
            Self::MySQLError(_) | Self::BinlogPositionMissing | Self::Dump(_) => {
                ErrorPolicy::AbortWorker
            }
            Self::Io(_)
            | Self::Json(_)
            | Self::Store(_)
            | Self::DatabaseNotParsed { .. }
            | Self::TablesNotLoaded(_)
            | Self::Configuration(_) => ErrorPolicy::AbortProcess,
        }
    }

    pub fn is_record_error(&self) -> bool {
        self.policy() == ErrorPolicy::SkipAndLog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_errors_are_skipped() {
        let error = Error::Coercion {
            column: "id".into(),
            value: "abc".into(),
            target: "int",
        };

        assert_eq!(error.policy(), ErrorPolicy::SkipAndLog);
        assert!(error.is_record_error());
    }

    #[test]
    fn persistence_errors_abort_process() {
        assert_eq!(
            Error::Store("queue unavailable".into()).policy(),
            ErrorPolicy::AbortProcess
        );
    }

    #[test]
    fn source_errors_abort_worker() {
        assert_eq!(
            Error::BinlogPositionMissing.policy(),
            ErrorPolicy::AbortWorker
        );
    }

    #[test]
    fn formats_coercion_error_with_column_context() {
        let error = Error::Coercion {
            column: "created_at".into(),
            value: "yesterday".into(),
            target: "datetime",
        };

        assert_eq!(
            error.to_string(),
            "Cannot coerce \"yesterday\" as datetime in created_at column"
        );
    }
}
