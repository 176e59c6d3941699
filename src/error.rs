//! Error taxonomy shared across the pipeline.
//!
//! Components translate their failures into these types at the boundary:
//! transient errors are retried with bounded backoff, permanent errors are
//! skipped or surfaced as a tick outcome, and nothing here ever exits the
//! process.

use sea_orm::DbErr;
use std::time::Duration;

/// Boxed error used at job spawn boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures from the upstream market-data provider.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Status {
        status: u16,
        body: String,
        /// Parsed Retry-After header, when the upstream sent one.
        retry_after_secs: Option<u64>,
    },

    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("page {page} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        page: u32,
        attempts: u32,
        last_error: String,
    },
}

impl FetchError {
    /// Whether another attempt may succeed. 429 and 5xx are retryable,
    /// other 4xx and parse failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(e) => !e.is_decode() && !e.is_builder(),
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Payload(_) => false,
            FetchError::RetriesExhausted { .. } => false,
        }
    }
}

/// Failures from the snapshot/indicator store gateway.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("transient database error: {0}")]
    Transient(#[source] DbErr),

    #[error("permanent database error: {0}")]
    Permanent(#[source] DbErr),

    #[error("statement timed out after {0:?}")]
    StatementTimeout(Duration),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Transient(_) | StoreError::StatementTimeout(_)
        )
    }

    /// Map a raw `DbErr` into the taxonomy. Connectivity and lock problems
    /// are transient; constraint violations and SQL errors are permanent.
    pub fn classify(err: DbErr) -> Self {
        match &err {
            DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => StoreError::Transient(err),
            DbErr::Exec(_) | DbErr::Query(_) => {
                let msg = err.to_string().to_ascii_lowercase();
                let transient = [
                    "timeout",
                    "timed out",
                    "deadlock",
                    "connection",
                    "too many clients",
                    "terminating",
                    "broken pipe",
                ]
                .iter()
                .any(|m| msg.contains(m));
                if transient {
                    StoreError::Transient(err)
                } else {
                    StoreError::Permanent(err)
                }
            }
            _ => StoreError::Permanent(err),
        }
    }
}

/// Startup-only configuration failures. These are the one fatal class:
/// `main` logs them and exits non-zero.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration key {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let too_many = FetchError::Status {
            status: 429,
            body: String::new(),
            retry_after_secs: Some(10),
        };
        assert!(too_many.is_transient());

        let server = FetchError::Status {
            status: 503,
            body: String::new(),
            retry_after_secs: None,
        };
        assert!(server.is_transient());

        let not_found = FetchError::Status {
            status: 404,
            body: String::new(),
            retry_after_secs: None,
        };
        assert!(!not_found.is_transient());

        assert!(!FetchError::Payload("bad json".into()).is_transient());
    }

    #[test]
    fn db_classification() {
        let conn = DbErr::Conn(sea_orm::RuntimeErr::Internal("refused".into()));
        assert!(StoreError::classify(conn).is_transient());

        let lock = DbErr::Exec(sea_orm::RuntimeErr::Internal(
            "deadlock detected".into(),
        ));
        assert!(StoreError::classify(lock).is_transient());

        let constraint = DbErr::Exec(sea_orm::RuntimeErr::Internal(
            "violates check constraint".into(),
        ));
        assert!(!StoreError::classify(constraint).is_transient());
    }
}
