use chrono::NaiveDate;
use sea_orm::{ConnAcquireErr, DbErr, RuntimeErr};
use serde::Serialize;
use std::fmt;

/// Fault signalled by the record store.
///
/// `code` carries the machine-readable driver code (a Postgres SQLSTATE, a SQLite
/// result code) or one of the synthetic pool-level codes below. Faults raised by the
/// application itself carry no code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreFault {
    pub code: Option<String>,
    pub message: String,
}

/// Synthetic code for a pool that could not hand out a connection in time.
pub const CODE_CONNECTION_ACQUIRE: &str = "connection_acquire";
/// Synthetic code for a pool or socket that was closed underneath us.
pub const CODE_CONNECTION_CLOSED: &str = "connection_closed";
/// Synthetic code for the driver's pool timeout.
pub const CODE_POOL_TIMED_OUT: &str = "pool_timed_out";
/// Synthetic code for a transport level I/O failure.
pub const CODE_IO: &str = "io";

impl StoreFault {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Fault without a driver code, e.g. a decoding or logic error.
    pub fn uncoded(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

impl fmt::Display for StoreFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for StoreFault {}

fn code_from_sqlx(err: &sea_orm::sqlx::Error) -> Option<String> {
    use sea_orm::sqlx::Error as SqlxError;

    match err {
        SqlxError::Database(db) => db.code().map(|c| c.into_owned()),
        SqlxError::PoolTimedOut => Some(CODE_POOL_TIMED_OUT.to_string()),
        SqlxError::PoolClosed | SqlxError::WorkerCrashed => {
            Some(CODE_CONNECTION_CLOSED.to_string())
        }
        SqlxError::Io(_) | SqlxError::Tls(_) => Some(CODE_IO.to_string()),
        _ => None,
    }
}

fn code_from_runtime(err: &RuntimeErr) -> Option<String> {
    match err {
        RuntimeErr::SqlxError(e) => code_from_sqlx(e),
        _ => None,
    }
}

impl From<DbErr> for StoreFault {
    fn from(err: DbErr) -> Self {
        let code = match &err {
            DbErr::ConnectionAcquire(ConnAcquireErr::Timeout) => {
                Some(CODE_CONNECTION_ACQUIRE.to_string())
            }
            DbErr::ConnectionAcquire(ConnAcquireErr::ConnectionClosed) => {
                Some(CODE_CONNECTION_CLOSED.to_string())
            }
            DbErr::Conn(e) | DbErr::Exec(e) | DbErr::Query(e) => code_from_runtime(e),
            _ => None,
        };

        Self {
            code,
            message: err.to_string(),
        }
    }
}

/// Retry classification of a [`StoreFault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FaultClass {
    Transient,
    Permanent,
}

impl fmt::Display for FaultClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultClass::Transient => f.write_str("TransientStoreFault"),
            FaultClass::Permanent => f.write_str("PermanentStoreFault"),
        }
    }
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ReportError {
    #[error("Invalid range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    #[error("Report generation failed after {attempts} attempt(s): {class}: {fault}")]
    ReportGenerationFailed {
        class: FaultClass,
        attempts: u32,
        #[source]
        fault: StoreFault,
    },

    #[error("Report generation cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    #[error("Export error: {0}")]
    Export(String),
}

impl ReportError {
    /// Caller supplied a window that can never be satisfied.
    pub fn is_bad_input(&self) -> bool {
        matches!(self, Self::InvalidRange { .. } | Self::InvalidPeriod(_))
    }

    /// The record store could not serve the request.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Self::ReportGenerationFailed { .. })
    }

    /// The store fault behind a failed generation, if any.
    pub fn fault(&self) -> Option<&StoreFault> {
        match self {
            Self::ReportGenerationFailed { fault, .. } => Some(fault),
            _ => None,
        }
    }
}

impl From<csv::Error> for ReportError {
    fn from(err: csv::Error) -> Self {
        ReportError::Export(err.to_string())
    }
}
