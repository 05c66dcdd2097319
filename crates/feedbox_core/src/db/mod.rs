//! SQLite storage bootstrap, schema migration and identity checks.
//!
//! # Responsibility
//! - Open and configure SQLite connections for feedbox core.
//! - Evolve the persisted schema across versions, refusing foreign databases.
//!
//! # Invariants
//! - Schema version is tracked via `PRAGMA user_version` and never decreases.
//! - The application identity tag (`PRAGMA application_id`) is set at creation
//!   time and verified on every subsequent open.
//! - Core code must not read/write application data before migration succeeds.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrate;
mod open;
pub mod schema;

pub use migrate::{
    require_functions, require_sqlite_version, DdlTransactions, MigrationFn, SchemaMigration,
};
pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Error type for caller-supplied creator/step functions.
///
/// Carried through [`DbError::Migration`] unmodified, so callers can tell
/// "the framework refused" apart from "my migration logic failed".
pub type StepError = Box<dyn Error + Send + Sync + 'static>;

/// Storage-layer error.
///
/// Framework-raised variants are distinct from [`DbError::Migration`], which
/// wraps whatever a caller-supplied migration function returned.
#[derive(Debug)]
pub enum DbError {
    /// Any engine fault that is not a constraint violation.
    Sqlite(rusqlite::Error),
    /// Constraint/referential violation reported by the engine.
    Integrity(rusqlite::Error),
    /// Non-empty database without feedbox metadata; refusing to guess.
    UnexpectedSchema { message: String },
    /// Downgrade attempt, missing migration step, or invalid target version.
    SchemaVersion { message: String },
    /// Application identity tag missing when expected, or mismatched.
    IdMismatch { expected: i32, found: Option<i32> },
    /// Engine below minimum version or missing required capabilities.
    /// `failures` enumerates every failing check, not just the first.
    Requirement { failures: Vec<String> },
    /// A capability probe name the framework does not know about.
    UnknownProbe { name: String },
    /// Caller-supplied creator/step error, propagated unmodified.
    Migration(StepError),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Integrity(err) => write!(f, "integrity error: {err}"),
            Self::UnexpectedSchema { message } => {
                write!(f, "unexpected database schema: {message}")
            }
            Self::SchemaVersion { message } => write!(f, "schema version error: {message}"),
            Self::IdMismatch { expected, found } => match found {
                Some(found) => write!(
                    f,
                    "application id mismatch: expected {expected}, found {found}"
                ),
                None => write!(f, "application id missing: expected {expected}"),
            },
            Self::Requirement { failures } => {
                write!(f, "database requirements not met: {}", failures.join("; "))
            }
            Self::UnknownProbe { name } => write!(f, "unknown capability probe `{name}`"),
            Self::Migration(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) | Self::Integrity(err) => Some(err),
            Self::Migration(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        if is_constraint_violation(&value) {
            Self::Integrity(value)
        } else {
            Self::Sqlite(value)
        }
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(info, _)
            if info.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
