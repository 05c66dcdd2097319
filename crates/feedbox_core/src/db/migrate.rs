//! Generic schema-migration engine over one SQLite connection.
//!
//! # Responsibility
//! - Bring a database to a target schema version via caller-supplied steps.
//! - Verify the application identity tag before touching application data.
//! - Probe engine requirements (version, named capabilities) up front.
//!
//! # Invariants
//! - The schema version counter never decreases.
//! - Each migration unit runs atomically; a failed step leaves the version
//!   counter at the last successfully completed step.
//! - Framework errors are distinct from creator/step errors, which propagate
//!   unmodified.

use std::collections::BTreeMap;

use log::{debug, info};
use once_cell::sync::Lazy;
use rusqlite::Connection;

use super::{DbError, DbResult, StepError};

/// Signature shared by schema creators and migration steps.
///
/// Steps are keyed by *source* version: the step stored under `v` takes the
/// schema from version `v` to `v + 1`.
pub type MigrationFn = fn(&Connection) -> Result<(), StepError>;

/// Whether the engine supports transactional schema changes.
///
/// Detected once at startup, never discovered by trial and error mid-flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlTransactions {
    /// DDL participates in transactions; failed units roll back completely.
    Native,
    /// DDL is applied in autocommit; the version counter is persisted only
    /// after a unit completes, so a retry resumes from the last good step.
    Emulated,
}

impl DdlTransactions {
    /// Probes the engine by rolling back a CREATE TABLE and checking that it
    /// left no trace.
    pub fn detect(conn: &mut Connection) -> DbResult<Self> {
        let tx = conn.transaction()?;
        tx.execute_batch("CREATE TABLE feedbox_ddl_probe (x INTEGER);")?;
        tx.rollback()?;

        let leaked: i64 = conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'feedbox_ddl_probe';",
            [],
            |row| row.get(0),
        )?;

        if leaked == 0 {
            Ok(Self::Native)
        } else {
            conn.execute_batch("DROP TABLE IF EXISTS feedbox_ddl_probe;")?;
            Ok(Self::Emulated)
        }
    }
}

/// Versioned schema migration for one database.
///
/// `application_id` distinguishes databases created by this system from
/// arbitrary SQLite files; `None` disables identity enforcement.
pub struct SchemaMigration {
    pub create: MigrationFn,
    pub version: u32,
    pub steps: BTreeMap<u32, MigrationFn>,
    pub application_id: Option<i32>,
}

impl SchemaMigration {
    /// Brings the database to `self.version`, detecting DDL-transaction
    /// support first.
    pub fn migrate(&self, conn: &mut Connection) -> DbResult<()> {
        let ddl = DdlTransactions::detect(conn)?;
        self.migrate_with(conn, ddl)
    }

    /// Like [`SchemaMigration::migrate`], with an explicit execution strategy.
    pub fn migrate_with(&self, conn: &mut Connection, ddl: DdlTransactions) -> DbResult<()> {
        if self.version == 0 {
            return Err(DbError::SchemaVersion {
                message: "target schema version must be positive".to_string(),
            });
        }

        if let (Some(expected), Some(found)) = (self.application_id, get_application_id(conn)?) {
            if found != expected {
                return Err(DbError::IdMismatch {
                    expected,
                    found: Some(found),
                });
            }
        }

        let version = get_version(conn)?;

        if version == 0 {
            if has_tables(conn)? {
                return Err(DbError::UnexpectedSchema {
                    message: "database with no schema version already has tables".to_string(),
                });
            }

            debug!(
                "event=db_migrate module=db status=start from_version=0 to_version={}",
                self.version
            );
            self.run_unit(conn, ddl, self.create, self.version)?;
            info!(
                "event=db_migrate module=db status=ok from_version=0 to_version={}",
                self.version
            );
            return Ok(());
        }

        // A versioned database must already carry our identity tag.
        if let Some(expected) = self.application_id {
            if get_application_id(conn)?.is_none() {
                return Err(DbError::IdMismatch {
                    expected,
                    found: None,
                });
            }
        }

        if version > self.version {
            return Err(DbError::SchemaVersion {
                message: format!(
                    "database version {version} is newer than supported {}; downgrades are not supported",
                    self.version
                ),
            });
        }

        if version == self.version {
            return Ok(());
        }

        debug!(
            "event=db_migrate module=db status=start from_version={version} to_version={}",
            self.version
        );

        // The whole chain must be contiguous before anything runs; a gap is a
        // configuration error, not something to discover halfway through.
        let mut pending = Vec::with_capacity((self.version - version) as usize);
        for from_version in version..self.version {
            let step = self
                .steps
                .get(&from_version)
                .ok_or_else(|| DbError::SchemaVersion {
                    message: format!("no migration step from version {from_version}"),
                })?;
            pending.push((from_version, *step));
        }

        for (from_version, step) in pending {
            self.run_unit(conn, ddl, step, from_version + 1)?;
            self.verify_id(conn)?;
        }

        info!(
            "event=db_migrate module=db status=ok from_version={version} to_version={}",
            self.version
        );
        Ok(())
    }

    /// Runs one creator/step atomically and persists the new version.
    fn run_unit(
        &self,
        conn: &mut Connection,
        ddl: DdlTransactions,
        action: MigrationFn,
        new_version: u32,
    ) -> DbResult<()> {
        let creating = new_version == self.version && get_version(conn)? == 0;

        match ddl {
            DdlTransactions::Native => {
                let tx = conn.transaction()?;
                action(&tx).map_err(classify_step_error)?;
                set_version(&tx, new_version)?;
                if creating {
                    if let Some(id) = self.application_id {
                        set_application_id(&tx, id)?;
                    }
                }
                tx.commit()?;
            }
            DdlTransactions::Emulated => {
                // No rollback available: stage the change in autocommit and
                // record the version only once the whole unit completed.
                action(conn).map_err(classify_step_error)?;
                set_version(conn, new_version)?;
                if creating {
                    if let Some(id) = self.application_id {
                        set_application_id(conn, id)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Re-checks the identity tag; a step must not alter it.
    fn verify_id(&self, conn: &Connection) -> DbResult<()> {
        let Some(expected) = self.application_id else {
            return Ok(());
        };
        match get_application_id(conn)? {
            Some(found) if found == expected => Ok(()),
            found => Err(DbError::IdMismatch { expected, found }),
        }
    }
}

fn classify_step_error(err: StepError) -> DbError {
    // Engine faults raised inside a step are still framework territory;
    // everything else is the caller's error and passes through untouched.
    match err.downcast::<rusqlite::Error>() {
        Ok(sqlite_err) => DbError::from(*sqlite_err),
        Err(err) => DbError::Migration(err),
    }
}

pub(crate) fn get_version(conn: &Connection) -> DbResult<u32> {
    let version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}

fn set_version(conn: &Connection, version: u32) -> DbResult<()> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))?;
    Ok(())
}

pub(crate) fn get_application_id(conn: &Connection) -> DbResult<Option<i32>> {
    let id: i32 = conn.query_row("PRAGMA application_id;", [], |row| row.get(0))?;
    Ok(if id == 0 { None } else { Some(id) })
}

fn set_application_id(conn: &Connection, id: i32) -> DbResult<()> {
    conn.execute_batch(&format!("PRAGMA application_id = {id};"))?;
    Ok(())
}

fn has_tables(conn: &Connection) -> DbResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type IN ('table', 'view');",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// SQL probes for the named capabilities feedbox depends on.
static FUNCTION_PROBES: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    BTreeMap::from([
        ("json", "SELECT json('{}');"),
        ("json_object", "SELECT json_object();"),
        ("json_array_length", "SELECT json_array_length('[]');"),
        (
            "fts5",
            "CREATE VIRTUAL TABLE temp.feedbox_fts5_probe USING fts5(probe);\
             DROP TABLE temp.feedbox_fts5_probe;",
        ),
    ])
});

/// Verifies the engine is at least `minimum` (`SELECT sqlite_version()`).
pub fn require_sqlite_version(conn: &Connection, minimum: (u32, u32, u32)) -> DbResult<()> {
    match check_sqlite_version(conn, minimum)? {
        None => Ok(()),
        Some(failure) => Err(DbError::Requirement {
            failures: vec![failure],
        }),
    }
}

pub(crate) fn check_sqlite_version(
    conn: &Connection,
    minimum: (u32, u32, u32),
) -> DbResult<Option<String>> {
    let reported: String = conn.query_row("SELECT sqlite_version();", [], |row| row.get(0))?;

    let mut parts = reported.split('.').map(|part| part.parse::<u32>());
    let mut next = || parts.next().and_then(Result::ok).unwrap_or(0);
    let current = (next(), next(), next());

    if current < minimum {
        let (major, minor, patch) = minimum;
        return Ok(Some(format!(
            "sqlite version {reported} is older than required {major}.{minor}.{patch}"
        )));
    }
    Ok(None)
}

/// Verifies every named capability probe passes.
///
/// Fails with [`DbError::Requirement`] listing *every* missing capability.
/// An unknown probe name is a caller error ([`DbError::UnknownProbe`]); any
/// engine fault other than "missing function/module" propagates wrapped.
pub fn require_functions(conn: &Connection, names: &[&str]) -> DbResult<()> {
    let failures = check_functions(conn, names)?;
    if failures.is_empty() {
        Ok(())
    } else {
        Err(DbError::Requirement { failures })
    }
}

pub(crate) fn check_functions(conn: &Connection, names: &[&str]) -> DbResult<Vec<String>> {
    let mut probes = Vec::with_capacity(names.len());
    for name in names {
        let probe = FUNCTION_PROBES
            .get(name)
            .ok_or_else(|| DbError::UnknownProbe {
                name: (*name).to_string(),
            })?;
        probes.push((*name, *probe));
    }
    run_probes(conn, &probes)
}

fn run_probes(conn: &Connection, probes: &[(&str, &str)]) -> DbResult<Vec<String>> {
    let mut failures = Vec::new();

    for (name, probe) in probes {
        match conn.execute_batch(probe) {
            Ok(()) => {}
            Err(err) if is_missing_capability(&err) => {
                failures.push(format!("required capability `{name}` is not available"));
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(failures)
}

fn is_missing_capability(err: &rusqlite::Error) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    message.contains("no such function") || message.contains("no such module")
}
