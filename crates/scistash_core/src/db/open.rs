//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory stash connections.
//! - Configure connection pragmas required by core behavior.
//! - Trigger schema migrations before returning a usable connection.
//! - Flush and close the connection at session end.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - Returned connections have migrations fully applied.

use super::migrations::apply_migrations;
use super::{DbError, DbResult};
use crate::config::StashConfig;
use log::{error, info, warn};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens (creating if needed) a stash database file and applies all pending
/// migrations.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_with("file", || Connection::open(path))
}

/// Opens an in-memory stash database and applies all pending migrations.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_with("memory", Connection::open_in_memory)
}

/// Opens the stash described by `config`.
///
/// - `dry_run` ignores `db_path` and works in memory; nothing touches disk.
/// - Otherwise the file must already exist unless `create` is set.
///
/// # Errors
/// - `DbError::StashMissing` when the file is absent and `create` is false.
pub fn open_stash(config: &StashConfig) -> DbResult<Connection> {
    if config.dry_run {
        info!("event=db_open module=db status=start mode=dry_run");
        return open_db_in_memory();
    }
    if !config.create && !config.db_path.exists() {
        warn!(
            "event=db_open module=db status=error mode=file error_code=stash_missing path={}",
            config.db_path.display()
        );
        return Err(DbError::StashMissing(config.db_path.clone()));
    }
    open_db(&config.db_path)
}

/// Flushes planner statistics and closes the connection.
///
/// # Errors
/// - Returns the close error; the connection is dropped either way.
pub fn close_db(conn: Connection) -> DbResult<()> {
    let started_at = Instant::now();
    conn.execute_batch("PRAGMA optimize;")?;
    match conn.close() {
        Ok(()) => {
            info!(
                "event=db_close module=db status=ok duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(())
        }
        Err((_conn, err)) => {
            error!(
                "event=db_close module=db status=error error_code=db_close_failed error={}",
                err
            );
            Err(err.into())
        }
    }
}

fn open_with(
    mode: &'static str,
    opener: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={}", mode);

    let mut conn = opener().map_err(|err| {
        error!(
            "event=db_open module=db status=error mode={} duration_ms={} error_code=db_open_failed error={}",
            mode,
            started_at.elapsed().as_millis(),
            err
        );
        DbError::from(err)
    })?;

    match bootstrap_connection(&mut conn) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={} duration_ms={}",
                mode,
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(conn: &mut Connection) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    apply_migrations(conn)?;
    Ok(())
}
