//! Stash schema steps, keyed by `PRAGMA user_version`.
//!
//! Each step is an embedded SQL script. Opening a stash runs every step newer
//! than the recorded version inside one transaction, so a stash is either on
//! its old schema or the latest one.
//!
//! A stash written by a newer build is refused rather than downgraded.

use crate::db::{DbError, DbResult};
use log::{debug, info};
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
struct SchemaStep {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        name: "init",
        sql: include_str!("0001_init.sql"),
    },
    SchemaStep {
        version: 2,
        name: "owner_indexes",
        sql: include_str!("0002_owner_indexes.sql"),
    },
];

/// Highest schema version this build can write.
pub fn latest_version() -> u32 {
    STEPS.last().map_or(0, |step| step.version)
}

/// Where a stash stands relative to this build's schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current: u32,
    pub latest: u32,
}

impl SchemaStatus {
    pub fn read(conn: &Connection) -> DbResult<Self> {
        let current = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
        Ok(Self {
            current,
            latest: latest_version(),
        })
    }

    pub fn is_current(&self) -> bool {
        self.current == self.latest
    }

    /// Fails for a stash written by a newer build.
    pub fn ensure_supported(&self) -> DbResult<()> {
        if self.current > self.latest {
            return Err(DbError::UnsupportedSchemaVersion {
                db_version: self.current,
                latest_supported: self.latest,
            });
        }
        Ok(())
    }

    fn pending(&self) -> impl Iterator<Item = &'static SchemaStep> {
        let current = self.current;
        STEPS.iter().filter(move |step| step.version > current)
    }
}

/// Brings the stash schema up to date. Returns the status before upgrading.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<SchemaStatus> {
    let status = SchemaStatus::read(conn)?;
    status.ensure_supported()?;
    if status.is_current() {
        debug!(
            "event=db_migrate module=db status=skipped version={}",
            status.current
        );
        return Ok(status);
    }

    let tx = conn.transaction()?;
    for step in status.pending() {
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", step.version)?;
        debug!(
            "event=db_migrate module=db status=step version={} name={}",
            step.version, step.name
        );
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={} to_version={}",
        status.current, status.latest
    );
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::{SchemaStatus, STEPS};

    #[test]
    fn step_versions_increase_one_at_a_time() {
        for (position, step) in STEPS.iter().enumerate() {
            assert_eq!(step.version as usize, position + 1, "step {}", step.name);
        }
    }

    #[test]
    fn pending_skips_applied_steps() {
        let status = SchemaStatus {
            current: 1,
            latest: 2,
        };
        let pending: Vec<_> = status.pending().map(|step| step.name).collect();
        assert_eq!(pending, vec!["owner_indexes"]);
        assert!(status.ensure_supported().is_ok());
        assert!(SchemaStatus {
            current: 3,
            latest: 2
        }
        .ensure_supported()
        .is_err());
    }
}
