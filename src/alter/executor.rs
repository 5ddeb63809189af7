//! Runs alteration scripts statement by statement. Any failure rolls the
//! transaction back and restores the foreign-key pragma before surfacing
//! the original error, leaving schema and data untouched.

use log::{debug, error};

use crate::database::Database;
use crate::error::ReliteError;

pub fn execute(db: &Database, script: &[String], fks_on: bool) -> Result<(), ReliteError> {
    for statement in script {
        debug!("ALTER: {}", statement);
        if let Err(err) = db.conn().execute_batch(statement) {
            error!("Error executing SQL: {}", err);
            // ROLLBACK aborts the savepoint-opened transaction; it is a no-op
            // complaint when the failure happened before the savepoint.
            let _ = db.conn().execute_batch("ROLLBACK");
            if fks_on {
                let _ = db.conn().execute_batch("PRAGMA foreign_keys = on");
            }
            return Err(err.into());
        }
    }
    Ok(())
}
