use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use rusqlite::Connection;

use crate::config::Config;
use crate::error::ReliteError;
use crate::schema::Catalog;

pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Opens an existing database file.
    pub fn open(path: &Path) -> Result<Self, ReliteError> {
        if !path.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Database file '{}' does not exist", path.display()),
            )
            .into());
        }
        let conn = Connection::open(path)?;
        let db = Database {
            conn,
            path: Some(path.to_path_buf()),
        };
        db.apply_settings()?;
        Ok(db)
    }

    /// Opens a database file, creating it when missing (import target).
    pub fn create_or_open(path: &Path) -> Result<Self, ReliteError> {
        let conn = Connection::open(path)?;
        let db = Database {
            conn,
            path: Some(path.to_path_buf()),
        };
        db.apply_settings()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, ReliteError> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn, path: None };
        db.apply_settings()?;
        Ok(db)
    }

    fn apply_settings(&self) -> Result<(), ReliteError> {
        let config = Config::current();
        self.conn
            .busy_timeout(Duration::from_millis(config.database.busy_timeout_ms))?;
        if config.database.foreign_keys {
            self.conn.execute_batch("PRAGMA foreign_keys = on")?;
        }
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.path
            .as_ref()
            .and_then(|p| p.metadata().ok())
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Loads a fresh schema snapshot; callers re-load after DDL changes.
    pub fn catalog(&self) -> Result<Catalog, ReliteError> {
        Catalog::load(&self.conn)
    }

    pub fn foreign_keys_enabled(&self) -> Result<bool, ReliteError> {
        let on: i64 = self
            .conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        Ok(on != 0)
    }

    pub fn pragma_text(&self, name: &str) -> Option<String> {
        self.conn
            .query_row(&format!("PRAGMA {}", name), [], |row| {
                row.get::<_, rusqlite::types::Value>(0)
            })
            .ok()
            .map(|value| match value {
                rusqlite::types::Value::Null => "".to_string(),
                rusqlite::types::Value::Integer(i) => i.to_string(),
                rusqlite::types::Value::Real(r) => r.to_string(),
                rusqlite::types::Value::Text(t) => t,
                rusqlite::types::Value::Blob(_) => "<blob>".to_string(),
            })
    }

    /// SQLite 3.25.0 added ALTER TABLE .. RENAME COLUMN.
    pub fn has_rename_column(&self) -> bool {
        rusqlite::version_number() >= 3_025_000
    }

    /// SQLite 3.25.0 made ALTER TABLE .. RENAME TO cascade into the bodies
    /// of dependent triggers and views.
    pub fn has_full_rename_table(&self) -> bool {
        rusqlite::version_number() >= 3_025_000
    }

    pub fn execute_logged(&self, sql: &str) -> Result<(), ReliteError> {
        debug!("SQL: {}", sql);
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.db");
        assert!(Database::open(&missing).is_err());
    }

    #[test]
    fn test_create_or_open_creates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.db");
        let db = Database::create_or_open(&path).unwrap();
        db.execute_logged("CREATE TABLE t (a INTEGER)").unwrap();
        drop(db);
        assert!(path.is_file());
        let db = Database::open(&path).unwrap();
        assert!(db.catalog().unwrap().contains(
            crate::ddl::ObjectCategory::Table,
            "t"
        ));
    }

    #[test]
    fn test_capability_probes() {
        let db = Database::open_in_memory().unwrap();
        // Bundled SQLite is far past 3.25.
        assert!(db.has_rename_column());
        assert!(db.has_full_rename_table());
    }
}
