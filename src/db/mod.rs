//! SQLite storage for encrypted credential envelopes.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use self::models::CredentialRow;

pub mod migrations;
pub mod models;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("migration failed: {0}")]
    Migration(String),
}

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (creating parent directories) and migrate the database at `path`.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::migrated(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::migrated(Connection::open_in_memory()?)
    }

    fn migrated(mut conn: Connection) -> Result<Self, DbError> {
        migrations::migrate(&mut conn).map_err(|error| DbError::Migration(format!("{error:#}")))?;
        Ok(Self { conn })
    }

    pub fn get_credential(&self, slot: &str) -> Result<Option<CredentialRow>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT slot, envelope, updated_at FROM credentials WHERE slot = ?1",
                params![slot],
                CredentialRow::from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn put_credential(&self, slot: &str, envelope: &str) -> Result<(), DbError> {
        self.conn.execute(
            r#"
            INSERT INTO credentials (slot, envelope, updated_at)
            VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            ON CONFLICT(slot) DO UPDATE SET
                envelope = excluded.envelope,
                updated_at = excluded.updated_at
            "#,
            params![slot, envelope],
        )?;
        Ok(())
    }

    /// Returns the number of rows removed (0 or 1).
    pub fn delete_credential(&self, slot: &str) -> Result<usize, DbError> {
        let removed = self
            .conn
            .execute("DELETE FROM credentials WHERE slot = ?1", params![slot])?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::Database;

    #[test]
    fn credential_rows_upsert_and_delete() {
        let db = Database::open_in_memory().expect("open in-memory db");
        assert!(db.get_credential("gmail").expect("read").is_none());

        db.put_credential("gmail", "envelope-1").expect("insert");
        db.put_credential("gmail", "envelope-2").expect("update");
        let row = db.get_credential("gmail").expect("read").expect("row");
        assert_eq!(row.envelope, "envelope-2");
        assert_eq!(row.slot, "gmail");

        assert_eq!(db.delete_credential("gmail").expect("delete"), 1);
        assert_eq!(db.delete_credential("gmail").expect("delete again"), 0);
    }
}
