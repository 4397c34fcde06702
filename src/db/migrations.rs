//! Ordered schema steps, tracked by version in the `meta` table.

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

const SCHEMA_VERSION_KEY: &str = "schema_version";

struct Step {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const STEPS: &[Step] = &[Step {
    version: 1,
    name: "credentials",
    sql: r#"
        CREATE TABLE IF NOT EXISTS credentials (
            slot TEXT PRIMARY KEY,
            envelope TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
    "#,
}];

pub fn latest_version() -> u32 {
    STEPS.last().map(|step| step.version).unwrap_or(0)
}

/// Bring `conn` up to the latest schema. Each pending step runs in its own
/// transaction together with its version bump.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
        "#,
    )
    .context("create meta table")?;

    let current = schema_version(conn)?;
    let latest = latest_version();
    if current > latest {
        return Err(anyhow!(
            "credential database is at schema version {current}, this build understands up to {latest}"
        ));
    }

    for step in STEPS.iter().filter(|step| step.version > current) {
        let tx = conn
            .transaction()
            .with_context(|| format!("begin migration {} ({})", step.version, step.name))?;
        tx.execute_batch(step.sql)
            .with_context(|| format!("apply migration {} ({})", step.version, step.name))?;
        tx.execute(
            r#"
            INSERT INTO meta (key, value, updated_at)
            VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![SCHEMA_VERSION_KEY, step.version.to_string()],
        )
        .with_context(|| format!("record schema version {}", step.version))?;
        tx.commit()
            .with_context(|| format!("commit migration {}", step.version))?;
    }

    Ok(())
}

pub fn schema_version(conn: &Connection) -> Result<u32> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![SCHEMA_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()
        .context("read schema version")?;

    raw.map_or(Ok(0), |version| {
        version
            .parse::<u32>()
            .with_context(|| format!("schema version '{version}' is not a number"))
    })
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use rusqlite::Connection;
    use uuid::Uuid;

    use super::{latest_version, migrate, schema_version};

    #[test]
    fn fresh_database_gets_credentials_table() -> Result<()> {
        let path = std::env::temp_dir().join(format!("gmail-agent-migrate-{}.db", Uuid::new_v4()));
        let mut conn = Connection::open(&path)?;

        migrate(&mut conn)?;
        assert_eq!(schema_version(&conn)?, latest_version());
        let tables: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'credentials'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(tables, 1);

        migrate(&mut conn)?;
        assert_eq!(schema_version(&conn)?, latest_version());

        drop(conn);
        let _ = std::fs::remove_file(path);
        Ok(())
    }

    #[test]
    fn newer_schema_is_refused() -> Result<()> {
        let mut conn = Connection::open_in_memory()?;
        migrate(&mut conn)?;
        conn.execute("UPDATE meta SET value = '99' WHERE key = 'schema_version'", [])?;

        let error = migrate(&mut conn).expect_err("newer schema must fail");
        assert!(error.to_string().contains("99"));
        Ok(())
    }
}
