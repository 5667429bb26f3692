//! Database schema migrations for channelhub.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const CURRENT_VERSION: i32 = 4;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }
    if current_version < 3 {
        migrate_v3(conn)?;
    }
    if current_version < 4 {
        migrate_v4(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            tracing::warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migration v1: integrations and plugs.
///
/// The unique index covers soft-deleted rows too, so a reconnect of a
/// deleted account revives the same row.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS integrations (
            id                      TEXT PRIMARY KEY,
            organization_id         TEXT NOT NULL,
            name                    TEXT NOT NULL,
            picture                 TEXT,
            type                    TEXT NOT NULL,
            provider_identifier     TEXT NOT NULL,
            internal_id             TEXT NOT NULL,
            token                   TEXT NOT NULL DEFAULT '',
            refresh_token           TEXT,
            token_expiration        TEXT,
            profile                 TEXT,
            disabled                INTEGER NOT NULL DEFAULT 0,
            in_between_steps        INTEGER NOT NULL DEFAULT 0,
            refresh_needed          INTEGER NOT NULL DEFAULT 0,
            posting_times           TEXT NOT NULL DEFAULT '[]',
            custom_instance_details TEXT,
            deleted_at              TEXT,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_integrations_identity
            ON integrations(organization_id, provider_identifier, internal_id);
        CREATE INDEX IF NOT EXISTS idx_integrations_expiration
            ON integrations(token_expiration);

        CREATE TABLE IF NOT EXISTS plugs (
            id              TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            integration_id  TEXT NOT NULL,
            plug_function   TEXT NOT NULL,
            data            TEXT NOT NULL DEFAULT '[]',
            activated       INTEGER NOT NULL DEFAULT 1,
            created_at      TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_plugs_function
            ON plugs(integration_id, plug_function);",
    )?;
    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: dedup ledger of external ids seen by plug runs.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS plug_seen_ids (
            method_name    TEXT NOT NULL,
            integration_id TEXT NOT NULL,
            value          TEXT NOT NULL,
            created_at     TEXT NOT NULL,
            PRIMARY KEY (method_name, integration_id, value)
        );",
    )?;
    set_schema_version(&tx, 2)?;
    tx.commit()
}

/// Migration v3: TTL cache entries.
fn migrate_v3(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS cache_entries (
            key        TEXT PRIMARY KEY,
            value      BLOB NOT NULL,
            expires_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(expires_at);",
    )?;
    set_schema_version(&tx, 3)?;
    tx.commit()
}

/// Migration v4: delayed plug jobs shared by every process on the database.
fn migrate_v4(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS plug_jobs (
            channel TEXT NOT NULL,
            id      TEXT NOT NULL,
            payload TEXT NOT NULL,
            due_at  INTEGER NOT NULL,
            PRIMARY KEY (channel, id)
        );
        CREATE INDEX IF NOT EXISTS idx_plug_jobs_due ON plug_jobs(channel, due_at);",
    )?;
    set_schema_version(&tx, 4)?;
    tx.commit()
}
