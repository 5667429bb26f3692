//! SQLite-backed repository.
//!
//! Provides persistent storage for:
//! - Integrations (with soft delete)
//! - Plugs and their parameter lists
//! - The plug dedup ledger

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::migrations;
use super::traits::IntegrationStore;
use crate::error::StoreError;
use crate::integration::{
    default_posting_times, ConnectIntegration, Integration, IntegrationType, PageInformation,
    PostingTime,
};
use crate::plugs::{Plug, PlugParams};

const INTEGRATION_COLUMNS: &str = "id, organization_id, name, picture, type, provider_identifier,
    internal_id, token, refresh_token, token_expiration, profile, disabled, in_between_steps,
    refresh_needed, posting_times, custom_instance_details, deleted_at, created_at, updated_at";

const PLUG_COLUMNS: &str = "id, organization_id, integration_id, plug_function, activated, data";

/// Candidate ids bound per dedup query, well under SQLite's variable limit.
const SEEN_IDS_PER_QUERY: usize = 500;

/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that text
/// comparison matches time order.
pub(crate) fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|r| parse_ts(idx, &r)).transpose()
}

fn row_to_integration(row: &Row<'_>) -> rusqlite::Result<Integration> {
    let type_str: String = row.get(4)?;
    let integration_type = IntegrationType::parse(&type_str)
        .ok_or_else(|| conversion_error(4, format!("unknown integration type '{type_str}'")))?;
    let posting_times: String = row.get(14)?;
    let posting_times: Vec<PostingTime> =
        serde_json::from_str(&posting_times).map_err(|e| conversion_error(14, e.to_string()))?;

    Ok(Integration {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        name: row.get(2)?,
        picture: row.get(3)?,
        integration_type,
        provider_identifier: row.get(5)?,
        internal_id: row.get(6)?,
        token: row.get(7)?,
        refresh_token: row.get(8)?,
        token_expiration: parse_opt_ts(9, row.get(9)?)?,
        profile: row.get(10)?,
        disabled: row.get(11)?,
        in_between_steps: row.get(12)?,
        refresh_needed: row.get(13)?,
        posting_times,
        custom_instance_details: row.get(15)?,
        deleted_at: parse_opt_ts(16, row.get(16)?)?,
        created_at: parse_ts(17, &row.get::<_, String>(17)?)?,
        updated_at: parse_ts(18, &row.get::<_, String>(18)?)?,
    })
}

fn row_to_plug(row: &Row<'_>) -> rusqlite::Result<Plug> {
    let data: String = row.get(5)?;
    let data: PlugParams =
        serde_json::from_str(&data).map_err(|e| conversion_error(5, e.to_string()))?;
    Ok(Plug {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        integration_id: row.get(2)?,
        method_name: row.get(3)?,
        activated: row.get(4)?,
        data,
    })
}

fn json_text<T: serde::Serialize>(value: &T, table: &'static str) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Corrupt {
        table,
        message: e.to_string(),
    })
}

/// SQLite implementation of [`IntegrationStore`].
///
/// The connection is guarded by a mutex; every call holds it only for the
/// duration of its statements.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and migrate) the database at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        migrations::migrate(&conn).map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn query_integration(
        conn: &Connection,
        sql_where: &str,
        args: impl rusqlite::Params,
    ) -> Result<Option<Integration>, StoreError> {
        let sql = format!("SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE {sql_where}");
        Ok(conn.query_row(&sql, args, row_to_integration).optional()?)
    }

    fn query_integrations(
        conn: &Connection,
        sql_where: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<Integration>, StoreError> {
        let sql = format!(
            "SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE {sql_where}
             ORDER BY created_at, rowid"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args, row_to_integration)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn query_plug(conn: &Connection, id: &str) -> Result<Option<Plug>, StoreError> {
        let sql = format!("SELECT {PLUG_COLUMNS} FROM plugs WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], row_to_plug).optional()?)
    }

    /// Run an UPDATE scoped to one live integration; returns whether it matched.
    fn update_live(
        &self,
        org_id: &str,
        id: &str,
        set_clause: &str,
        extra: &[&dyn rusqlite::ToSql],
    ) -> Result<bool, StoreError> {
        self.update_live_if(org_id, id, set_clause, "", extra)
    }

    /// [`Self::update_live`] restricted further by `condition`, a SQL
    /// fragment starting with `AND`.
    fn update_live_if(
        &self,
        org_id: &str,
        id: &str,
        set_clause: &str,
        condition: &str,
        extra: &[&dyn rusqlite::ToSql],
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let now = ts(Utc::now());
        let n = extra.len();
        let sql = format!(
            "UPDATE integrations SET {set_clause}, updated_at = ?{}
             WHERE organization_id = ?{} AND id = ?{} AND deleted_at IS NULL {condition}",
            n + 1,
            n + 2,
            n + 3
        );
        let mut args: Vec<&dyn rusqlite::ToSql> = extra.to_vec();
        args.push(&now);
        args.push(&org_id);
        args.push(&id);
        let changed = conn.execute(&sql, args.as_slice())?;
        Ok(changed > 0)
    }
}

#[async_trait]
impl IntegrationStore for SqliteStore {
    async fn upsert_integration(
        &self,
        req: &ConnectIntegration,
    ) -> Result<Integration, StoreError> {
        let mut conn = self.lock()?;
        let now = Utc::now();
        let expiration = req.token_expiration(now).map(ts);
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM integrations
                 WHERE organization_id = ?1 AND provider_identifier = ?2 AND internal_id = ?3",
                params![req.organization_id, req.provider_identifier, req.internal_id],
                |row| row.get(0),
            )
            .optional()?;

        let id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE integrations SET
                        name = ?1, picture = ?2, type = ?3, token = ?4, refresh_token = ?5,
                        token_expiration = ?6, profile = ?7, in_between_steps = ?8,
                        custom_instance_details = ?9, refresh_needed = 0, deleted_at = NULL,
                        updated_at = ?10
                     WHERE id = ?11",
                    params![
                        req.name,
                        req.picture,
                        req.integration_type.as_str(),
                        req.token,
                        req.refresh_token,
                        expiration,
                        req.profile,
                        req.in_between_steps,
                        req.custom_instance_details,
                        ts(now),
                        id,
                    ],
                )?;
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                let posting_times = json_text(&default_posting_times(), "integrations")?;
                tx.execute(
                    "INSERT INTO integrations (
                        id, organization_id, name, picture, type, provider_identifier,
                        internal_id, token, refresh_token, token_expiration, profile,
                        in_between_steps, posting_times, custom_instance_details,
                        created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
                    params![
                        id,
                        req.organization_id,
                        req.name,
                        req.picture,
                        req.integration_type.as_str(),
                        req.provider_identifier,
                        req.internal_id,
                        req.token,
                        req.refresh_token,
                        expiration,
                        req.profile,
                        req.in_between_steps,
                        posting_times,
                        req.custom_instance_details,
                        ts(now),
                    ],
                )?;
                id
            }
        };

        let integration = Self::query_integration(&tx, "id = ?1", params![id])?.ok_or_else(|| {
            StoreError::Corrupt {
                table: "integrations",
                message: format!("row {id} vanished after upsert"),
            }
        })?;
        tx.commit()?;
        Ok(integration)
    }

    async fn get_integration(
        &self,
        org_id: &str,
        id: &str,
    ) -> Result<Option<Integration>, StoreError> {
        let conn = self.lock()?;
        Self::query_integration(
            &conn,
            "organization_id = ?1 AND id = ?2 AND deleted_at IS NULL",
            params![org_id, id],
        )
    }

    async fn list_integrations(&self, org_id: &str) -> Result<Vec<Integration>, StoreError> {
        let conn = self.lock()?;
        Self::query_integrations(
            &conn,
            "organization_id = ?1 AND deleted_at IS NULL",
            params![org_id],
        )
    }

    async fn finalize_identity(
        &self,
        org_id: &str,
        id: &str,
        page: &PageInformation,
    ) -> Result<bool, StoreError> {
        self.update_live_if(
            org_id,
            id,
            "picture = ?1, internal_id = ?2, name = ?3, token = ?4, profile = ?5,
             in_between_steps = 0",
            "AND in_between_steps = 1",
            &[
                &page.picture,
                &page.id,
                &page.name,
                &page.access_token,
                &page.username,
            ],
        )
    }

    async fn release_deleted_identity(
        &self,
        org_id: &str,
        internal_id: &str,
    ) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE integrations SET internal_id = internal_id || '-deleted-' || id, updated_at = ?1
             WHERE organization_id = ?2 AND internal_id = ?3 AND deleted_at IS NOT NULL",
            params![ts(Utc::now()), org_id, internal_id],
        )?;
        Ok(u64::try_from(changed).unwrap_or(u64::MAX))
    }

    async fn set_disabled(
        &self,
        org_id: &str,
        id: &str,
        disabled: bool,
    ) -> Result<bool, StoreError> {
        self.update_live(org_id, id, "disabled = ?1", &[&disabled])
    }

    async fn soft_delete(&self, org_id: &str, id: &str) -> Result<bool, StoreError> {
        let now = ts(Utc::now());
        self.update_live(org_id, id, "deleted_at = ?1", &[&now])
    }

    async fn clear_credentials(&self, org_id: &str, id: &str) -> Result<bool, StoreError> {
        self.update_live(
            org_id,
            id,
            "token = '', refresh_token = NULL, refresh_needed = 1",
            &[],
        )
    }

    async fn mark_refresh_needed(&self, org_id: &str, id: &str) -> Result<bool, StoreError> {
        self.update_live(org_id, id, "refresh_needed = 1", &[])
    }

    async fn needs_refresh(
        &self,
        horizon: DateTime<Utc>,
    ) -> Result<Vec<Integration>, StoreError> {
        let conn = self.lock()?;
        Self::query_integrations(
            &conn,
            "deleted_at IS NULL AND in_between_steps = 0 AND refresh_needed = 0
             AND refresh_token IS NOT NULL AND refresh_token != ''
             AND token_expiration IS NOT NULL AND token_expiration <= ?1",
            params![ts(horizon)],
        )
    }

    async fn update_name_and_picture(
        &self,
        org_id: &str,
        id: &str,
        name: &str,
        picture: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.update_live(org_id, id, "name = ?1, picture = ?2", &[&name, &picture])
    }

    async fn set_posting_times(
        &self,
        org_id: &str,
        id: &str,
        times: &[PostingTime],
    ) -> Result<bool, StoreError> {
        let json = json_text(&times, "integrations")?;
        self.update_live(org_id, id, "posting_times = ?1", &[&json])
    }

    async fn upsert_plug(
        &self,
        org_id: &str,
        integration_id: &str,
        method_name: &str,
        data: &PlugParams,
    ) -> Result<Plug, StoreError> {
        let data = json_text(data, "plugs")?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM plugs
                 WHERE organization_id = ?1 AND integration_id = ?2 AND plug_function = ?3",
                params![org_id, integration_id, method_name],
                |row| row.get(0),
            )
            .optional()?;

        let id = match existing {
            Some(id) => {
                tx.execute("UPDATE plugs SET data = ?1 WHERE id = ?2", params![data, id])?;
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO plugs (id, organization_id, integration_id, plug_function, data, activated, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
                    params![id, org_id, integration_id, method_name, data, ts(Utc::now())],
                )?;
                id
            }
        };

        let plug = Self::query_plug(&tx, &id)?.ok_or_else(|| StoreError::Corrupt {
            table: "plugs",
            message: format!("row {id} vanished after upsert"),
        })?;
        tx.commit()?;
        Ok(plug)
    }

    async fn list_plugs(
        &self,
        org_id: &str,
        integration_id: &str,
    ) -> Result<Vec<Plug>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {PLUG_COLUMNS} FROM plugs
             WHERE organization_id = ?1 AND integration_id = ?2
             ORDER BY created_at, rowid"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![org_id, integration_id], row_to_plug)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn set_plug_activation(
        &self,
        org_id: &str,
        plug_id: &str,
        activated: bool,
    ) -> Result<Option<Plug>, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE plugs SET activated = ?1 WHERE organization_id = ?2 AND id = ?3",
            params![activated, org_id, plug_id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        Self::query_plug(&conn, plug_id)
    }

    async fn filter_external_ids_seen(
        &self,
        method_name: &str,
        integration_id: &str,
        ids: &[String],
    ) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut seen = Vec::new();
        for chunk in ids.chunks(SEEN_IDS_PER_QUERY) {
            let placeholders = (0..chunk.len())
                .map(|i| format!("?{}", i + 3))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT value FROM plug_seen_ids
                 WHERE method_name = ?1 AND integration_id = ?2 AND value IN ({placeholders})"
            );
            let args = [method_name, integration_id]
                .into_iter()
                .chain(chunk.iter().map(String::as_str));
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args), |row| row.get::<_, String>(0))?;
            for row in rows {
                seen.push(row?);
            }
        }
        Ok(seen)
    }

    async fn record_external_ids_seen(
        &self,
        method_name: &str,
        integration_id: &str,
        ids: &[String],
    ) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock()?;
        let now = ts(Utc::now());
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO plug_seen_ids (method_name, integration_id, value, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for id in ids {
                stmt.execute(params![method_name, integration_id, id, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
