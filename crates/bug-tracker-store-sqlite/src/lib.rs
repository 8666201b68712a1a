#![allow(clippy::missing_errors_doc)]

use std::path::Path;

use anyhow::{Context, Result};
use bug_tracker_core::{
    format_rfc3339, now_utc, Bug, BugError, BugId, BugPage, BugPatch, BugPriority, BugQuery,
    BugStatus, BugStore, NewBug, SortField, SortOrder,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use time::OffsetDateTime;
use ulid::Ulid;

const BUGS_MIGRATION_VERSION: i64 = 1;

// Timestamps are stored as unix nanoseconds so that ORDER BY is chronological.
const SCHEMA_BUGS_V1: &str = r"
CREATE TABLE IF NOT EXISTS bugs (
  bug_id TEXT PRIMARY KEY,
  title TEXT NOT NULL CHECK (length(trim(title)) BETWEEN 1 AND 200),
  description TEXT NOT NULL CHECK (length(trim(description)) >= 1),
  status TEXT NOT NULL DEFAULT 'open' CHECK (
    status IN ('open', 'in-progress', 'resolved', 'closed')
  ),
  priority TEXT NOT NULL DEFAULT 'medium' CHECK (
    priority IN ('low', 'medium', 'high', 'critical')
  ),
  reporter TEXT NOT NULL CHECK (length(trim(reporter)) BETWEEN 1 AND 100),
  assigned_to TEXT NOT NULL DEFAULT '',
  tags_json TEXT NOT NULL DEFAULT '[]',
  steps_to_reproduce TEXT,
  expected_behavior TEXT,
  actual_behavior TEXT,
  environment TEXT,
  attachments_json TEXT NOT NULL DEFAULT '[]',
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL CHECK (updated_at >= created_at)
);

CREATE TRIGGER IF NOT EXISTS trg_bugs_id_immutable
BEFORE UPDATE OF bug_id ON bugs
WHEN NEW.bug_id <> OLD.bug_id
BEGIN
  SELECT RAISE(FAIL, 'bug_id is immutable');
END;

CREATE INDEX IF NOT EXISTS idx_bugs_status ON bugs(status);
CREATE INDEX IF NOT EXISTS idx_bugs_priority ON bugs(priority);
CREATE INDEX IF NOT EXISTS idx_bugs_created_at ON bugs(created_at DESC);
";

const BUG_COLUMNS: &str = "bug_id, title, description, status, priority, reporter,
    assigned_to, tags_json, steps_to_reproduce, expected_behavior, actual_behavior,
    environment, attachments_json, created_at, updated_at";

pub struct SqliteBugStore {
    conn: Connection,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

impl SchemaStatus {
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.pending_versions.is_empty() && self.current_version == self.target_version
    }
}

impl SqliteBugStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_BUGS_V1)
            .context("failed to apply bugs schema")?;

        let now = format_rfc3339(now_utc())?;
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![BUGS_MIGRATION_VERSION, now],
            )
            .context("failed to register bugs schema migration")?;

        if inserted > 0 {
            tracing::info!(
                target: "bug_tracker::store",
                version = BUGS_MIGRATION_VERSION,
                "applied bugs schema migration"
            );
        }

        Ok(())
    }

    pub fn schema_status(&self) -> Result<SchemaStatus> {
        read_schema_status(&self.conn)
    }

    /// Reports the schema status of the database at `path` without creating
    /// the file, changing its journal mode, or applying migrations.
    ///
    /// # Errors
    /// Returns an error when an existing file cannot be opened read-only or
    /// its migration table cannot be read.
    pub fn inspect(path: &Path) -> Result<SchemaStatus> {
        if !path.exists() {
            return Ok(schema_status_at(0));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("failed to open sqlite db {} read-only", path.display()))?;
        read_schema_status(&conn)
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl BugStore for SqliteBugStore {
    fn create(&mut self, input: &NewBug) -> Result<Bug, BugError> {
        let bug = Bug::from_new(BugId::new(), input, now_utc());
        insert_bug(&self.conn, &bug)?;
        Ok(bug)
    }

    fn find_by_id(&self, id: BugId) -> Result<Option<Bug>, BugError> {
        select_bug(&self.conn, id)
    }

    fn find_many(&self, query: &BugQuery) -> Result<BugPage, BugError> {
        let mut filters = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(status) = query.status {
            values.push(SqlValue::Text(status.as_str().to_string()));
            filters.push(format!("status = ?{}", values.len()));
        }
        if let Some(priority) = query.priority {
            values.push(SqlValue::Text(priority.as_str().to_string()));
            filters.push(format!("priority = ?{}", values.len()));
        }

        let where_clause = if filters.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", filters.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM bugs{where_clause}");
        let total: i64 = self
            .conn
            .query_row(&count_sql, params_from_iter(values.iter()), |row| row.get(0))
            .map_err(map_sql_error)?;

        let direction = match query.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        values.push(SqlValue::Integer(i64::from(query.limit)));
        let limit_index = values.len();
        values.push(SqlValue::Integer(
            i64::try_from(query.offset()).map_err(|err| BugError::Storage(err.to_string()))?,
        ));
        let offset_index = values.len();

        let select_sql = format!(
            "SELECT {BUG_COLUMNS} FROM bugs{where_clause}
             ORDER BY {} {direction}, rowid {direction}
             LIMIT ?{limit_index} OFFSET ?{offset_index}",
            sort_expression(query.sort_by)
        );

        let mut stmt = self.conn.prepare(&select_sql).map_err(map_sql_error)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), parse_bug_row)
            .map_err(map_sql_error)?;
        let mut bugs = Vec::new();
        for row in rows {
            bugs.push(row.map_err(map_sql_error)?);
        }

        Ok(BugPage {
            bugs,
            total: u64::try_from(total).unwrap_or(0),
        })
    }

    fn update_by_id(&mut self, id: BugId, patch: &BugPatch) -> Result<Option<Bug>, BugError> {
        let tx = self.conn.transaction().map_err(map_sql_error)?;
        let Some(mut bug) = select_bug(&tx, id)? else {
            return Ok(None);
        };

        let now = now_utc();
        // Keep updated_at monotonic even if the wall clock stepped back.
        bug.apply_patch(patch, now.max(bug.updated_at));

        tx.execute(
            "UPDATE bugs SET
                title = ?2, description = ?3, status = ?4, priority = ?5, reporter = ?6,
                assigned_to = ?7, tags_json = ?8, steps_to_reproduce = ?9,
                expected_behavior = ?10, actual_behavior = ?11, environment = ?12,
                attachments_json = ?13, updated_at = ?14
             WHERE bug_id = ?1",
            params![
                bug.id.to_string(),
                bug.title,
                bug.description,
                bug.status.as_str(),
                bug.priority.as_str(),
                bug.reporter,
                bug.assigned_to,
                encode_list(&bug.tags)?,
                bug.steps_to_reproduce,
                bug.expected_behavior,
                bug.actual_behavior,
                bug.environment,
                encode_list(&bug.attachments)?,
                to_nanos(bug.updated_at)?,
            ],
        )
        .map_err(map_sql_error)?;
        tx.commit().map_err(map_sql_error)?;

        Ok(Some(bug))
    }

    fn delete_by_id(&mut self, id: BugId) -> Result<Option<Bug>, BugError> {
        let tx = self.conn.transaction().map_err(map_sql_error)?;
        let Some(bug) = select_bug(&tx, id)? else {
            return Ok(None);
        };

        tx.execute("DELETE FROM bugs WHERE bug_id = ?1", params![id.to_string()])
            .map_err(map_sql_error)?;
        tx.commit().map_err(map_sql_error)?;

        Ok(Some(bug))
    }
}

fn insert_bug(conn: &Connection, bug: &Bug) -> Result<(), BugError> {
    conn.execute(
        "INSERT INTO bugs(
            bug_id, title, description, status, priority, reporter,
            assigned_to, tags_json, steps_to_reproduce, expected_behavior,
            actual_behavior, environment, attachments_json, created_at, updated_at
         ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9, ?10,
            ?11, ?12, ?13, ?14, ?15
         )",
        params![
            bug.id.to_string(),
            bug.title,
            bug.description,
            bug.status.as_str(),
            bug.priority.as_str(),
            bug.reporter,
            bug.assigned_to,
            encode_list(&bug.tags)?,
            bug.steps_to_reproduce,
            bug.expected_behavior,
            bug.actual_behavior,
            bug.environment,
            encode_list(&bug.attachments)?,
            to_nanos(bug.created_at)?,
            to_nanos(bug.updated_at)?,
        ],
    )
    .map_err(map_sql_error)?;
    Ok(())
}

fn select_bug(conn: &Connection, id: BugId) -> Result<Option<Bug>, BugError> {
    conn.query_row(
        &format!("SELECT {BUG_COLUMNS} FROM bugs WHERE bug_id = ?1"),
        params![id.to_string()],
        parse_bug_row,
    )
    .optional()
    .map_err(map_sql_error)
}

fn sort_expression(field: SortField) -> &'static str {
    match field {
        SortField::CreatedAt => "created_at",
        SortField::UpdatedAt => "updated_at",
        SortField::Title => "title COLLATE NOCASE",
        SortField::Reporter => "reporter COLLATE NOCASE",
        SortField::Status => {
            "CASE status WHEN 'open' THEN 0 WHEN 'in-progress' THEN 1 WHEN 'resolved' THEN 2 ELSE 3 END"
        }
        SortField::Priority => {
            "CASE priority WHEN 'low' THEN 0 WHEN 'medium' THEN 1 WHEN 'high' THEN 2 ELSE 3 END"
        }
    }
}

fn parse_bug_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bug> {
    let id_raw: String = row.get(0)?;
    let status_raw: String = row.get(3)?;
    let priority_raw: String = row.get(4)?;
    let tags_json: String = row.get(7)?;
    let attachments_json: String = row.get(12)?;

    let id = Ulid::from_string(&id_raw)
        .map(BugId)
        .map_err(|_| invalid_column(0, rusqlite::types::Type::Text, format!("invalid ULID: {id_raw}")))?;

    let status = BugStatus::parse(&status_raw).ok_or_else(|| {
        invalid_column(3, rusqlite::types::Type::Text, format!("invalid status: {status_raw}"))
    })?;

    let priority = BugPriority::parse(&priority_raw).ok_or_else(|| {
        invalid_column(4, rusqlite::types::Type::Text, format!("invalid priority: {priority_raw}"))
    })?;

    Ok(Bug {
        id,
        title: row.get(1)?,
        description: row.get(2)?,
        status,
        priority,
        reporter: row.get(5)?,
        assigned_to: row.get(6)?,
        tags: decode_list(7, &tags_json)?,
        steps_to_reproduce: row.get(8)?,
        expected_behavior: row.get(9)?,
        actual_behavior: row.get(10)?,
        environment: row.get(11)?,
        attachments: decode_list(12, &attachments_json)?,
        created_at: from_nanos(13, row.get(13)?)?,
        updated_at: from_nanos(14, row.get(14)?)?,
    })
}

fn invalid_column(
    index: usize,
    column_type: rusqlite::types::Type,
    message: String,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        column_type,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn decode_list(index: usize, raw: &str) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(raw).map_err(|err| {
        invalid_column(index, rusqlite::types::Type::Text, format!("invalid JSON list: {err}"))
    })
}

fn encode_list(values: &[String]) -> Result<String, BugError> {
    serde_json::to_string(values).map_err(|err| BugError::Storage(err.to_string()))
}

fn to_nanos(value: OffsetDateTime) -> Result<i64, BugError> {
    i64::try_from(value.unix_timestamp_nanos())
        .map_err(|_| BugError::Storage(format!("timestamp out of range: {value}")))
}

fn from_nanos(index: usize, nanos: i64) -> rusqlite::Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos)).map_err(|err| {
        invalid_column(index, rusqlite::types::Type::Integer, format!("invalid timestamp: {err}"))
    })
}

fn map_sql_error(err: rusqlite::Error) -> BugError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, message)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            BugError::Constraint(message.clone().unwrap_or_else(|| err.to_string()))
        }
        _ => BugError::Storage(err.to_string()),
    }
}

fn read_schema_status(conn: &Connection) -> Result<SchemaStatus> {
    let current_version = if table_exists(conn, "schema_migrations")? {
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read schema_migrations")?
    } else {
        0
    };
    Ok(schema_status_at(current_version))
}

fn schema_status_at(current_version: i64) -> SchemaStatus {
    SchemaStatus {
        current_version,
        target_version: BUGS_MIGRATION_VERSION,
        pending_versions: (current_version + 1..=BUGS_MIGRATION_VERSION).collect(),
    }
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT 1
             FROM sqlite_master
             WHERE type = 'table' AND name = ?1
             LIMIT 1",
            params![table_name],
            |_| Ok(()),
        )
        .optional()
        .context("failed to query sqlite_master")?
        .is_some();

    Ok(exists)
}
