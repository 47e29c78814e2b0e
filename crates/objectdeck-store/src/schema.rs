//! Schema initialization and migrations
//!
//! Creation statements are idempotent and run on every open. Versioned
//! migration steps follow; each bumps `schema_meta.version` inside its own
//! transaction so a crash mid-migration reruns only the failed step.

use crate::map_sql_err;
use objectdeck_common::Result;
use rusqlite::Connection;

const CURRENT_VERSION: i64 = 1;

const INIT: &str = r#"
CREATE TABLE IF NOT EXISTS schema_meta (
    id      INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS profiles (
    id                       TEXT PRIMARY KEY,
    name                     TEXT NOT NULL,
    provider                 TEXT NOT NULL,
    config_json              TEXT NOT NULL,
    secrets_json             TEXT NOT NULL,
    preserve_leading_slash   INTEGER NOT NULL DEFAULT 0,
    tls_insecure_skip_verify INTEGER NOT NULL DEFAULT 0,
    created_at               TEXT NOT NULL,
    updated_at               TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS profile_tls (
    profile_id     TEXT PRIMARY KEY REFERENCES profiles(id) ON DELETE CASCADE,
    schema_version INTEGER NOT NULL,
    mode           TEXT NOT NULL,
    payload        TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS jobs (
    id           TEXT PRIMARY KEY,
    profile_id   TEXT NOT NULL,
    job_type     TEXT NOT NULL,
    status       TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    progress_json TEXT,
    error        TEXT,
    error_code   TEXT,
    created_at   TEXT NOT NULL,
    started_at   TEXT,
    finished_at  TEXT
);
CREATE INDEX IF NOT EXISTS jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS jobs_finished_at ON jobs(finished_at);

CREATE TABLE IF NOT EXISTS upload_sessions (
    id          TEXT PRIMARY KEY,
    profile_id  TEXT NOT NULL,
    bucket      TEXT NOT NULL,
    key_prefix  TEXT NOT NULL,
    mode        TEXT NOT NULL,
    staging_dir TEXT NOT NULL DEFAULT '',
    bytes_total INTEGER NOT NULL DEFAULT 0,
    expires_at  TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS upload_sessions_expires ON upload_sessions(expires_at);

CREATE TABLE IF NOT EXISTS multipart_uploads (
    upload_id          TEXT NOT NULL,
    path               TEXT NOT NULL,
    session_id         TEXT NOT NULL,
    bucket             TEXT NOT NULL,
    object_key         TEXT NOT NULL,
    provider_upload_id TEXT NOT NULL,
    chunk_size         INTEGER NOT NULL,
    total_size         INTEGER NOT NULL,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL,
    PRIMARY KEY (upload_id, path)
);
CREATE INDEX IF NOT EXISTS multipart_session ON multipart_uploads(session_id);

CREATE TABLE IF NOT EXISTS object_index (
    profile_id    TEXT NOT NULL,
    bucket        TEXT NOT NULL,
    object_key    TEXT NOT NULL,
    size          INTEGER NOT NULL,
    etag          TEXT,
    last_modified TEXT,
    indexed_at    TEXT NOT NULL,
    PRIMARY KEY (profile_id, bucket, object_key)
);

CREATE TABLE IF NOT EXISTS object_index_meta (
    profile_id   TEXT NOT NULL,
    bucket       TEXT NOT NULL,
    built_at     TEXT NOT NULL,
    object_count INTEGER NOT NULL,
    total_size   INTEGER NOT NULL,
    PRIMARY KEY (profile_id, bucket)
);

CREATE TABLE IF NOT EXISTS favorites (
    profile_id TEXT NOT NULL,
    bucket     TEXT NOT NULL,
    object_key TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (profile_id, bucket, object_key)
);
"#;

pub fn init(conn: &Connection) -> Result<()> {
    // journal_mode answers with a row, so it cannot ride in the batch.
    conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))
        .map_err(map_sql_err)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(map_sql_err)?;
    conn.execute_batch(INIT).map_err(map_sql_err)?;

    let version: i64 = conn
        .query_row("SELECT version FROM schema_meta WHERE id = 1", [], |row| row.get(0))
        .unwrap_or(0);

    if version == 0 {
        conn.execute(
            "INSERT OR REPLACE INTO schema_meta (id, version) VALUES (1, ?1)",
            [CURRENT_VERSION],
        )
        .map_err(map_sql_err)?;
    } else if version > CURRENT_VERSION {
        return Err(objectdeck_common::Error::internal(format!(
            "metadata db schema version {version} is newer than supported {CURRENT_VERSION}"
        )));
    }
    // Future migration steps go here, each guarded by `version < N`.

    Ok(())
}
