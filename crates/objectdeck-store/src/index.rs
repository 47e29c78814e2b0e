//! Object index and favorites
//!
//! The index caches `(profile, bucket, key) → (size, etag, mtime)` so search
//! and summaries run locally. It is rebuilt or refreshed by an indexing job;
//! a bucket with no index meta row yields `object_index_not_found`.

use crate::profile::parse_ts;
use crate::Store;
use chrono::{DateTime, Utc};
use objectdeck_common::{Error, ObjectEntry, ProfileId, Result};
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Batch size cap for index upserts.
pub const INDEX_BATCH_MAX: usize = 500;

const SEARCH_TOKEN_CAP: usize = 8;

/// Optional search constraints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    /// File extension without the dot, e.g. `parquet`.
    pub extension: Option<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub modified_after: Option<DateTime<Utc>>,
    pub modified_before: Option<DateTime<Utc>>,
}

/// One page of search hits, cursored by key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub entries: Vec<ObjectEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Aggregate shape of one bucket's index.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSummary {
    pub object_count: u64,
    pub total_size: u64,
    pub built_at: DateTime<Utc>,
}

/// Lowercased unicode alphanumeric tokens, deduplicated, capped at
/// [`SEARCH_TOKEN_CAP`].
fn tokenize(query: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for raw in query.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        let token = raw.to_lowercase();
        if !tokens.contains(&token) {
            tokens.push(token);
        }
        if tokens.len() == SEARCH_TOKEN_CAP {
            break;
        }
    }
    tokens
}

/// Escape `%`, `_`, and `\` for a LIKE pattern with `ESCAPE '\'`.
fn escape_like(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    for c in token.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl Store {
    /// Insert or update a batch of index entries. Batches above
    /// [`INDEX_BATCH_MAX`] are rejected; callers chunk.
    pub fn upsert_object_index_batch(
        &self,
        profile_id: ProfileId,
        bucket: &str,
        entries: &[ObjectEntry],
    ) -> Result<()> {
        if entries.len() > INDEX_BATCH_MAX {
            return Err(Error::invalid_argument(format!(
                "index batch of {} exceeds {INDEX_BATCH_MAX}",
                entries.len()
            )));
        }
        let now = Utc::now().to_rfc3339();
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "INSERT INTO object_index \
                 (profile_id, bucket, object_key, size, etag, last_modified, indexed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT(profile_id, bucket, object_key) DO UPDATE SET \
                 size = ?4, etag = ?5, last_modified = ?6, indexed_at = ?7",
            )?;
            for entry in entries {
                stmt.execute(params![
                    profile_id.to_string(),
                    bucket,
                    entry.key,
                    entry.size as i64,
                    entry.etag,
                    entry.last_modified.map(|t| t.to_rfc3339()),
                    now,
                ])?;
            }
            Ok(())
        })
    }

    /// Drop a bucket's index rows ahead of a full rebuild.
    pub fn clear_object_index(&self, profile_id: ProfileId, bucket: &str) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "DELETE FROM object_index WHERE profile_id = ?1 AND bucket = ?2",
                params![profile_id.to_string(), bucket],
            )?;
            tx.execute(
                "DELETE FROM object_index_meta WHERE profile_id = ?1 AND bucket = ?2",
                params![profile_id.to_string(), bucket],
            )?;
            Ok(())
        })
    }

    /// Record that a bucket's index build finished, refreshing the summary.
    pub fn finalize_object_index(&self, profile_id: ProfileId, bucket: &str) -> Result<IndexSummary> {
        let (count, size): (i64, i64) = self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM object_index \
                 WHERE profile_id = ?1 AND bucket = ?2",
                params![profile_id.to_string(), bucket],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
        })?;
        let built_at = Utc::now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO object_index_meta (profile_id, bucket, built_at, object_count, total_size) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(profile_id, bucket) DO UPDATE SET \
                 built_at = ?3, object_count = ?4, total_size = ?5",
                params![profile_id.to_string(), bucket, built_at.to_rfc3339(), count, size],
            )
            .map(|_| ())
        })?;
        Ok(IndexSummary {
            object_count: count as u64,
            total_size: size as u64,
            built_at,
        })
    }

    /// Summary of a bucket's index, or `object_index_not_found` when no
    /// index has been built.
    pub fn object_index_summary(&self, profile_id: ProfileId, bucket: &str) -> Result<IndexSummary> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT object_count, total_size, built_at FROM object_index_meta \
                 WHERE profile_id = ?1 AND bucket = ?2",
                params![profile_id.to_string(), bucket],
                |row| {
                    let built_at: String = row.get(2)?;
                    Ok(IndexSummary {
                        object_count: row.get::<_, i64>(0)? as u64,
                        total_size: row.get::<_, i64>(1)? as u64,
                        built_at: parse_ts(&built_at),
                    })
                },
            )
            .optional()
        })?
        .ok_or_else(|| Error::ObjectIndexNotFound {
            profile: profile_id.to_string(),
            bucket: bucket.to_string(),
        })
    }

    /// Tokenized substring search over indexed keys, cursored by key
    /// ascending (strictly greater than the cursor).
    pub fn search_object_index(
        &self,
        profile_id: ProfileId,
        bucket: &str,
        query: &str,
        filters: &SearchFilters,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<SearchPage> {
        // A missing index is distinguishable from an empty result.
        self.object_index_summary(profile_id, bucket)?;

        let limit = limit.clamp(1, 1000);
        let mut sql = String::from(
            "SELECT object_key, size, etag, last_modified FROM object_index \
             WHERE profile_id = ?1 AND bucket = ?2",
        );
        let mut args: Vec<String> = vec![profile_id.to_string(), bucket.to_string()];

        for token in tokenize(query) {
            args.push(format!("%{}%", escape_like(&token)));
            sql.push_str(&format!(" AND object_key LIKE ?{} ESCAPE '\\'", args.len()));
        }
        if let Some(ext) = &filters.extension {
            args.push(format!("%.{}", escape_like(&ext.to_lowercase())));
            sql.push_str(&format!(" AND LOWER(object_key) LIKE ?{} ESCAPE '\\'", args.len()));
        }
        if let Some(min) = filters.min_size {
            args.push(min.to_string());
            sql.push_str(&format!(" AND size >= ?{}", args.len()));
        }
        if let Some(max) = filters.max_size {
            args.push(max.to_string());
            sql.push_str(&format!(" AND size <= ?{}", args.len()));
        }
        if let Some(after) = filters.modified_after {
            args.push(after.to_rfc3339());
            sql.push_str(&format!(" AND last_modified >= ?{}", args.len()));
        }
        if let Some(before) = filters.modified_before {
            args.push(before.to_rfc3339());
            sql.push_str(&format!(" AND last_modified <= ?{}", args.len()));
        }
        if let Some(cursor) = cursor {
            args.push(cursor.to_string());
            sql.push_str(&format!(" AND object_key > ?{}", args.len()));
        }
        sql.push_str(&format!(" ORDER BY object_key ASC LIMIT {}", limit + 1));

        let mut entries: Vec<ObjectEntry> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
                let last_modified: Option<String> = row.get(3)?;
                Ok(ObjectEntry {
                    key: row.get(0)?,
                    size: row.get::<_, i64>(1)? as u64,
                    etag: row.get(2)?,
                    last_modified: last_modified.map(|t| parse_ts(&t)),
                })
            })?;
            rows.collect()
        })?;

        let next_cursor = if entries.len() > limit {
            entries.truncate(limit);
            entries.last().map(|e| e.key.clone())
        } else {
            None
        };
        Ok(SearchPage { entries, next_cursor })
    }

    // ---- Favorites ----

    pub fn add_favorite(&self, profile_id: ProfileId, bucket: &str, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO favorites (profile_id, bucket, object_key, created_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(profile_id, bucket, object_key) DO NOTHING",
                params![profile_id.to_string(), bucket, key, Utc::now().to_rfc3339()],
            )
            .map(|_| ())
        })
    }

    pub fn remove_favorite(&self, profile_id: ProfileId, bucket: &str, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM favorites WHERE profile_id = ?1 AND bucket = ?2 AND object_key = ?3",
                params![profile_id.to_string(), bucket, key],
            )
            .map(|_| ())
        })
    }

    /// Favorite keys for one bucket, insertion order newest first.
    pub fn list_favorites(&self, profile_id: ProfileId, bucket: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT object_key FROM favorites WHERE profile_id = ?1 AND bucket = ?2 \
                 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map(params![profile_id.to_string(), bucket], |row| row.get(0))?;
            rows.collect()
        })
    }
}
