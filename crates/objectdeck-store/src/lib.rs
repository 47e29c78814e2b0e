//! Durable metadata store
//!
//! A single SQLite file under the data directory holds every durable entity:
//! profiles (with encrypted secrets), per-profile TLS material, jobs, upload
//! sessions, multipart upload records, the object index, and favorites.
//!
//! One connection guarded by a mutex serializes access; statements are short
//! and bulk work runs inside transactions.

mod index;
mod job;
mod profile;
mod schema;
mod session;

pub use index::{IndexSummary, SearchFilters, SearchPage, INDEX_BATCH_MAX};
pub use job::{JobFilter, JobPage, JobRecord, NewJob, RESTART_FAILURE_MESSAGE};
pub use profile::{NewProfile, Profile, ProfileTlsConfig, ProfileUpdate, TlsMode, TLS_SCHEMA_VERSION};
pub use session::{MultipartRecord, UploadSession};

use objectdeck_common::Result;
use objectdeck_crypto::SecretCipher;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

/// Handle to the metadata store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    cipher: Option<SecretCipher>,
}

impl Store {
    /// Open (or create) the store at `path` and run schema migrations.
    /// `cipher` is the process-wide credential cipher; `None` disables
    /// at-rest encryption and forbids storing TLS material.
    pub fn open(path: &Path, cipher: Option<SecretCipher>) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| objectdeck_common::Error::internal(format!("open metadata db: {e}")))?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            cipher,
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory(cipher: Option<SecretCipher>) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| objectdeck_common::Error::internal(format!("open metadata db: {e}")))?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            cipher,
        })
    }

    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn).map_err(map_sql_err)
    }

    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(map_sql_err)?;
        let out = f(&tx).map_err(map_sql_err)?;
        tx.commit().map_err(map_sql_err)?;
        Ok(out)
    }

    pub(crate) fn cipher(&self) -> Option<&SecretCipher> {
        self.cipher.as_ref()
    }

    /// Whether an encryption key is configured for this process.
    #[must_use]
    pub fn encryption_enabled(&self) -> bool {
        self.cipher.is_some()
    }
}

pub(crate) fn map_sql_err(e: rusqlite::Error) -> objectdeck_common::Error {
    match e {
        rusqlite::Error::QueryReturnedNoRows => {
            objectdeck_common::Error::not_found("row not found")
        }
        other => objectdeck_common::Error::internal(format!("metadata store: {other}")),
    }
}
