//! Profile rows and credential encryption
//!
//! Secrets are provider-shaped JSON objects. Every string field is
//! encrypted on the way in and decrypted on the way out when a key is
//! configured; a ciphertext read without a key is a distinguished error.

use crate::Store;
use chrono::{DateTime, Utc};
use objectdeck_common::{Error, ProfileId, ProviderKind, Result};
use objectdeck_crypto::{is_encrypted, SecretCipher};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current TLS blob schema version. Retrieval rejects anything else.
pub const TLS_SCHEMA_VERSION: i64 = 1;

/// A storage profile with decrypted secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    pub provider: ProviderKind,
    pub config: Value,
    pub secrets: Value,
    pub preserve_leading_slash: bool,
    pub tls_insecure_skip_verify: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for profile creation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProfile {
    pub name: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub secrets: Value,
    #[serde(default)]
    pub preserve_leading_slash: bool,
    #[serde(default)]
    pub tls_insecure_skip_verify: bool,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub config: Option<Value>,
    pub secrets: Option<Value>,
    pub preserve_leading_slash: Option<bool>,
    pub tls_insecure_skip_verify: Option<bool>,
}

/// Per-profile mTLS configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileTlsConfig {
    pub mode: TlsMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert_pem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key_pem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_pem: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    Disabled,
    Mtls,
}

fn encrypt_secrets(cipher: Option<&SecretCipher>, secrets: &Value) -> Result<String> {
    let Some(cipher) = cipher else {
        return Ok(secrets.to_string());
    };
    let mut out = secrets.clone();
    if let Value::Object(map) = &mut out {
        for (_, v) in map.iter_mut() {
            if let Value::String(s) = v {
                if !s.is_empty() && !is_encrypted(s) {
                    *v = Value::String(
                        cipher
                            .encrypt(s)
                            .map_err(|e| Error::internal(e.to_string()))?,
                    );
                }
            }
        }
    }
    Ok(out.to_string())
}

fn decrypt_secrets(cipher: Option<&SecretCipher>, raw: &str) -> Result<Value> {
    let mut secrets: Value = serde_json::from_str(raw)?;
    if let Value::Object(map) = &mut secrets {
        for (_, v) in map.iter_mut() {
            if let Value::String(s) = v {
                if is_encrypted(s) {
                    let Some(cipher) = cipher else {
                        return Err(Error::EncryptionRequired);
                    };
                    *v = Value::String(
                        cipher
                            .decrypt(s)
                            .map_err(|e| Error::internal(e.to_string()))?,
                    );
                }
            }
        }
    }
    Ok(secrets)
}

fn row_to_profile(cipher: Option<&SecretCipher>, row: &Row<'_>) -> rusqlite::Result<(Profile, bool)> {
    let id: String = row.get(0)?;
    let provider: String = row.get(2)?;
    let config_raw: String = row.get(3)?;
    let secrets_raw: String = row.get(4)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    let mut ok = true;
    let config = serde_json::from_str(&config_raw).unwrap_or_else(|_| {
        ok = false;
        Value::Null
    });
    let secrets = match decrypt_secrets(cipher, &secrets_raw) {
        Ok(v) => v,
        Err(Error::EncryptionRequired) => {
            // Surfaced by get(); list() skips the row instead of failing.
            ok = false;
            Value::Null
        }
        Err(_) => {
            ok = false;
            Value::Null
        }
    };

    let profile = Profile {
        id: id.parse().unwrap_or_default(),
        name: row.get(1)?,
        provider: ProviderKind::parse(&provider).unwrap_or(ProviderKind::S3Compatible),
        config,
        secrets,
        preserve_leading_slash: row.get::<_, i64>(5)? != 0,
        tls_insecure_skip_verify: row.get::<_, i64>(6)? != 0,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    };
    Ok((profile, ok))
}

pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

const PROFILE_COLUMNS: &str = "id, name, provider, config_json, secrets_json, \
     preserve_leading_slash, tls_insecure_skip_verify, created_at, updated_at";

impl Store {
    pub fn create_profile(&self, new: NewProfile) -> Result<Profile> {
        if new.name.trim().is_empty() {
            return Err(Error::invalid_argument("profile name must not be empty"));
        }
        let id = ProfileId::new();
        let now = Utc::now();
        let secrets_json = encrypt_secrets(self.cipher(), &new.secrets)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, name, provider, config_json, secrets_json, \
                 preserve_leading_slash, tls_insecure_skip_verify, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    id.to_string(),
                    new.name,
                    new.provider.as_str(),
                    new.config.to_string(),
                    secrets_json,
                    new.preserve_leading_slash as i64,
                    new.tls_insecure_skip_verify as i64,
                    now.to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;
        self.get_profile(id)
    }

    pub fn get_profile(&self, id: ProfileId) -> Result<Profile> {
        let cipher = self.cipher.clone();
        let found = self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"),
                params![id.to_string()],
                |row| row_to_profile(cipher.as_ref(), row),
            )
            .optional()
        })?;
        match found {
            Some((profile, true)) => Ok(profile),
            Some((_, false)) => Err(Error::EncryptionRequired),
            None => Err(Error::not_found(format!("profile {id} not found"))),
        }
    }

    /// All profiles, newest first. Rows whose config or secrets cannot be
    /// read are skipped so one bad row never hides the rest.
    pub fn list_profiles(&self) -> Result<Vec<Profile>> {
        let cipher = self.cipher.clone();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY id DESC"
            ))?;
            let rows = stmt.query_map([], |row| row_to_profile(cipher.as_ref(), row))?;
            let mut out = Vec::new();
            for row in rows {
                match row {
                    Ok((profile, true)) => out.push(profile),
                    Ok((profile, false)) => {
                        tracing::warn!(profile = %profile.id, "skipping unreadable profile row");
                    }
                    Err(e) => tracing::warn!("skipping corrupted profile row: {e}"),
                }
            }
            Ok(out)
        })
    }

    pub fn update_profile(&self, id: ProfileId, update: ProfileUpdate) -> Result<Profile> {
        let current = self.get_profile(id)?;
        let name = update.name.unwrap_or(current.name);
        if name.trim().is_empty() {
            return Err(Error::invalid_argument("profile name must not be empty"));
        }
        let config = update.config.unwrap_or(current.config);
        let secrets = update.secrets.unwrap_or(current.secrets);
        let secrets_json = encrypt_secrets(self.cipher(), &secrets)?;
        let preserve = update
            .preserve_leading_slash
            .unwrap_or(current.preserve_leading_slash);
        let skip_verify = update
            .tls_insecure_skip_verify
            .unwrap_or(current.tls_insecure_skip_verify);
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE profiles SET name = ?2, config_json = ?3, secrets_json = ?4, \
                 preserve_leading_slash = ?5, tls_insecure_skip_verify = ?6, updated_at = ?7 \
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    name,
                    config.to_string(),
                    secrets_json,
                    preserve as i64,
                    skip_verify as i64,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;
        self.get_profile(id)
    }

    /// Delete a profile. Refused while queued or running jobs reference it.
    pub fn delete_profile(&self, id: ProfileId) -> Result<()> {
        let active: i64 = self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM jobs WHERE profile_id = ?1 AND status IN ('queued', 'running')",
                params![id.to_string()],
                |row| row.get(0),
            )
        })?;
        if active > 0 {
            return Err(Error::conflict(format!(
                "profile has {active} active job(s); cancel them first"
            )));
        }
        let changed = self.with_conn(|conn| {
            conn.execute("DELETE FROM profiles WHERE id = ?1", params![id.to_string()])
        })?;
        if changed == 0 {
            return Err(Error::not_found(format!("profile {id} not found")));
        }
        Ok(())
    }

    /// One-shot migration: encrypt any plaintext secret field in place.
    /// Idempotent; a row that cannot be parsed is logged and skipped.
    /// Returns the number of rows rewritten.
    pub fn ensure_profiles_encrypted(&self) -> Result<usize> {
        let Some(cipher) = self.cipher.clone() else {
            return Ok(0);
        };
        let rows: Vec<(String, String)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, secrets_json FROM profiles")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })?;

        let mut migrated = 0;
        for (id, secrets_raw) in rows {
            let parsed: Value = match serde_json::from_str(&secrets_raw) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(profile = %id, "skipping unparseable secrets during migration: {e}");
                    continue;
                }
            };
            let needs_work = matches!(
                &parsed,
                Value::Object(map) if map.values().any(|v| matches!(v, Value::String(s) if !s.is_empty() && !is_encrypted(s)))
            );
            if !needs_work {
                continue;
            }
            let encrypted = encrypt_secrets(Some(&cipher), &parsed)?;
            self.with_conn(|conn| {
                conn.execute(
                    "UPDATE profiles SET secrets_json = ?2 WHERE id = ?1",
                    params![id, encrypted],
                )
            })?;
            migrated += 1;
        }
        if migrated > 0 {
            tracing::info!(rows = migrated, "encrypted plaintext profile secrets");
        }
        Ok(migrated)
    }

    // ---- Profile TLS ----

    /// Store mTLS material for a profile. Requires an encryption key.
    pub fn put_profile_tls(&self, id: ProfileId, tls: &ProfileTlsConfig) -> Result<()> {
        let Some(cipher) = self.cipher() else {
            return Err(Error::EncryptionRequired);
        };
        // Ensure the profile exists first.
        self.get_profile(id)?;
        let payload = cipher
            .encrypt(&serde_json::to_string(tls)?)
            .map_err(|e| Error::internal(e.to_string()))?;
        let mode = match tls.mode {
            TlsMode::Disabled => "disabled",
            TlsMode::Mtls => "mtls",
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profile_tls (profile_id, schema_version, mode, payload, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(profile_id) DO UPDATE SET \
                 schema_version = ?2, mode = ?3, payload = ?4, updated_at = ?5",
                params![
                    id.to_string(),
                    TLS_SCHEMA_VERSION,
                    mode,
                    payload,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_profile_tls(&self, id: ProfileId) -> Result<Option<ProfileTlsConfig>> {
        let row: Option<(i64, String)> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT schema_version, payload FROM profile_tls WHERE profile_id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })?;
        let Some((version, payload)) = row else {
            return Ok(None);
        };
        if version != TLS_SCHEMA_VERSION {
            return Err(Error::internal(format!(
                "unsupported TLS config schema version {version}"
            )));
        }
        let Some(cipher) = self.cipher() else {
            return Err(Error::EncryptionRequired);
        };
        let raw = cipher
            .decrypt(&payload)
            .map_err(|e| Error::internal(e.to_string()))?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn delete_profile_tls(&self, id: ProfileId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM profile_tls WHERE profile_id = ?1",
                params![id.to_string()],
            )
            .map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn cipher() -> SecretCipher {
        let key = base64::engine::general_purpose::STANDARD.encode([5u8; 32]);
        SecretCipher::new(&key).unwrap()
    }

    fn new_profile(name: &str) -> NewProfile {
        NewProfile {
            name: name.into(),
            provider: ProviderKind::S3Compatible,
            config: serde_json::json!({"endpoint": "http://localhost:9000", "region": "us-east-1"}),
            secrets: serde_json::json!({
                "accessKeyId": "AKID",
                "secretAccessKey": "shh",
                "sessionToken": "tok",
            }),
            preserve_leading_slash: false,
            tls_insecure_skip_verify: false,
        }
    }

    #[test]
    fn test_create_get_round_trip_preserves_secrets() {
        let store = Store::open_in_memory(Some(cipher())).unwrap();
        let created = store.create_profile(new_profile("minio")).unwrap();
        let got = store.get_profile(created.id).unwrap();
        assert_eq!(got.secrets["accessKeyId"], "AKID");
        assert_eq!(got.secrets["secretAccessKey"], "shh");
        assert_eq!(got.secrets["sessionToken"], "tok");
    }

    #[test]
    fn test_secrets_are_ciphertext_at_rest() {
        let store = Store::open_in_memory(Some(cipher())).unwrap();
        let created = store.create_profile(new_profile("minio")).unwrap();
        let raw: String = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT secrets_json FROM profiles WHERE id = ?1",
                    params![created.id.to_string()],
                    |row| row.get(0),
                )
            })
            .unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert!(parsed["secretAccessKey"].as_str().unwrap().starts_with("enc:"));
        assert!(!raw.contains("shh"));
    }

    #[test]
    fn test_ciphertext_without_key_is_distinguished() {
        let with_key = Store::open_in_memory(Some(cipher())).unwrap();
        let created = with_key.create_profile(new_profile("minio")).unwrap();
        let raw: String = with_key
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT secrets_json FROM profiles WHERE id = ?1",
                    params![created.id.to_string()],
                    |row| row.get(0),
                )
            })
            .unwrap();

        let without_key = Store::open_in_memory(None).unwrap();
        without_key
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO profiles (id, name, provider, config_json, secrets_json, \
                     preserve_leading_slash, tls_insecure_skip_verify, created_at, updated_at) \
                     VALUES (?1, 'x', 's3_compatible', '{}', ?2, 0, 0, ?3, ?3)",
                    params![created.id.to_string(), raw, Utc::now().to_rfc3339()],
                )
            })
            .unwrap();
        let err = without_key.get_profile(created.id).unwrap_err();
        assert!(matches!(err, Error::EncryptionRequired));
    }

    #[test]
    fn test_plaintext_row_readable_after_key_added() {
        // Marker-absence path: a row written with no key decrypts unchanged
        // once a key is later configured.
        let store = Store::open_in_memory(None).unwrap();
        let created = store.create_profile(new_profile("legacy")).unwrap();

        let keyed = Store {
            conn: store.conn.clone(),
            cipher: Some(cipher()),
        };
        let got = keyed.get_profile(created.id).unwrap();
        assert_eq!(got.secrets["secretAccessKey"], "shh");
    }

    #[test]
    fn test_ensure_profiles_encrypted_is_idempotent() {
        let plain = Store::open_in_memory(None).unwrap();
        plain.create_profile(new_profile("a")).unwrap();
        plain.create_profile(new_profile("b")).unwrap();

        let keyed = Store {
            conn: plain.conn.clone(),
            cipher: Some(cipher()),
        };
        assert_eq!(keyed.ensure_profiles_encrypted().unwrap(), 2);
        // Second run touches nothing.
        assert_eq!(keyed.ensure_profiles_encrypted().unwrap(), 0);
        let got = keyed.list_profiles().unwrap();
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|p| p.secrets["secretAccessKey"] == "shh"));
    }

    #[test]
    fn test_delete_profile_with_active_jobs_refused() {
        let store = Store::open_in_memory(None).unwrap();
        let profile = store.create_profile(new_profile("busy")).unwrap();
        store
            .enqueue_job(crate::NewJob {
                profile_id: profile.id,
                job_type: objectdeck_common::JobType::TransferDeletePrefix,
                payload: serde_json::json!({"bucket": "b", "prefix": "p/"}),
            })
            .unwrap();
        let err = store.delete_profile(profile.id).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_tls_requires_key_and_round_trips() {
        let no_key = Store::open_in_memory(None).unwrap();
        let p = no_key.create_profile(new_profile("x")).unwrap();
        let tls = ProfileTlsConfig {
            mode: TlsMode::Mtls,
            client_cert_pem: Some("CERT".into()),
            client_key_pem: Some("KEY".into()),
            ca_pem: None,
        };
        assert!(matches!(
            no_key.put_profile_tls(p.id, &tls).unwrap_err(),
            Error::EncryptionRequired
        ));

        let keyed = Store {
            conn: no_key.conn.clone(),
            cipher: Some(cipher()),
        };
        keyed.put_profile_tls(p.id, &tls).unwrap();
        assert_eq!(keyed.get_profile_tls(p.id).unwrap(), Some(tls));
        keyed.delete_profile_tls(p.id).unwrap();
        assert_eq!(keyed.get_profile_tls(p.id).unwrap(), None);
    }

    #[test]
    fn test_unknown_tls_schema_rejected() {
        let store = Store::open_in_memory(Some(cipher())).unwrap();
        let p = store.create_profile(new_profile("x")).unwrap();
        store
            .put_profile_tls(
                p.id,
                &ProfileTlsConfig {
                    mode: TlsMode::Disabled,
                    client_cert_pem: None,
                    client_key_pem: None,
                    ca_pem: None,
                },
            )
            .unwrap();
        store
            .with_conn(|conn| conn.execute("UPDATE profile_tls SET schema_version = 9", []))
            .unwrap();
        assert!(store.get_profile_tls(p.id).is_err());
    }
}
