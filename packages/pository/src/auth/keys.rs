//! API key store: a single JSON file of keys with Argon2id password hashes.
//! The secret is returned once at creation and never stored in plaintext.

use std::path::PathBuf;

use argon2::{
    Argon2, PasswordHasher as _, PasswordVerifier as _,
    password_hash::{PasswordHash, SaltString, rand_core::OsRng},
};
use rand::RngCore as _;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::AuthError;

/// Role hierarchy; the derived ordering follows declaration order, so
/// `Admin > Write > Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Read,
    Write,
    Admin,
}

/// Optional restriction of a key to particular repos and/or distributions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repos: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distributions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: String,
    /// Argon2id PHC string. Never exposed through the API.
    pub hash: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<KeyScope>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ApiKey {
    /// Identity synthesized when the configured bootstrap admin secret is
    /// presented.
    fn bootstrap_admin() -> Self {
        Self {
            id: String::from("admin"),
            hash: String::new(),
            role: Role::Admin,
            scope: None,
            created_at: OffsetDateTime::now_utc(),
            last_used: None,
            description: Some(String::from("bootstrap admin")),
        }
    }

    /// Role hierarchy plus scope membership, when a scope is attached and
    /// the request names a repo or distribution.
    pub fn has_permission(
        &self,
        required: Role,
        repo: Option<&str>,
        distribution: Option<&str>,
    ) -> bool {
        if self.role < required {
            return false;
        }
        let Some(scope) = &self.scope else {
            return true;
        };
        if let (Some(allowed), Some(repo)) = (&scope.repos, repo) {
            if !allowed.iter().any(|r| r == repo) {
                return false;
            }
        }
        if let (Some(allowed), Some(distribution)) = (&scope.distributions, distribution) {
            if !allowed.iter().any(|d| d == distribution) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeyFile {
    keys: Vec<ApiKey>,
}

pub struct KeyStore {
    path: PathBuf,
    admin_key: Option<String>,
    /// `None` until the file has been loaded once. A single lock is enough;
    /// operations are short apart from hash verification, which runs on the
    /// blocking pool with the lock released.
    inner: Mutex<Option<KeyFile>>,
}

impl KeyStore {
    pub fn new(path: impl Into<PathBuf>, admin_key: Option<String>) -> Self {
        Self {
            path: path.into(),
            admin_key,
            inner: Mutex::new(None),
        }
    }

    /// Generate a key. Returns the record plus the secret, which is shown
    /// exactly once.
    #[instrument(skip(self, description, scope))]
    pub async fn create_key(
        &self,
        role: Role,
        description: Option<String>,
        scope: Option<KeyScope>,
    ) -> Result<(ApiKey, String), AuthError> {
        let mut id_bytes = [0u8; 8];
        rand::rng().fill_bytes(&mut id_bytes);
        let mut secret_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut secret_bytes);
        let id = hex::encode(id_bytes);
        let secret = hex::encode(secret_bytes);

        let hash = {
            let secret = secret.clone();
            tokio::task::spawn_blocking(move || {
                let salt = SaltString::generate(&mut OsRng);
                Argon2::default()
                    .hash_password(secret.as_bytes(), &salt)
                    .map(|hash| hash.to_string())
            })
            .await
            .map_err(|err| AuthError::Store(err.to_string()))?
            .map_err(|err| AuthError::Store(err.to_string()))?
        };

        let key = ApiKey {
            id,
            hash,
            role,
            scope,
            created_at: OffsetDateTime::now_utc(),
            last_used: None,
            description,
        };

        let mut slot = self.inner.lock().await;
        let file = self.ensure_loaded(&mut slot).await?;
        file.keys.push(key.clone());
        self.persist(file).await?;
        Ok((key, secret))
    }

    /// Resolve a presented secret to a key. The bootstrap admin secret is
    /// checked first; otherwise each stored hash is verified in turn and the
    /// first match wins. Malformed hashes are skipped.
    pub async fn validate_key(&self, presented: &str) -> Result<Option<ApiKey>, AuthError> {
        if let Some(admin) = &self.admin_key {
            if !admin.is_empty() && presented == admin {
                return Ok(Some(ApiKey::bootstrap_admin()));
            }
        }

        let candidates: Vec<(String, String)> = {
            let mut slot = self.inner.lock().await;
            let file = self.ensure_loaded(&mut slot).await?;
            file.keys
                .iter()
                .map(|k| (k.id.clone(), k.hash.clone()))
                .collect()
        };

        let presented = presented.to_string();
        let matched = tokio::task::spawn_blocking(move || {
            let argon2 = Argon2::default();
            for (id, hash) in candidates {
                let Ok(parsed) = PasswordHash::new(&hash) else {
                    debug!(key_id = %id, "skipping key with malformed hash");
                    continue;
                };
                if argon2
                    .verify_password(presented.as_bytes(), &parsed)
                    .is_ok()
                {
                    return Some(id);
                }
            }
            None
        })
        .await
        .map_err(|err| AuthError::Store(err.to_string()))?;

        let Some(id) = matched else {
            return Ok(None);
        };

        let mut slot = self.inner.lock().await;
        let file = self.ensure_loaded(&mut slot).await?;
        let Some(key) = file.keys.iter_mut().find(|k| k.id == id) else {
            // Revoked between verification and now.
            return Ok(None);
        };
        key.last_used = Some(OffsetDateTime::now_utc());
        let key = key.clone();
        self.persist(file).await?;
        Ok(Some(key))
    }

    #[instrument(skip(self))]
    pub async fn delete_key(&self, id: &str) -> Result<bool, AuthError> {
        let mut slot = self.inner.lock().await;
        let file = self.ensure_loaded(&mut slot).await?;
        let before = file.keys.len();
        file.keys.retain(|k| k.id != id);
        if file.keys.len() == before {
            return Ok(false);
        }
        self.persist(file).await?;
        Ok(true)
    }

    pub async fn list_keys(&self) -> Result<Vec<ApiKey>, AuthError> {
        let mut slot = self.inner.lock().await;
        let file = self.ensure_loaded(&mut slot).await?;
        Ok(file.keys.clone())
    }

    async fn ensure_loaded<'a>(
        &self,
        slot: &'a mut Option<KeyFile>,
    ) -> Result<&'a mut KeyFile, AuthError> {
        if slot.is_none() {
            let file = match tokio::fs::read(&self.path).await {
                Ok(raw) => serde_json::from_slice(&raw)
                    .map_err(|err| AuthError::Store(format!("corrupt key store: {err}")))?,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => KeyFile::default(),
                Err(err) => return Err(err.into()),
            };
            *slot = Some(file);
        }
        Ok(slot.as_mut().expect("loaded above"))
    }

    async fn persist(&self, file: &KeyFile) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut raw = serde_json::to_vec_pretty(file)
            .map_err(|err| AuthError::Store(err.to_string()))?;
        raw.push(b'\n');
        let mut suffix = [0u8; 8];
        rand::rng().fill_bytes(&mut suffix);
        let tmp = self
            .path
            .with_extension(format!("tmp-{}", hex::encode(suffix)));
        tokio::fs::write(&tmp, &raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
