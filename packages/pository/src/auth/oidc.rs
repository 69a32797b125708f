//! Workload-identity verification: RS256 JWTs issued by the CI platform,
//! checked against its published JWKS.

use std::{collections::HashMap, time::Duration};

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header, jwk::JwkSet};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::AuthError;

pub const ISSUER: &str = "https://token.actions.githubusercontent.com";
pub const JWKS_URL: &str = "https://token.actions.githubusercontent.com/.well-known/jwks";

const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Claims of interest from a verified token. Everything else in the token is
/// discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadClaims {
    /// `<owner>/<repo>`.
    pub repository: String,
    #[serde(default)]
    pub repository_visibility: Option<String>,
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub workflow: Option<String>,
}

pub struct OidcVerifier {
    audience: String,
    http: reqwest::Client,
    /// Decoding keys by `kid`, filled lazily from the JWKS endpoint.
    keys: RwLock<HashMap<String, DecodingKey>>,
}

impl OidcVerifier {
    pub fn new(audience: String) -> Self {
        Self {
            audience,
            http: reqwest::Client::builder()
                .timeout(JWKS_FETCH_TIMEOUT)
                .build()
                .expect("reqwest client construction cannot fail"),
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Construct with a pre-populated key set instead of fetching; the test
    /// harness verifies tokens signed with a fixture key this way.
    pub fn with_jwks(audience: String, jwks: &JwkSet) -> Self {
        let mut keys = HashMap::new();
        insert_keys(&mut keys, jwks);
        Self {
            keys: RwLock::new(keys),
            ..Self::new(audience)
        }
    }

    /// Verify signature, issuer, audience and expiry; return the claims.
    #[instrument(skip(self, token))]
    pub async fn verify(&self, token: &str) -> Result<WorkloadClaims, AuthError> {
        let header =
            decode_header(token).map_err(|err| AuthError::InvalidToken(err.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::InvalidToken(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidToken(String::from("token has no key id")))?;

        let key = match self.keys.read().await.get(&kid).cloned() {
            Some(key) => key,
            None => {
                self.refresh_keys().await?;
                self.keys.read().await.get(&kid).cloned().ok_or_else(|| {
                    AuthError::InvalidToken(format!("no signing key with id {kid}"))
                })?
            }
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_audience(&[&self.audience]);
        let data = decode::<WorkloadClaims>(token, &key, &validation)
            .map_err(|err| AuthError::InvalidToken(err.to_string()))?;
        Ok(data.claims)
    }

    async fn refresh_keys(&self) -> Result<(), AuthError> {
        debug!(url = JWKS_URL, "fetching JWKS");
        let jwks: JwkSet = self
            .http
            .get(JWKS_URL)
            .send()
            .await
            .map_err(|err| AuthError::JwksFetch(err.to_string()))?
            .error_for_status()
            .map_err(|err| AuthError::JwksFetch(err.to_string()))?
            .json()
            .await
            .map_err(|err| AuthError::JwksFetch(err.to_string()))?;
        let mut keys = self.keys.write().await;
        insert_keys(&mut keys, &jwks);
        Ok(())
    }
}

fn insert_keys(keys: &mut HashMap<String, DecodingKey>, jwks: &JwkSet) {
    for jwk in &jwks.keys {
        let Some(kid) = jwk.common.key_id.clone() else {
            continue;
        };
        match DecodingKey::from_jwk(jwk) {
            Ok(key) => {
                keys.insert(kid, key);
            }
            Err(err) => debug!(kid, %err, "skipping unusable JWKS entry"),
        }
    }
}
