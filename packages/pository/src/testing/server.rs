//! A full Pository server over a real HTTP transport, backed by a temporary
//! data tree that is cleaned up on drop.

use std::{collections::HashMap, sync::Arc};

use async_tempfile::TempDir;
use axum_test::TestServer;

use crate::{
    auth::{KeyStore, OidcVerifier, Role},
    config::Config,
    events::EventBus,
    metrics::Metrics,
    server::{self, ServerState},
    storage::Storage,
    testing::fixtures,
};

pub const TEST_ADMIN_KEY: &str = "INSECURE_TEST_ADMIN_KEY";

pub struct PositoryTestServer {
    /// Listens on an open port; request directly or take `server_url` for an
    /// external client.
    pub http: TestServer,
    /// The bootstrap admin secret the server was started with.
    pub admin_key: String,
    /// Direct access to the wired components.
    pub state: ServerState,
    /// Owns the on-disk tree for the server's lifetime.
    pub data_dir: TempDir,
}

pub struct PositoryTestServerConfig {
    pub admin_key: Option<String>,
    pub download_auth: bool,
    pub max_upload_size: Option<u64>,
    pub allowed_repos: Vec<String>,
    pub oidc_audience: Option<String>,
    pub oidc_allowed_owners: Vec<String>,
    pub oidc_require_private: bool,
    pub oidc_overrides: HashMap<String, Vec<String>>,
}

impl Default for PositoryTestServerConfig {
    fn default() -> Self {
        Self {
            admin_key: None,
            download_auth: true,
            max_upload_size: None,
            allowed_repos: Vec::new(),
            oidc_audience: None,
            oidc_allowed_owners: Vec::new(),
            oidc_require_private: false,
            oidc_overrides: HashMap::new(),
        }
    }
}

impl PositoryTestServer {
    pub async fn new(test_config: PositoryTestServerConfig) -> Self {
        let data_dir = TempDir::new().await.expect("create temp dir");
        let admin_key = test_config
            .admin_key
            .unwrap_or_else(|| String::from(TEST_ADMIN_KEY));

        let mut config = Config {
            data_root: data_dir.dir_path().join("data"),
            log_path: data_dir.dir_path().join("pository.log"),
            api_keys_path: data_dir.dir_path().join("api-keys.json"),
            admin_key: Some(admin_key.clone()),
            download_auth: test_config.download_auth,
            allowed_repos: test_config.allowed_repos,
            oidc_audience: test_config.oidc_audience,
            oidc_allowed_owners: test_config.oidc_allowed_owners,
            oidc_require_private: test_config.oidc_require_private,
            oidc_overrides: test_config.oidc_overrides,
            ..Config::default()
        };
        if let Some(max_upload_size) = test_config.max_upload_size {
            config.max_upload_size = max_upload_size;
        }
        config.ensure_directories().expect("create test directories");
        let config = Arc::new(config);

        let events = Arc::new(EventBus::new());
        let state = ServerState {
            storage: Arc::new(Storage::new(config.data_root.clone(), events.clone())),
            keys: Arc::new(KeyStore::new(
                config.api_keys_path.clone(),
                config.admin_key.clone(),
            )),
            oidc: config.oidc_audience.clone().map(|audience| {
                // Verify against the fixture key instead of fetching the
                // real JWKS.
                Arc::new(OidcVerifier::with_jwks(audience, &fixtures::test_jwk_set()))
            }),
            metrics: Arc::new(Metrics::new()),
            events,
            config,
        };

        let http = TestServer::builder()
            .http_transport()
            .build(server::new(state.clone()))
            .expect("create test server");

        Self {
            http,
            admin_key,
            state,
            data_dir,
        }
    }

    /// Mint a key directly through the store; returns `(id, secret)`.
    pub async fn create_key(&self, role: Role) -> (String, String) {
        let (key, secret) = self
            .state
            .keys
            .create_key(role, None, None)
            .await
            .expect("create test key");
        (key.id, secret)
    }
}
