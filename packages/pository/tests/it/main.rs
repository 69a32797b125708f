//! End-to-end scenarios against a full server over HTTP.

use axum_test::{
    TestResponse, TestServer,
    multipart::{MultipartForm, Part},
};
use http::{HeaderName, HeaderValue, StatusCode};
use pository::{
    auth::Role,
    storage::{ListFilters, PACKAGE_MIME},
    testing::{
        PositoryTestServer, PositoryTestServerConfig,
        fixtures::{DebBuilder, simple_deb, workload_token},
    },
};
use sha2::{Digest as _, Sha256};

fn api_key_header(secret: &str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-api-key"),
        HeaderValue::from_str(secret).expect("test secrets are ASCII"),
    )
}

fn bearer_header(token: &str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("authorization"),
        HeaderValue::from_str(&format!("Bearer {token}")).expect("tokens are ASCII"),
    )
}

async fn upload(server: &TestServer, secret: &str, filename: &str, deb: &[u8]) -> TestResponse {
    let (name, value) = api_key_header(secret);
    let form = MultipartForm::new()
        .add_text("repo", "default")
        .add_text("distribution", "stable")
        .add_text("component", "main")
        .add_part(
            "file",
            Part::bytes(deb.to_vec())
                .file_name(filename.to_string())
                .mime_type(PACKAGE_MIME),
        );
    server
        .post("/api/v1/packages")
        .add_header(name, value)
        .multipart(form)
        .await
}

/// Fresh install: upload a gzip deb, find it in the JSON API, the apt index
/// and the pool, and check the Release digests cover the served bytes.
#[test_log::test(tokio::test)]
async fn upload_then_apt_update_flow() {
    let server = PositoryTestServer::new(PositoryTestServerConfig::default()).await;
    let deb = simple_deb("hello", "1.0", "amd64", &[("Description", "greets you")]);

    let response = upload(&server.http, &server.admin_key, "hello_1.0_amd64.deb", &deb).await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let metadata: serde_json::Value = response.json();
    assert_eq!(metadata["name"], "hello");
    assert_eq!(metadata["version"], "1.0");
    assert_eq!(metadata["architecture"], "amd64");
    assert_eq!(metadata["sha256"], hex::encode(Sha256::digest(&deb)));
    assert_eq!(metadata["description"], "greets you");

    let packages = server
        .http
        .get("/apt/default/dists/stable/main/binary-amd64/Packages")
        .await;
    assert_eq!(packages.status_code(), StatusCode::OK);
    let text = packages.text();
    assert!(text.contains("Package: hello"));
    assert!(text.contains("Version: 1.0"));
    assert!(text.contains("Filename: pool/stable/main/amd64/hello_1.0_amd64.deb"));
    assert!(text.ends_with("\n\n"));

    let pool = server
        .http
        .get("/apt/default/pool/stable/main/amd64/hello_1.0_amd64.deb")
        .await;
    assert_eq!(pool.status_code(), StatusCode::OK);
    assert_eq!(pool.as_bytes().to_vec(), deb);
    assert_eq!(
        pool.headers()
            .get("x-checksum-sha256")
            .unwrap()
            .to_str()
            .unwrap(),
        hex::encode(Sha256::digest(&deb))
    );

    let release = server.http.get("/apt/default/dists/stable/Release").await;
    assert_eq!(release.status_code(), StatusCode::OK);
    let release_text = release.text();
    assert!(release_text.contains("Origin: Pository"));
    assert!(release_text.contains("Codename: pository-default-stable"));
    let advertised = sha256_for_slice(&release_text, "main/binary-amd64/Packages");
    assert_eq!(advertised, hex::encode(Sha256::digest(text.as_bytes())));
}

/// `Architecture: all` packages appear in every native slice, and no
/// `binary-all` index is served.
#[test_log::test(tokio::test)]
async fn architecture_all_folds_into_native_slices() {
    let server = PositoryTestServer::new(PositoryTestServerConfig::default()).await;
    let shared = simple_deb("shared", "1.0", "all", &[]);
    let native = simple_deb("native", "1.0", "arm64", &[]);
    assert_eq!(
        upload(&server.http, &server.admin_key, "shared_1.0_all.deb", &shared)
            .await
            .status_code(),
        StatusCode::CREATED
    );
    assert_eq!(
        upload(&server.http, &server.admin_key, "native_1.0_arm64.deb", &native)
            .await
            .status_code(),
        StatusCode::CREATED
    );

    for slice in ["binary-amd64", "binary-arm64"] {
        let packages = server
            .http
            .get(&format!("/apt/default/dists/stable/main/{slice}/Packages"))
            .await;
        assert!(
            packages.text().contains("Package: shared"),
            "shared missing from {slice}"
        );
    }
    assert!(
        !server
            .http
            .get("/apt/default/dists/stable/main/binary-amd64/Packages")
            .await
            .text()
            .contains("Package: native")
    );

    let all = server
        .http
        .get("/apt/default/dists/stable/main/binary-all/Packages")
        .await;
    assert_eq!(all.status_code(), StatusCode::NOT_FOUND);

    let release = server.http.get("/apt/default/dists/stable/Release").await.text();
    assert!(release.contains("Architectures: amd64 arm64"));
    assert!(!release.contains("binary-all"));
}

/// Overwrite: the second upload of the same location wins and the index
/// holds a single entry.
#[test_log::test(tokio::test)]
async fn overwrite_replaces_the_artifact() {
    let server = PositoryTestServer::new(PositoryTestServerConfig::default()).await;
    let first = simple_deb("hello", "1.0", "amd64", &[("Description", "first build")]);
    let second = simple_deb("hello", "1.0", "amd64", &[("Description", "second build")]);
    assert_ne!(first, second);

    upload(&server.http, &server.admin_key, "hello_1.0_amd64.deb", &first).await;
    upload(&server.http, &server.admin_key, "hello_1.0_amd64.deb", &second).await;

    let (name, value) = api_key_header(&server.admin_key);
    let list: serde_json::Value = server
        .http
        .get("/api/v1/packages")
        .add_header(name, value)
        .await
        .json();
    let packages = list["packages"].as_array().unwrap();
    assert_eq!(packages.len(), 1);
    assert_eq!(
        packages[0]["sha256"],
        hex::encode(Sha256::digest(&second))
    );
}

/// Role checks: read cannot upload, write cannot delete, admin can.
#[test_log::test(tokio::test)]
async fn role_hierarchy_is_enforced() {
    let server = PositoryTestServer::new(PositoryTestServerConfig::default()).await;
    let (_, read_secret) = server.create_key(Role::Read).await;
    let (_, write_secret) = server.create_key(Role::Write).await;
    let deb = simple_deb("hello", "1.0", "amd64", &[]);

    let denied = upload(&server.http, &read_secret, "hello_1.0_amd64.deb", &deb).await;
    assert_eq!(denied.status_code(), StatusCode::FORBIDDEN);

    let accepted = upload(&server.http, &write_secret, "hello_1.0_amd64.deb", &deb).await;
    assert_eq!(accepted.status_code(), StatusCode::CREATED);

    let path = "/api/v1/packages/default/stable/main/amd64/hello/1.0";
    let (name, value) = api_key_header(&write_secret);
    let delete_as_write = server.http.delete(path).add_header(name, value).await;
    assert_eq!(delete_as_write.status_code(), StatusCode::FORBIDDEN);

    let (name, value) = api_key_header(&server.admin_key);
    let delete_as_admin = server.http.delete(path).add_header(name, value).await;
    assert_eq!(delete_as_admin.status_code(), StatusCode::NO_CONTENT);

    let (name, value) = api_key_header(&server.admin_key);
    let delete_again = server.http.delete(path).add_header(name, value).await;
    assert_eq!(delete_again.status_code(), StatusCode::NOT_FOUND);
}

/// Workload identity: the default convention allows only the package named
/// after the repository; pull_request events are denied outright.
#[test_log::test(tokio::test)]
async fn workload_identity_upload_policy() {
    let server = PositoryTestServer::new(PositoryTestServerConfig {
        oidc_audience: Some(String::from("pository")),
        oidc_allowed_owners: vec![String::from("alice")],
        oidc_require_private: true,
        ..PositoryTestServerConfig::default()
    })
    .await;

    let token = workload_token("pository", "alice/foo", "private", "push");
    let deb = simple_deb("foo", "1.0", "amd64", &[]);
    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(deb.clone()).file_name("foo_1.0_amd64.deb"),
    );
    let (name, value) = bearer_header(&token);
    let accepted = server
        .http
        .post("/api/v1/packages")
        .add_header(name, value)
        .multipart(form)
        .await;
    assert_eq!(accepted.status_code(), StatusCode::CREATED);
    let metadata: serde_json::Value = accepted.json();
    assert_eq!(metadata["uploaderKeyId"], "oidc:alice/foo");

    let bar = simple_deb("bar", "1.0", "amd64", &[]);
    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(bar).file_name("bar_1.0_amd64.deb"),
    );
    let (name, value) = bearer_header(&token);
    let denied = server
        .http
        .post("/api/v1/packages")
        .add_header(name, value)
        .multipart(form)
        .await;
    assert_eq!(denied.status_code(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = denied.json();
    assert!(
        body["detail"]
            .as_str()
            .unwrap()
            .contains("named after its repository")
    );

    let pr_token = workload_token("pository", "alice/foo", "private", "pull_request");
    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(deb).file_name("foo_1.0_amd64.deb"),
    );
    let (name, value) = bearer_header(&pr_token);
    let pr_denied = server
        .http
        .post("/api/v1/packages")
        .add_header(name, value)
        .multipart(form)
        .await;
    assert_eq!(pr_denied.status_code(), StatusCode::FORBIDDEN);
}

/// Apt consistency: `Multi-Arch` appears exactly for the package that
/// declared it, and Release digests match the served Packages bytes.
#[test_log::test(tokio::test)]
async fn multi_arch_is_never_synthesized() {
    let server = PositoryTestServer::new(PositoryTestServerConfig::default()).await;
    let declares = simple_deb(
        "declares",
        "1.0",
        "amd64",
        &[("Multi-Arch", "foreign"), ("Installed-Size", "123")],
    );
    let plain = simple_deb("plain", "1.0", "amd64", &[]);
    upload(&server.http, &server.admin_key, "declares_1.0_amd64.deb", &declares).await;
    upload(&server.http, &server.admin_key, "plain_1.0_amd64.deb", &plain).await;

    let packages = server
        .http
        .get("/apt/default/dists/stable/main/binary-amd64/Packages")
        .await
        .text();
    let stanzas: Vec<&str> = packages.trim_end().split("\n\n").collect();
    assert_eq!(stanzas.len(), 2);
    let declaring = stanzas
        .iter()
        .find(|s| s.contains("Package: declares"))
        .unwrap();
    assert!(declaring.contains("Multi-Arch: foreign"));
    assert!(declaring.contains("Installed-Size: 123"));
    let plain_stanza = stanzas
        .iter()
        .find(|s| s.contains("Package: plain"))
        .unwrap();
    assert!(!plain_stanza.contains("Multi-Arch"));
    assert!(!plain_stanza.contains("Installed-Size"));

    let release = server.http.get("/apt/default/dists/stable/Release").await.text();
    let advertised = sha256_for_slice(&release, "main/binary-amd64/Packages");
    assert_eq!(advertised, hex::encode(Sha256::digest(packages.as_bytes())));
}

#[test_log::test(tokio::test)]
async fn upload_boundaries() {
    let server = PositoryTestServer::new(PositoryTestServerConfig {
        max_upload_size: Some(4096),
        ..PositoryTestServerConfig::default()
    })
    .await;

    let tiny = upload(&server.http, &server.admin_key, "x_1.0_amd64.deb", b"!").await;
    assert_eq!(tiny.status_code(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = tiny.json();
    assert_eq!(body["error"], "VALIDATION_FAILURE");

    let oversized = vec![0u8; 4097];
    let too_big = upload(&server.http, &server.admin_key, "x_1.0_amd64.deb", &oversized).await;
    assert_eq!(too_big.status_code(), StatusCode::PAYLOAD_TOO_LARGE);

    let future = DebBuilder::new("Package: x\nVersion: 1.0\nArchitecture: amd64\n")
        .deb_version("3.0\n")
        .build();
    let unsupported = upload(&server.http, &server.admin_key, "x_1.0_amd64.deb", &future).await;
    assert_eq!(unsupported.status_code(), StatusCode::BAD_REQUEST);
}

#[test_log::test(tokio::test)]
async fn listing_an_empty_tree_yields_an_empty_array() {
    let server = PositoryTestServer::new(PositoryTestServerConfig::default()).await;
    let (name, value) = api_key_header(&server.admin_key);
    let list: serde_json::Value = server
        .http
        .get("/api/v1/packages")
        .add_header(name, value)
        .await
        .json();
    assert_eq!(list["packages"], serde_json::json!([]));
}

#[test_log::test(tokio::test)]
async fn management_api_requires_credentials() {
    let server = PositoryTestServer::new(PositoryTestServerConfig::default()).await;
    let response = server.http.get("/api/v1/packages").await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "AUTH_MISSING");

    let (name, value) = api_key_header("not-a-real-key");
    let response = server
        .http
        .get("/api/v1/packages")
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[test_log::test(tokio::test)]
async fn key_lifecycle_over_http() {
    let server = PositoryTestServer::new(PositoryTestServerConfig::default()).await;
    let (name, value) = api_key_header(&server.admin_key);
    let created = server
        .http
        .post("/api/v1/keys")
        .add_header(name, value)
        .json(&serde_json::json!({"role": "write", "description": "ci uploads"}))
        .await;
    assert_eq!(created.status_code(), StatusCode::CREATED);
    let created: serde_json::Value = created.json();
    let id = created["id"].as_str().unwrap().to_string();
    let secret = created["key"].as_str().unwrap().to_string();
    assert_eq!(secret.len(), 64);

    // The new key works, scoped to its role.
    let deb = simple_deb("hello", "1.0", "amd64", &[]);
    assert_eq!(
        upload(&server.http, &secret, "hello_1.0_amd64.deb", &deb)
            .await
            .status_code(),
        StatusCode::CREATED
    );

    let (name, value) = api_key_header(&server.admin_key);
    let listed: serde_json::Value = server
        .http
        .get("/api/v1/keys")
        .add_header(name, value)
        .await
        .json();
    let keys = listed["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["id"], id.as_str());
    assert!(keys[0].get("hash").is_none());
    assert!(!listed.to_string().contains(&secret));

    let (name, value) = api_key_header(&server.admin_key);
    let deleted = server
        .http
        .delete(&format!("/api/v1/keys/{id}"))
        .add_header(name, value)
        .await;
    assert_eq!(deleted.status_code(), StatusCode::NO_CONTENT);

    let revoked = upload(&server.http, &secret, "hello_1.0_amd64.deb", &deb).await;
    assert_eq!(revoked.status_code(), StatusCode::UNAUTHORIZED);
}

#[test_log::test(tokio::test)]
async fn compatibility_download_route() {
    let server = PositoryTestServer::new(PositoryTestServerConfig::default()).await;
    let deb = simple_deb("hello", "1.0", "amd64", &[]);
    upload(&server.http, &server.admin_key, "hello_1.0_amd64.deb", &deb).await;

    // Requires read auth by default.
    let anonymous = server
        .http
        .get("/repo/stable/main/amd64/hello_1.0.deb")
        .await;
    assert_eq!(anonymous.status_code(), StatusCode::UNAUTHORIZED);

    let (_, read_secret) = server.create_key(Role::Read).await;
    let (name, value) = api_key_header(&read_secret);
    let download = server
        .http
        .get("/repo/stable/main/amd64/hello_1.0.deb")
        .add_header(name, value)
        .await;
    assert_eq!(download.status_code(), StatusCode::OK);
    assert_eq!(download.as_bytes().to_vec(), deb);
    assert_eq!(
        download
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap(),
        PACKAGE_MIME
    );
    assert_eq!(
        download
            .headers()
            .get("content-disposition")
            .unwrap()
            .to_str()
            .unwrap(),
        "attachment; filename=\"hello_1.0_amd64.deb\""
    );
}

#[test_log::test(tokio::test)]
async fn download_auth_toggle_allows_anonymous_downloads() {
    let server = PositoryTestServer::new(PositoryTestServerConfig {
        download_auth: false,
        ..PositoryTestServerConfig::default()
    })
    .await;
    let deb = simple_deb("hello", "1.0", "amd64", &[]);
    upload(&server.http, &server.admin_key, "hello_1.0_amd64.deb", &deb).await;

    let download = server
        .http
        .get("/repo/stable/main/amd64/hello_1.0_amd64.deb")
        .await;
    assert_eq!(download.status_code(), StatusCode::OK);
}

#[test_log::test(tokio::test)]
async fn allowed_repos_gate_uploads() {
    let server = PositoryTestServer::new(PositoryTestServerConfig {
        allowed_repos: vec![String::from("internal")],
        ..PositoryTestServerConfig::default()
    })
    .await;
    let deb = simple_deb("hello", "1.0", "amd64", &[]);
    // The helper uploads to `default`, which is not on the allow-list.
    let denied = upload(&server.http, &server.admin_key, "hello_1.0_amd64.deb", &deb).await;
    assert_eq!(denied.status_code(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = denied.json();
    assert_eq!(body["error"], "REPO_NOT_ALLOWED");
}

#[test_log::test(tokio::test)]
async fn probes_and_metrics() {
    let server = PositoryTestServer::new(PositoryTestServerConfig::default()).await;
    let health = server.http.get("/healthz").await;
    assert_eq!(health.status_code(), StatusCode::OK);
    let health: serde_json::Value = health.json();
    assert_eq!(health["status"], "ok");

    let ready = server.http.get("/readyz").await;
    assert_eq!(ready.status_code(), StatusCode::OK);
    let ready: serde_json::Value = ready.json();
    assert_eq!(ready["checks"]["storage"], true);

    let deb = simple_deb("hello", "1.0", "amd64", &[]);
    upload(&server.http, &server.admin_key, "hello_1.0_amd64.deb", &deb).await;

    let metrics = server.http.get("/metrics").await.text();
    assert!(metrics.contains("pository_requests_total"));
    assert!(metrics.contains("pository_packages_total 1"));
    assert!(metrics.contains("pository_upload_bytes_total"));
}

#[test_log::test(tokio::test)]
async fn pool_rejects_malformed_filenames() {
    let server = PositoryTestServer::new(PositoryTestServerConfig::default()).await;
    let bad = server
        .http
        .get("/apt/default/pool/stable/main/amd64/not-a-package.tgz")
        .await;
    assert_eq!(bad.status_code(), StatusCode::BAD_REQUEST);

    let absent = server
        .http
        .get("/apt/default/pool/stable/main/amd64/ghost_1.0_amd64.deb")
        .await;
    assert_eq!(absent.status_code(), StatusCode::NOT_FOUND);
}

/// The stored index entry matches the artifact byte-for-byte after an
/// upload, seen through the storage engine directly.
#[test_log::test(tokio::test)]
async fn index_and_artifact_agree() {
    let server = PositoryTestServer::new(PositoryTestServerConfig::default()).await;
    let deb = simple_deb("hello", "1.0", "amd64", &[]);
    upload(&server.http, &server.admin_key, "hello_1.0_amd64.deb", &deb).await;

    let entries = server
        .state
        .storage
        .list_packages(&ListFilters::default())
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    let path = server
        .state
        .storage
        .package_file(&entries[0].location())
        .await
        .unwrap();
    let on_disk = tokio::fs::read(path).await.unwrap();
    assert_eq!(entries[0].sha256, hex::encode(Sha256::digest(&on_disk)));
    assert_eq!(entries[0].size as usize, on_disk.len());
}

/// Pull the SHA256 advertised for a slice out of a Release document.
fn sha256_for_slice(release: &str, slice_path: &str) -> String {
    let mut in_sha_block = false;
    for line in release.lines() {
        if line == "SHA256:" {
            in_sha_block = true;
            continue;
        }
        if in_sha_block && line.ends_with(slice_path) {
            return line
                .split_whitespace()
                .next()
                .expect("hash lines have three columns")
                .to_string();
        }
    }
    panic!("no SHA256 entry for {slice_path} in:\n{release}");
}
