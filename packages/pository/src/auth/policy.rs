//! Upload authorization for workload identities. API-key uploads are
//! authorized by role and scope in the key store instead.

use crate::config::Config;

use super::WorkloadClaims;

/// Decide whether the workflow behind `claims` may upload `package`.
/// Returns the denial reason otherwise.
pub fn authorize_upload(
    config: &Config,
    claims: &WorkloadClaims,
    package: &str,
) -> Result<(), String> {
    if claims.event_name.as_deref() == Some("pull_request") {
        return Err(String::from("pull_request workflows may not upload"));
    }

    if let Some(allowed) = config.oidc_overrides.get(&claims.repository) {
        if allowed.iter().any(|p| p == "*" || p == package) {
            return Ok(());
        }
        return Err(format!(
            "override for {} does not allow package {package}",
            claims.repository
        ));
    }

    let Some((owner, repo_name)) = claims.repository.split_once('/') else {
        return Err(format!(
            "malformed repository claim {:?}",
            claims.repository
        ));
    };
    if !config.oidc_allowed_owners.iter().any(|o| o == owner) {
        return Err(format!("owner {owner} is not allowed to upload"));
    }
    if config.oidc_require_private && claims.repository_visibility.as_deref() != Some("private") {
        return Err(format!(
            "repository {} is not private",
            claims.repository
        ));
    }
    if package != repo_name {
        return Err(format!(
            "by default a workflow may only upload the package named after its repository; \
             {package} does not match {repo_name}"
        ));
    }
    Ok(())
}
