//! OIDC provider discovery via the `.well-known` endpoint.

use crate::error::{OidcError, OidcResult};
use crate::http::UpstreamHttp;
use crate::types::DiscoveryDocument;
use tracing::debug;

/// Fetch and sanity-check a discovery document
pub async fn discover(http: &UpstreamHttp, discovery_url: &str) -> OidcResult<DiscoveryDocument> {
    let response = http.get(discovery_url).await?;

    if !response.status().is_success() {
        return Err(OidcError::Upstream(format!(
            "discovery returned status {}",
            response.status()
        )));
    }

    let document: DiscoveryDocument = response
        .json()
        .await
        .map_err(|e| OidcError::Upstream(format!("malformed discovery document: {}", e)))?;

    if document.issuer.trim().is_empty()
        || document.authorization_endpoint.trim().is_empty()
        || document.token_endpoint.trim().is_empty()
        || document.jwks_uri.trim().is_empty()
    {
        return Err(OidcError::Upstream(
            "discovery document is missing mandatory fields".to_string(),
        ));
    }

    debug!(issuer = %document.issuer, "Fetched discovery document");
    Ok(document)
}
