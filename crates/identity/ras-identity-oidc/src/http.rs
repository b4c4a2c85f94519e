//! Outbound HTTP to provider endpoints with a timeout and a single retry.

use crate::error::{OidcError, OidcResult};
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RetryPolicy {
    /// Retry transport errors, timeouts and 5xx
    Idempotent,
    /// Retry only when the connection was never established
    ConnectOnly,
}

/// Shared HTTP client for talking to identity providers
#[derive(Clone, Debug)]
pub struct UpstreamHttp {
    client: Client,
    retry_backoff: Duration,
}

impl UpstreamHttp {
    pub fn new(timeout: Duration, retry_backoff: Duration) -> OidcResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OidcError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            retry_backoff,
        })
    }

    /// GET that may be retried once.
    pub async fn get(&self, url: &str) -> OidcResult<Response> {
        self.send(|| self.client.get(url), RetryPolicy::Idempotent).await
    }

    /// Form POST. Retried once only if the request never reached the
    /// provider, so an authorization code is never submitted twice.
    pub async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> OidcResult<Response> {
        self.send(|| self.client.post(url).form(form), RetryPolicy::ConnectOnly)
            .await
    }

    async fn send<F>(&self, build: F, policy: RetryPolicy) -> OidcResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        match build().send().await {
            Ok(response)
                if policy == RetryPolicy::Idempotent && response.status().is_server_error() =>
            {
                warn!(status = %response.status(), "upstream returned server error, retrying once");
                tokio::time::sleep(self.retry_backoff).await;
                Ok(build().send().await?)
            }
            Ok(response) => Ok(response),
            Err(err) if should_retry(&err, policy) => {
                warn!("upstream request failed ({}), retrying once", describe(&err));
                tokio::time::sleep(self.retry_backoff).await;
                Ok(build().send().await?)
            }
            Err(err) => {
                debug!("upstream request failed: {}", err);
                Err(err.into())
            }
        }
    }
}

fn should_retry(err: &reqwest::Error, policy: RetryPolicy) -> bool {
    match policy {
        RetryPolicy::Idempotent => err.is_connect() || err.is_timeout() || err.is_request(),
        RetryPolicy::ConnectOnly => err.is_connect(),
    }
}

fn describe(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else {
        "transport"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn http() -> UpstreamHttp {
        UpstreamHttp::new(Duration::from_secs(2), Duration::from_millis(10)).unwrap()
    }

    #[tokio::test]
    async fn test_get_retries_once_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let response = http().get(&format!("{}/jwks", server.uri())).await.unwrap();
        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn test_post_is_not_retried_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let response = http()
            .post_form(&format!("{}/token", server.uri()), &[("code", "abc")])
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 500);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let http = UpstreamHttp::new(Duration::from_millis(50), Duration::from_millis(10)).unwrap();
        let err = http
            .get(&format!("{}/slow", server.uri()))
            .await
            .unwrap_err();
        assert!(err.is_upstream());
    }
}
