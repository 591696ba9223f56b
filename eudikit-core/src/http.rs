use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;

use crate::error::WalletError;

/// A thin wrapper on an HTTP client for making requests. Sets sensible
/// defaults such as timeouts and user-agent, and applies retry middleware
/// for transient failures.
pub struct HttpClient {
    client: reqwest::Client,
    timeout: Duration,
    max_retries: u32,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Initializes a new `HttpClient` instance.
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::new();
        let timeout = Duration::from_secs(10);
        let max_retries = 3; // total attempts = 4
        Self {
            client,
            timeout,
            max_retries,
        }
    }

    /// Creates a request builder with defaults applied.
    pub(crate) fn req(&self, method: Method, url: &str) -> RequestBuilder {
        if !url.starts_with("https") {
            tracing::warn!(url, "request to a non-https endpoint");
        }

        self.client
            .request(method, url)
            .timeout(self.timeout)
            .header(
                "User-Agent",
                format!("eudikit-core/{}", env!("CARGO_PKG_VERSION")),
            )
    }

    /// Creates a GET request builder with defaults applied.
    pub(crate) fn get(&self, url: &str) -> RequestBuilder {
        self.req(Method::GET, url)
    }

    /// Creates a POST request builder with defaults applied.
    pub(crate) fn post(&self, url: &str) -> RequestBuilder {
        self.req(Method::POST, url)
    }

    /// Sends a request built by `req`/`get`/`post`, retrying transient
    /// failures (429, 5xx, timeouts, connect errors) with exponential
    /// backoff.
    pub(crate) async fn handle(
        &self,
        request_builder: RequestBuilder,
    ) -> Result<Response, WalletError> {
        if request_builder.try_clone().is_none() {
            return execute_request_builder(request_builder)
                .await
                .map_err(Into::into);
        }

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.max_retries as usize);

        let template = request_builder
            .try_clone()
            .ok_or_else(|| WalletError::Network {
                url: "<unknown>".to_string(),
                status: None,
                error: "request cannot be retried because it is not cloneable".to_string(),
            })?;

        (|| async {
            let request_builder = template.try_clone().ok_or_else(|| {
                RequestHandleError::permanent(
                    "<unknown>".to_string(),
                    None,
                    "request cannot be retried because it is not cloneable".to_string(),
                )
            })?;
            execute_request_builder(request_builder).await
        })
        .retry(backoff)
        .when(RequestHandleError::is_retryable)
        .await
        .map_err(Into::into)
    }

    /// Sends the request and deserializes a 2xx JSON body, mapping OAuth
    /// error bodies (`{"error": ..., "error_description": ...}`) on non-2xx
    /// statuses to [`WalletError::Protocol`].
    pub(crate) async fn handle_json<T: serde::de::DeserializeOwned>(
        &self,
        request_builder: RequestBuilder,
    ) -> Result<T, WalletError> {
        let response = self.handle(request_builder).await?;
        json_or_protocol_error(response).await
    }
}

/// Deserializes a 2xx JSON body, mapping non-2xx statuses to either a
/// [`WalletError::Protocol`] (when the body is an OAuth error) or a
/// [`WalletError::Network`].
pub(crate) async fn json_or_protocol_error<T: serde::de::DeserializeOwned>(
    response: Response,
) -> Result<T, WalletError> {
    let status = response.status();
    let url = response.url().to_string();
    if status.is_success() {
        return response.json::<T>().await.map_err(|e| WalletError::Network {
            url,
            status: Some(status.as_u16()),
            error: format!("invalid response body: {e}"),
        });
    }

    let body = response.text().await.unwrap_or_default();
    Err(protocol_error(&url, status.as_u16(), &body))
}

/// Maps a non-2xx response body to the most specific error available.
pub(crate) fn protocol_error(url: &str, status: u16, body: &str) -> WalletError {
    #[derive(Deserialize)]
    struct OAuthError {
        error: String,
        #[serde(default)]
        error_description: Option<String>,
    }

    if let Ok(oauth) = serde_json::from_str::<OAuthError>(body) {
        return WalletError::Protocol {
            code: oauth.error,
            description: oauth.error_description.unwrap_or_default(),
        };
    }

    WalletError::Network {
        url: url.to_string(),
        status: Some(status),
        error: format!("request error with bad status code {status}"),
    }
}

#[derive(Debug)]
struct RequestHandleError {
    url: String,
    status: Option<u16>,
    error: String,
    retryable: bool,
}

impl RequestHandleError {
    fn retryable(url: String, status: Option<u16>, error: String) -> Self {
        Self {
            url,
            status,
            error,
            retryable: true,
        }
    }

    fn permanent(url: String, status: Option<u16>, error: String) -> Self {
        Self {
            url,
            status,
            error,
            retryable: false,
        }
    }

    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl From<RequestHandleError> for WalletError {
    fn from(value: RequestHandleError) -> Self {
        WalletError::Network {
            url: value.url,
            status: value.status,
            error: value.error,
        }
    }
}

async fn execute_request_builder(
    request_builder: RequestBuilder,
) -> Result<Response, RequestHandleError> {
    let (client, request) = request_builder.build_split();
    let request = request.map_err(|err| {
        RequestHandleError::permanent(
            err.url()
                .map(ToString::to_string)
                .unwrap_or_else(|| "<unknown>".to_string()),
            None,
            format!("request build failed: {err}"),
        )
    })?;
    let url = request.url().to_string();

    match client.execute(request).await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            if status == 429 || (500..600).contains(&status) {
                return Err(RequestHandleError::retryable(
                    url,
                    Some(status),
                    format!("request error with bad status code {status}"),
                ));
            }
            Ok(resp)
        }
        Err(err) => {
            if err.is_timeout() || err.is_connect() {
                return Err(RequestHandleError::retryable(
                    url,
                    None,
                    format!("request timeout/connect error: {err}"),
                ));
            }

            Err(RequestHandleError::permanent(
                url,
                None,
                format!("request failed: {err}"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn server_errors_are_retried_with_backoff() {
        let mut server = mockito::Server::new_async().await;
        // 1 initial attempt + 3 retries
        let failing = server
            .mock("GET", "/flaky")
            .with_status(500)
            .expect(4)
            .create_async()
            .await;

        let http = HttpClient::new();
        let result = http.handle(http.get(&format!("{}/flaky", server.url()))).await;

        match result.unwrap_err() {
            WalletError::Network { status, .. } => assert_eq!(status, Some(500)),
            other => panic!("unexpected error: {other:?}"),
        }
        failing.assert_async().await;
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let not_found = server
            .mock("GET", "/missing")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let http = HttpClient::new();
        let response = http
            .handle(http.get(&format!("{}/missing", server.url())))
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 404);
        not_found.assert_async().await;
    }

    #[tokio::test]
    async fn oauth_error_bodies_become_protocol_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant","error_description":"code expired"}"#)
            .create_async()
            .await;

        let http = HttpClient::new();
        let result: Result<serde_json::Value, _> = http
            .handle_json(http.post(&format!("{}/token", server.url())))
            .await;

        match result.unwrap_err() {
            WalletError::Protocol { code, description } => {
                assert_eq!(code, "invalid_grant");
                assert_eq!(description, "code expired");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
