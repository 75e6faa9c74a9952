//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy},
};
use core_async::time::sleep;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("cmis-mirror/", env!("CARGO_PKG_VERSION"));

/// Reqwest-based HTTP client implementation
///
/// Provides HTTP operations with:
/// - Connection pooling via reqwest
/// - Retry with exponential backoff on 5xx/429 and transport failures
/// - rustls TLS
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Create a new HTTP client with default configuration
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(60))
    }

    /// Create a new HTTP client with custom timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| BridgeError::NotAvailable(format!("HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Wrap an already configured reqwest client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
        }
    }

    fn build_request(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(Self::convert_method(request.method), &request.url);

        if !request.query.is_empty() {
            req = req.query(&request.query);
        }

        for (key, value) in &request.headers {
            req = req.header(key, value);
        }

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        req
    }

    fn map_transport_error(e: reqwest::Error) -> BridgeError {
        if e.is_timeout() {
            BridgeError::Network(format!("Request timed out: {}", e))
        } else if e.is_connect() {
            BridgeError::Network(format!("Connection failed: {}", e))
        } else {
            BridgeError::Network(e.to_string())
        }
    }

    async fn into_response(response: reqwest::Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();
        let body = response.bytes().await.map_err(Self::map_transport_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.execute_with_retry(request, RetryPolicy::none()).await
    }

    /// Retries 5xx/429 responses and transport failures. When attempts run
    /// out on a retryable status, that last response is returned as-is so
    /// callers can classify it.
    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            debug!(
                attempt = attempt + 1,
                max_attempts,
                url = %request.url,
                "Executing HTTP request"
            );

            let last_attempt = attempt + 1 >= max_attempts;

            match self.build_request(&request).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if (status >= 500 || status == 429) && !last_attempt {
                        warn!(status, attempt = attempt + 1, "Retryable HTTP status");
                    } else {
                        return Self::into_response(response).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt = attempt + 1, "HTTP request failed");
                    if last_attempt {
                        return Err(Self::map_transport_error(e));
                    }
                }
            }

            let delay = policy.delay_for(attempt);
            debug!(delay_ms = delay.as_millis() as u64, "Retrying after delay");
            sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_client_creation() {
        assert!(ReqwestHttpClient::new().is_ok());
    }

    #[test]
    fn test_method_conversion() {
        assert_eq!(
            ReqwestHttpClient::convert_method(HttpMethod::Get),
            reqwest::Method::GET
        );
    }

    #[core_async::test]
    async fn test_connection_refused_maps_to_network_error() {
        let client = ReqwestHttpClient::with_timeout(Duration::from_secs(2)).unwrap();
        let request = HttpRequest::get("http://127.0.0.1:9/browser");

        let err = client.execute(request).await.unwrap_err();
        assert!(matches!(err, BridgeError::Network(_)));
    }
}
