//! Transport boundary — the single seam between the dispatcher and the network.

use crate::config::HttpConfig;
use crate::error::{Error, Result};
use crate::types::{Request, Response};

/// Abstraction over outbound request execution, enabling testability.
///
/// Implementations must surface transport-level timeouts as
/// [`Error::TransportTimeout`] so the retry layer can distinguish them from
/// hard failures. The transport executes each request exactly once; retries
/// live in [`RequestExecutor`](crate::executor::RequestExecutor).
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Execute one request and return the response
    async fn execute(&self, request: &Request) -> Result<Response>;
}

/// Production [`Transport`] backed by a shared reqwest client.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build an HTTP transport from configuration
    ///
    /// The client carries the configured User-Agent and per-request timeout;
    /// redirects are followed by reqwest, and the post-redirect URL is
    /// reported back on the [`Response`] so relative references resolve
    /// against the host that actually served the page.
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &Request) -> Result<Response> {
        let mut builder = self.client.get(request.url().clone());
        for (name, value) in request.headers() {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(classify_reqwest_error)?
            .to_vec();

        tracing::trace!(
            status,
            url = %final_url,
            content_type = content_type.as_deref().unwrap_or(""),
            bytes = body.len(),
            "Transport call completed"
        );

        Ok(Response {
            status,
            final_url,
            content_type,
            body,
        })
    }
}

/// Map a reqwest error into the retry taxonomy
///
/// Timeouts become [`Error::TransportTimeout`]; everything else is a hard
/// network failure.
fn classify_reqwest_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::TransportTimeout
    } else {
        Error::Network(err)
    }
}
