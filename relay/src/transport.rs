use async_trait::async_trait;
use http::{HeaderMap, Method, StatusCode};
use std::time::Duration;
use url::Url;

/// A request ready to be sent, query string included in the URL.
#[derive(Clone, Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    // Waiting and sending the same request again may succeed.
    Temporary,
    Fatal,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("could not read the response: {0}")]
    Body(String),
    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TransportError::Timeout(_) | TransportError::Network(_) => FailureKind::Temporary,
            TransportError::Body(_) | TransportError::Request(_) => FailureKind::Fatal,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        let message = error_chain(&error);
        if error.is_timeout() {
            TransportError::Timeout(message)
        } else if error.is_connect() && is_tls_failure(&error) {
            TransportError::Request(message)
        } else if error.is_connect() || error.is_request() {
            TransportError::Network(message)
        } else if error.is_body() || error.is_decode() {
            TransportError::Body(message)
        } else {
            TransportError::Request(message)
        }
    }
}

// Socket level connect failures carry an io::Error in their source chain. TLS
// handshake and certificate failures carry none, or an InvalidData one (rustls).
fn is_tls_failure(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = error.source();
    while let Some(e) = source {
        if let Some(io_error) = e.downcast_ref::<std::io::Error>() {
            return io_error.kind() == std::io::ErrorKind::InvalidData;
        }
        source = e.source();
    }
    true
}

// reqwest keeps the useful part (connection refused, reset, ...) in the source chain.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(e) = source {
        message.push_str(": ");
        message.push_str(&e.to_string());
        source = e.source();
    }
    message
}

/// Sends one HTTP request.
///
/// The delivery client owns retries and status handling; a transport only reports
/// the status code of a response whose body was read, or why there was none.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &OutboundRequest) -> Result<StatusCode, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration, allow_self_signed_cert: bool) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(0)
            .http1_only()
            // Also disables hostname verification.
            .danger_accept_invalid_certs(allow_self_signed_cert)
            .build()?;

        Ok(HttpTransport { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &OutboundRequest) -> Result<StatusCode, TransportError> {
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        tracing::debug!(
            "code={} url={} body={}",
            status.as_u16(),
            request.url,
            String::from_utf8_lossy(&body)
        );

        Ok(status)
    }
}
