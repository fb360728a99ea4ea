use crate::address::{AddressError, validate_ip, validate_url};
use crate::config::ApiConfig;
use crate::metrics_defs::{
    DELIVERY_ATTEMPTS, DELIVERY_DURATION, DELIVERY_FAILURES, DELIVERY_RETRIES, counter, histogram,
};
use crate::response::DeliveryResponse;
use crate::transport::{FailureKind, HttpTransport, OutboundRequest, Transport};
use http::header::{HeaderMap, HeaderValue, USER_AGENT};
use http::{Method, StatusCode};
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use url::Url;
use uuid::Uuid;

/// Value of the `extra` query parameter expected by the API.
pub const EXTRA_MARKER: &str = "openstack-auto-v1";

pub const USER_AGENT_VALUE: &str = concat!("relay_ua/", env!("CARGO_PKG_VERSION"));

pub const MAX_RETRY_COUNT_REACHED: &str = "reached the max retry count";

const PARAM_EXTRA: &str = "extra";
const PARAM_RESOURCE_KEY: &str = "cuk";
const PARAM_HOST: &str = "host";

#[derive(thiserror::Error, Debug)]
pub enum DeliveryError {
    #[error("a valid api url is expected: {0}")]
    InvalidConfiguration(#[source] AddressError),
    #[error("{0}")]
    InvalidUrl(#[source] AddressError),
    #[error("invalid resource key {key:?}: {reason}")]
    InvalidResourceKey { key: String, reason: String },
    #[error("no resource key set")]
    MissingResourceKey,
    #[error("{0}")]
    InvalidIp(#[source] AddressError),
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),
}

/// Collects and validates everything one delivery needs.
pub struct DeliveryClientBuilder {
    api: ApiConfig,
    url: Option<String>,
    method: Method,
    resource_key: String,
    ip_addresses: Option<Vec<String>>,
    transport: Option<Arc<dyn Transport>>,
}

impl DeliveryClientBuilder {
    /// Sends to this URL instead of the configured one.
    pub fn url<U: Into<String>>(mut self, url: U) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Must be a UUID. An empty key counts as not set.
    pub fn resource_key<K: Into<String>>(mut self, resource_key: K) -> Self {
        self.resource_key = resource_key.into();
        self
    }

    pub fn ip_address<S: Into<String>>(self, ip_address: S) -> Self {
        self.ip_addresses([ip_address])
    }

    /// Replaces any addresses set before.
    pub fn ip_addresses<I, S>(mut self, ip_addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ip_addresses = Some(ip_addresses.into_iter().map(Into::into).collect());
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validates the collected values. URL hosts are resolved here.
    pub async fn build(self) -> Result<DeliveryClient, DeliveryError> {
        let mut url = validate_url(&self.api.url)
            .await
            .map_err(DeliveryError::InvalidConfiguration)?;
        if let Some(override_url) = &self.url {
            url = validate_url(override_url)
                .await
                .map_err(DeliveryError::InvalidUrl)?;
        }

        let mut query_params = IndexMap::new();
        query_params.insert(PARAM_EXTRA, EXTRA_MARKER.to_string());

        if self.resource_key.is_empty() {
            return Err(DeliveryError::MissingResourceKey);
        }
        Uuid::parse_str(&self.resource_key).map_err(|e| DeliveryError::InvalidResourceKey {
            key: self.resource_key.clone(),
            reason: e.to_string(),
        })?;
        query_params.insert(PARAM_RESOURCE_KEY, self.resource_key.clone());

        let ip_addresses = self.ip_addresses.unwrap_or_default();
        if let Some(invalid) = ip_addresses.iter().find_map(|ip| validate_ip(ip).err()) {
            tracing::error!("{invalid}");
            return Err(DeliveryError::InvalidIp(invalid));
        }
        if !ip_addresses.is_empty() {
            query_params.insert(PARAM_HOST, encode_ip_addresses(&ip_addresses));
        }

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(
                self.api.timeout(),
                self.api.allow_self_signed_cert,
            )?),
        };
        if self.api.allow_self_signed_cert && url.scheme() == "https" {
            tracing::warn!("certificate and hostname verification disabled for {url}");
        }

        tracing::debug!("delivery client initialized");
        Ok(DeliveryClient {
            url,
            method: self.method,
            query_params,
            headers,
            resource_key: self.resource_key,
            ip_addresses,
            retry_interval: self.api.retry_interval(),
            remaining_retries: self.api.max_retries,
            transport,
            response: DeliveryResponse::default(),
        })
    }
}

// The API expects a JSON array with ", " separators, e.g. ["10.0.0.1", "10.0.0.2"].
fn encode_ip_addresses(ip_addresses: &[String]) -> String {
    let items: Vec<String> = ip_addresses
        .iter()
        .map(|ip| Value::from(ip.as_str()).to_string())
        .collect();
    format!("[{}]", items.join(", "))
}

/// Delivers one notification to the API.
///
/// Timeouts and network errors are retried with a fixed wait between attempts, up
/// to the configured number of retries. Error statuses and other failures are not
/// retried.
pub struct DeliveryClient {
    url: Url,
    method: Method,
    query_params: IndexMap<&'static str, String>,
    headers: HeaderMap,
    resource_key: String,
    ip_addresses: Vec<String>,
    retry_interval: Duration,
    remaining_retries: u32,
    transport: Arc<dyn Transport>,
    response: DeliveryResponse,
}

impl DeliveryClient {
    pub fn builder(api: &ApiConfig) -> DeliveryClientBuilder {
        DeliveryClientBuilder {
            api: api.clone(),
            url: None,
            method: Method::DELETE,
            resource_key: String::new(),
            ip_addresses: None,
            transport: None,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn query_params(&self) -> &IndexMap<&'static str, String> {
        &self.query_params
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn resource_key(&self) -> &str {
        &self.resource_key
    }

    pub fn ip_addresses(&self) -> &[String] {
        &self.ip_addresses
    }

    pub fn remaining_retries(&self) -> u32 {
        self.remaining_retries
    }

    pub fn code(&self) -> Option<StatusCode> {
        self.response.code()
    }

    pub fn error(&self) -> &str {
        self.response.error()
    }

    fn outbound_request(&self) -> OutboundRequest {
        let mut url = self.url.clone();
        url.query_pairs_mut().extend_pairs(&self.query_params);

        OutboundRequest {
            method: self.method.clone(),
            url,
            headers: self.headers.clone(),
        }
    }

    /// Sends the request, retrying temporary failures.
    ///
    /// Returns true once a 2xx response was read. The status code and the last
    /// error are available through [`DeliveryClient::code`] and [`DeliveryClient::error`].
    pub async fn send(&mut self) -> bool {
        let request = self.outbound_request();
        let started = Instant::now();

        let delivered = self.send_with_retries(&request).await;

        histogram!(DELIVERY_DURATION).record(started.elapsed().as_secs_f64());
        if !delivered {
            counter!(DELIVERY_FAILURES).increment(1);
            tracing::debug!("problem {}", self.response);
        }
        delivered
    }

    async fn send_with_retries(&mut self, request: &OutboundRequest) -> bool {
        loop {
            counter!(DELIVERY_ATTEMPTS).increment(1);
            tracing::debug!("{} {}", request.method, request.url);

            let error = match self.transport.execute(request).await {
                Ok(status) if status.is_success() => {
                    self.response.set_code(status);
                    return true;
                }
                Ok(status) => {
                    let reason = status.canonical_reason().unwrap_or("unknown");
                    tracing::error!(
                        "could not complete the request, code {} reason {reason}",
                        status.as_u16()
                    );
                    self.response.set_code(status);
                    self.response
                        .set_error(format!("{} {reason}", status.as_u16()));
                    return false;
                }
                Err(error) => error,
            };

            if error.kind() == FailureKind::Fatal {
                tracing::error!("could not read the server, {error}");
                self.response.set_error(error.to_string());
                return false;
            }

            tracing::error!("temporary delivery error, {error}");
            if self.remaining_retries == 0 {
                tracing::error!("{MAX_RETRY_COUNT_REACHED}");
                self.response.set_error(MAX_RETRY_COUNT_REACHED);
                return false;
            }

            self.remaining_retries -= 1;
            counter!(DELIVERY_RETRIES).increment(1);
            tracing::warn!(
                "sleeping for {:?}, remaining retries={}",
                self.retry_interval,
                self.remaining_retries
            );
            sleep(self.retry_interval).await;
        }
    }
}

impl fmt::Display for DeliveryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<DeliveryClient url={} params={:?} headers={:?} method={}>",
            self.url, self.query_params, self.headers, self.method
        )
    }
}
