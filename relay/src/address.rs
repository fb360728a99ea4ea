use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum AddressError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid ip address {0:?}")]
    InvalidIp(String),
}

/// Validates an API URL and checks that its host resolves.
///
/// Only `http` and `https` are accepted. The host is resolved through the system
/// resolver, so an unknown name is an error rather than something discovered at
/// delivery time. IP literal hosts are accepted without a lookup.
pub async fn validate_url(value: &str) -> Result<Url, AddressError> {
    let invalid = |reason: String| AddressError::InvalidUrl {
        url: value.to_string(),
        reason,
    };

    // Url::parse normalizes "http:/host" into "http://host", so check the raw separator first.
    let Some((scheme, _)) = value.split_once("://") else {
        return Err(invalid("scheme should contain ://".into()));
    };
    if !ALLOWED_SCHEMES.contains(&scheme) {
        return Err(invalid(format!("scheme should be http or https, not {scheme}")));
    }

    let url = Url::parse(value).map_err(|e| invalid(e.to_string()))?;
    let port = url.port_or_known_default().unwrap_or(80);

    match url.host() {
        None => return Err(invalid("url contains no host".into())),
        Some(Host::Domain("")) => return Err(invalid("url contains no host".into())),
        Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => {}
        Some(Host::Domain(domain)) => {
            let resolved = tokio::net::lookup_host((domain, port))
                .await
                .map_err(|e| invalid(format!("unresolved host {domain}: {e}")))?
                .next()
                .ok_or_else(|| invalid(format!("unresolved host {domain}")))?;
            tracing::debug!("{domain} resolved to {}", resolved.ip());
        }
    }

    tracing::debug!(
        "url={value} host={:?} port={:?} path={}",
        url.host_str(),
        url.port(),
        url.path()
    );
    Ok(url)
}

/// Parses an IPv4 or IPv6 literal. Hostnames and CIDR notation are rejected.
pub fn validate_ip(value: &str) -> Result<IpAddr, AddressError> {
    if let Ok(v4) = value.parse::<Ipv4Addr>() {
        return Ok(IpAddr::V4(v4));
    }
    tracing::debug!("not an ipv4 address {value:?}");

    value
        .parse::<Ipv6Addr>()
        .map(IpAddr::V6)
        .map_err(|_| AddressError::InvalidIp(value.to_string()))
}
