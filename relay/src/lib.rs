pub mod address;
pub mod config;
pub mod delivery;
pub mod endpoint;
pub mod filter;
pub mod metrics_defs;
pub mod payload;
pub mod response;
pub mod transport;

#[cfg(test)]
mod testutils;

pub use endpoint::{DispatchOutcome, EndpointError, Notification, NotificationEndpoint};
