//! Turns notifications into API deliveries and reports a verdict to the message bus.
//!
//! Every notification ends in exactly one [`DispatchOutcome`]. Payloads that cannot be
//! understood are acknowledged since redelivering them would never succeed. Failed
//! deliveries are requeued only when `requeue_on_error` is set. A panic anywhere in the
//! delivery is contained in its task and acknowledged.

use crate::address::{AddressError, validate_url};
use crate::config::{ApiConfig, Config, ValidationError};
use crate::delivery::{DeliveryClient, DeliveryError};
use crate::filter::NotificationFilter;
use crate::metrics_defs::{
    EXTRACT_FAILED, NOTIFICATIONS_HANDLED, NOTIFICATIONS_RECEIVED, NOTIFICATIONS_REQUEUED, counter,
};
use crate::payload::{ExtractError, ExtractedParams, extract};
use crate::transport::Transport;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::Instrument;

#[derive(thiserror::Error, Debug)]
pub enum EndpointError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ValidationError),
    #[error("invalid api url: {0}")]
    InvalidUrl(#[from] AddressError),
}

/// One message as delivered by the notification bus.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Notification {
    #[serde(alias = "ctxt")]
    pub context: Map<String, Value>,
    pub publisher_id: String,
    pub event_type: String,
    pub payload: Value,
    pub metadata: Map<String, Value>,
}

/// The verdict returned to the message bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Acknowledge, the message is done with.
    Handled,
    /// Redeliver the message later.
    Requeue,
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchOutcome::Handled => write!(f, "HANDLED"),
            DispatchOutcome::Requeue => write!(f, "REQUEUE"),
        }
    }
}

pub struct NotificationEndpoint {
    api: Arc<ApiConfig>,
    filter_rule: NotificationFilter,
    requeue_on_error: AtomicBool,
    transport: Option<Arc<dyn Transport>>,
}

impl NotificationEndpoint {
    /// Validates the configuration and checks that the API host resolves.
    pub async fn new(config: &Config) -> Result<Self, EndpointError> {
        config.api.validate()?;
        let filter_rule = NotificationFilter::from_config(&config.notifications)?;
        validate_url(&config.api.url).await?;

        tracing::info!(url = %config.api.url, "notification endpoint ready");
        Ok(NotificationEndpoint {
            api: Arc::new(config.api.clone()),
            filter_rule,
            requeue_on_error: AtomicBool::new(config.api.requeue_on_error),
            transport: None,
        })
    }

    /// Sends deliveries through `transport` instead of a new HTTP client per delivery.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// The filter the bus listener applies before handing notifications over.
    pub fn filter_rule(&self) -> &NotificationFilter {
        &self.filter_rule
    }

    pub fn requeue_on_error(&self) -> bool {
        self.requeue_on_error.load(Ordering::Relaxed)
    }

    pub fn set_requeue_on_error(&self, requeue_on_error: bool) {
        self.requeue_on_error.store(requeue_on_error, Ordering::Relaxed);
    }

    pub async fn dispatch(&self, notification: &Notification) -> DispatchOutcome {
        self.handle(
            &notification.context,
            &notification.publisher_id,
            &notification.event_type,
            &notification.payload,
            &notification.metadata,
        )
        .await
    }

    /// Handles one notification. Never fails, the outcome is the only result.
    pub async fn handle(
        &self,
        context: &Map<String, Value>,
        publisher_id: &str,
        event_type: &str,
        payload: &Value,
        metadata: &Map<String, Value>,
    ) -> DispatchOutcome {
        counter!(NOTIFICATIONS_RECEIVED).increment(1);
        tracing::debug!(publisher_id, event_type, ?metadata, "notification received");

        let params = match extract(payload) {
            Ok(params) => params,
            Err(error) => {
                counter!(EXTRACT_FAILED).increment(1);
                match &error {
                    ExtractError::MissingResourceKey { .. } => {
                        tracing::error!(publisher_id, event_type, "{error}");
                    }
                    ExtractError::Malformed(_) => {
                        tracing::error!(
                            publisher_id,
                            event_type,
                            ?context,
                            ?metadata,
                            %payload,
                            "could not extract params: {error}"
                        );
                    }
                }
                return self.outcome(DispatchOutcome::Handled);
            }
        };

        let span = tracing::info_span!("delivery", resource_key = params.resource_key());
        let task = tokio::spawn(
            deliver(self.api.clone(), self.transport.clone(), params).instrument(span),
        );

        let outcome = match task.await {
            Ok(Ok(true)) => DispatchOutcome::Handled,
            Ok(Ok(false)) => self.on_delivery_failure(),
            Ok(Err(error)) => {
                tracing::error!("delivery error: {error}");
                self.on_delivery_failure()
            }
            Err(error) => {
                tracing::error!(
                    publisher_id,
                    event_type,
                    %payload,
                    "Task panicked: {error}"
                );
                DispatchOutcome::Handled
            }
        };
        self.outcome(outcome)
    }

    fn on_delivery_failure(&self) -> DispatchOutcome {
        if self.requeue_on_error() {
            DispatchOutcome::Requeue
        } else {
            DispatchOutcome::Handled
        }
    }

    fn outcome(&self, outcome: DispatchOutcome) -> DispatchOutcome {
        match outcome {
            DispatchOutcome::Handled => counter!(NOTIFICATIONS_HANDLED).increment(1),
            DispatchOutcome::Requeue => counter!(NOTIFICATIONS_REQUEUED).increment(1),
        }
        tracing::debug!(%outcome, "notification dispatched");
        outcome
    }
}

async fn deliver(
    api: Arc<ApiConfig>,
    transport: Option<Arc<dyn Transport>>,
    params: ExtractedParams,
) -> Result<bool, DeliveryError> {
    let mut builder = DeliveryClient::builder(&api).resource_key(params.resource_key());
    if let Some(ip_addresses) = params.ip_addresses() {
        builder = builder.ip_addresses(ip_addresses);
    }
    if let Some(transport) = transport {
        builder = builder.transport(transport);
    }

    let mut client = builder.build().await?;
    tracing::debug!("{client}");
    Ok(client.send().await)
}
