//! Metrics definitions for the relay.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

macro_rules! counter {
    ($def:expr) => {
        metrics::counter!($def.name)
    };
}

macro_rules! histogram {
    ($def:expr) => {
        metrics::histogram!($def.name)
    };
}

pub(crate) use counter;
pub(crate) use histogram;

pub const NOTIFICATIONS_RECEIVED: MetricDef = MetricDef {
    name: "notifications.received",
    metric_type: MetricType::Counter,
    description: "Number of notifications passed to the endpoint",
};

pub const NOTIFICATIONS_HANDLED: MetricDef = MetricDef {
    name: "notifications.handled",
    metric_type: MetricType::Counter,
    description: "Number of notifications acknowledged to the message bus",
};

pub const NOTIFICATIONS_REQUEUED: MetricDef = MetricDef {
    name: "notifications.requeued",
    metric_type: MetricType::Counter,
    description: "Number of notifications handed back to the message bus for redelivery",
};

pub const EXTRACT_FAILED: MetricDef = MetricDef {
    name: "payload.extract.failed",
    metric_type: MetricType::Counter,
    description: "Number of payloads without a usable resource key",
};

pub const DELIVERY_ATTEMPTS: MetricDef = MetricDef {
    name: "delivery.attempts",
    metric_type: MetricType::Counter,
    description: "Number of HTTP requests sent to the API, retries included",
};

pub const DELIVERY_RETRIES: MetricDef = MetricDef {
    name: "delivery.retries",
    metric_type: MetricType::Counter,
    description: "Number of retries after a temporary delivery failure",
};

pub const DELIVERY_FAILURES: MetricDef = MetricDef {
    name: "delivery.failures",
    metric_type: MetricType::Counter,
    description: "Number of deliveries that failed after all attempts",
};

pub const DELIVERY_DURATION: MetricDef = MetricDef {
    name: "delivery.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a delivery, retries and waits included, in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[
    NOTIFICATIONS_RECEIVED,
    NOTIFICATIONS_HANDLED,
    NOTIFICATIONS_REQUEUED,
    EXTRACT_FAILED,
    DELIVERY_ATTEMPTS,
    DELIVERY_RETRIES,
    DELIVERY_FAILURES,
    DELIVERY_DURATION,
];

/// Registers the description of every relay metric with the installed recorder.
pub fn describe_all() {
    for def in ALL_METRICS {
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(def.name, def.description),
            MetricType::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
}
