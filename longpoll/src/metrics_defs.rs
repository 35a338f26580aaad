//! Metrics definitions for the long-poll core.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUESTS_RECEIVED: MetricDef = MetricDef {
    name: "config.requests.received",
    metric_type: MetricType::Counter,
    description: "Number of config requests accepted for resolution",
};

pub const RESPONSES: MetricDef = MetricDef {
    name: "config.responses",
    metric_type: MetricType::Counter,
    description: "Number of config requests answered, tagged by result code",
};

pub const REQUESTS_REJECTED: MetricDef = MetricDef {
    name: "config.requests.rejected",
    metric_type: MetricType::Counter,
    description: "Number of config requests rejected before resolution, tagged by reason",
};

pub const REQUESTS_DISCONNECTED: MetricDef = MetricDef {
    name: "config.requests.disconnected",
    metric_type: MetricType::Counter,
    description: "Number of requests dropped because the client went away",
};

pub const PARKED_REQUESTS: MetricDef = MetricDef {
    name: "config.parked.requests",
    metric_type: MetricType::Gauge,
    description: "Number of parked requests per application",
};

pub const PARKED_EXPIRED: MetricDef = MetricDef {
    name: "config.parked.expired",
    metric_type: MetricType::Counter,
    description: "Number of parked requests whose timeout ran out",
};

pub const PARKED_AGAIN: MetricDef = MetricDef {
    name: "config.parked.again",
    metric_type: MetricType::Counter,
    description: "Number of woken requests parked again because their copy was still current",
};

pub const WORKER_BACKLOG: MetricDef = MetricDef {
    name: "config.workers.backlog",
    metric_type: MetricType::Gauge,
    description: "Number of requests waiting for a resolver worker",
};

pub const RESOLVE_DURATION: MetricDef = MetricDef {
    name: "config.resolve.duration",
    metric_type: MetricType::Histogram,
    description: "Time spent resolving one request in seconds",
};

pub const ACTIVATIONS: MetricDef = MetricDef {
    name: "config.activations",
    metric_type: MetricType::Counter,
    description: "Number of application activations processed",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUESTS_RECEIVED,
    RESPONSES,
    REQUESTS_REJECTED,
    REQUESTS_DISCONNECTED,
    PARKED_REQUESTS,
    PARKED_EXPIRED,
    PARKED_AGAIN,
    WORKER_BACKLOG,
    RESOLVE_DURATION,
    ACTIVATIONS,
];
