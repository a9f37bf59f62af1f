use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with status, endpoint.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being processed",
};

pub const BACKEND_ATTEMPTS: MetricDef = MetricDef {
    name: "backend.attempts",
    metric_type: MetricType::Counter,
    description: "Submission attempts against the backend. Tagged with encoding, outcome.",
};

pub const POLL_ATTEMPTS: MetricDef = MetricDef {
    name: "backend.polls",
    metric_type: MetricType::Counter,
    description: "Status-route calls made while polling a queued job. Tagged with result.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    BACKEND_ATTEMPTS,
    POLL_ATTEMPTS,
];
