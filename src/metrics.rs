//! Prometheus metrics for the MCP server.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;

/// Global metrics registry instance.
pub static METRICS: Lazy<Arc<MetricsCollector>> = Lazy::new(|| Arc::new(MetricsCollector::new()));

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    /// Tool name, e.g. "create_sketch_plane"
    pub tool: String,
    /// "success" or "error"
    pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ToolLabels {
    pub tool: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// Error category from the taxonomy, e.g. "validation_error"
    pub category: String,
}

pub struct MetricsCollector {
    registry: RwLock<Registry>,

    /// Tool invocations by tool and status
    pub requests_total: Family<RequestLabels, Counter>,
    /// Tool latency in seconds
    pub request_duration_seconds: Family<ToolLabels, Histogram>,
    /// Errors by taxonomy category
    pub errors_total: Family<ErrorLabels, Counter>,
    /// Currently active sessions
    pub active_sessions: Gauge,
    /// Visualization events delivered to a sink
    pub events_published_total: Counter,
    /// Visualization events dropped for lack of a subscriber
    pub events_dropped_total: Counter,
}

impl MetricsCollector {
    fn new() -> Self {
        let mut registry = Registry::default();

        let requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "cad_mcp_requests",
            "Tool invocations by tool and status",
            requests_total.clone(),
        );

        let request_duration_seconds =
            Family::<ToolLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 14))
            });
        registry.register(
            "cad_mcp_request_duration_seconds",
            "Tool latency in seconds",
            request_duration_seconds.clone(),
        );

        let errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "cad_mcp_errors",
            "Errors by taxonomy category",
            errors_total.clone(),
        );

        let active_sessions = Gauge::default();
        registry.register(
            "cad_mcp_active_sessions",
            "Currently active modeling sessions",
            active_sessions.clone(),
        );

        let events_published_total = Counter::default();
        registry.register(
            "cad_mcp_events_published",
            "Visualization events delivered to a subscriber",
            events_published_total.clone(),
        );

        let events_dropped_total = Counter::default();
        registry.register(
            "cad_mcp_events_dropped",
            "Visualization events dropped without a subscriber",
            events_dropped_total.clone(),
        );

        MetricsCollector {
            registry: RwLock::new(registry),
            requests_total,
            request_duration_seconds,
            errors_total,
            active_sessions,
            events_published_total,
            events_dropped_total,
        }
    }

    pub fn observe_request(&self, tool: &str, success: bool, seconds: f64) {
        self.requests_total
            .get_or_create(&RequestLabels {
                tool: tool.to_string(),
                status: if success { "success" } else { "error" }.to_string(),
            })
            .inc();
        self.request_duration_seconds
            .get_or_create(&ToolLabels {
                tool: tool.to_string(),
            })
            .observe(seconds);
    }

    pub fn record_error(&self, category: &str) {
        self.errors_total
            .get_or_create(&ErrorLabels {
                category: category.to_string(),
            })
            .inc();
    }

    pub fn set_active_sessions(&self, count: usize) {
        self.active_sessions.set(count as i64);
    }

    pub fn record_publish(&self, delivered: bool) {
        if delivered {
            self.events_published_total.inc();
        } else {
            self.events_dropped_total.inc();
        }
    }

    /// Encode the registry in Prometheus text format.
    pub fn encode(&self) -> String {
        let registry = self.registry.read();
        let mut output = String::new();
        if encode(&mut output, &registry).is_err() {
            return String::new();
        }
        output
    }
}
