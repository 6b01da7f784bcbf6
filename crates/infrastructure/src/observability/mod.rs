pub mod metrics_collector;

pub use metrics_collector::{install_prometheus_exporter, MetricsCollector};
