/// Receives per-evaluation counters. Aggregation and upload are up to the implementation.
///
/// Called on the evaluation path, so implementations must not block.
pub trait MetricsSink: Send + Sync {
    /// A feature was evaluated to `enabled`.
    fn count(&self, feature_name: &str, enabled: bool);

    /// A variant was handed out for a feature.
    fn count_variant(&self, feature_name: &str, variant_name: &str);
}

pub(crate) struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn count(&self, _feature_name: &str, _enabled: bool) {}

    fn count_variant(&self, _feature_name: &str, _variant_name: &str) {}
}
