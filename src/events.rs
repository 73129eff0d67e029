use serde::Serialize;

use crate::{
    snapshot::{FetchStatus, Snapshot},
    Error, EvaluationContext,
};

/// Evaluation of a feature that has `impressionData` set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpressionEvent {
    /// Random v4 UUID.
    pub event_id: String,
    pub feature_name: String,
    pub enabled: bool,
    /// Name of the variant handed out. `None` for `is_enabled` evaluations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub context: EvaluationContext,
}

impl ImpressionEvent {
    pub fn new(
        feature_name: impl Into<String>,
        enabled: bool,
        variant: Option<String>,
        context: EvaluationContext,
    ) -> ImpressionEvent {
        ImpressionEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            feature_name: feature_name.into(),
            enabled,
            variant,
            context,
        }
    }
}

/// Receives client lifecycle notifications and impression events.
///
/// Lifecycle methods are called from the poller thread (and from the constructing thread during
/// startup). [`Subscriber::on_impression`] is called on the evaluating thread. Implementations
/// should return quickly: a slow subscriber delays the next poll or the caller. Every method has a
/// default, so implement only what you need.
pub trait Subscriber: Send + Sync {
    /// First successful fetch cycle.
    fn on_ready(&self, _snapshot: &Snapshot) {}

    /// Every completed fetch cycle, including skipped ones.
    fn on_fetched(&self, _status: FetchStatus) {}

    /// Failed fetch, unparsable payload, or a backup/bootstrap error.
    fn on_error(&self, error: &Error) {
        log::warn!(target: "flagkit", "{error}");
    }

    fn on_backup_restored(&self, _snapshot: &Snapshot) {}

    fn on_backup_written(&self, _snapshot: &Snapshot) {}

    fn on_bootstrapped(&self, _snapshot: &Snapshot) {}

    /// A feature with impression data was evaluated, directly or as a parent dependency.
    fn on_impression(&self, _event: &ImpressionEvent) {}
}

/// Only logs errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSubscriber;

impl Subscriber for LoggingSubscriber {}

#[cfg(test)]
mod tests {
    use crate::EvaluationContext;

    use super::ImpressionEvent;

    #[test]
    fn impression_events_get_unique_ids() {
        let context = EvaluationContext::builder().user_id("7").build();
        let first = ImpressionEvent::new("checkout", true, None, context.clone());
        let second = ImpressionEvent::new("checkout", true, None, context);

        assert_ne!(first.event_id, second.event_id);
        assert!(uuid::Uuid::parse_str(&first.event_id).is_ok());
    }

    #[test]
    fn impression_events_serialize_camel_case() {
        let event = ImpressionEvent::new(
            "checkout",
            true,
            Some("blue".to_owned()),
            EvaluationContext::builder().user_id("7").build(),
        );
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["featureName"], "checkout");
        assert_eq!(json["enabled"], true);
        assert_eq!(json["variant"], "blue");
        assert_eq!(json["context"]["userId"], "7");

        let plain = ImpressionEvent::new("checkout", false, None, EvaluationContext::new());
        let json = serde_json::to_value(&plain).unwrap();
        assert!(json.get("variant").is_none());
    }
}
