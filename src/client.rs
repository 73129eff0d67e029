use std::{
    sync::{Arc, Mutex, PoisonError},
    thread::JoinHandle,
    time::Duration,
};

use crate::{
    eval::{Evaluation, Evaluator},
    events::{ImpressionEvent, Subscriber},
    metrics::MetricsSink,
    models::Variant,
    poller::{spawn_named, PollerThread},
    snapshot::{FetchStatus, Snapshot},
    snapshot_store::SnapshotStore,
    synchronizer::{load_initial_snapshot, Synchronizer},
    throttler::Throttler,
    ClientConfig, Error, EvaluationContext, Result,
};

/// A feature toggle client.
///
/// Evaluation reads an immutable snapshot of feature definitions and never blocks or does I/O.
/// Definitions are refreshed by a [`PollerThread`] (see [`Client::start_poller_thread`]) or on
/// demand with [`Client::fetch_definitions`].
///
/// `Client` is `Send + Sync`; share it behind an `Arc`.
///
/// # Examples
/// ```no_run
/// # use flagkit::{ClientConfig, EvaluationContext};
/// let mut config = ClientConfig::new("checkout-service", "http://localhost:4242/api");
/// config.api_key("secret");
/// let client = config.to_client()?;
/// let poller = client.start_poller_thread()?;
/// poller.wait_for_configuration()?;
///
/// let context = EvaluationContext::builder().user_id("42").build();
/// if client.is_enabled("checkout.new-flow", &context) {
///     // ...
/// }
/// # Ok::<(), flagkit::Error>(())
/// ```
pub struct Client {
    store: Arc<SnapshotStore>,
    evaluator: Evaluator,
    app_name: String,
    environment: String,
    metrics: Arc<dyn MetricsSink>,
    subscriber: Arc<dyn Subscriber>,
    /// Handed to the poller thread when it starts.
    synchronizer: Mutex<Option<Synchronizer>>,
    fetch_interval: Duration,
    fetch_jitter: Duration,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    ///
    /// Same as [`ClientConfig::to_client`].
    pub fn new(mut config: ClientConfig) -> Result<Client> {
        config.validate()?;

        let fetcher = config.take_fetcher()?;
        let backup = config.backup_store_handle();
        let initial = load_initial_snapshot(
            config.bootstrap.as_deref(),
            backup.as_deref(),
            config.subscriber.as_ref(),
        );
        let store = Arc::new(SnapshotStore::with_snapshot(initial));

        let throttler = Throttler::new(
            config.fetch_interval.as_secs(),
            config.max_skip_budget.as_secs(),
        );
        let synchronizer = Synchronizer::new(
            store.clone(),
            fetcher,
            backup,
            config.subscriber.clone(),
            throttler,
        );

        Ok(Client {
            store,
            evaluator: Evaluator::new(
                config.strategies,
                config.name_prefix,
                config.variant_hashing,
            ),
            app_name: config.app_name,
            environment: config.environment,
            metrics: config.metrics_sink,
            subscriber: config.subscriber,
            synchronizer: Mutex::new(Some(synchronizer)),
            fetch_interval: config.fetch_interval,
            fetch_jitter: config.fetch_jitter,
        })
    }

    /// `true` if `feature_name` is enabled for `context`. Undefined features are off.
    pub fn is_enabled(&self, feature_name: &str, context: &EvaluationContext) -> bool {
        self.is_enabled_with_fallback(feature_name, context, |_, _| false)
    }

    /// Like [`Client::is_enabled`], but undefined features resolve to `default`.
    pub fn is_enabled_or(
        &self,
        feature_name: &str,
        context: &EvaluationContext,
        default: bool,
    ) -> bool {
        self.is_enabled_with_fallback(feature_name, context, |_, _| default)
    }

    /// Like [`Client::is_enabled`], but undefined features are decided by `fallback`.
    ///
    /// `fallback` is called with the feature name and the context after `appName` and
    /// `environment` defaults were filled in.
    pub fn is_enabled_with_fallback<F>(
        &self,
        feature_name: &str,
        context: &EvaluationContext,
        fallback: F,
    ) -> bool
    where
        F: FnOnce(&str, &EvaluationContext) -> bool,
    {
        let context = context.with_static_fields(&self.app_name, &self.environment);
        let snapshot = self.store.load();

        let enabled = match self.evaluator.evaluate(&snapshot, feature_name, &context) {
            Some(evaluation) => {
                self.report_impressions(&evaluation, &context, |_| None);
                evaluation.enabled
            }
            None => {
                log::debug!(target: "flagkit", feature_name;
                    "feature is not defined, using fallback");
                fallback(feature_name, context.as_ref())
            }
        };

        log::trace!(target: "flagkit",
                    feature_name,
                    enabled,
                    context:serde = context.as_ref();
                    "evaluated a feature");

        self.metrics.count(feature_name, enabled);
        enabled
    }

    /// Variant of `feature_name` for `context`, or [`Variant::disabled`] when the feature is off,
    /// undefined, or has no variants.
    pub fn get_variant(&self, feature_name: &str, context: &EvaluationContext) -> Variant {
        self.get_variant_or(feature_name, context, Variant::disabled())
    }

    /// Like [`Client::get_variant`], but returns `default` instead of the disabled variant.
    pub fn get_variant_or(
        &self,
        feature_name: &str,
        context: &EvaluationContext,
        default: Variant,
    ) -> Variant {
        let context = context.with_static_fields(&self.app_name, &self.environment);
        let snapshot = self.store.load();

        let (enabled, variant) = match self.evaluator.evaluate(&snapshot, feature_name, &context) {
            Some(evaluation) => {
                let variant = self.evaluator.variant(&evaluation, &context, &default);
                self.report_impressions(&evaluation, &context, |evaluation| {
                    if evaluation.feature.name == feature_name {
                        Some(variant.name.clone())
                    } else {
                        let parent_default = Variant::disabled();
                        Some(self.evaluator.variant(evaluation, &context, &parent_default).name)
                    }
                });
                (evaluation.enabled, variant)
            }
            None => (false, default),
        };

        log::trace!(target: "flagkit",
                    feature_name,
                    enabled,
                    variant = variant.name.as_str(),
                    context:serde = context.as_ref();
                    "selected a variant");

        self.metrics.count(feature_name, enabled);
        self.metrics.count_variant(feature_name, &variant.name);
        variant
    }

    /// Impression events for `evaluation` and its parents, for features with impression data.
    fn report_impressions<'a, V>(
        &self,
        evaluation: &Evaluation<'a>,
        context: &EvaluationContext,
        variant_of: V,
    ) where
        V: Fn(&Evaluation<'a>) -> Option<String>,
    {
        let reported = evaluation
            .parents
            .iter()
            .chain(std::iter::once(evaluation))
            .filter(|evaluation| evaluation.feature.impression_data);
        for evaluation in reported {
            let event = ImpressionEvent::new(
                evaluation.feature.name.as_str(),
                evaluation.enabled,
                variant_of(evaluation),
                context.clone(),
            );
            self.subscriber.on_impression(&event);
        }
    }

    /// Names of all features in the current definitions, sorted.
    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .store
            .load()
            .feature_names()
            .map(str::to_owned)
            .collect();
        names.sort_unstable();
        names
    }

    /// The current definitions.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.load()
    }

    /// Run one fetch cycle on the calling thread.
    ///
    /// Useful to block on fresh definitions at startup without a poller, or in tests. Fails with
    /// [`Error::PollerAlreadyStarted`] once the poller thread owns the fetch cycle.
    pub fn fetch_definitions(&self) -> Result<FetchStatus> {
        let mut synchronizer = self
            .synchronizer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match synchronizer.as_mut() {
            Some(synchronizer) => synchronizer.tick(),
            None => Err(Error::PollerAlreadyStarted),
        }
    }

    /// Start a poller thread to fetch definitions from the server.
    ///
    /// Only one poller can be started per client.
    pub fn start_poller_thread(&self) -> Result<PollerThread> {
        self.start_poller_thread_with(spawn_named)
    }

    pub(crate) fn start_poller_thread_with<S>(&self, spawn: S) -> Result<PollerThread>
    where
        S: FnOnce(Box<dyn FnOnce() + Send>) -> std::io::Result<JoinHandle<()>>,
    {
        let mut slot = self
            .synchronizer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let synchronizer = slot.take().ok_or(Error::PollerAlreadyStarted)?;
        PollerThread::start(synchronizer, self.fetch_interval, self.fetch_jitter, spawn)
            .map_err(|(err, synchronizer)| {
                log::warn!(target: "flagkit", "could not start poller thread: {err}");
                *slot = Some(synchronizer);
                err
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::{
        fetcher::FetchResponse,
        metrics::MetricsSink,
        models::{
            Constraint, FeatureDefinition, Operator, Payload, StrategyConfig, Variant,
            VariantDefinition,
        },
        snapshot::Snapshot,
        ClientConfig, Error, EvaluationContext, Result,
    };

    fn payload() -> String {
        let features = [
            FeatureDefinition::new("on", true),
            FeatureDefinition::new("off", false),
            {
                let mut feature = FeatureDefinition::new("variants", true);
                feature.variants = vec![VariantDefinition::new("blue", 1)
                    .with_payload(Payload {
                    payload_type: "string".to_owned(),
                    value: "navy".to_owned(),
                })];
                feature
            },
            {
                let mut feature = FeatureDefinition::new("production-only", true);
                feature.strategies = vec![StrategyConfig::new("default").with_constraint(
                    Constraint::single("environment", Operator::In, "production"),
                )];
                feature
            },
        ];
        Snapshot::from_definitions(features)
            .to_json()
            .unwrap()
    }

    fn client_with(configure: impl FnOnce(&mut ClientConfig)) -> crate::Client {
        let payload = payload();
        let mut config = ClientConfig::new("test-app", "http://localhost:4242/api");
        config.disable_backup().fetcher(move |_etag: Option<&str>| -> Result<FetchResponse> {
            Ok(FetchResponse::Changed {
                payload: payload.clone(),
                etag: None,
            })
        });
        configure(&mut config);
        let client = config.to_client().unwrap();
        client.fetch_definitions().unwrap();
        client
    }

    #[derive(Default)]
    struct CountingSink {
        counts: Mutex<Vec<(String, bool)>>,
        variants: Mutex<Vec<(String, String)>>,
    }

    impl MetricsSink for Arc<CountingSink> {
        fn count(&self, feature_name: &str, enabled: bool) {
            self.counts
                .lock()
                .unwrap()
                .push((feature_name.to_owned(), enabled));
        }

        fn count_variant(&self, feature_name: &str, variant_name: &str) {
            self.variants
                .lock()
                .unwrap()
                .push((feature_name.to_owned(), variant_name.to_owned()));
        }
    }

    #[test]
    fn evaluates_fetched_features() {
        let client = client_with(|_| {});
        let context = EvaluationContext::new();
        assert!(client.is_enabled("on", &context));
        assert!(!client.is_enabled("off", &context));
        assert!(!client.is_enabled("missing", &context));
        assert!(client.is_enabled_or("missing", &context, true));
        assert!(!client.is_enabled_or("off", &context, true));
        assert_eq!(
            client.feature_names(),
            vec!["off", "on", "production-only", "variants"]
        );
    }

    #[test]
    fn fallback_receives_feature_name() {
        let client = client_with(|_| {});
        let context = EvaluationContext::new();
        assert!(client.is_enabled_with_fallback("missing", &context, |name, _| name == "missing"));
        assert!(!client.is_enabled_with_fallback("missing", &context, |_, _| false));
    }

    #[test]
    fn static_environment_is_filled_in() {
        let production = client_with(|config| {
            config.environment("production");
        });
        let development = client_with(|_| {});
        let context = EvaluationContext::new();

        assert!(production.is_enabled("production-only", &context));
        assert!(!development.is_enabled("production-only", &context));

        let explicit = EvaluationContext::builder()
            .environment("production")
            .build();
        assert!(development.is_enabled("production-only", &explicit));
    }

    #[test]
    fn variants() {
        let client = client_with(|_| {});
        let context = EvaluationContext::builder().user_id("1").build();

        let variant = client.get_variant("variants", &context);
        assert_eq!(variant.name, "blue");
        assert!(variant.enabled);
        assert_eq!(variant.payload.map(|p| p.value), Some("navy".to_owned()));

        assert_eq!(client.get_variant("off", &context), Variant::disabled());
        assert_eq!(client.get_variant("on", &context), Variant::disabled());

        let fallback = Variant {
            name: "fallback".to_owned(),
            payload: None,
            enabled: false,
        };
        assert_eq!(
            client.get_variant_or("missing", &context, fallback.clone()),
            fallback
        );
    }

    #[test]
    fn metrics_are_counted() {
        let sink = Arc::new(CountingSink::default());
        let client = client_with(|config| {
            config.metrics_sink(sink.clone());
        });
        let context = EvaluationContext::new();
        client.is_enabled("on", &context);
        client.get_variant("variants", &context);

        assert_eq!(
            *sink.counts.lock().unwrap(),
            vec![("on".to_owned(), true), ("variants".to_owned(), true)]
        );
        assert_eq!(
            *sink.variants.lock().unwrap(),
            vec![("variants".to_owned(), "blue".to_owned())]
        );
    }

    #[test]
    fn poller_can_only_start_once() {
        let client = client_with(|_| {});
        let poller = client.start_poller_thread().unwrap();
        assert!(matches!(
            client.start_poller_thread(),
            Err(Error::PollerAlreadyStarted)
        ));
        assert!(matches!(
            client.fetch_definitions(),
            Err(Error::PollerAlreadyStarted)
        ));
        poller.shutdown().unwrap();
    }

    #[test]
    fn failed_poller_start_keeps_the_fetch_cycle() {
        let client = client_with(|_| {});
        let started = client.start_poller_thread_with(|_| {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no threads left"))
        });
        assert!(matches!(started, Err(Error::Io(_))));

        assert!(client.fetch_definitions().is_ok());
        let poller = client.start_poller_thread().unwrap();
        poller.shutdown().unwrap();
    }
}
