use std::{path::PathBuf, sync::Arc, time::Duration};

use rand::{thread_rng, Rng};

use crate::{
    backup::{BackupStore, FileBackupStore},
    bootstrap::{BootstrapSource, FileBootstrapSource},
    events::{LoggingSubscriber, Subscriber},
    fetcher::{Fetcher, HttpFetcher, HttpFetcherConfig},
    metrics::{MetricsSink, NoopMetricsSink},
    strategy::{Strategy, StrategyRegistry},
    variant::VariantHashing,
    Client, Error, Result,
};

enum BackupSetting {
    DefaultFile,
    File(PathBuf),
    Store(Arc<dyn BackupStore>),
    Disabled,
}

/// Configuration for [`Client`].
///
/// ```
/// # use flagkit::ClientConfig;
/// let mut config = ClientConfig::new("checkout-service", "https://flags.example.com/api");
/// config.api_key("secret").environment("production");
/// ```
pub struct ClientConfig {
    pub(crate) app_name: String,
    pub(crate) api_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) environment: String,
    pub(crate) instance_id: String,
    pub(crate) project_name: Option<String>,
    pub(crate) name_prefix: Option<String>,
    pub(crate) custom_headers: Vec<(String, String)>,
    pub(crate) fetch_interval: Duration,
    pub(crate) fetch_jitter: Duration,
    pub(crate) max_skip_budget: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Duration,
    backup: BackupSetting,
    pub(crate) bootstrap: Option<Box<dyn BootstrapSource>>,
    pub(crate) fetcher: Option<Box<dyn Fetcher>>,
    pub(crate) strategies: StrategyRegistry,
    pub(crate) subscriber: Arc<dyn Subscriber>,
    pub(crate) metrics_sink: Arc<dyn MetricsSink>,
    pub(crate) variant_hashing: VariantHashing,
}

impl ClientConfig {
    pub const DEFAULT_ENVIRONMENT: &'static str = "default";
    pub const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(10);
    pub const DEFAULT_FETCH_JITTER: Duration = Duration::from_secs(1);
    pub const DEFAULT_MAX_SKIP_BUDGET: Duration = Duration::from_secs(300);
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a default configuration for application `app_name` talking to `api_url`.
    ///
    /// Backup goes to [`FileBackupStore::default_path`] and bootstrap is read from the file named
    /// by `FLAGKIT_BOOTSTRAP_FILE`, if set.
    pub fn new(app_name: impl Into<String>, api_url: impl Into<String>) -> Self {
        ClientConfig {
            app_name: app_name.into(),
            api_url: api_url.into(),
            api_key: None,
            environment: Self::DEFAULT_ENVIRONMENT.to_owned(),
            instance_id: generated_instance_id(),
            project_name: None,
            name_prefix: None,
            custom_headers: Vec::new(),
            fetch_interval: Self::DEFAULT_FETCH_INTERVAL,
            fetch_jitter: Self::DEFAULT_FETCH_JITTER,
            max_skip_budget: Self::DEFAULT_MAX_SKIP_BUDGET,
            connect_timeout: Self::DEFAULT_TIMEOUT,
            read_timeout: Self::DEFAULT_TIMEOUT,
            backup: BackupSetting::DefaultFile,
            bootstrap: Some(Box::new(FileBootstrapSource::from_env())),
            fetcher: None,
            strategies: StrategyRegistry::new(),
            subscriber: Arc::new(LoggingSubscriber),
            metrics_sink: Arc::new(NoopMetricsSink),
            variant_hashing: VariantHashing::default(),
        }
    }

    /// Sent as the `Authorization` header.
    pub fn api_key(&mut self, api_key: impl Into<String>) -> &mut Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Filled into evaluation contexts that don't set one.
    pub fn environment(&mut self, environment: impl Into<String>) -> &mut Self {
        self.environment = environment.into();
        self
    }

    pub fn instance_id(&mut self, instance_id: impl Into<String>) -> &mut Self {
        self.instance_id = instance_id.into();
        self
    }

    /// Only fetch features of this project.
    pub fn project_name(&mut self, project_name: impl Into<String>) -> &mut Self {
        self.project_name = Some(project_name.into());
        self
    }

    /// Only fetch features whose name starts with `name_prefix`. Evaluating a feature outside the
    /// prefix logs a warning.
    pub fn name_prefix(&mut self, name_prefix: impl Into<String>) -> &mut Self {
        self.name_prefix = Some(name_prefix.into());
        self
    }

    /// Extra header sent with every fetch.
    pub fn custom_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.custom_headers.push((name.into(), value.into()));
        self
    }

    pub fn fetch_interval(&mut self, interval: Duration) -> &mut Self {
        self.fetch_interval = interval;
        self
    }

    /// Each wait between fetches is shortened by a random amount up to `jitter`.
    pub fn fetch_jitter(&mut self, jitter: Duration) -> &mut Self {
        self.fetch_jitter = jitter;
        self
    }

    /// Longest time the poller stays silent after repeated failures.
    pub fn max_skip_budget(&mut self, budget: Duration) -> &mut Self {
        self.max_skip_budget = budget;
        self
    }

    pub fn connect_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.read_timeout = timeout;
        self
    }

    /// Keep the backup in a file at `path`.
    pub fn backup_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.backup = BackupSetting::File(path.into());
        self
    }

    pub fn backup_store(&mut self, store: impl BackupStore + 'static) -> &mut Self {
        self.backup = BackupSetting::Store(Arc::new(store));
        self
    }

    /// Neither read nor write a backup.
    pub fn disable_backup(&mut self) -> &mut Self {
        self.backup = BackupSetting::Disabled;
        self
    }

    /// Seed definitions at startup. Takes precedence over the backup.
    pub fn bootstrap(&mut self, source: impl BootstrapSource + 'static) -> &mut Self {
        self.bootstrap = Some(Box::new(source));
        self
    }

    /// Replace the HTTP fetcher, e.g. with a fake in tests.
    pub fn fetcher(&mut self, fetcher: impl Fetcher + 'static) -> &mut Self {
        self.fetcher = Some(Box::new(fetcher));
        self
    }

    /// Register a custom strategy. Replaces a built-in of the same name.
    ///
    /// ```
    /// # use std::collections::HashMap;
    /// # use flagkit::{ClientConfig, EvaluationContext, Strategy};
    /// struct Weekend;
    ///
    /// impl Strategy for Weekend {
    ///     fn name(&self) -> &str {
    ///         "weekend"
    ///     }
    ///
    ///     fn is_enabled(&self, _: &HashMap<String, String>, _: &EvaluationContext) -> bool {
    ///         false
    ///     }
    /// }
    ///
    /// let mut config = ClientConfig::new("app", "http://localhost:4242/api");
    /// config.strategy(Weekend);
    /// ```
    pub fn strategy(&mut self, strategy: impl Strategy + 'static) -> &mut Self {
        self.strategies.register(strategy);
        self
    }

    /// Strategy used for names nothing is registered under. Defaults to one that is always off.
    pub fn fallback_strategy(&mut self, strategy: impl Strategy + 'static) -> &mut Self {
        self.strategies.set_fallback(strategy);
        self
    }

    pub fn subscriber(&mut self, subscriber: impl Subscriber + 'static) -> &mut Self {
        self.subscriber = Arc::new(subscriber);
        self
    }

    pub fn metrics_sink(&mut self, sink: impl MetricsSink + 'static) -> &mut Self {
        self.metrics_sink = Arc::new(sink);
        self
    }

    pub fn variant_hashing(&mut self, hashing: VariantHashing) -> &mut Self {
        self.variant_hashing = hashing;
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// Fails on missing required settings or an unusable API URL. Loads bootstrap or backup
    /// definitions but does no network I/O; call [`Client::start_poller_thread`] for that.
    pub fn to_client(self) -> Result<Client> {
        Client::new(self)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.app_name.trim().is_empty() {
            return Err(Error::MissingConfiguration("app_name"));
        }
        if self.instance_id.trim().is_empty() {
            return Err(Error::MissingConfiguration("instance_id"));
        }
        if self.api_url.trim().is_empty() {
            return Err(Error::MissingConfiguration("api_url"));
        }
        url::Url::parse(&self.api_url).map_err(Error::InvalidApiUrl)?;
        Ok(())
    }

    pub(crate) fn backup_store_handle(&self) -> Option<Arc<dyn BackupStore>> {
        match &self.backup {
            BackupSetting::DefaultFile => Some(Arc::new(FileBackupStore::new(
                FileBackupStore::default_path(&self.app_name),
            ))),
            BackupSetting::File(path) => Some(Arc::new(FileBackupStore::new(path.clone()))),
            BackupSetting::Store(store) => Some(store.clone()),
            BackupSetting::Disabled => None,
        }
    }

    pub(crate) fn take_fetcher(&mut self) -> Result<Box<dyn Fetcher>> {
        if let Some(fetcher) = self.fetcher.take() {
            return Ok(fetcher);
        }
        let fetcher = HttpFetcher::new(&HttpFetcherConfig {
            api_url: self.api_url.clone(),
            app_name: self.app_name.clone(),
            instance_id: self.instance_id.clone(),
            api_key: self.api_key.clone(),
            project_name: self.project_name.clone(),
            name_prefix: self.name_prefix.clone(),
            custom_headers: self.custom_headers.clone(),
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
        })?;
        Ok(Box::new(fetcher))
    }
}

fn generated_instance_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "undefined".to_owned());
    format!("{host}-generated-{}", thread_rng().gen_range(0..1_000_000))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{models::FeatureDefinition, snapshot::Snapshot, Error};

    use super::ClientConfig;

    fn config() -> ClientConfig {
        let mut config = ClientConfig::new("test-app", "http://localhost:4242/api");
        config.disable_backup();
        config
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::new("test-app", "http://localhost:4242/api");
        assert_eq!(config.environment, "default");
        assert_eq!(config.fetch_interval, Duration::from_secs(10));
        assert_eq!(config.max_skip_budget, Duration::from_secs(300));
        assert!(config.instance_id.contains("-generated-"));
        assert!(config.backup_store_handle().is_some());
    }

    #[test]
    fn missing_app_name() {
        let config = ClientConfig::new("", "http://localhost:4242/api");
        assert!(matches!(
            config.to_client(),
            Err(Error::MissingConfiguration("app_name"))
        ));
    }

    #[test]
    fn missing_instance_id() {
        let mut config = config();
        config.instance_id("  ");
        assert!(matches!(
            config.to_client(),
            Err(Error::MissingConfiguration("instance_id"))
        ));
    }

    #[test]
    fn missing_api_url() {
        let mut config = ClientConfig::new("test-app", "");
        config.disable_backup();
        assert!(matches!(
            config.to_client(),
            Err(Error::MissingConfiguration("api_url"))
        ));
    }

    #[test]
    fn invalid_api_url() {
        let mut config = ClientConfig::new("test-app", "not a url");
        config.disable_backup();
        assert!(matches!(config.to_client(), Err(Error::InvalidApiUrl(_))));
    }

    #[test]
    fn invalid_custom_header() {
        let mut config = config();
        config.custom_header("bad header", "value");
        assert!(matches!(config.to_client(), Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn backup_file_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json");
        let mut config = config();
        config.backup_file(&path);

        let store = config.backup_store_handle().unwrap();
        store
            .write(&Snapshot::from_definitions([FeatureDefinition::new("f", true)]))
            .unwrap();
        assert!(path.exists());
    }
}
