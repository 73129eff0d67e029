use std::sync::Arc;

use crate::{
    backup::BackupStore,
    bootstrap::BootstrapSource,
    events::Subscriber,
    fetcher::{FetchResponse, Fetcher},
    snapshot::{FetchStatus, Snapshot},
    snapshot_store::SnapshotStore,
    throttler::Throttler,
    Error, Result,
};

/// Startup snapshot: bootstrap if it yields definitions, else the backup, else empty.
///
/// Never fails. Bootstrap and backup problems are reported to `subscriber` and the next source is
/// tried.
pub fn load_initial_snapshot(
    bootstrap: Option<&dyn BootstrapSource>,
    backup: Option<&dyn BackupStore>,
    subscriber: &dyn Subscriber,
) -> Snapshot {
    if let Some(bootstrap) = bootstrap {
        match bootstrap
            .read()
            .and_then(|payload| payload.map(|p| Snapshot::from_json(&p, None)).transpose())
        {
            Ok(Some(snapshot)) if !snapshot.is_empty() => {
                log::info!(target: "flagkit", features = snapshot.len();
                    "bootstrapped feature definitions");
                subscriber.on_bootstrapped(&snapshot);
                return snapshot.with_status(FetchStatus::NotChanged);
            }
            Ok(_) => {
                log::info!(target: "flagkit", "bootstrap source had no feature definitions");
            }
            Err(err) => subscriber.on_error(&err),
        }
    }

    if let Some(backup) = backup {
        match backup.read() {
            Ok(Some(snapshot)) => {
                log::info!(target: "flagkit", features = snapshot.len();
                    "restored feature definitions from backup");
                subscriber.on_backup_restored(&snapshot);
                return snapshot.with_status(FetchStatus::NotChanged);
            }
            Ok(None) => {}
            Err(err) => subscriber.on_error(&err),
        }
    }

    Snapshot::empty()
}

/// Runs fetch cycles: throttle, conditional fetch, parse, persist, publish.
///
/// Owned by a single thread at a time; ticks never overlap.
pub struct Synchronizer {
    store: Arc<SnapshotStore>,
    fetcher: Box<dyn Fetcher>,
    backup: Option<Arc<dyn BackupStore>>,
    subscriber: Arc<dyn Subscriber>,
    throttler: Throttler,
    ready: bool,
}

impl Synchronizer {
    pub fn new(
        store: Arc<SnapshotStore>,
        fetcher: Box<dyn Fetcher>,
        backup: Option<Arc<dyn BackupStore>>,
        subscriber: Arc<dyn Subscriber>,
        throttler: Throttler,
    ) -> Synchronizer {
        Synchronizer {
            store,
            fetcher,
            backup,
            subscriber,
            throttler,
            ready: false,
        }
    }

    pub fn throttler(&self) -> &Throttler {
        &self.throttler
    }

    /// `true` once a cycle has fetched definitions or confirmed them unchanged.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Run one fetch cycle.
    ///
    /// Returns the cycle's status, or the error that made it fail. Failures keep the current
    /// definitions; only a successfully parsed payload replaces them.
    pub fn tick(&mut self) -> Result<FetchStatus> {
        if !self.throttler.perform_action() {
            self.throttler.skipped();
            log::debug!(target: "flagkit", skips = self.throttler.skips();
                "skipping fetch while backing off");
            self.subscriber.on_fetched(FetchStatus::NotChanged);
            return Ok(FetchStatus::NotChanged);
        }

        let current = self.store.load();
        let response = self.fetcher.fetch(current.etag());

        let result = match response {
            Ok(FetchResponse::NotChanged) => {
                log::debug!(target: "flagkit", "feature definitions not changed");
                self.throttler.decrement_failure_count_and_reset_skips();
                if current.status() != FetchStatus::NotChanged {
                    self.store.store(current.with_status(FetchStatus::NotChanged));
                }
                self.mark_ready();
                Ok(FetchStatus::NotChanged)
            }
            Ok(FetchResponse::Changed { payload, etag }) => {
                match Snapshot::from_json(&payload, etag) {
                    Ok(snapshot) => {
                        log::debug!(target: "flagkit", features = snapshot.len();
                            "fetched new feature definitions");
                        self.throttler.decrement_failure_count_and_reset_skips();
                        self.write_backup(&snapshot);
                        self.store.store(snapshot);
                        self.mark_ready();
                        Ok(FetchStatus::Changed)
                    }
                    Err(err) => {
                        log::warn!(target: "flagkit",
                            "could not parse fetched feature definitions: {err}");
                        self.throttler.handle_failure();
                        Err(err)
                    }
                }
            }
            Ok(FetchResponse::Unavailable { status }) => {
                log::warn!(target: "flagkit", status; "feature definitions unavailable");
                self.throttler.handle_http_error_codes(status);
                self.store.store(current.with_status(FetchStatus::Unavailable));
                Err(match status {
                    401 | 403 => Error::Unauthorized,
                    status => Error::UnexpectedStatus(status),
                })
            }
            Err(err) => {
                log::warn!(target: "flagkit", "error while fetching feature definitions: {err}");
                self.throttler.handle_failure();
                self.store.store(current.with_status(FetchStatus::Unavailable));
                Err(err)
            }
        };

        match &result {
            Ok(status) => self.subscriber.on_fetched(*status),
            Err(err) => {
                self.subscriber.on_fetched(FetchStatus::Unavailable);
                self.subscriber.on_error(err);
            }
        }
        result
    }

    fn write_backup(&self, snapshot: &Snapshot) {
        let Some(backup) = &self.backup else {
            return;
        };
        match backup.write(snapshot) {
            Ok(()) => self.subscriber.on_backup_written(snapshot),
            Err(err) => {
                log::warn!(target: "flagkit", "could not write backup: {err}");
                self.subscriber.on_error(&err);
            }
        }
    }

    fn mark_ready(&mut self) {
        if !self.ready {
            self.ready = true;
            self.subscriber.on_ready(&self.store.load());
        }
    }
}
