/// Backoff state for the definitions poller.
///
/// Each failed fetch raises `failures` and sets how many upcoming ticks are skipped. Each success
/// lowers `failures` by one and skips that many ticks. Both counters stay at or above zero.
///
/// Owned by the synchronizer; not synchronized.
#[derive(Debug, Clone)]
pub struct Throttler {
    max_skips: u32,
    interval_secs: u64,
    skips: u32,
    failures: u32,
}

impl Throttler {
    /// `max_skips` is `budget_secs / interval_secs`, at least one.
    pub fn new(interval_secs: u64, budget_secs: u64) -> Throttler {
        let max_skips = (budget_secs / interval_secs.max(1)).clamp(1, u32::MAX as u64) as u32;
        Throttler {
            max_skips,
            interval_secs,
            skips: 0,
            failures: 0,
        }
    }

    /// `true` when the next tick should hit the network.
    pub fn perform_action(&self) -> bool {
        self.skips == 0
    }

    /// Record a skipped tick.
    pub fn skipped(&mut self) {
        self.skips = self.skips.saturating_sub(1);
    }

    /// Back off after a non-2xx response.
    ///
    /// 401, 403 and 404 will not fix themselves, so they back off to the maximum straight away.
    /// Everything else (429, 5xx, unexpected codes) backs off by the failure count.
    pub fn handle_http_error_codes(&mut self, status: u16) {
        match status {
            401 | 403 => {
                self.maximize_skips();
                log::error!(target: "flagkit",
                    status,
                    max_skips = self.max_skips,
                    interval_secs = self.interval_secs;
                    "client is not authorized to fetch feature definitions, backing off");
            }
            404 => {
                self.maximize_skips();
                log::error!(target: "flagkit",
                    status,
                    max_skips = self.max_skips,
                    interval_secs = self.interval_secs;
                    "feature definitions endpoint does not exist, backing off to the maximum");
            }
            429 => {
                self.increase_skip_count();
                log::info!(target: "flagkit",
                    failures = self.failures,
                    skips = self.skips,
                    interval_secs = self.interval_secs;
                    "rate limited, backing off");
            }
            _ => {
                self.increase_skip_count();
                log::info!(target: "flagkit",
                    status,
                    failures = self.failures,
                    skips = self.skips,
                    interval_secs = self.interval_secs;
                    "server failed to serve feature definitions, backing off");
            }
        }
    }

    /// Back off after a failure without a status code: transport errors and unparsable payloads.
    pub fn handle_failure(&mut self) {
        self.increase_skip_count();
    }

    /// Record a successful fetch.
    pub fn decrement_failure_count_and_reset_skips(&mut self) {
        if self.failures > 0 {
            self.failures -= 1;
            self.skips = self.failures;
        }
    }

    pub fn skips(&self) -> u32 {
        self.skips
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn max_skips(&self) -> u32 {
        self.max_skips
    }

    fn increase_skip_count(&mut self) {
        self.failures = self.failures.saturating_add(1);
        self.skips = self.failures.min(self.max_skips);
    }

    fn maximize_skips(&mut self) {
        self.skips = self.max_skips;
        self.failures = self.failures.saturating_add(1);
    }
}
