use std::{
    sync::{
        mpsc::{self, RecvTimeoutError},
        Arc, Condvar, Mutex,
    },
    thread::JoinHandle,
    time::Duration,
};

use rand::{thread_rng, Rng};

use crate::{synchronizer::Synchronizer, Error, Result};

/// Background thread that keeps feature definitions up to date.
///
/// Dropping the handle detaches the thread; it keeps polling until the process exits. Use
/// [`PollerThread::stop`] or [`PollerThread::shutdown`] to end it.
///
/// Use [`Client::start_poller_thread`](crate::Client::start_poller_thread) to get an instance of
/// it.
pub struct PollerThread {
    join_handle: JoinHandle<()>,

    /// Used to send a stop command to the poller thread.
    stop_sender: mpsc::Sender<()>,

    /// `None` until the first fetch cycle that settles readiness. Then `Some(Ok(()))` on success,
    /// or `Some(Err(Error::Unauthorized))` when the server rejected our credentials.
    result: Arc<(Mutex<Option<Result<()>>>, Condvar)>,
}

impl PollerThread {
    /// Start the poller on a thread created by `spawn`.
    ///
    /// The synchronizer is handed to the thread only after it was spawned, so a failed spawn
    /// returns it to the caller along with the error.
    pub(crate) fn start<S>(
        synchronizer: Synchronizer,
        interval: Duration,
        jitter: Duration,
        spawn: S,
    ) -> std::result::Result<PollerThread, (Error, Synchronizer)>
    where
        S: FnOnce(Box<dyn FnOnce() + Send>) -> std::io::Result<JoinHandle<()>>,
    {
        let (stop_sender, stop_receiver) = mpsc::channel::<()>();
        let (handoff_sender, handoff_receiver) = mpsc::channel::<Synchronizer>();

        let result = Arc::new((Mutex::new(None), Condvar::new()));

        let spawned = {
            let result = Arc::clone(&result);
            let update_result = move |value: Result<()>| {
                let Ok(mut slot) = result.0.lock() else {
                    return;
                };
                if slot.is_none() {
                    *slot = Some(value);
                    result.1.notify_all();
                }
            };

            spawn(Box::new(move || {
                let Ok(mut synchronizer) = handoff_receiver.recv() else {
                    return;
                };
                loop {
                    match synchronizer.tick() {
                        Err(Error::Unauthorized) => update_result(Err(Error::Unauthorized)),
                        _ if synchronizer.is_ready() => update_result(Ok(())),
                        _ => {
                            // Failures are logged and reported to the subscriber by the
                            // synchronizer. Try again on the next tick.
                        }
                    }

                    let timeout = with_jitter(interval, jitter);
                    match stop_receiver.recv_timeout(timeout) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) => {
                            log::debug!(target: "flagkit", "poller thread received stop command");
                            return;
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            // The handle was dropped without stopping us. recv_timeout returns
                            // immediately from now on, so sleep instead.
                            std::thread::sleep(timeout);
                        }
                    }
                }
            }))
        };

        let join_handle = match spawned {
            Ok(join_handle) => join_handle,
            Err(err) => return Err((err.into(), synchronizer)),
        };
        if let Err(mpsc::SendError(synchronizer)) = handoff_sender.send(synchronizer) {
            return Err((Error::PollerThreadPanicked, synchronizer));
        }

        Ok(PollerThread {
            join_handle,
            stop_sender,
            result,
        })
    }

    /// Block until the first fetch cycle completes successfully.
    ///
    /// Returns `Err(Error::Unauthorized)` if the server rejected the client's credentials before
    /// that. Failed cycles and cycles skipped while backing off keep waiting.
    pub fn wait_for_configuration(&self) -> Result<()> {
        let mut lock = self
            .result
            .0
            .lock()
            .map_err(|_| Error::PollerThreadPanicked)?;
        loop {
            match &*lock {
                Some(result) => return result.clone(),
                None => {
                    lock = self
                        .result
                        .1
                        .wait(lock)
                        .map_err(|_| Error::PollerThreadPanicked)?;
                }
            }
        }
    }

    /// Like [`PollerThread::wait_for_configuration`], but gives up after `timeout`.
    ///
    /// Returns `Ok(false)` on timeout.
    pub fn wait_for_configuration_timeout(&self, timeout: Duration) -> Result<bool> {
        let lock = self
            .result
            .0
            .lock()
            .map_err(|_| Error::PollerThreadPanicked)?;
        let (lock, _) = self
            .result
            .1
            .wait_timeout_while(lock, timeout, |result| result.is_none())
            .map_err(|_| Error::PollerThreadPanicked)?;
        match &*lock {
            Some(result) => result.clone().map(|()| true),
            None => Ok(false),
        }
    }

    /// Stop the poller thread.
    ///
    /// Does not wait for the thread to actually stop. Calling it more than once is harmless.
    pub fn stop(&self) {
        // Error means the thread has already exited.
        let _ = self.stop_sender.send(());
    }

    /// Stop the poller thread and block waiting for it to exit.
    ///
    /// If you don't need to wait for the thread to exit, use [`PollerThread::stop`] instead.
    pub fn shutdown(self) -> Result<()> {
        self.stop();

        self.join_handle
            .join()
            .map_err(|_| Error::PollerThreadPanicked)?;

        Ok(())
    }
}

/// Spawn the named poller thread.
pub(crate) fn spawn_named(body: Box<dyn FnOnce() + Send>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("flagkit-poller".to_owned())
        .spawn(body)
}

/// Shorten `interval` by a random amount up to `jitter`.
fn with_jitter(interval: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return interval;
    }
    interval.saturating_sub(thread_rng().gen_range(Duration::ZERO..=jitter))
}
