//! Watcher-style fan-out of config snapshots.
//!
//! Instead of driving a controller, a [`Notifier`] hands every new snapshot
//! to registered [`ConfigWatcher`]s.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{ErrorSink, LogErrorSink};
use crate::remote::{monitor_channel, quit_signal, Monitor, MonitorHandle};
use crate::schedule::MetricConfig;

/// Receives config snapshots from a [`Notifier`].
///
/// Callbacks run with the notifier's watcher list locked, so they must not
/// call back into the notifier.
pub trait ConfigWatcher: Send + Sync {
    /// Called exactly once, with the first config known to the watcher.
    fn on_initial_config(&self, config: &MetricConfig);

    /// Called for every later config with a different fingerprint.
    fn on_updated_config(&self, config: &MetricConfig);
}

pub struct Notifier {
    inner: Arc<Inner>,
}

struct Inner {
    monitor: Option<Arc<dyn Monitor>>,
    sink: Arc<dyn ErrorSink>,
    shared: Mutex<Shared>,
    state: Mutex<RunState>,
}

struct Shared {
    current: Option<MetricConfig>,
    watchers: Vec<Arc<dyn ConfigWatcher>>,
}

#[derive(Default)]
struct RunState {
    running: bool,
    quit: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl Notifier {
    /// Without a monitor the notifier is static and only ever holds
    /// `initial`.
    pub fn new(initial: Option<MetricConfig>, monitor: Option<Arc<dyn Monitor>>) -> Self {
        Self::with_error_sink(initial, monitor, Arc::new(LogErrorSink))
    }

    pub fn with_error_sink(
        initial: Option<MetricConfig>,
        monitor: Option<Arc<dyn Monitor>>,
        sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                monitor,
                sink,
                shared: Mutex::new(Shared {
                    current: initial,
                    watchers: Vec::new(),
                }),
                state: Mutex::new(RunState::default()),
            }),
        }
    }

    pub fn current(&self) -> Option<MetricConfig> {
        self.inner.shared.lock().current.clone()
    }

    /// Adds a watcher. If a config is already known, `on_initial_config` runs
    /// before this returns; otherwise it runs when the first config arrives.
    pub fn register(&self, watcher: Arc<dyn ConfigWatcher>) {
        let mut shared = self.inner.shared.lock();
        if let Some(config) = &shared.current {
            watcher.on_initial_config(config);
        }
        shared.watchers.push(watcher);
    }

    /// Starts listening to the monitor. No-op for a static notifier or when
    /// already started.
    pub fn start(&self) {
        let Some(monitor) = self.inner.monitor.clone() else {
            return;
        };
        let mut state = self.inner.state.lock();
        if state.running {
            return;
        }
        state.running = true;

        let (channel, handle) = monitor_channel();
        monitor.monitor_changes(channel);

        let (quit_tx, quit_rx) = watch::channel(false);
        state.quit = Some(quit_tx);
        state.task = Some(tokio::spawn(listen(self.inner.clone(), handle, quit_rx)));
        info!("config notifier started");
    }

    /// Stops listening and waits for the listening task to exit. Idempotent.
    pub async fn stop(&self) {
        let (quit, task) = {
            let mut state = self.inner.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
            (state.quit.take(), state.task.take())
        };
        if let Some(quit) = quit {
            let _ = quit.send(true);
        }
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("config notifier stopped");
    }
}

async fn listen(inner: Arc<Inner>, mut handle: MonitorHandle, mut quit: watch::Receiver<bool>) {
    let mut data_open = true;
    let mut err_open = true;
    loop {
        tokio::select! {
            biased;
            _ = quit_signal(&mut quit) => break,
            config = handle.data.recv(), if data_open => match config {
                Some(config) => inner.deliver(config),
                None => data_open = false,
            },
            err = handle.err.recv(), if err_open => match err {
                Some(err) => inner.sink.report(err),
                None => err_open = false,
            },
        }
    }
    handle.quit();
}

impl Inner {
    fn deliver(&self, config: MetricConfig) {
        let mut shared = self.shared.lock();
        match &shared.current {
            Some(current) if current.same_snapshot(&config) => return,
            Some(_) => {
                for watcher in &shared.watchers {
                    watcher.on_updated_config(&config);
                }
            }
            None => {
                for watcher in &shared.watchers {
                    watcher.on_initial_config(&config);
                }
            }
        }
        debug!(fingerprint = ?config.fingerprint, watchers = shared.watchers.len(), "delivered config");
        shared.current = Some(config);
    }
}
