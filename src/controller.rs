//! The push controller: a ticking collect/checkpoint/export loop whose
//! cadence follows the schedules published by a [`Monitor`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Error, ErrorSink, LogErrorSink};
use crate::remote::{monitor_channel, quit_signal, Monitor, MonitorHandle};
use crate::schedule::{MetricConfig, PeriodMatcher};
use crate::sdk::{Accumulator, Exporter, Processor};
use crate::ticker::Ticker;

/// Upper bound on a single export call.
pub const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Ticking period used when no schedule has a positive period.
pub const DEFAULT_FALLBACK_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub struct PushOptions {
    pub export_timeout: Duration,
    pub fallback_period: Duration,
    pub sink: Arc<dyn ErrorSink>,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            export_timeout: DEFAULT_EXPORT_TIMEOUT,
            fallback_period: DEFAULT_FALLBACK_PERIOD,
            sink: Arc::new(LogErrorSink),
        }
    }
}

/// Drives periodic exports and re-arms its ticker whenever the reconciled
/// schedule period changes.
///
/// `start` and `stop` are idempotent and may be called concurrently. `stop`
/// always runs one final export cycle.
pub struct PushController {
    inner: Arc<Inner>,
}

struct Inner {
    accumulator: Arc<dyn Accumulator>,
    // Held for a whole cycle, export included: at most one cycle in flight.
    processor: tokio::sync::Mutex<Box<dyn Processor>>,
    exporter: Arc<dyn Exporter>,
    matcher: Mutex<PeriodMatcher>,
    monitor: Mutex<Arc<dyn Monitor>>,
    state: Mutex<State>,
    export_timeout: Duration,
    fallback_period: Duration,
    sink: Arc<dyn ErrorSink>,
}

#[derive(Default)]
struct State {
    running: bool,
    quit: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
    export_period: Option<Duration>,
}

impl PushController {
    pub fn new(
        accumulator: Arc<dyn Accumulator>,
        processor: Box<dyn Processor>,
        exporter: Arc<dyn Exporter>,
        monitor: Arc<dyn Monitor>,
        options: PushOptions,
    ) -> Self {
        assert!(!options.fallback_period.is_zero(), "fallback period must be positive");
        Self {
            inner: Arc::new(Inner {
                accumulator,
                processor: tokio::sync::Mutex::new(processor),
                exporter,
                matcher: Mutex::new(PeriodMatcher::new()),
                monitor: Mutex::new(monitor),
                state: Mutex::new(State::default()),
                export_timeout: options.export_timeout,
                fallback_period: options.fallback_period,
                sink: options.sink,
            }),
        }
    }

    /// Replaces the monitor used by the next `start`.
    pub fn set_monitor(&self, monitor: Arc<dyn Monitor>) {
        *self.inner.monitor.lock() = monitor;
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    /// The armed ticking period, `None` until the first config arrives.
    pub fn export_period(&self) -> Option<Duration> {
        self.inner.state.lock().export_period
    }

    /// Starts the run loop. Must be called from within a tokio runtime.
    ///
    /// A [`BasicMonitor`](crate::remote::BasicMonitor) serves one session, so
    /// a restart after `stop` needs a fresh one via `set_monitor`.
    pub fn start(&self) {
        let mut state = self.inner.state.lock();
        if state.running {
            return;
        }
        state.running = true;
        state.export_period = None;

        self.inner.matcher.lock().mark_start(Instant::now());

        let (channel, handle) = monitor_channel();
        self.inner.monitor.lock().clone().monitor_changes(channel);

        let (quit_tx, quit_rx) = watch::channel(false);
        state.quit = Some(quit_tx);
        state.task = Some(tokio::spawn(run(self.inner.clone(), handle, quit_rx)));
        info!("push controller started");
    }

    /// Stops the run loop, then performs one forced export cycle before
    /// returning. The final cycle runs in its own task, so it still completes
    /// if this future is dropped.
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

        let inner = self.inner.clone();
        let last = tokio::spawn(async move {
            if let Some(task) = task {
                let _ = task.await;
            }
            inner.flush().await;
        });
        if let Err(err) = last.await {
            if err.is_panic() {
                std::panic::resume_unwind(err.into_panic());
            }
        }
        info!("push controller stopped");
    }
}

async fn run(inner: Arc<Inner>, mut handle: MonitorHandle, mut quit: watch::Receiver<bool>) {
    // No ticker until the first config arrives.
    let mut ticker: Option<Ticker> = None;
    let mut data_open = true;
    let mut err_open = true;

    loop {
        tokio::select! {
            biased;
            _ = quit_signal(&mut quit) => break,
            at = next_tick(&mut ticker), if ticker.is_some() => inner.tick(at).await,
            config = handle.data.recv(), if data_open => match config {
                Some(config) => inner.update(config, &mut ticker),
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

async fn next_tick(ticker: &mut Option<Ticker>) -> Instant {
    match ticker {
        Some(ticker) => ticker.tick().await,
        None => std::future::pending().await,
    }
}

impl Inner {
    fn update(&self, config: MetricConfig, ticker: &mut Option<Ticker>) {
        let now = Instant::now();
        let (period, start) = {
            let mut matcher = self.matcher.lock();
            let period = match matcher.apply_schedules(config.schedules) {
                Ok(period) if period.is_zero() => self.fallback_period,
                Ok(period) => period,
                Err(err) => {
                    self.sink.report(err.into());
                    return;
                }
            };
            (period, matcher.next_boundary(now, period))
        };

        if ticker.as_ref().map(Ticker::period) == Some(period) {
            return;
        }

        *ticker = Some(Ticker::starting_at(start, period));
        self.state.lock().export_period = Some(period);
        info!(
            fingerprint = ?config.fingerprint,
            period_secs = period.as_secs(),
            "export period changed"
        );
    }

    /// One cycle for a tick scheduled at `at`.
    async fn tick(&self, at: Instant) {
        let mut processor = self.processor.lock().await;
        processor.start_collection();
        let produced = {
            let mut matcher = self.matcher.lock();
            let mut rule = matcher.build_rule(at);
            self.accumulator
                .collect(&mut |name: &str| rule.matches(name), &mut **processor)
        };
        debug!(produced, "collected tick");
        self.finish_and_export(&mut **processor).await;
    }

    /// Final cycle on stop: everything an active schedule selects, due or not.
    async fn flush(&self) {
        let mut processor = self.processor.lock().await;
        processor.start_collection();
        let produced = {
            let matcher = self.matcher.lock();
            match matcher.schedules() {
                Some(schedules) => self.accumulator.collect(
                    &mut |name: &str| schedules.iter().any(|s| s.period_sec > 0 && s.matches(name)),
                    &mut **processor,
                ),
                None => 0,
            }
        };
        debug!(produced, "collected final cycle");
        self.finish_and_export(&mut **processor).await;
    }

    async fn finish_and_export(&self, processor: &mut dyn Processor) {
        // A failed finish still exports whatever checkpoint the processor holds.
        if let Err(err) = processor.finish_collection() {
            self.sink.report(Error::Checkpoint(err));
        }

        let checkpoint = processor.checkpoint_set();
        match tokio::time::timeout(self.export_timeout, self.exporter.export(checkpoint)).await {
            Ok(Ok(())) => debug!(records = checkpoint.len(), "exported checkpoint"),
            Ok(Err(err)) => self.sink.report(Error::Export(err)),
            Err(_) => self.sink.report(Error::ExportTimeout(self.export_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::error::{BoxError, TransportError};
    use crate::remote::mock::MockTransport;
    use crate::remote::{BasicMonitor, StaticMonitor};
    use crate::schedule::{Resource, Schedule};
    use crate::sdk::{BasicProcessor, CheckpointSet, InMemoryExporter, Record, Registry};
    use crate::testutil::{settle, CapturingSink};

    const MINUTE: Duration = Duration::from_secs(60);

    struct Fixture {
        registry: Arc<Registry>,
        exporter: Arc<InMemoryExporter>,
        sink: Arc<CapturingSink>,
        controller: PushController,
    }

    fn fixture(monitor: impl Monitor + 'static) -> Fixture {
        let registry = Arc::new(Registry::new());
        let exporter = Arc::new(InMemoryExporter::new());
        let sink = Arc::new(CapturingSink::default());
        let controller = PushController::new(
            registry.clone(),
            Box::new(BasicProcessor::new()),
            exporter.clone(),
            Arc::new(monitor),
            PushOptions {
                sink: sink.clone(),
                ..Default::default()
            },
        );
        Fixture {
            registry,
            exporter,
            sink,
            controller,
        }
    }

    struct FlakyExporter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Exporter for FlakyExporter {
        async fn export(&self, _: &CheckpointSet) -> Result<(), BoxError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err("collector unreachable".into());
            }
            Ok(())
        }
    }

    struct SlowExporter;

    #[async_trait]
    impl Exporter for SlowExporter {
        async fn export(&self, _: &CheckpointSet) -> Result<(), BoxError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    /// Collects normally but fails every `finish_collection`.
    #[derive(Default)]
    struct BrokenFinish {
        inner: BasicProcessor,
    }

    impl Processor for BrokenFinish {
        fn start_collection(&mut self) {
            self.inner.start_collection();
        }

        fn process(&mut self, record: Record) {
            self.inner.process(record);
        }

        fn finish_collection(&mut self) -> Result<(), BoxError> {
            Err("finish broke".into())
        }

        fn checkpoint_set(&self) -> &CheckpointSet {
            self.inner.checkpoint_set()
        }
    }

    fn polling_monitor(transport: &Arc<MockTransport>, sink: &Arc<CapturingSink>) -> BasicMonitor {
        BasicMonitor::new(transport.clone(), Resource::with_service_name("pushtest"), sink.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_polled_config_exports_once_per_minute_and_once_on_stop() {
        let transport = Arc::new(MockTransport::serving(&MetricConfig::with_default_schedule(60, "fp")));
        let sink = Arc::new(CapturingSink::default());
        let registry = Arc::new(Registry::new());
        registry.counter("requests").add(1);
        let exporter = Arc::new(InMemoryExporter::new());
        let controller = PushController::new(
            registry,
            Box::new(BasicProcessor::new()),
            exporter.clone(),
            Arc::new(polling_monitor(&transport, &sink)),
            PushOptions {
                sink: sink.clone(),
                ..Default::default()
            },
        );

        controller.start();
        tokio::time::sleep(MINUTE + Duration::from_secs(1)).await;
        assert_eq!(exporter.count(), 1);
        assert_eq!(transport.calls(), 1);

        controller.stop().await;
        assert_eq!(exporter.count(), 2);
        assert_eq!(sink.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_finish_still_exports() {
        let registry = Arc::new(Registry::new());
        registry.counter("requests").add(1);
        let exporter = Arc::new(InMemoryExporter::new());
        let sink = Arc::new(CapturingSink::default());
        let controller = PushController::new(
            registry,
            Box::new(BrokenFinish::default()),
            exporter.clone(),
            Arc::new(StaticMonitor::with_period(60)),
            PushOptions {
                sink: sink.clone(),
                ..Default::default()
            },
        );

        controller.start();
        tokio::time::sleep(MINUTE + Duration::from_secs(1)).await;
        assert_eq!(exporter.count(), 1);
        assert_eq!(sink.messages(), vec!["finish collection failed: finish broke"]);

        controller.stop().await;
        assert_eq!(exporter.count(), 2);
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_with_spent_monitor_reports_it() {
        let transport = Arc::new(MockTransport::serving(&MetricConfig::with_default_schedule(60, "fp")));
        let sink = Arc::new(CapturingSink::default());
        let f = fixture(polling_monitor(&transport, &sink));

        f.controller.start();
        settle().await;
        f.controller.stop().await;

        f.controller.start();
        settle().await;
        assert_eq!(f.controller.export_period(), None);
        assert_eq!(f.sink.messages(), vec!["config monitor already started"]);

        f.controller.set_monitor(Arc::new(polling_monitor(&transport, &sink)));
        f.controller.stop().await;
        f.controller.start();
        settle().await;
        assert_eq!(f.controller.export_period(), Some(MINUTE));
        f.controller.stop().await;
        assert_eq!(sink.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_export_per_period_and_one_on_stop() {
        let f = fixture(StaticMonitor::with_period(60));
        f.registry.counter("requests").add(7);

        f.controller.start();
        settle().await;
        assert_eq!(f.controller.export_period(), Some(MINUTE));

        tokio::time::sleep(MINUTE + Duration::from_secs(1)).await;
        assert_eq!(f.exporter.count(), 1);
        assert_eq!(f.exporter.exports()[0].names(), vec!["requests"]);

        f.controller.stop().await;
        assert_eq!(f.exporter.count(), 2);
        assert_eq!(f.exporter.exports()[1].names(), vec!["requests"]);
        assert!(!f.controller.is_running());
        assert_eq!(f.sink.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_runs_one_loop() {
        let f = fixture(StaticMonitor::with_period(60));
        f.registry.counter("requests").add(1);

        f.controller.start();
        f.controller.start();
        tokio::time::sleep(MINUTE + Duration::from_secs(1)).await;
        assert_eq!(f.exporter.count(), 1);
        f.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_twice_exports_once() {
        let f = fixture(StaticMonitor::with_period(60));
        f.controller.start();
        settle().await;

        f.controller.stop().await;
        f.controller.stop().await;
        assert_eq!(f.exporter.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_config() {
        let f = fixture(StaticMonitor::new(Vec::new()));
        f.registry.counter("requests").add(1);
        f.controller.start();
        settle().await;
        assert_eq!(f.controller.export_period(), None);

        f.controller.stop().await;
        let exports = f.exporter.exports();
        assert_eq!(exports.len(), 1);
        assert!(exports[0].is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let f = fixture(StaticMonitor::with_period(60));
        f.controller.start();
        settle().await;
        f.controller.stop().await;

        f.controller.start();
        settle().await;
        assert!(f.controller.is_running());
        assert_eq!(f.controller.export_period(), Some(MINUTE));
        f.controller.stop().await;
        assert_eq!(f.exporter.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_update_keeps_period() {
        let mut invalid = MetricConfig::with_default_schedule(60, "bad");
        invalid.schedules.push(Schedule::starts_with("x", -5));
        let f = fixture(StaticMonitor::new(vec![
            MetricConfig::with_default_schedule(60, "good"),
            invalid,
        ]));

        f.controller.start();
        settle().await;
        assert_eq!(f.controller.export_period(), Some(MINUTE));
        assert_eq!(
            f.sink.messages(),
            vec!["metric config invalid: schedule 1 has negative period -5s"]
        );
        f.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_period_follows_latest_config() {
        let f = fixture(StaticMonitor::new(vec![
            MetricConfig::with_default_schedule(60, "a"),
            MetricConfig::new(
                "b",
                vec![Schedule::starts_with("cpu", 20), Schedule::starts_with("mem", 30)],
            ),
        ]));
        f.registry.counter("cpu.ticks").add(1);
        f.registry.counter("mem.used").add(1);

        f.controller.start();
        settle().await;
        assert_eq!(f.controller.export_period(), Some(Duration::from_secs(10)));

        // Ticks at 10, 20 and 30 seconds: nothing, cpu, mem.
        tokio::time::sleep(Duration::from_secs(31)).await;
        let names: Vec<Vec<String>> = f
            .exporter
            .exports()
            .iter()
            .map(|c| c.names().into_iter().map(String::from).collect())
            .collect();
        assert_eq!(
            names,
            vec![Vec::<String>::new(), vec!["cpu.ticks".to_string()], vec!["mem.used".to_string()]]
        );
        f.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_schedules_use_fallback_period() {
        let f = fixture(StaticMonitor::with_period(0));
        f.controller.start();
        settle().await;
        assert_eq!(f.controller.export_period(), Some(DEFAULT_FALLBACK_PERIOD));
        f.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_error_does_not_stop_loop() {
        let registry = Arc::new(Registry::new());
        let exporter = Arc::new(FlakyExporter {
            calls: AtomicUsize::new(0),
        });
        let sink = Arc::new(CapturingSink::default());
        let controller = PushController::new(
            registry,
            Box::new(BasicProcessor::new()),
            exporter.clone(),
            Arc::new(StaticMonitor::with_period(60)),
            PushOptions {
                sink: sink.clone(),
                ..Default::default()
            },
        );

        controller.start();
        tokio::time::sleep(2 * MINUTE + Duration::from_secs(1)).await;
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 2);
        assert_eq!(sink.messages(), vec!["export failed: collector unreachable"]);
        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_timeout_is_reported() {
        let sink = Arc::new(CapturingSink::default());
        let controller = PushController::new(
            Arc::new(Registry::new()),
            Box::new(BasicProcessor::new()),
            Arc::new(SlowExporter),
            Arc::new(StaticMonitor::with_period(60)),
            PushOptions {
                export_timeout: Duration::from_secs(5),
                sink: sink.clone(),
                ..Default::default()
            },
        );

        controller.start();
        tokio::time::sleep(MINUTE + Duration::from_secs(6)).await;
        assert_eq!(sink.messages(), vec!["export timed out after 5s"]);
        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_errors_reach_sink() {
        let transport = Arc::new(MockTransport::serving(&MetricConfig::with_default_schedule(60, "fp")));
        transport.fail_next(TransportError::ConnectionRefused);
        let sink = Arc::new(CapturingSink::default());
        let monitor = BasicMonitor::new(transport.clone(), Resource::with_service_name("pushtest"), sink.clone())
            .with_check_frequency(Duration::from_secs(10));
        let controller = PushController::new(
            Arc::new(Registry::new()),
            Box::new(BasicProcessor::new()),
            Arc::new(InMemoryExporter::new()),
            Arc::new(StaticMonitor::new(Vec::new())),
            PushOptions {
                sink: sink.clone(),
                ..Default::default()
            },
        );
        controller.set_monitor(Arc::new(monitor));

        controller.start();
        settle().await;
        assert_eq!(sink.messages(), vec!["fail to get metric config: connection refused"]);
        assert_eq!(controller.export_period(), None);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(controller.export_period(), Some(MINUTE));

        controller.stop().await;
        settle().await;
        assert!(transport.is_closed());
    }
}
