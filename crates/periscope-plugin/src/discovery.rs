//! Device discovery for transports that have to be polled.
//!
//! Each transport gets its own loop. Retry timing lives in a
//! [`RetrySchedule`] driven by an injected [`Clock`], and every probe outcome
//! re-arms the schedule, so a failed attempt never stops discovery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::MetroConfig;
use crate::coordinator::ConnectionRequest;
use crate::error::PluginError;
use crate::events::HostEvent;
use crate::handle::CoordinatorHandle;

// ── Clock ─────────────────────────────────────────────────────────────

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Tokio's clock; follows paused time in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_ms: AtomicU64,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.offset_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

// ── Retry schedule ────────────────────────────────────────────────────

/// Fixed-interval retry state for one transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    interval: Duration,
    next_attempt: Option<Instant>,
    consecutive_failures: u32,
}

impl RetrySchedule {
    /// A schedule whose first attempt is due immediately.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_attempt: None,
            consecutive_failures: 0,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_attempt.map_or(true, |at| now >= at)
    }

    pub fn time_until_due(&self, now: Instant) -> Duration {
        self.next_attempt
            .map_or(Duration::ZERO, |at| at.saturating_duration_since(now))
    }

    pub fn record_success(&mut self, now: Instant) {
        self.consecutive_failures = 0;
        self.next_attempt = Some(now + self.interval);
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.next_attempt = Some(now + self.interval);
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_attempt(&self) -> Option<Instant> {
        self.next_attempt
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

// ── Discovery state machine ───────────────────────────────────────────

/// What the loop should do after a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryAction {
    /// The device appeared: register it.
    Register,
    /// The device went away: unregister it.
    Unregister,
    /// The probe failed unexpectedly: tell the host.
    ReportError(String),
    Idle,
}

#[derive(Debug, Clone)]
pub struct DiscoveryState {
    connected: bool,
    schedule: RetrySchedule,
}

impl DiscoveryState {
    pub fn new(interval: Duration) -> Self {
        Self {
            connected: false,
            schedule: RetrySchedule::new(interval),
        }
    }

    /// Fold one probe result into the state. Always re-arms the schedule.
    pub fn step(&mut self, now: Instant, probe: Result<bool, PluginError>) -> DiscoveryAction {
        match probe {
            Ok(true) => {
                self.schedule.record_success(now);
                if self.connected {
                    DiscoveryAction::Idle
                } else {
                    self.connected = true;
                    DiscoveryAction::Register
                }
            }
            Ok(false) => {
                self.schedule.record_failure(now);
                if self.connected {
                    self.connected = false;
                    DiscoveryAction::Unregister
                } else {
                    DiscoveryAction::Idle
                }
            }
            Err(e) => {
                self.schedule.record_failure(now);
                DiscoveryAction::ReportError(e.to_string())
            }
        }
    }

    /// Forget a registration the coordinator refused.
    pub fn mark_disconnected(&mut self) {
        self.connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn schedule(&self) -> &RetrySchedule {
        &self.schedule
    }
}

// ── Transports ────────────────────────────────────────────────────────

/// A transport whose devices are found by polling.
#[async_trait]
pub trait DeviceTransport: Send + Sync + 'static {
    /// Handshake used to register the device once found.
    fn device(&self) -> ConnectionRequest;

    /// `Ok(true)` if the device is reachable, `Ok(false)` if it is simply
    /// not there, `Err` for anything unexpected.
    async fn probe(&self) -> Result<bool, PluginError>;
}

/// Greetings the Metro bundler serves on its root URL.
pub const METRO_MESSAGES: [&str; 2] = ["React Native packager is running", "Metro is running"];

/// Polls a Metro bundler over HTTP.
#[derive(Debug, Clone)]
pub struct MetroTransport {
    client: reqwest::Client,
    url: String,
}

impl MetroTransport {
    pub fn new(config: &MetroConfig) -> Result<Self, PluginError> {
        let client = reqwest::Client::builder()
            .timeout(config.connect_timeout())
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DeviceTransport for MetroTransport {
    fn device(&self) -> ConnectionRequest {
        ConnectionRequest::device(self.url.clone(), "React Native", "Metro")
    }

    async fn probe(&self) -> Result<bool, PluginError> {
        let response = match self.client.get(&self.url).send().await {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_timeout() => {
                debug!(url = %self.url, "could not connect to Metro: {e}");
                return Ok(false);
            }
            Err(e) => {
                return Err(PluginError::Transport(format!(
                    "Metro probe of {} failed: {e}",
                    self.url
                )))
            }
        };
        let body = response.text().await?;
        Ok(METRO_MESSAGES.iter().any(|msg| body.contains(msg)))
    }
}

// ── Loop ──────────────────────────────────────────────────────────────

/// Probe once and apply the outcome to the coordinator.
pub async fn run_discovery_step<T: DeviceTransport + ?Sized>(
    transport: &T,
    handle: &CoordinatorHandle,
    state: &mut DiscoveryState,
    clock: &dyn Clock,
) -> DiscoveryAction {
    let probe = transport.probe().await;
    let action = state.step(clock.now(), probe);
    let device = transport.device();

    match &action {
        DiscoveryAction::Register => match handle.connect(device.clone()).await {
            Ok(plugins) => {
                info!(device = %device.id, plugins = plugins.len(), "device discovered");
            }
            Err(e) => {
                warn!(device = %device.id, "discovered device rejected: {e}");
                state.mark_disconnected();
            }
        },
        DiscoveryAction::Unregister => {
            info!(device = %device.id, "device went away");
            handle.disconnect(&device.id).await;
        }
        DiscoveryAction::ReportError(detail) => {
            warn!(
                device = %device.id,
                failures = state.schedule().consecutive_failures(),
                "device probe failed: {detail}"
            );
            handle.emit(HostEvent::server_error(
                format!("Failed to reach {}", device.title),
                Some(detail.clone()),
            ));
        }
        DiscoveryAction::Idle => {}
    }
    action
}

/// Spawn the polling loop for one transport.
pub fn spawn_discovery<T: DeviceTransport>(
    transport: Arc<T>,
    handle: CoordinatorHandle,
    clock: Arc<dyn Clock>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut state = DiscoveryState::new(interval);
        info!(
            device = %transport.device().id,
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "device discovery started"
        );

        loop {
            let wait = state.schedule().time_until_due(clock.now());
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    run_discovery_step(&*transport, &handle, &mut state, clock.as_ref()).await;
                }
                changed = shutdown_rx.changed() => {
                    // sender dropped
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("device discovery: shutting down");
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::coordinator::DispatchCoordinator;
    use crate::eligibility::StaticGatekeeper;
    use crate::events::EventBus;
    use crate::loader::StaticResolver;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const INTERVAL: Duration = Duration::from_secs(5);

    // ── RetrySchedule ────────────────────────────────────────────────

    #[test]
    fn test_first_attempt_is_due_immediately() {
        let clock = ManualClock::new();
        let schedule = RetrySchedule::new(INTERVAL);
        assert!(schedule.is_due(clock.now()));
        assert_eq!(schedule.time_until_due(clock.now()), Duration::ZERO);
    }

    #[test]
    fn test_failure_rearms_after_interval() {
        let clock = ManualClock::new();
        let mut schedule = RetrySchedule::new(INTERVAL);
        schedule.record_failure(clock.now());

        assert!(!schedule.is_due(clock.now()));
        assert_eq!(schedule.time_until_due(clock.now()), INTERVAL);
        assert_eq!(schedule.consecutive_failures(), 1);

        clock.advance(Duration::from_secs(4));
        assert!(!schedule.is_due(clock.now()));
        clock.advance(Duration::from_secs(1));
        assert!(schedule.is_due(clock.now()));
    }

    #[test]
    fn test_success_resets_failures() {
        let clock = ManualClock::new();
        let mut schedule = RetrySchedule::new(INTERVAL);
        schedule.record_failure(clock.now());
        schedule.record_failure(clock.now());
        schedule.record_success(clock.now());
        assert_eq!(schedule.consecutive_failures(), 0);
        assert_eq!(schedule.next_attempt(), Some(clock.now() + INTERVAL));
    }

    // ── DiscoveryState ───────────────────────────────────────────────

    #[test]
    fn test_step_transitions() {
        let clock = ManualClock::new();
        let mut state = DiscoveryState::new(INTERVAL);

        assert_eq!(state.step(clock.now(), Ok(false)), DiscoveryAction::Idle);
        assert_eq!(state.step(clock.now(), Ok(true)), DiscoveryAction::Register);
        assert!(state.is_connected());
        assert_eq!(state.step(clock.now(), Ok(true)), DiscoveryAction::Idle);
        assert_eq!(state.step(clock.now(), Ok(false)), DiscoveryAction::Unregister);
        assert!(!state.is_connected());

        let action = state.step(
            clock.now(),
            Err(PluginError::Transport("bad gateway".into())),
        );
        assert_eq!(
            action,
            DiscoveryAction::ReportError("transport error: bad gateway".into())
        );
    }

    #[test]
    fn test_every_outcome_rearms() {
        let clock = ManualClock::new();
        let mut state = DiscoveryState::new(INTERVAL);
        let probes: Vec<Result<bool, PluginError>> = vec![
            Ok(false),
            Err(PluginError::Transport("x".into())),
            Ok(true),
            Ok(true),
            Ok(false),
        ];
        for probe in probes {
            clock.advance(Duration::from_secs(7));
            let now = clock.now();
            state.step(now, probe);
            assert_eq!(state.schedule().next_attempt(), Some(now + INTERVAL));
        }
    }

    // ── MetroTransport ───────────────────────────────────────────────

    fn metro_config(url: String) -> MetroConfig {
        MetroConfig {
            url,
            connect_timeout_ms: 500,
            ..MetroConfig::default()
        }
    }

    #[tokio::test]
    async fn test_metro_probe_detects_bundler() {
        let server = MockServer::start().await;
        let body = "packager-status:running\nMetro is running";
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let transport = MetroTransport::new(&metro_config(server.uri())).unwrap();
        assert!(transport.probe().await.unwrap());
        assert_eq!(transport.device().os, "Metro");
    }

    #[tokio::test]
    async fn test_metro_probe_legacy_greeting() {
        let server = MockServer::start().await;
        let body = "React Native packager is running";
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let transport = MetroTransport::new(&metro_config(server.uri())).unwrap();
        assert!(transport.probe().await.unwrap());
    }

    #[tokio::test]
    async fn test_metro_probe_other_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>hello</html>"))
            .mount(&server)
            .await;

        let transport = MetroTransport::new(&metro_config(server.uri())).unwrap();
        assert!(!transport.probe().await.unwrap());
    }

    #[tokio::test]
    async fn test_metro_probe_unreachable_is_not_an_error() {
        let transport =
            MetroTransport::new(&metro_config("http://127.0.0.1:1".to_string())).unwrap();
        assert!(!transport.probe().await.unwrap());
    }

    // ── Loop ─────────────────────────────────────────────────────────

    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<bool, PluginError>>>,
        probes: AtomicU64,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<bool, PluginError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                probes: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl DeviceTransport for ScriptedTransport {
        fn device(&self) -> ConnectionRequest {
            ConnectionRequest::device("metro", "React Native", "Metro")
        }

        async fn probe(&self) -> Result<bool, PluginError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(false))
        }
    }

    fn handle() -> CoordinatorHandle {
        CoordinatorHandle::new(DispatchCoordinator::new(
            RuntimeConfig::default(),
            Arc::new(StaticGatekeeper::default()),
            Arc::new(StaticResolver::new()),
            EventBus::default(),
        ))
    }

    #[tokio::test]
    async fn test_discovery_step_registers_and_reports() {
        let handle = handle();
        let mut rx = handle.subscribe();
        let clock = ManualClock::new();
        let transport = ScriptedTransport::new(vec![
            Ok(true),
            Err(PluginError::Transport("boom".into())),
            Ok(false),
        ]);
        let mut state = DiscoveryState::new(INTERVAL);

        for _ in 0..3 {
            run_discovery_step(&transport, &handle, &mut state, &clock).await;
        }

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec!["REGISTER_DEVICE", "SERVER_ERROR", "UNREGISTER_DEVICES"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_keeps_polling_until_shutdown() {
        let handle = handle();
        let mut rx = handle.subscribe();
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(false),
            Ok(true),
            Ok(true),
            Ok(false),
            Err(PluginError::Transport("reset".into())),
        ]));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = spawn_discovery(
            Arc::clone(&transport),
            handle.clone(),
            Arc::new(SystemClock),
            INTERVAL,
            shutdown_rx,
        );

        tokio::time::sleep(Duration::from_secs(27)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        // attempts at 0, 5, 10, 15, 20 and 25 seconds
        assert_eq!(transport.probes.load(Ordering::SeqCst), 6);

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec!["REGISTER_DEVICE", "UNREGISTER_DEVICES", "SERVER_ERROR"]
        );
    }

    #[tokio::test]
    async fn test_spawned_loop_stops_on_shutdown() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = spawn_discovery(
            Arc::new(ScriptedTransport::new(Vec::new())),
            handle(),
            Arc::new(SystemClock),
            Duration::from_secs(3600),
            shutdown_rx,
        );
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("discovery loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_spawned_loop_stops_when_sender_dropped() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = spawn_discovery(
            Arc::new(ScriptedTransport::new(Vec::new())),
            handle(),
            Arc::new(SystemClock),
            Duration::from_secs(3600),
            shutdown_rx,
        );
        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("discovery loop did not stop")
            .unwrap();
    }
}
