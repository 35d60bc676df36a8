use motor_bus::{BusFactory, MotorBus, Telemetry};
use motor_registry::{MotorId, OverrideProvider};
use safety_guard::{CommsTransition, CommsWatchdog, ProtectionStatus};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

use crate::calibration::CalibrationStore;
use crate::error::{Result, SessionError};
use crate::events::{now_rfc3339, CommandSummary, SessionEvent};
use crate::metrics::MetricsHub;

/// Poll intervals below this are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Clone)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    /// Upper bound on one poll cycle, waiting for the bus included.
    pub read_timeout: Duration,
    /// Consecutive failed cycles before `comms_lost` is published.
    pub comms_threshold: u32,
    pub event_capacity: usize,
    /// Protection overrides installed on every bus this session opens.
    pub overrides: Option<Arc<dyn OverrideProvider>>,
    pub metrics: Option<MetricsHub>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            read_timeout: Duration::from_secs(2),
            comms_threshold: 3,
            event_capacity: 256,
            overrides: None,
            metrics: None,
        }
    }
}

/// State shared between the session handle and its poll task.
struct Shared {
    device: String,
    bus: Arc<AsyncMutex<Option<MotorBus>>>,
    targets: Mutex<Vec<MotorId>>,
    polling: AtomicBool,
    interval_ms: AtomicU64,
    /// Motors the protection loop already switched off since the last start.
    disabled: Mutex<BTreeSet<MotorId>>,
    events: broadcast::Sender<SessionEvent>,
    metrics: Option<MetricsHub>,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn targets(&self) -> Vec<MotorId> {
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    fn is_disabled(&self, id: MotorId) -> bool {
        self.disabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }
}

struct RunningTask {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Polling telemetry for one device.
///
/// The session owns the device's [`MotorBus`]; every bus access (poll cycles and commands)
/// runs on the blocking pool while holding the bus lock, so two tasks never talk to the
/// bus at once.
pub struct TelemetrySession {
    shared: Arc<Shared>,
    factory: Arc<dyn BusFactory>,
    calibration: Arc<dyn CalibrationStore>,
    overrides: Option<Arc<dyn OverrideProvider>>,
    read_timeout: Duration,
    comms_threshold: u32,
    task: Mutex<Option<RunningTask>>,
    closed: AtomicBool,
}

impl TelemetrySession {
    pub fn new(
        device: impl Into<String>,
        factory: Arc<dyn BusFactory>,
        calibration: Arc<dyn CalibrationStore>,
        config: SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let interval = config.poll_interval.max(MIN_POLL_INTERVAL);
        Self {
            shared: Arc::new(Shared {
                device: device.into(),
                bus: Arc::new(AsyncMutex::new(None)),
                targets: Mutex::new(Vec::new()),
                polling: AtomicBool::new(false),
                interval_ms: AtomicU64::new(interval.as_millis() as u64),
                disabled: Mutex::new(BTreeSet::new()),
                events,
                metrics: config.metrics,
            }),
            factory,
            calibration,
            overrides: config.overrides,
            read_timeout: config.read_timeout,
            comms_threshold: config.comms_threshold.max(1),
            task: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn device(&self) -> &str {
        &self.shared.device
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn targets(&self) -> Vec<MotorId> {
        self.shared.targets()
    }

    pub fn set_targets(&self, ids: Vec<MotorId>) {
        *self
            .shared
            .targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = ids;
    }

    pub fn poll_interval(&self) -> Duration {
        self.shared.interval()
    }

    /// Takes effect from the next cycle. Returns the interval actually applied.
    pub fn set_poll_interval(&self, interval: Duration) -> Duration {
        let applied = interval.max(MIN_POLL_INTERVAL);
        self.shared
            .interval_ms
            .store(applied.as_millis() as u64, Ordering::Relaxed);
        tracing::debug!(device = %self.shared.device, interval_ms = applied.as_millis() as u64, "poll interval");
        applied
    }

    /// Resume polling on a running session.
    pub fn enable_polling(&self) {
        self.shared.polling.store(true, Ordering::Release);
    }

    /// Pause polling without stopping the session; commands keep working.
    pub fn disable_polling(&self) {
        self.shared.polling.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    pub fn is_polling(&self) -> bool {
        self.is_running() && self.shared.polling.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn has_driver(&self) -> bool {
        self.shared.bus.lock().await.is_some()
    }

    /// Motors disabled by the protection loop since the last start.
    pub fn disabled_motors(&self) -> Vec<MotorId> {
        self.shared
            .disabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// Build and connect a bus for `brand_or_type` on `interface`, replacing any current one.
    pub async fn open_driver(&self, brand_or_type: &str, interface: &str, rate: u32) -> Result<()> {
        self.ensure_open()?;
        let bus = self.factory.create_named(brand_or_type, interface, rate)?;
        self.attach_bus(bus).await
    }

    /// Take ownership of `bus`, connecting it first if needed.
    pub async fn attach_bus(&self, mut bus: MotorBus) -> Result<()> {
        self.ensure_open()?;
        if let Some(overrides) = &self.overrides {
            bus.set_overrides(Some(overrides.clone()));
        }
        let bus = tokio::task::spawn_blocking(move || -> Result<MotorBus> {
            if !bus.is_connected() {
                bus.connect()?;
            }
            Ok(bus)
        })
        .await
        .map_err(|e| SessionError::Task(e.to_string()))??;
        tracing::info!(
            device = %self.shared.device,
            bus = %bus.bus_type(),
            interface = %bus.interface(),
            rate = bus.rate(),
            "driver attached"
        );
        let previous = self.shared.bus.lock().await.replace(bus);
        if let Some(old) = previous {
            self.disconnect(old).await?;
        }
        Ok(())
    }

    /// Detach and disconnect the driver. `Ok(false)` when none was attached.
    pub async fn close_driver(&self) -> Result<bool> {
        let bus = self.shared.bus.lock().await.take();
        match bus {
            Some(bus) => {
                self.disconnect(bus).await?;
                tracing::info!(device = %self.shared.device, "driver detached");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Scan the attached bus (its full id range when `candidates` is `None`) and poll
    /// whatever answered.
    pub async fn discover_targets(&self, candidates: Option<Vec<u16>>) -> Result<Vec<MotorId>> {
        let found = self
            .with_bus(move |bus| match candidates {
                Some(ids) => bus.scan_ids(&ids),
                None => bus.scan_motors(None),
            })
            .await??;
        let ids: Vec<MotorId> = found.into_keys().collect();
        self.set_targets(ids.clone());
        Ok(ids)
    }

    /// Start the poll loop. A fresh start forgets which motors protection disabled.
    pub async fn start(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.has_driver().await {
            return Err(SessionError::NoDriver(self.shared.device.clone()));
        }
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        self.shared.polling.store(true, Ordering::Release);
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return Ok(());
        }
        self.shared
            .disabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        let (cancel, cancelled) = oneshot::channel();
        let handle = tokio::spawn(poll_loop(
            self.shared.clone(),
            cancelled,
            self.read_timeout,
            self.comms_threshold,
        ));
        *task = Some(RunningTask { cancel, handle });
        if let Some(m) = &self.shared.metrics {
            m.session.active_sessions.inc();
        }
        tracing::info!(
            device = %self.shared.device,
            interval_ms = self.shared.interval().as_millis() as u64,
            targets = self.shared.targets().len(),
            "polling started"
        );
        Ok(())
    }

    /// End the poll loop and detach the driver. Stopping an idle session does nothing.
    pub async fn stop(&self) -> Result<()> {
        self.shared.polling.store(false, Ordering::Release);
        let running = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(RunningTask { cancel, handle }) = running else {
            return Ok(());
        };
        let _ = cancel.send(());
        if let Err(e) = handle.await {
            tracing::warn!(device = %self.shared.device, error = %e, "poll task ended abnormally");
            self.shared.emit(SessionEvent::Error {
                device: self.shared.device.clone(),
                message: format!("poll task ended abnormally: {e}"),
                ts: now_rfc3339(),
            });
        }
        if let Some(m) = &self.shared.metrics {
            m.session.active_sessions.dec();
        }
        self.close_driver().await?;
        tracing::info!(device = %self.shared.device, "polling stopped");
        Ok(())
    }

    /// Stop and refuse any further use.
    pub async fn close(&self) -> Result<()> {
        self.stop().await?;
        self.close_driver().await?;
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    pub async fn set_position(&self, id: MotorId, position: f64) -> Result<()> {
        self.require_calibration("set_position").await?;
        let result = self
            .with_bus(move |bus| bus.set_position(id, position))
            .await
            .and_then(|r| r.map_err(SessionError::from));
        self.ack("set_position", &result);
        result
    }

    pub async fn set_positions(&self, targets: Vec<(MotorId, f64)>) -> Result<CommandSummary> {
        self.require_calibration("set_positions").await?;
        self.batch("set_positions", move |bus| bus.set_positions(&targets))
            .await
    }

    pub async fn set_torque(&self, id: MotorId, enable: bool) -> Result<()> {
        self.require_calibration("set_torque").await?;
        let result = self
            .with_bus(move |bus| bus.set_torque(id, enable))
            .await
            .and_then(|r| r.map_err(SessionError::from));
        self.ack("set_torque", &result);
        result
    }

    /// Torque on or off for every target.
    pub async fn bulk_set_torque(&self, enable: bool) -> Result<CommandSummary> {
        self.require_calibration("bulk_set_torque").await?;
        let ids = self.shared.targets();
        self.batch("bulk_set_torque", move |bus| bus.bulk_set_torque(&ids, enable))
            .await
    }

    /// Torque off everywhere, calibrated or not.
    ///
    /// Covers the targets, or every motor the bus knows when no targets are set.
    pub async fn emergency_stop(&self) -> Result<CommandSummary> {
        tracing::warn!(device = %self.shared.device, "emergency stop");
        let targets = self.shared.targets();
        self.batch("emergency_stop", move |bus| {
            let ids = if targets.is_empty() {
                bus.motor_ids()
            } else {
                targets
            };
            bus.bulk_set_torque(&ids, false)
        })
        .await
    }

    async fn batch<F>(&self, command: &str, f: F) -> Result<CommandSummary>
    where
        F: FnOnce(&mut MotorBus) -> motor_bus::BatchOutcome<()> + Send + 'static,
    {
        let result = self.with_bus(f).await.map(CommandSummary::from);
        let ack = match &result {
            Ok(summary) => summary.failure_detail().map_or(Ok(()), Err),
            Err(e) => Err(e.to_string()),
        };
        self.shared
            .emit(SessionEvent::ack(&self.shared.device, command, ack));
        result
    }

    fn ack(&self, command: &str, result: &Result<()>) {
        let outcome = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(e.to_string()),
        };
        self.shared
            .emit(SessionEvent::ack(&self.shared.device, command, outcome));
    }

    async fn require_calibration(&self, command: &str) -> Result<()> {
        if self.calibration.is_calibrated(&self.shared.device).await {
            return Ok(());
        }
        let err = SessionError::CalibrationRequired(self.shared.device.clone());
        tracing::warn!(device = %self.shared.device, command, "rejected: no calibrated motors");
        self.shared.emit(SessionEvent::ack(
            &self.shared.device,
            command,
            Err(err.to_string()),
        ));
        Err(err)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SessionError::Closed(self.shared.device.clone()));
        }
        Ok(())
    }

    /// Run `f` against the attached bus on the blocking pool.
    async fn with_bus<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut MotorBus) -> T + Send + 'static,
    {
        let guard = self.shared.bus.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            guard.as_mut().map(f)
        })
        .await
        .map_err(|e| SessionError::Task(e.to_string()))?
        .ok_or_else(|| SessionError::NoDriver(self.shared.device.clone()))
    }

    async fn disconnect(&self, mut bus: MotorBus) -> Result<()> {
        let device = self.shared.device.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = bus.disconnect() {
                tracing::warn!(device = %device, error = %e, "disconnect failed");
            }
        })
        .await
        .map_err(|e| SessionError::Task(e.to_string()))
    }
}

impl Drop for TelemetrySession {
    fn drop(&mut self) {
        let task = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.handle.abort();
            if let Some(m) = &self.shared.metrics {
                m.session.active_sessions.dec();
            }
        }
    }
}

/// Result of one bus pass, produced on the blocking pool.
struct Cycle {
    snapshots: Vec<Telemetry>,
    missing: Vec<(MotorId, String)>,
}

async fn poll_loop(
    shared: Arc<Shared>,
    mut cancelled: oneshot::Receiver<()>,
    read_timeout: Duration,
    comms_threshold: u32,
) {
    let mut watchdog = CommsWatchdog::new(shared.device.clone(), comms_threshold);
    loop {
        if shared.polling.load(Ordering::Acquire) {
            tokio::select! {
                _ = &mut cancelled => break,
                _ = poll_cycle(&shared, &mut watchdog, read_timeout) => {}
            }
        }
        tokio::select! {
            _ = &mut cancelled => break,
            _ = tokio::time::sleep(shared.interval()) => {}
        }
    }
    tracing::debug!(device = %shared.device, "poll loop exited");
}

async fn poll_cycle(shared: &Arc<Shared>, watchdog: &mut CommsWatchdog, read_timeout: Duration) {
    let targets = shared.targets();
    if targets.is_empty() {
        return;
    }
    let work = {
        let shared = shared.clone();
        async move {
            let guard = shared.bus.clone().lock_owned().await;
            tokio::task::spawn_blocking(move || read_and_protect(&shared, guard, &targets)).await
        }
    };
    let cycle = match tokio::time::timeout(read_timeout, work).await {
        Ok(Ok(Some(cycle))) => cycle,
        // Driver detached between cycles.
        Ok(Ok(None)) => return,
        Ok(Err(e)) => {
            let message = format!("poll task failed: {e}");
            tracing::error!(device = %shared.device, error = %e, "poll task failed");
            shared.emit(SessionEvent::Error {
                device: shared.device.clone(),
                message: message.clone(),
                ts: now_rfc3339(),
            });
            cycle_failed(shared, watchdog, message);
            return;
        }
        Err(_) => {
            cycle_failed(shared, watchdog, "poll timed out".to_string());
            return;
        }
    };

    if let Some(m) = &shared.metrics {
        m.session.poll_cycles.inc();
        for v in cycle.snapshots.iter().flat_map(|t| &t.protection.violations) {
            m.session.violations.with_label_values(&[v.kind.as_str()]).inc();
        }
    }

    if cycle.snapshots.is_empty() {
        let reason = cycle
            .missing
            .iter()
            .map(|(id, e)| format!("{id}: {e}"))
            .collect::<Vec<_>>()
            .join("; ");
        cycle_failed(shared, watchdog, reason);
        return;
    }

    if let Some(CommsTransition::Restored { .. }) = watchdog.record_success() {
        shared.emit(SessionEvent::CommsRestored {
            device: shared.device.clone(),
            ts: now_rfc3339(),
        });
    }
    shared.emit(SessionEvent::Telemetry {
        device: shared.device.clone(),
        snapshots: cycle.snapshots,
        missing: cycle.missing.into_iter().map(|(id, _)| id).collect(),
        ts: now_rfc3339(),
    });
}

/// Bulk read, then switch off and report every motor that has just gone critical.
///
/// The safety event is published here, on the blocking pool, so it survives the cycle
/// future being dropped by a timeout or a stop. A motor only joins the disabled set once
/// its event is out.
fn read_and_protect(
    shared: &Shared,
    mut guard: OwnedMutexGuard<Option<MotorBus>>,
    targets: &[MotorId],
) -> Option<Cycle> {
    let bus = guard.as_mut()?;
    let outcome = bus.read_bulk_telemetry(targets);
    for (id, telemetry) in &outcome.succeeded {
        if !telemetry.protection.is_critical() || shared.is_disabled(*id) {
            continue;
        }
        let torque_disabled = match bus.set_torque(*id, false) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(device = %shared.device, id = %id, error = %e, "protective torque-off failed");
                false
            }
        };
        report_critical(shared, *id, telemetry.protection.clone(), torque_disabled);
    }
    Some(Cycle {
        snapshots: outcome.succeeded.into_iter().map(|(_, t)| t).collect(),
        missing: outcome
            .failed
            .into_iter()
            .map(|(id, e)| (id, e.to_string()))
            .collect(),
    })
}

fn report_critical(shared: &Shared, motor: MotorId, status: ProtectionStatus, torque_disabled: bool) {
    tracing::error!(
        device = %shared.device,
        id = %motor,
        violations = ?status.violations,
        torque_disabled,
        "motor critical"
    );
    if torque_disabled {
        if let Some(m) = &shared.metrics {
            m.session.torque_disables.inc();
        }
    }
    shared.emit(SessionEvent::Safety {
        device: shared.device.clone(),
        motor,
        status,
        torque_disabled,
        ts: now_rfc3339(),
    });
    shared
        .disabled
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(motor);
}

fn cycle_failed(shared: &Shared, watchdog: &mut CommsWatchdog, reason: String) {
    tracing::debug!(device = %shared.device, reason = %reason, "poll cycle produced no data");
    if let Some(m) = &shared.metrics {
        m.session.poll_cycles.inc();
        m.session.poll_failures.inc();
    }
    if let Some(CommsTransition::Lost {
        consecutive_failures,
    }) = watchdog.record_failure(reason.clone())
    {
        shared.emit(SessionEvent::CommsLost {
            device: shared.device.clone(),
            consecutive_failures,
            last_error: reason,
            ts: now_rfc3339(),
        });
    }
}
