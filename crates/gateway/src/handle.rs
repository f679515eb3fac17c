use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use {
    tokio::{sync::mpsc, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    waygate_channel::{
        ClientHealthSnapshot, DeviceStore, PairingEvent, ProtocolClient, RawEvent,
    },
    waygate_common::{GatewayError, MediaRef},
    waygate_sessions::{SessionRepository, SessionStatus},
};

use crate::{
    pairing::{PairingPresenter, RenderedPairingCode},
    processor::EventProcessor,
    webhook::WebhookSink,
};

/// Retry bookkeeping defaults. Recorded on the handle but not consumed by
/// any automatic loop: reconnecting is a deliberate caller action.
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(30);

struct HandleState {
    status: SessionStatus,
    last_activity: Instant,
    pairing_code: Option<RenderedPairingCode>,
    /// Cancellation context for the current start/stop cycle.
    cancel: CancellationToken,
    retry_count: u32,
}

/// One tenant's live connection: owns the protocol client, the state
/// machine, and the tasks driving pairing and inbound events.
///
/// Exactly one handle exists per tenant at a time (enforced by the
/// registry). All mutable state sits behind a lock private to the handle;
/// handles never lock each other and no lock is held across an await.
pub struct ConnectionHandle {
    tenant_id: String,
    client: Arc<dyn ProtocolClient>,
    repo: Arc<dyn SessionRepository>,
    devices: Arc<dyn DeviceStore>,
    processor: Arc<EventProcessor>,
    presenter: PairingPresenter,
    webhook: Arc<WebhookSink>,
    state: Mutex<HandleState>,
    /// Non-blocking "stop pairing loop" signal. Capacity 1: a full channel
    /// means a stop is already in flight.
    stop_tx: mpsc::Sender<()>,
    stop_rx: Mutex<Option<mpsc::Receiver<()>>>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<RawEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    max_retries: u32,
    retry_interval: Duration,
}

impl ConnectionHandle {
    pub fn new(
        tenant_id: impl Into<String>,
        client: Arc<dyn ProtocolClient>,
        repo: Arc<dyn SessionRepository>,
        devices: Arc<dyn DeviceStore>,
        processor: Arc<EventProcessor>,
        presenter: PairingPresenter,
        webhook: Arc<WebhookSink>,
    ) -> Arc<Self> {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let event_rx = client.take_event_stream();
        Arc::new(Self {
            tenant_id: tenant_id.into(),
            client,
            repo,
            devices,
            processor,
            presenter,
            webhook,
            state: Mutex::new(HandleState {
                status: SessionStatus::Disconnected,
                last_activity: Instant::now(),
                pairing_code: None,
                cancel: CancellationToken::new(),
                retry_count: 0,
            }),
            stop_tx,
            stop_rx: Mutex::new(Some(stop_rx)),
            event_rx: Mutex::new(event_rx),
            tasks: Mutex::new(Vec::new()),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        })
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn status(&self) -> SessionStatus {
        self.lock_state().status
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn last_activity(&self) -> Instant {
        self.lock_state().last_activity
    }

    pub fn retry_count(&self) -> u32 {
        self.lock_state().retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Current pairing code in all rendered forms.
    pub fn pairing_code(&self) -> Result<RenderedPairingCode, GatewayError> {
        self.lock_state()
            .pairing_code
            .clone()
            .ok_or_else(|| GatewayError::NoPairingCode(self.tenant_id.clone()))
    }

    /// Resolve a media descriptor recorded by the event pipeline.
    pub fn media_ref(&self, message_id: &str) -> Option<MediaRef> {
        self.processor.media_ref(message_id)
    }

    pub fn set_subscriptions(&self, events: Vec<String>) {
        self.processor.set_subscriptions(events);
    }

    pub fn set_webhook_url(&self, url: Option<String>) {
        self.webhook.set_url(url);
    }

    pub fn health(&self) -> ClientHealthSnapshot {
        let state = self.lock_state();
        ClientHealthSnapshot {
            tenant_id: self.tenant_id.clone(),
            connected: self.client.is_connected(),
            status: state.status.to_string(),
            details: state
                .pairing_code
                .as_ref()
                .map(|_| "pairing code available".to_string()),
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Drive `Disconnected → Connecting`, then either connect directly (a
    /// device identity is registered) or open the QR pairing flow.
    ///
    /// Idempotent on `Connected`. A failed connect attempt is absorbed into
    /// a `Disconnected` transition and reported via the returned status.
    pub async fn start(self: &Arc<Self>) -> Result<SessionStatus, GatewayError> {
        {
            let mut state = self.lock_state();
            match state.status {
                SessionStatus::Connected => {
                    debug!(tenant = %self.tenant_id, "already connected, start is a no-op");
                    return Ok(SessionStatus::Connected);
                },
                SessionStatus::Connecting
                | SessionStatus::PairingRequired
                | SessionStatus::LoggedOut => {
                    return Err(self.invalid_state(state.status, "start"));
                },
                SessionStatus::Disconnected | SessionStatus::Error => {
                    state.status = SessionStatus::Connecting;
                    // A still-live token may be shared with a running event
                    // pump; only a cancelled one needs replacing.
                    if state.cancel.is_cancelled() {
                        state.cancel = CancellationToken::new();
                    }
                    state.last_activity = Instant::now();
                },
            }
        }
        self.persist_status(SessionStatus::Connecting).await;
        self.spawn_event_pump();

        if self.client.is_registered() {
            self.connect_attempt().await
        } else {
            self.begin_pairing().await
        }
    }

    async fn connect_attempt(&self) -> Result<SessionStatus, GatewayError> {
        match self.client.connect().await {
            Ok(()) => {
                self.lock_state().retry_count = 0;
                self.transition(SessionStatus::Connected);
                self.persist_status(SessionStatus::Connected).await;
                info!(tenant = %self.tenant_id, "connected");
                Ok(SessionStatus::Connected)
            },
            Err(e) => {
                self.lock_state().retry_count += 1;
                warn!(tenant = %self.tenant_id, error = %e, "connect attempt failed");
                self.transition(SessionStatus::Disconnected);
                self.persist_status(SessionStatus::Disconnected).await;
                Ok(SessionStatus::Disconnected)
            },
        }
    }

    async fn begin_pairing(self: &Arc<Self>) -> Result<SessionStatus, GatewayError> {
        let stream = match self.client.pairing_stream().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(tenant = %self.tenant_id, error = %e, "failed to open pairing stream");
                self.transition(SessionStatus::Disconnected);
                self.persist_status(SessionStatus::Disconnected).await;
                return Err(GatewayError::PairingFailed {
                    tenant: self.tenant_id.clone(),
                    reason: e.to_string(),
                });
            },
        };
        self.transition(SessionStatus::PairingRequired);
        self.persist_status(SessionStatus::PairingRequired).await;
        self.spawn_pairing_loop(stream);
        info!(tenant = %self.tenant_id, "pairing required, QR stream open");
        Ok(SessionStatus::PairingRequired)
    }

    /// Request a phone-number pairing code. One-shot; the code is also
    /// retained as the current pairing code (unrendered).
    pub async fn pair_phone(&self, phone_number: &str) -> Result<String, GatewayError> {
        let status = self.status();
        if status == SessionStatus::Connected || self.client.is_registered() {
            return Err(self.invalid_state(status, "pair by phone"));
        }
        let code = self
            .client
            .pair_phone(phone_number)
            .await
            .map_err(|e| GatewayError::PairingFailed {
                tenant: self.tenant_id.clone(),
                reason: e.to_string(),
            })?;
        self.set_pairing_code(RenderedPairingCode::plain(code.clone()));
        info!(tenant = %self.tenant_id, "phone pairing code issued");
        Ok(code)
    }

    /// Stop the handle: signal the pairing loop, cancel the cycle context,
    /// wait for tasks to finish, disconnect, persist `Disconnected`.
    ///
    /// Idempotent: stopping an already-stopped handle is a no-op and
    /// persists nothing twice.
    pub async fn stop(&self) -> Result<(), GatewayError> {
        let (status, cancel) = {
            let state = self.lock_state();
            (state.status, state.cancel.clone())
        };
        let idle = matches!(
            status,
            SessionStatus::Disconnected | SessionStatus::LoggedOut
        ) && self.tasks_finished();
        if idle {
            debug!(tenant = %self.tenant_id, "already stopped");
            return Ok(());
        }

        // Full channel = a stop is already in flight; not an error.
        let _ = self.stop_tx.try_send(());
        cancel.cancel();
        self.join_tasks().await;

        if self.client.is_connected() {
            self.client.disconnect().await;
        }
        self.clear_pairing_code();

        if status != SessionStatus::LoggedOut {
            self.transition(SessionStatus::Disconnected);
            self.persist_status(SessionStatus::Disconnected).await;
        }
        info!(tenant = %self.tenant_id, "stopped");
        Ok(())
    }

    /// Log out: disconnect, clear the device binding locally and in the
    /// persisted record, end in the terminal `LoggedOut` state.
    pub async fn logout(&self) -> Result<(), GatewayError> {
        if self.status() == SessionStatus::LoggedOut {
            return Ok(());
        }

        if let Err(e) = self.client.logout().await {
            warn!(tenant = %self.tenant_id, error = %e, "protocol logout failed, clearing binding anyway");
        }

        let cancel = self.lock_state().cancel.clone();
        let _ = self.stop_tx.try_send(());
        cancel.cancel();
        self.join_tasks().await;
        if self.client.is_connected() {
            self.client.disconnect().await;
        }
        self.clear_pairing_code();

        let bound = match self.repo.get(&self.tenant_id).await {
            Ok(record) => record.and_then(|r| r.bound_device_id),
            Err(e) => {
                warn!(tenant = %self.tenant_id, error = %e, "could not load record during logout");
                None
            },
        };
        if let Some(device_id) = bound.filter(|id| !id.is_empty())
            && let Err(e) = self.devices.delete(&device_id).await
        {
            warn!(tenant = %self.tenant_id, error = %e, "failed to drop device identity");
        }
        if let Err(e) = self.repo.set_bound_device(&self.tenant_id, None).await {
            warn!(tenant = %self.tenant_id, error = %e, "failed to clear device binding");
        }

        self.transition(SessionStatus::LoggedOut);
        self.persist_status(SessionStatus::LoggedOut).await;
        info!(tenant = %self.tenant_id, "logged out");
        Ok(())
    }

    // ── Tasks ───────────────────────────────────────────────────────────────

    fn spawn_event_pump(self: &Arc<Self>) {
        let Some(mut events) = self.take_locked(&self.event_rx) else {
            return; // pump already running, or the stream was never available
        };
        let handle = Arc::clone(self);
        let cancel = self.lock_state().cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        handle.restore_locked(&handle.event_rx, events);
                        break;
                    },
                    event = events.recv() => match event {
                        Some(raw) => handle.on_raw(raw).await,
                        None => {
                            debug!(tenant = %handle.tenant_id, "event stream closed");
                            break;
                        },
                    },
                }
            }
        });
        self.push_task(task);
    }

    fn spawn_pairing_loop(self: &Arc<Self>, mut stream: mpsc::Receiver<PairingEvent>) {
        let Some(mut stop_rx) = self.take_locked(&self.stop_rx) else {
            warn!(tenant = %self.tenant_id, "pairing loop already active");
            return;
        };
        let handle = Arc::clone(self);
        let cancel = self.lock_state().cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(tenant = %handle.tenant_id, "pairing loop cancelled");
                        break;
                    },
                    _ = stop_rx.recv() => {
                        debug!(tenant = %handle.tenant_id, "pairing loop stop signalled");
                        break;
                    },
                    event = stream.recv() => {
                        if handle.on_pairing_event(event).await {
                            break;
                        }
                    },
                }
            }
            handle.clear_pairing_code();
            // Drain stale stop signals so they can't kill the next loop.
            while stop_rx.try_recv().is_ok() {}
            handle.restore_locked(&handle.stop_rx, stop_rx);
        });
        self.push_task(task);
    }

    /// Handle one pairing-stream event. Returns true when the loop is done.
    async fn on_pairing_event(&self, event: Option<PairingEvent>) -> bool {
        match event {
            Some(PairingEvent::Code(code)) => {
                let rendered = self.presenter.render(&code);
                self.set_pairing_code(rendered);
                info!(tenant = %self.tenant_id, "pairing code updated");
                false
            },
            Some(PairingEvent::Success { device_id }) => {
                info!(tenant = %self.tenant_id, device = %device_id, "pairing complete");
                if let Err(e) = self
                    .repo
                    .set_bound_device(&self.tenant_id, Some(device_id.as_str()))
                    .await
                {
                    warn!(tenant = %self.tenant_id, error = %e, "failed to persist device binding");
                }
                self.transition(SessionStatus::Connected);
                self.persist_status(SessionStatus::Connected).await;
                true
            },
            Some(PairingEvent::Timeout) => {
                info!(tenant = %self.tenant_id, "pairing window timed out");
                self.transition(SessionStatus::Disconnected);
                self.persist_status(SessionStatus::Disconnected).await;
                true
            },
            Some(PairingEvent::Error(reason)) => {
                warn!(tenant = %self.tenant_id, reason = %reason, "pairing failed");
                self.transition(SessionStatus::Error);
                self.persist_status(SessionStatus::Error).await;
                true
            },
            None => {
                if self.status() == SessionStatus::PairingRequired {
                    self.transition(SessionStatus::Disconnected);
                    self.persist_status(SessionStatus::Disconnected).await;
                }
                true
            },
        }
    }

    async fn on_raw(&self, raw: RawEvent) {
        self.touch();
        if let RawEvent::Disconnected { reason } = &raw
            && self.status() == SessionStatus::Connected
        {
            // No automatic retry: reconnection is a deliberate caller action.
            warn!(
                tenant = %self.tenant_id,
                reason = reason.as_deref().unwrap_or("unknown"),
                "protocol client disconnected"
            );
            self.transition(SessionStatus::Disconnected);
            self.persist_status(SessionStatus::Disconnected).await;
        }
        self.processor.on_event(raw).await;
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn lock_state(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, to: SessionStatus) {
        let mut state = self.lock_state();
        if state.status != to {
            debug!(tenant = %self.tenant_id, from = %state.status, to = %to, "state transition");
            state.status = to;
        }
        state.last_activity = Instant::now();
    }

    /// Persist the live status. Failures are logged, never propagated: the
    /// repository converges on the next successful update.
    async fn persist_status(&self, status: SessionStatus) {
        if let Err(e) = self.repo.set_status(&self.tenant_id, status).await {
            warn!(tenant = %self.tenant_id, status = %status, error = %e, "failed to persist status");
        }
    }

    fn invalid_state(&self, state: SessionStatus, operation: &str) -> GatewayError {
        GatewayError::InvalidTenantState {
            tenant: self.tenant_id.clone(),
            state: state.to_string(),
            operation: operation.to_string(),
        }
    }

    fn touch(&self) {
        self.lock_state().last_activity = Instant::now();
    }

    fn set_pairing_code(&self, code: RenderedPairingCode) {
        self.lock_state().pairing_code = Some(code);
    }

    fn clear_pairing_code(&self) {
        self.lock_state().pairing_code = None;
    }

    fn take_locked<T>(&self, slot: &Mutex<Option<T>>) -> Option<T> {
        slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn restore_locked<T>(&self, slot: &Mutex<Option<T>>, value: T) {
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    fn push_task(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    /// Whether every task this handle spawned has terminated. Teardown is
    /// complete only once this holds.
    pub fn tasks_finished(&self) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .all(JoinHandle::is_finished)
    }

    async fn join_tasks(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            guard.drain(..).collect()
        };
        for task in tasks {
            if let Err(e) = task.await
                && !e.is_cancelled()
            {
                warn!(tenant = %self.tenant_id, error = %e, "handle task ended abnormally");
            }
        }
    }
}
