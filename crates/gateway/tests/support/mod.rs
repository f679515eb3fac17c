//! Hand-rolled collaborator doubles shared by the integration tests.
#![allow(dead_code)] // not every test binary uses every helper

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    anyhow::{Result, anyhow},
    async_trait::async_trait,
    tokio::sync::mpsc,
    waygate_channel::{
        ClientFactory, CrmBridge, DeviceIdentity, DeviceStore, PairingEvent, ProtocolClient,
        RawEvent,
    },
    waygate_common::{GatewayError, NormalizedMessage},
    waygate_gateway::{GatewayDeps, GatewayService},
    waygate_sessions::{
        MemorySessionRepository, SessionRecord, SessionRepository, SessionStatus,
    },
};

// ── Protocol client double ───────────────────────────────────────────────────

pub struct MockClient {
    registered: AtomicBool,
    connected: AtomicBool,
    refuse_connect: AtomicBool,
    pub connect_calls: AtomicUsize,
    event_tx: mpsc::UnboundedSender<RawEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<RawEvent>>>,
    pairing_tx: Mutex<Option<mpsc::Sender<PairingEvent>>>,
}

impl MockClient {
    fn new(registered: bool) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            registered: AtomicBool::new(registered),
            connected: AtomicBool::new(false),
            refuse_connect: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            pairing_tx: Mutex::new(None),
        })
    }

    /// A client whose device identity is already registered.
    pub fn registered() -> Arc<Self> {
        Self::new(true)
    }

    /// A client that still needs pairing.
    pub fn unregistered() -> Arc<Self> {
        Self::new(false)
    }

    pub fn refuse_connections(&self) {
        self.refuse_connect.store(true, Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::SeqCst);
    }

    /// Push a raw event into the handle's event pump.
    pub fn emit(&self, raw: RawEvent) {
        let _ = self.event_tx.send(raw);
    }

    /// Sender side of the pairing stream opened by `start()`.
    pub fn pairing_sender(&self) -> mpsc::Sender<PairingEvent> {
        self.pairing_tx
            .lock()
            .unwrap()
            .clone()
            .expect("pairing stream not opened")
    }
}

#[async_trait]
impl ProtocolClient for MockClient {
    async fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    fn take_event_stream(&self) -> Option<mpsc::UnboundedReceiver<RawEvent>> {
        self.event_rx.lock().unwrap().take()
    }

    async fn pairing_stream(&self) -> Result<mpsc::Receiver<PairingEvent>> {
        let (tx, rx) = mpsc::channel(8);
        *self.pairing_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn pair_phone(&self, _phone_number: &str) -> Result<String> {
        Ok("WZYG-K4TE".to_string())
    }

    async fn logout(&self) -> Result<()> {
        self.registered.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send_text(&self, _to: &str, _text: &str) -> Result<()> {
        Ok(())
    }
}

// ── Client factory double ────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockFactory {
    clients: Mutex<HashMap<String, Arc<MockClient>>>,
    pub created: AtomicUsize,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Preset the client handed out for a tenant.
    pub fn put(&self, tenant_id: &str, client: Arc<MockClient>) {
        self.clients
            .lock()
            .unwrap()
            .insert(tenant_id.to_string(), client);
    }
}

#[async_trait]
impl ClientFactory for MockFactory {
    async fn create(
        &self,
        tenant_id: &str,
        device: DeviceIdentity,
    ) -> Result<Arc<dyn ProtocolClient>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let client = self
            .clients
            .lock()
            .unwrap()
            .entry(tenant_id.to_string())
            .or_insert_with(|| MockClient::new(device.is_registered()))
            .clone();
        Ok(client)
    }
}

// ── Device store double ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockDeviceStore {
    known: Mutex<HashSet<String>>,
    pub deleted: Mutex<Vec<String>>,
}

impl MockDeviceStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_devices(ids: &[&str]) -> Arc<Self> {
        let store = Self::default();
        *store.known.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
        Arc::new(store)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.known.lock().unwrap().contains(id)
    }
}

#[async_trait]
impl DeviceStore for MockDeviceStore {
    async fn load_or_create(&self, device_id: Option<&str>) -> Result<DeviceIdentity> {
        match device_id {
            Some(id) if self.contains(id) => Ok(DeviceIdentity::bound(id)),
            _ => Ok(DeviceIdentity::fresh()),
        }
    }

    async fn device_ids(&self) -> Result<Vec<String>> {
        Ok(self.known.lock().unwrap().iter().cloned().collect())
    }

    async fn delete(&self, device_id: &str) -> Result<()> {
        self.known.lock().unwrap().remove(device_id);
        self.deleted.lock().unwrap().push(device_id.to_string());
        Ok(())
    }
}

// ── CRM bridge double ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockCrmBridge {
    pub registrations: AtomicUsize,
    pub appended: Mutex<Vec<(String, String)>>,
}

impl MockCrmBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl CrmBridge for MockCrmBridge {
    async fn register(&self, _tenant_id: &str) -> Result<()> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn open_conversation(&self, tenant_id: &str, contact: &str) -> Result<String> {
        Ok(format!("conv:{tenant_id}:{contact}"))
    }

    async fn append_message(
        &self,
        tenant_id: &str,
        _conversation_id: &str,
        message: &NormalizedMessage,
    ) -> Result<()> {
        self.appended
            .lock()
            .unwrap()
            .push((tenant_id.to_string(), message.text.clone().unwrap_or_default()));
        Ok(())
    }
}

// ── Repository wrapper that records status writes ────────────────────────────

pub struct CountingRepo {
    inner: MemorySessionRepository,
    pub status_writes: Mutex<Vec<(String, SessionStatus)>>,
}

impl CountingRepo {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemorySessionRepository::new(),
            status_writes: Mutex::new(Vec::new()),
        })
    }

    pub fn writes_of(&self, tenant_id: &str, status: SessionStatus) -> usize {
        self.status_writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, s)| t == tenant_id && *s == status)
            .count()
    }
}

#[async_trait]
impl SessionRepository for CountingRepo {
    async fn get(&self, tenant_id: &str) -> Result<Option<SessionRecord>, GatewayError> {
        self.inner.get(tenant_id).await
    }

    async fn upsert(&self, record: &SessionRecord) -> Result<(), GatewayError> {
        self.inner.upsert(record).await
    }

    async fn set_status(
        &self,
        tenant_id: &str,
        status: SessionStatus,
    ) -> Result<(), GatewayError> {
        self.status_writes
            .lock()
            .unwrap()
            .push((tenant_id.to_string(), status));
        self.inner.set_status(tenant_id, status).await
    }

    async fn set_bound_device(
        &self,
        tenant_id: &str,
        device_id: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.inner.set_bound_device(tenant_id, device_id).await
    }

    async fn set_subscribed_events(
        &self,
        tenant_id: &str,
        events: &[String],
    ) -> Result<(), GatewayError> {
        self.inner.set_subscribed_events(tenant_id, events).await
    }

    async fn set_webhook_url(
        &self,
        tenant_id: &str,
        url: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.inner.set_webhook_url(tenant_id, url).await
    }

    async fn set_active(&self, tenant_id: &str, active: bool) -> Result<(), GatewayError> {
        self.inner.set_active(tenant_id, active).await
    }

    async fn list_active(&self) -> Result<Vec<SessionRecord>, GatewayError> {
        self.inner.list_active().await
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

pub struct Harness {
    pub repo: Arc<CountingRepo>,
    pub devices: Arc<MockDeviceStore>,
    pub factory: Arc<MockFactory>,
    pub crm: Arc<MockCrmBridge>,
    pub service: GatewayService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_devices(&[])
    }

    pub fn with_devices(device_ids: &[&str]) -> Self {
        // Short reconnect pacing keeps multi-tenant tests fast.
        let mut config = waygate_config::WaygateConfig::default();
        config.reconcile.inter_attempt_delay_ms = 10;
        Self::build(device_ids, config)
    }

    pub fn build(device_ids: &[&str], config: waygate_config::WaygateConfig) -> Self {
        let repo = CountingRepo::new();
        let devices = MockDeviceStore::with_devices(device_ids);
        let factory = MockFactory::new();
        let crm = MockCrmBridge::new();
        let deps = GatewayDeps {
            repo: repo.clone(),
            devices: devices.clone(),
            factory: factory.clone(),
            crm: Some(crm.clone()),
        };
        let service = GatewayService::new(deps, config);
        Self {
            repo,
            devices,
            factory,
            crm,
            service,
        }
    }

    /// Seed a session record.
    pub async fn seed(&self, tenant_id: &str, bound_device_id: Option<&str>, active: bool) {
        let mut record = SessionRecord::new(tenant_id);
        record.bound_device_id = bound_device_id.map(str::to_string);
        record.active = active;
        self.repo.upsert(&record).await.unwrap();
    }

    pub async fn record(&self, tenant_id: &str) -> SessionRecord {
        self.repo.get(tenant_id).await.unwrap().unwrap()
    }
}

/// Poll `predicate` until it holds or the deadline passes.
pub async fn wait_until<F>(mut predicate: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within deadline");
}
