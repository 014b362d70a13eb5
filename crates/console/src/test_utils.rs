use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ops_protocol::locator::LocatorResult;
use ops_protocol::schema::{EnumDictionary, MetadataDescriptor, PolicyDescriptor, TableDescriptor};
use ops_protocol::{ChangeEvent, ExecutionRecord, ExecutionStatus};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{RemoteError, SubscriptionError};
use crate::identifier::ValidIdentifier;
use crate::remote::{
    EventResult, ExecutionFeed, RecordInspector, SchemaSource, Subscription,
};

pub(crate) fn completed(id: &str, cost: f64) -> ExecutionRecord {
    ExecutionRecord::new(id, format!("job-{id}"), ExecutionStatus::Completed).with_cost(cost)
}

type SnapshotResult = Result<Vec<ExecutionRecord>, RemoteError>;

/// Execution feed whose snapshot and change channel are driven by the test.
pub(crate) struct FakeFeed {
    snapshot: Mutex<Option<oneshot::Receiver<SnapshotResult>>>,
    subscription: Mutex<Option<Result<Subscription, SubscriptionError>>>,
    pub(crate) limits: Mutex<Vec<usize>>,
    pub(crate) fetch_calls: AtomicUsize,
    pub(crate) subscribe_calls: AtomicUsize,
}

pub(crate) struct FeedControl {
    snapshot: Mutex<Option<oneshot::Sender<SnapshotResult>>>,
    events: mpsc::Sender<EventResult>,
    pub(crate) cancel: CancellationToken,
}

impl FakeFeed {
    pub(crate) fn new() -> (Arc<Self>, FeedControl) {
        let (events_tx, events_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let subscription = Subscription::new(events_rx, cancel.clone());
        Self::build(Ok(subscription), events_tx, cancel)
    }

    pub(crate) fn failing_subscription(err: SubscriptionError) -> (Arc<Self>, FeedControl) {
        let (events_tx, _) = mpsc::channel(1);
        Self::build(Err(err), events_tx, CancellationToken::new())
    }

    fn build(
        subscription: Result<Subscription, SubscriptionError>,
        events: mpsc::Sender<EventResult>,
        cancel: CancellationToken,
    ) -> (Arc<Self>, FeedControl) {
        let (snapshot_tx, snapshot_rx) = oneshot::channel();
        let feed = Arc::new(Self {
            snapshot: Mutex::new(Some(snapshot_rx)),
            subscription: Mutex::new(Some(subscription)),
            limits: Mutex::new(Vec::new()),
            fetch_calls: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
        });
        let control = FeedControl {
            snapshot: Mutex::new(Some(snapshot_tx)),
            events,
            cancel,
        };
        (feed, control)
    }
}

impl FeedControl {
    pub(crate) fn resolve_snapshot(&self, result: SnapshotResult) {
        let sender = self.snapshot.lock().unwrap().take().expect("snapshot resolved once");
        let _ = sender.send(result);
    }

    pub(crate) async fn send(&self, event: ChangeEvent) {
        self.events.send(Ok(event)).await.expect("mirror listening");
    }

    pub(crate) async fn fail(&self, err: SubscriptionError) {
        self.events.send(Err(err)).await.expect("mirror listening");
    }
}

#[async_trait]
impl ExecutionFeed for FakeFeed {
    async fn fetch_recent_executions(
        &self,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, RemoteError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.limits.lock().unwrap().push(limit);
        let receiver = self.snapshot.lock().unwrap().take();
        match receiver {
            Some(receiver) => receiver
                .await
                .unwrap_or_else(|_| Err(RemoteError::Transport("snapshot abandoned".to_string()))),
            None => Err(RemoteError::Transport("snapshot already taken".to_string())),
        }
    }

    async fn subscribe_to_execution_changes(&self) -> Result<Subscription, SubscriptionError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.subscription
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(SubscriptionError::Open("already subscribed".to_string())))
    }
}

/// Schema source with per-call results and call counters.
pub(crate) struct FakeSchemaSource {
    tables: Mutex<Result<Vec<TableDescriptor>, RemoteError>>,
    pub(crate) enums: Result<EnumDictionary, RemoteError>,
    pub(crate) metadata: Result<MetadataDescriptor, RemoteError>,
    pub(crate) policies: Result<Vec<PolicyDescriptor>, RemoteError>,
    pub(crate) calls: Mutex<HashMap<&'static str, usize>>,
}

impl FakeSchemaSource {
    pub(crate) fn new(tables: Vec<TableDescriptor>) -> Self {
        Self {
            tables: Mutex::new(Ok(tables)),
            enums: Ok(EnumDictionary::new()),
            metadata: Ok(MetadataDescriptor {
                version: "20240501".to_string(),
                last_inspected_at: None,
                healthy: true,
                database: "postgres".to_string(),
            }),
            policies: Ok(Vec::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Result returned by every later overview call.
    pub(crate) fn set_tables(&self, tables: Result<Vec<TableDescriptor>, RemoteError>) {
        *self.tables.lock().unwrap() = tables;
    }

    pub(crate) fn calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    fn record(&self, name: &'static str) {
        *self.calls.lock().unwrap().entry(name).or_insert(0) += 1;
    }
}

#[async_trait]
impl SchemaSource for FakeSchemaSource {
    async fn fetch_schema_overview(&self) -> Result<Vec<TableDescriptor>, RemoteError> {
        self.record("overview");
        self.tables.lock().unwrap().clone()
    }

    async fn fetch_enum_dictionary(&self) -> Result<EnumDictionary, RemoteError> {
        self.record("enums");
        self.enums.clone()
    }

    async fn fetch_db_metadata(&self) -> Result<MetadataDescriptor, RemoteError> {
        self.record("metadata");
        self.metadata.clone()
    }

    async fn fetch_policies(&self) -> Result<Vec<PolicyDescriptor>, RemoteError> {
        self.record("policies");
        self.policies.clone()
    }
}

type LookupResult = Result<LocatorResult, RemoteError>;

/// Record inspector whose responses are released by the test, per identifier.
pub(crate) struct FakeInspector {
    pending: Mutex<HashMap<String, oneshot::Receiver<LookupResult>>>,
    pub(crate) calls: AtomicUsize,
}

impl FakeInspector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Registers a gated response for `identifier`; send on the returned
    /// sender to let the lookup complete.
    pub(crate) fn gate(&self, identifier: &str) -> oneshot::Sender<LookupResult> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap()
            .insert(identifier.to_string(), rx);
        tx
    }

    pub(crate) fn respond(&self, identifier: &str, result: LookupResult) {
        let _ = self.gate(identifier).send(result);
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordInspector for FakeInspector {
    async fn inspect_record(
        &self,
        identifier: &ValidIdentifier,
    ) -> Result<LocatorResult, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let receiver = self.pending.lock().unwrap().remove(&identifier.to_string());
        match receiver {
            Some(receiver) => receiver
                .await
                .unwrap_or_else(|_| Err(RemoteError::Transport("lookup abandoned".to_string()))),
            None => Ok(LocatorResult::not_found()),
        }
    }
}
