use std::sync::Arc;
use std::time::Instant;

use ops_protocol::{ChangeEvent, ExecutionRecord};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{RemoteError, SubscriptionError};
use crate::metrics::{aggregate, Metrics};
use crate::remote::{EventResult, ExecutionFeed, Subscription};

mod window;

pub use window::{SnapshotMerge, Window};

pub const DEFAULT_CAPACITY: usize = 15;

#[derive(Debug, Clone, Copy)]
pub struct MirrorOptions {
    pub capacity: usize,
    pub snapshot_merge: SnapshotMerge,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            snapshot_merge: SnapshotMerge::default(),
        }
    }
}

/// What the presentation layer sees after every change. Metrics are derived
/// from `window` in the same step, so they never lag behind it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MirrorView {
    pub window: Vec<ExecutionRecord>,
    pub loading: bool,
    pub error: Option<String>,
    pub metrics: Metrics,
}

impl MirrorView {
    fn initial() -> Self {
        Self {
            window: Vec::new(),
            loading: true,
            error: None,
            metrics: Metrics::default(),
        }
    }
}

struct MirrorState {
    window: Window,
    policy: SnapshotMerge,
    loading: bool,
    error: Option<String>,
    pending: Vec<ChangeEvent>,
}

impl MirrorState {
    fn new(options: MirrorOptions) -> Self {
        Self {
            window: Window::new(options.capacity),
            policy: options.snapshot_merge,
            loading: true,
            error: None,
            pending: Vec::new(),
        }
    }

    fn view(&self) -> MirrorView {
        let window = self.window.records().to_vec();
        let metrics = aggregate(&window);
        MirrorView {
            window,
            loading: self.loading,
            error: self.error.clone(),
            metrics,
        }
    }

    fn apply_event(&mut self, event: ChangeEvent) -> bool {
        if self.loading && self.policy == SnapshotMerge::ReplayPending {
            self.pending.push(event.clone());
        }
        self.window.apply(event)
    }

    fn absorb_snapshot(&mut self, result: Result<Vec<ExecutionRecord>, RemoteError>) {
        self.loading = false;
        let pending = std::mem::take(&mut self.pending);
        match result {
            Ok(records) => self.window.absorb_snapshot(records, pending, self.policy),
            Err(err) => self.error = Some(err.to_string()),
        }
    }
}

/// A live mirror of the execution log. Dropping or closing the handle stops
/// the mirror task, which releases the change subscription.
pub struct MirrorHandle {
    view: watch::Receiver<MirrorView>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MirrorHandle {
    /// Starts the snapshot fetch and the subscription concurrently. Must be
    /// called from within a tokio runtime.
    pub fn open(feed: Arc<dyn ExecutionFeed>, options: MirrorOptions) -> Self {
        let (publisher, view) = watch::channel(MirrorView::initial());
        let shutdown = CancellationToken::new();
        let task_shutdown = shutdown.clone();
        let task = tokio::spawn(async move {
            run_mirror(feed, options, publisher, task_shutdown).await;
        });
        info!(
            event = "mirror.opened",
            capacity = options.capacity,
            snapshot_merge = ?options.snapshot_merge,
            "execution mirror opened"
        );
        Self {
            view,
            shutdown,
            task: Some(task),
        }
    }

    pub fn view(&self) -> MirrorView {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<MirrorView> {
        self.view.clone()
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Closes the mirror and waits for the subscription to be released.
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(event = "mirror.join_failed", error = %err, "mirror task ended abnormally");
            }
        }
    }
}

impl Drop for MirrorHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn next_event(subscription: &mut Option<Subscription>) -> Option<EventResult> {
    match subscription {
        Some(subscription) => subscription.next_event().await,
        None => std::future::pending().await,
    }
}

async fn run_mirror(
    feed: Arc<dyn ExecutionFeed>,
    options: MirrorOptions,
    publisher: watch::Sender<MirrorView>,
    shutdown: CancellationToken,
) {
    let started_at = Instant::now();
    let mut state = MirrorState::new(options);
    let mut fetch = feed.fetch_recent_executions(options.capacity);
    let mut subscribe = feed.subscribe_to_execution_changes();
    let mut fetch_pending = true;
    let mut subscribe_pending = true;
    let mut subscription: Option<Subscription> = None;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            result = &mut fetch, if fetch_pending => {
                fetch_pending = false;
                match &result {
                    Ok(records) => info!(
                        event = "mirror.snapshot.received",
                        latency_ms = started_at.elapsed().as_millis() as u64,
                        records = records.len(),
                        "execution snapshot received"
                    ),
                    Err(err) => warn!(
                        event = "mirror.snapshot.failed",
                        error = %err,
                        "execution snapshot failed"
                    ),
                }
                state.absorb_snapshot(result);
                publisher.send_replace(state.view());
            }
            result = &mut subscribe, if subscribe_pending => {
                subscribe_pending = false;
                match result {
                    Ok(opened) => {
                        info!(event = "mirror.subscription.opened", "change subscription opened");
                        subscription = Some(opened);
                    }
                    Err(err) => {
                        warn!(event = "mirror.subscription.failed", error = %err, "change subscription failed");
                        state.error = Some(err.to_string());
                        publisher.send_replace(state.view());
                    }
                }
            }
            event = next_event(&mut subscription), if subscription.is_some() => {
                match event {
                    Some(Ok(event)) => {
                        let kind = event.kind();
                        let id = event.record_id().to_string();
                        if state.apply_event(event) {
                            debug!(event = "mirror.event.applied", kind, record_id = %id, "change applied");
                            publisher.send_replace(state.view());
                        } else {
                            debug!(event = "mirror.event.ignored", kind, record_id = %id, "change matched nothing");
                        }
                    }
                    Some(Err(err @ SubscriptionError::Decode(_))) => {
                        warn!(event = "mirror.event.rejected", error = %err, "change event skipped");
                        state.error = Some(err.to_string());
                        publisher.send_replace(state.view());
                    }
                    Some(Err(err)) => {
                        warn!(event = "mirror.subscription.error", error = %err, "change subscription error");
                        state.error = Some(err.to_string());
                        publisher.send_replace(state.view());
                        if let Some(mut closed) = subscription.take() {
                            closed.close();
                        }
                    }
                    None => {
                        let err = SubscriptionError::Dropped("channel closed".to_string());
                        warn!(event = "mirror.subscription.error", error = %err, "change subscription ended");
                        state.error = Some(err.to_string());
                        publisher.send_replace(state.view());
                        subscription = None;
                    }
                }
            }
        }
    }

    if let Some(mut open) = subscription.take() {
        open.close();
    }
    info!(event = "mirror.subscription.closed", "execution mirror closed");
}
