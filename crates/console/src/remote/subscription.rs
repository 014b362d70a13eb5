use ops_protocol::ChangeEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SubscriptionError;

pub type EventResult = Result<ChangeEvent, SubscriptionError>;

/// Live handle on the execution change channel.
///
/// The producer side owns the matching `mpsc::Sender` and a clone of the
/// cancellation token; it must stop once the token is cancelled. `close` is
/// idempotent and also runs on drop.
pub struct Subscription {
    events: mpsc::Receiver<EventResult>,
    cancel: CancellationToken,
    closed: bool,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<EventResult>, cancel: CancellationToken) -> Self {
        Self {
            events,
            cancel,
            closed: false,
        }
    }

    /// `None` once the subscription is closed or the producer has gone away.
    pub async fn next_event(&mut self) -> Option<EventResult> {
        if self.closed {
            return None;
        }
        self.events.recv().await
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();
        self.events.close();
        debug!(event = "subscription.closed", "change subscription released");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
