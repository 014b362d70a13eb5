use std::sync::Arc;

use ops_protocol::locator::LocatorResult;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::LocatorError;
use crate::identifier::validate;
use crate::remote::RecordInspector;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LocatorState {
    Idle,
    Searching { identifier: String },
    Found { result: LocatorResult },
    NotFound { identifier: String },
    Errored { message: String },
}

/// The displayed locator state plus the tag of the request that owns it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocatorDisplay {
    pub request_tag: u64,
    pub state: LocatorState,
}

/// Cross-table lookup by identifier. Every submission gets a fresh tag; a
/// response only reaches the display if its tag is still the latest.
pub struct RecordLocator {
    inspector: Arc<dyn RecordInspector>,
    display: watch::Sender<LocatorDisplay>,
}

impl RecordLocator {
    pub fn new(inspector: Arc<dyn RecordInspector>) -> Self {
        let (display, _) = watch::channel(LocatorDisplay {
            request_tag: 0,
            state: LocatorState::Idle,
        });
        Self { inspector, display }
    }

    pub fn state(&self) -> LocatorDisplay {
        self.display.borrow().clone()
    }

    /// Back to `Idle`; any lookup still in flight is discarded.
    pub fn clear(&self) {
        self.begin(LocatorState::Idle);
    }

    pub async fn locate(&self, raw_input: &str) -> Result<LocatorResult, LocatorError> {
        let identifier = match validate(raw_input) {
            Ok(identifier) => identifier,
            Err(err) => {
                self.begin(LocatorState::Errored {
                    message: err.to_string(),
                });
                return Err(err.into());
            }
        };
        let tag = self.begin(LocatorState::Searching {
            identifier: identifier.to_string(),
        });
        info!(event = "locator.search", request_tag = tag, identifier = %identifier, "record lookup started");

        let (state, outcome) = match self.inspector.inspect_record(&identifier).await {
            Ok(result) if result.found => (
                LocatorState::Found {
                    result: result.clone(),
                },
                Ok(result),
            ),
            Ok(result) => (
                LocatorState::NotFound {
                    identifier: identifier.to_string(),
                },
                Ok(result),
            ),
            Err(err) => {
                let message = err.to_string();
                (
                    LocatorState::Errored {
                        message: message.clone(),
                    },
                    Err(LocatorError::RemoteFailure(message)),
                )
            }
        };

        if !self.settle(tag, state) {
            warn!(event = "locator.response.stale", request_tag = tag, identifier = %identifier, "discarding superseded lookup");
            return Err(LocatorError::Superseded);
        }
        info!(
            event = "locator.done",
            request_tag = tag,
            found = ?outcome.as_ref().map(|result| result.found).ok(),
            "record lookup finished"
        );
        outcome
    }

    fn begin(&self, state: LocatorState) -> u64 {
        let mut tag = 0;
        self.display.send_modify(|display| {
            display.request_tag += 1;
            display.state = state;
            tag = display.request_tag;
        });
        tag
    }

    fn settle(&self, tag: u64, state: LocatorState) -> bool {
        self.display.send_if_modified(|display| {
            if display.request_tag != tag {
                return false;
            }
            display.state = state;
            true
        })
    }
}
