use ops_protocol::{ChangeEvent, ExecutionRecord};
use serde::Deserialize;

/// How a resolved snapshot combines with change events that arrived while it
/// was outstanding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotMerge {
    /// The snapshot replaces the window outright; early events are lost.
    #[default]
    Replace,
    /// Early events are re-applied on top of the snapshot in arrival order.
    ReplayPending,
}

/// Capacity-bounded, most-recently-known-first view of the execution log.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    records: Vec<ExecutionRecord>,
    capacity: usize,
}

impl Window {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn records(&self) -> &[ExecutionRecord] {
        &self.records
    }

    /// Merges one change event. Returns whether the window changed.
    ///
    /// Inserts go to the front and evict from the tail; inserts are not
    /// de-duplicated. Updates replace the first match in place. Deletes
    /// remove the first match and never trigger a refill.
    pub fn apply(&mut self, event: ChangeEvent) -> bool {
        match event {
            ChangeEvent::Insert { record } => {
                self.records.insert(0, record);
                self.records.truncate(self.capacity);
                true
            }
            ChangeEvent::Update { record } => {
                match self.records.iter_mut().find(|slot| slot.id == record.id) {
                    Some(slot) => {
                        *slot = record;
                        true
                    }
                    None => false,
                }
            }
            ChangeEvent::Delete { id } => {
                match self.records.iter().position(|slot| slot.id == id) {
                    Some(index) => {
                        self.records.remove(index);
                        true
                    }
                    None => false,
                }
            }
        }
    }

    /// Installs a freshly fetched snapshot. `pending` holds the events seen
    /// while the fetch was outstanding, in arrival order.
    pub fn absorb_snapshot(
        &mut self,
        mut records: Vec<ExecutionRecord>,
        pending: Vec<ChangeEvent>,
        policy: SnapshotMerge,
    ) {
        records.truncate(self.capacity);
        self.records = records;
        if policy == SnapshotMerge::ReplayPending {
            for event in pending {
                self.apply(event);
            }
        }
    }
}
