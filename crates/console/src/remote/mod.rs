use async_trait::async_trait;
use ops_protocol::locator::LocatorResult;
use ops_protocol::schema::{EnumDictionary, MetadataDescriptor, PolicyDescriptor, TableDescriptor};
use ops_protocol::ExecutionRecord;

use crate::error::{RemoteError, SubscriptionError};
use crate::identifier::ValidIdentifier;

mod realtime;
mod rest;
mod subscription;

pub use rest::RestBackend;
pub use subscription::{EventResult, Subscription};

/// Source of execution records: a bounded newest-first snapshot plus a
/// change channel for the same collection.
#[async_trait]
pub trait ExecutionFeed: Send + Sync {
    async fn fetch_recent_executions(
        &self,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, RemoteError>;

    async fn subscribe_to_execution_changes(&self) -> Result<Subscription, SubscriptionError>;
}

#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn fetch_schema_overview(&self) -> Result<Vec<TableDescriptor>, RemoteError>;

    async fn fetch_enum_dictionary(&self) -> Result<EnumDictionary, RemoteError>;

    async fn fetch_db_metadata(&self) -> Result<MetadataDescriptor, RemoteError>;

    async fn fetch_policies(&self) -> Result<Vec<PolicyDescriptor>, RemoteError>;
}

#[async_trait]
pub trait RecordInspector: Send + Sync {
    /// Looks the identifier up across every table the backend knows about.
    async fn inspect_record(
        &self,
        identifier: &ValidIdentifier,
    ) -> Result<LocatorResult, RemoteError>;
}
