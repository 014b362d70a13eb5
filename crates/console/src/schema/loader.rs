use std::sync::Arc;
use std::time::Instant;

use ops_protocol::schema::SchemaSnapshot;
use tracing::{info, warn};

use crate::error::RemoteError;
use crate::remote::SchemaSource;

/// One-shot loader for the schema browser. Nothing is cached; every call
/// re-issues all four remote calls.
pub struct SchemaLoader {
    source: Arc<dyn SchemaSource>,
}

impl SchemaLoader {
    pub fn new(source: Arc<dyn SchemaSource>) -> Self {
        Self { source }
    }

    /// Issues the four calls in parallel. Only the table overview is
    /// required; enums, metadata and policies degrade to empty on failure.
    pub async fn load(&self) -> Result<SchemaSnapshot, RemoteError> {
        let started_at = Instant::now();
        let (tables, enums, metadata, policies) = tokio::join!(
            self.source.fetch_schema_overview(),
            self.source.fetch_enum_dictionary(),
            self.source.fetch_db_metadata(),
            self.source.fetch_policies(),
        );
        let tables = tables.map_err(|err| {
            warn!(event = "schema.load.failed", error = %err, "schema overview failed");
            err
        })?;
        let snapshot = SchemaSnapshot {
            tables,
            enums: degrade("enum_dictionary", enums).unwrap_or_default(),
            metadata: degrade("db_metadata", metadata),
            policies: degrade("policies", policies).unwrap_or_default(),
        };
        info!(
            event = "schema.load.done",
            latency_ms = started_at.elapsed().as_millis() as u64,
            tables = snapshot.tables.len(),
            enums = snapshot.enums.len(),
            policies = snapshot.policies.len(),
            healthy = ?snapshot.metadata.as_ref().map(|meta| meta.healthy),
            "schema snapshot loaded"
        );
        Ok(snapshot)
    }

    pub async fn refresh(&self) -> Result<SchemaSnapshot, RemoteError> {
        info!(event = "schema.refresh", "schema refresh requested");
        self.load().await
    }
}

fn degrade<T>(call: &str, result: Result<T, RemoteError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(event = "schema.load.degraded", call, error = %err, "supplementary schema call failed");
            None
        }
    }
}
