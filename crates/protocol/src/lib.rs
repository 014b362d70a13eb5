use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub mod locator;
pub mod schema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl ExecutionStatus {
    /// Completed, failed, timed out or cancelled: the row will not change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Queued | ExecutionStatus::Processing)
    }
}

/// One unit of remote work as reported by the execution log.
///
/// `id` is the merge key for the mirror; every other field is owned by the
/// backend and only ever replaced wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    pub id: String,
    /// Display name; a missing or `null` name reads as empty.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub result: Option<Value>,
    /// Free-form failure payload: a plain message or a structured object.
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub executed_at: Option<String>,
}

impl ExecutionRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, status: ExecutionStatus) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status,
            provider: None,
            model: None,
            input_tokens: None,
            output_tokens: None,
            cost_usd: None,
            latency_ms: None,
            result: None,
            error: None,
            created_at: None,
            executed_at: None,
        }
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }

    pub fn with_latency(mut self, latency_ms: f64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn cost_or_zero(&self) -> f64 {
        self.cost_usd.unwrap_or(0.0)
    }

    pub fn latency_or_zero(&self) -> f64 {
        self.latency_ms.unwrap_or(0.0)
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.unwrap_or(0) + self.output_tokens.unwrap_or(0)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// A single change notification for the execution log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    Insert { record: ExecutionRecord },
    Update { record: ExecutionRecord },
    Delete { id: String },
}

impl ChangeEvent {
    pub fn record_id(&self) -> &str {
        match self {
            ChangeEvent::Insert { record } | ChangeEvent::Update { record } => &record.id,
            ChangeEvent::Delete { id } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Insert { .. } => "insert",
            ChangeEvent::Update { .. } => "update",
            ChangeEvent::Delete { .. } => "delete",
        }
    }
}
