use std::fmt::Display;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use ops_protocol::{ChangeEvent, ExecutionRecord};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::subscription::{EventResult, Subscription};
use crate::error::SubscriptionError;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct PhoenixMessage {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

fn join_message(topic: &str, schema: &str, table: &str, access_token: Option<&str>) -> PhoenixMessage {
    let mut payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [
                { "event": "*", "schema": schema, "table": table }
            ]
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = Value::String(token.to_string());
    }
    PhoenixMessage {
        topic: topic.to_string(),
        event: "phx_join".to_string(),
        payload,
        reference: Some("1".to_string()),
    }
}

fn heartbeat_message(reference: u64) -> PhoenixMessage {
    PhoenixMessage {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

fn leave_message(topic: &str, reference: u64) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic.to_string(),
        event: "phx_leave".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

/// Connects, joins the change topic for `schema.table` and starts pumping
/// frames into a [`Subscription`]. Reconnection is left to the caller.
pub(super) async fn open_channel(
    url: &str,
    schema: &str,
    table: &str,
    access_token: Option<String>,
) -> Result<Subscription, SubscriptionError> {
    let (stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|err| SubscriptionError::Open(err.to_string()))?;
    let (mut sink, source) = stream.split();
    let topic = format!("realtime:{schema}:{table}");
    send_message(
        &mut sink,
        &join_message(&topic, schema, table, access_token.as_deref()),
    )
    .await
    .map_err(SubscriptionError::Open)?;
    info!(event = "realtime.joined", topic = %topic, "change channel joined");

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        pump_frames(sink, source, topic, tx, task_cancel).await;
    });
    Ok(Subscription::new(rx, cancel))
}

async fn pump_frames<S, R>(
    mut sink: S,
    mut source: R,
    topic: String,
    tx: mpsc::Sender<EventResult>,
    cancel: CancellationToken,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut reference: u64 = 1;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                reference += 1;
                let _ = send_message(&mut sink, &leave_message(&topic, reference)).await;
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            _ = heartbeat.tick() => {
                reference += 1;
                if let Err(err) = send_message(&mut sink, &heartbeat_message(reference)).await {
                    warn!(topic = %topic, error = %err, "realtime heartbeat failed");
                    let _ = tx.send(Err(SubscriptionError::Dropped(err))).await;
                    break;
                }
            }
            message = source.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => match decode_frame(&topic, &text) {
                        Ok(Some(event)) => {
                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(err) => {
                            warn!(topic = %topic, error = %err, "realtime frame rejected");
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = tx
                            .send(Err(SubscriptionError::Dropped(
                                "channel closed by server".to_string(),
                            )))
                            .await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        let _ = tx.send(Err(SubscriptionError::Dropped(err.to_string()))).await;
                        break;
                    }
                }
            }
        }
    }
    debug!(event = "realtime.closed", topic = %topic, "realtime pump stopped");
}

async fn send_message<S>(sink: &mut S, message: &PhoenixMessage) -> Result<(), String>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let payload = serde_json::to_string(message).map_err(|err| err.to_string())?;
    sink.send(Message::Text(payload))
        .await
        .map_err(|err| err.to_string())
}

fn decode_frame(topic: &str, text: &str) -> Result<Option<ChangeEvent>, SubscriptionError> {
    let message: PhoenixMessage =
        serde_json::from_str(text).map_err(|err| SubscriptionError::Decode(err.to_string()))?;
    if message.topic != topic {
        return Ok(None);
    }
    match message.event.as_str() {
        "postgres_changes" => decode_change(&message.payload),
        "phx_reply" | "system" => {
            let failed = message.payload.get("status").and_then(Value::as_str) == Some("error");
            if failed {
                return Err(SubscriptionError::Open(reply_reason(&message.payload)));
            }
            Ok(None)
        }
        "phx_error" => Err(SubscriptionError::Dropped("channel error".to_string())),
        "phx_close" => Err(SubscriptionError::Dropped("channel closed".to_string())),
        _ => Ok(None),
    }
}

fn reply_reason(payload: &Value) -> String {
    payload
        .pointer("/response/reason")
        .or_else(|| payload.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| payload.to_string())
}

fn decode_change(payload: &Value) -> Result<Option<ChangeEvent>, SubscriptionError> {
    let data = payload.get("data").unwrap_or(payload);
    let kind = data
        .get("type")
        .or_else(|| data.get("eventType"))
        .and_then(Value::as_str)
        .ok_or_else(|| SubscriptionError::Decode("missing change type".to_string()))?;
    match kind {
        "INSERT" => Ok(Some(ChangeEvent::Insert {
            record: decode_record(data, &["record", "new"])?,
        })),
        "UPDATE" => Ok(Some(ChangeEvent::Update {
            record: decode_record(data, &["record", "new"])?,
        })),
        "DELETE" => {
            let id = ["old_record", "old"]
                .iter()
                .find_map(|key| data.get(*key))
                .and_then(|old| old.get("id"))
                .and_then(Value::as_str)
                .ok_or_else(|| SubscriptionError::Decode("delete without id".to_string()))?;
            Ok(Some(ChangeEvent::Delete { id: id.to_string() }))
        }
        _ => Ok(None),
    }
}

fn decode_record(data: &Value, keys: &[&str]) -> Result<ExecutionRecord, SubscriptionError> {
    let record = keys
        .iter()
        .find_map(|key| data.get(*key))
        .ok_or_else(|| SubscriptionError::Decode("change without record".to_string()))?;
    serde_json::from_value(record.clone()).map_err(|err| SubscriptionError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ops_protocol::ExecutionStatus;

    const TOPIC: &str = "realtime:public:ai_executions";

    fn frame(event: &str, payload: Value) -> String {
        json!({ "topic": TOPIC, "event": event, "payload": payload, "ref": null }).to_string()
    }

    #[test]
    fn join_requests_all_changes_for_table() {
        let message = join_message(TOPIC, "public", "ai_executions", Some("token"));
        assert_eq!(message.event, "phx_join");
        assert_eq!(
            message.payload.pointer("/config/postgres_changes/0/table"),
            Some(&json!("ai_executions"))
        );
        assert_eq!(message.payload["access_token"], json!("token"));
        let wire = serde_json::to_value(&message).expect("serialize");
        assert_eq!(wire["ref"], json!("1"));
    }

    #[test]
    fn decodes_insert_and_update() {
        let insert = frame(
            "postgres_changes",
            json!({"data": {"type": "INSERT", "record": {"id": "a", "name": "job", "status": "queued"}}}),
        );
        let event = decode_frame(TOPIC, &insert).expect("decode").expect("event");
        assert_eq!(event.kind(), "insert");
        assert_eq!(event.record_id(), "a");

        let update = frame(
            "postgres_changes",
            json!({"data": {"type": "UPDATE", "record": {"id": "a", "name": "job", "status": "completed"}}}),
        );
        match decode_frame(TOPIC, &update).expect("decode") {
            Some(ChangeEvent::Update { record }) => {
                assert_eq!(record.status, ExecutionStatus::Completed)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decodes_delete_from_old_record() {
        let delete = frame(
            "postgres_changes",
            json!({"data": {"type": "DELETE", "old_record": {"id": "gone"}}}),
        );
        let event = decode_frame(TOPIC, &delete).expect("decode").expect("event");
        assert_eq!(event, ChangeEvent::Delete { id: "gone".to_string() });
    }

    #[test]
    fn ignores_other_topics_and_control_frames() {
        let heartbeat_reply = json!({
            "topic": "phoenix", "event": "phx_reply",
            "payload": {"status": "ok", "response": {}}, "ref": "2"
        })
        .to_string();
        assert_eq!(decode_frame(TOPIC, &heartbeat_reply).expect("decode"), None);
        let presence = frame("presence_state", json!({}));
        assert_eq!(decode_frame(TOPIC, &presence).expect("decode"), None);
    }

    #[test]
    fn join_rejection_is_open_error() {
        let reply = frame(
            "phx_reply",
            json!({"status": "error", "response": {"reason": "unauthorized"}}),
        );
        assert_eq!(
            decode_frame(TOPIC, &reply),
            Err(SubscriptionError::Open("unauthorized".to_string()))
        );
    }

    #[test]
    fn malformed_frames_are_decode_errors() {
        assert!(matches!(
            decode_frame(TOPIC, "{not json"),
            Err(SubscriptionError::Decode(_))
        ));
        let bad_record = frame(
            "postgres_changes",
            json!({"data": {"type": "INSERT", "record": {"id": "a"}}}),
        );
        assert!(matches!(
            decode_frame(TOPIC, &bad_record),
            Err(SubscriptionError::Decode(_))
        ));
    }
}
