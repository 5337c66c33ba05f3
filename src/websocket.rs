use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::error::TableError;
use crate::registry::TableRegistry;
use crate::schema::{Row, Schema};
use crate::state::AppState;
use crate::table::TableDiff;

/// Frames pushed to a viewer. A connection always receives one `snapshot`
/// first, then `diff` frames; applying a diff means dropping `evicted` rows
/// from the front and appending `appended` at the back.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Frame<'a> {
    Snapshot {
        table: &'a str,
        seq: u64,
        schema: &'a Schema,
        rows: &'a [Row],
    },
    Diff {
        table: &'a str,
        seq: u64,
        appended: &'a [Row],
        evicted: usize,
    },
    Error {
        message: &'a str,
        code: &'a str,
    },
}

/// Messages a viewer may send
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    /// Request a fresh snapshot (e.g. after the client dropped frames)
    Resync,
}

/// Handle WebSocket upgrade for `/ws/{table}`
pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    Path(table): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, table, state))
}

/// Handle individual viewer connection. Failures here affect only this
/// subscriber; the table and other connections are untouched.
async fn handle_socket(socket: WebSocket, table: String, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let (schema, mut updates) = match connect_table(&state.registry, &table) {
        Ok(pair) => pair,
        Err(e) => {
            warn!("Rejecting subscription to '{}': {}", table, e);
            send_error(&mut sender, &e.to_string(), "NO_SUCH_TABLE").await;
            return;
        }
    };
    info!("Viewer subscribed to table '{}'", table);

    // Subscribe first, snapshot second; the sequence number lets us drop
    // any diff the snapshot already contains.
    let mut last_seq = match send_snapshot(&mut sender, &state.registry, &table, &schema, 0).await {
        Some(seq) => seq,
        None => return,
    };

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(diff) => {
                    if diff.seq <= last_seq {
                        continue;
                    }
                    last_seq = diff.seq;
                    if !send_diff(&mut sender, &table, &diff).await {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Slow consumer: resynchronize with a full snapshot
                    // instead of replaying what the channel dropped
                    warn!("Viewer of '{}' lagged by {} diffs, resyncing", table, skipped);
                    match send_snapshot(&mut sender, &state.registry, &table, &schema, last_seq).await {
                        Some(seq) => last_seq = seq,
                        None => break,
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Table '{}' is gone, closing viewer connection", table);
                    break;
                }
            },
            msg = receiver.next() => {
                if !handle_client_message(msg, &mut sender, &state.registry, &table, &schema, &mut last_seq).await {
                    break;
                }
            }
        }
    }

    info!("Viewer connection for '{}' terminated", table);
}

fn connect_table(
    registry: &TableRegistry,
    table: &str,
) -> Result<(Schema, broadcast::Receiver<Arc<TableDiff>>), TableError> {
    let schema = registry.schema(table)?;
    let updates = registry.subscribe(table)?;
    Ok((schema, updates))
}

/// Fetch and push a full snapshot frame. The frame is encoded via the
/// registry's offload path, so in executor mode the JSON work stays off the
/// worker loop. Returns the snapshot's sequence number, or `None` if the
/// connection is no longer usable.
async fn send_snapshot(
    sender: &mut SplitSink<WebSocket, Message>,
    registry: &TableRegistry,
    table: &str,
    schema: &Schema,
    prev_seq: u64,
) -> Option<u64> {
    let table_name = table.to_string();
    let schema = schema.clone();
    let encoded = registry
        .snapshot_with(table, move |snapshot| {
            let frame = Frame::Snapshot {
                table: &table_name,
                seq: snapshot.seq,
                schema: &schema,
                rows: &snapshot.rows,
            };
            serde_json::to_string(&frame).map(|text| (snapshot.seq, text))
        })
        .await;

    match encoded {
        Ok(Ok((seq, text))) => {
            if let Err(e) = sender.send(Message::Text(text.into())).await {
                error!("Failed to send snapshot of '{}': {}", table, e);
                return None;
            }
            Some(seq)
        }
        Ok(Err(e)) => {
            error!("Failed to serialize snapshot of '{}': {}", table, e);
            None
        }
        Err(TableError::DispatchTimeout(t)) => {
            // Recoverable and scoped to this viewer; report and keep the
            // connection so the client can retry with a resync
            warn!("Snapshot of '{}' timed out after {:?}", table, t);
            send_error(sender, "snapshot timed out", "DISPATCH_TIMEOUT").await;
            Some(prev_seq)
        }
        Err(e) => {
            error!("Failed to snapshot '{}': {}", table, e);
            send_error(sender, &e.to_string(), "SNAPSHOT_FAILED").await;
            None
        }
    }
}

async fn send_diff(
    sender: &mut SplitSink<WebSocket, Message>,
    table: &str,
    diff: &TableDiff,
) -> bool {
    let frame = Frame::Diff {
        table,
        seq: diff.seq,
        appended: &diff.appended,
        evicted: diff.evicted,
    };
    match serde_json::to_string(&frame) {
        Ok(text) => {
            if let Err(e) = sender.send(Message::Text(text.into())).await {
                error!("Failed to send diff for '{}': {}", table, e);
                return false;
            }
            true
        }
        Err(e) => {
            error!("Failed to serialize diff for '{}': {}", table, e);
            true
        }
    }
}

async fn send_error(sender: &mut SplitSink<WebSocket, Message>, message: &str, code: &str) {
    let frame = Frame::Error { message, code };
    if let Ok(text) = serde_json::to_string(&frame) {
        let _ = sender.send(Message::Text(text.into())).await;
    }
}

/// Returns false when the connection should close
async fn handle_client_message(
    msg: Option<Result<Message, axum::Error>>,
    sender: &mut SplitSink<WebSocket, Message>,
    registry: &TableRegistry,
    table: &str,
    schema: &Schema,
    last_seq: &mut u64,
) -> bool {
    let msg = match msg {
        Some(Ok(msg)) => msg,
        Some(Err(e)) => {
            error!("WebSocket error: {}", e);
            return false;
        }
        None => return false,
    };

    match msg {
        Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Resync) => {
                match send_snapshot(sender, registry, table, schema, *last_seq).await {
                    Some(seq) => {
                        *last_seq = seq;
                        true
                    }
                    None => false,
                }
            }
            Err(e) => {
                warn!("Failed to parse client message: {}", e);
                send_error(sender, &format!("Invalid message format: {e}"), "PARSE_ERROR").await;
                true
            }
        },
        Message::Close(_) => {
            info!("WebSocket connection closed by client");
            false
        }
        Message::Ping(data) => {
            if let Err(e) = sender.send(Message::Pong(data)).await {
                error!("Failed to send pong: {}", e);
                return false;
            }
            true
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, Value};

    #[test]
    fn snapshot_frame_shape() {
        let schema = Schema::new(vec![
            ("depth".to_string(), ColumnType::Integer),
            ("gamma".to_string(), ColumnType::Float),
        ])
        .unwrap();
        let rows = vec![vec![Value::Int(2400), Value::Float(85.5)]];
        let frame = Frame::Snapshot {
            table: "well_log",
            seq: 7,
            schema: &schema,
            rows: &rows,
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["table"], "well_log");
        assert_eq!(json["seq"], 7);
        assert_eq!(json["rows"][0][0], 2400);
        assert_eq!(json["rows"][0][1], 85.5);
    }

    #[test]
    fn diff_frame_shape() {
        let frame = Frame::Diff {
            table: "well_log",
            seq: 3,
            appended: &[vec![Value::Int(1)]],
            evicted: 1,
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(json["type"], "diff");
        assert_eq!(json["evicted"], 1);
        assert_eq!(json["appended"][0][0], 1);
    }

    #[test]
    fn client_resync_parses() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"resync"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Resync));
    }
}
