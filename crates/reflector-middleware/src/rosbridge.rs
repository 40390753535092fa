//! rosbridge v2 WebSocket adapter.
//!
//! Talks the JSON protocol spoken by `rosbridge_server`:
//!
//! 1. **Handshake** – on connect, sends a `subscribe` op for the scan topic
//!    and an `advertise` op for the cloud topic.
//! 2. **Inbound** – every `publish` frame on the scan topic is decoded into a
//!    [`LaserScan`].  Frames for other topics or other ops are ignored.
//! 3. **Outbound** – every [`PointCloud`] is sent as a `publish` op on the
//!    cloud topic.
//!
//! The frame builders and the parser are plain functions so they can be
//! exercised without a socket.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use reflector_types::{LaserScan, PointCloud, ReflectorError};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::adapter::{CloudSink, ScanSource};

/// ROS message type of the inbound topic.
pub const SCAN_MESSAGE_TYPE: &str = "sensor_msgs/LaserScan";
/// ROS message type of the outbound topic.
pub const CLOUD_MESSAGE_TYPE: &str = "sensor_msgs/PointCloud";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ────────────────────────────────────────────────────────────────────────────
// Frame codec
// ────────────────────────────────────────────────────────────────────────────

/// `subscribe` op for `topic`, typed as a laser scan.
pub fn subscribe_op(topic: &str) -> Value {
    json!({
        "op": "subscribe",
        "topic": topic,
        "type": SCAN_MESSAGE_TYPE,
    })
}

/// `advertise` op for `topic`, typed as a point cloud.
pub fn advertise_op(topic: &str) -> Value {
    json!({
        "op": "advertise",
        "topic": topic,
        "type": CLOUD_MESSAGE_TYPE,
    })
}

/// `publish` op carrying `cloud` on `topic`.
pub fn publish_cloud_op(topic: &str, cloud: &PointCloud) -> Result<Value, ReflectorError> {
    let msg = serde_json::to_value(cloud).map_err(|e| ReflectorError::Codec(e.to_string()))?;
    Ok(json!({
        "op": "publish",
        "topic": topic,
        "msg": msg,
    }))
}

/// Decode one inbound text frame.
///
/// Returns `Ok(None)` for frames that are valid JSON but not a `publish` on
/// `topic` (status messages, other topics).  Returns a
/// [`ReflectorError::Codec`] for frames that are not JSON, or for a publish on
/// `topic` whose `msg` is not a laser scan.
pub fn parse_scan_frame(text: &str, topic: &str) -> Result<Option<LaserScan>, ReflectorError> {
    let mut frame: Value =
        serde_json::from_str(text).map_err(|e| ReflectorError::Codec(e.to_string()))?;

    if frame.get("op").and_then(Value::as_str) != Some("publish")
        || frame.get("topic").and_then(Value::as_str) != Some(topic)
    {
        return Ok(None);
    }

    let msg = frame
        .get_mut("msg")
        .map(Value::take)
        .ok_or_else(|| ReflectorError::Codec(format!("publish on {topic} without msg")))?;
    serde_json::from_value(msg)
        .map(Some)
        .map_err(|e| ReflectorError::Codec(format!("{topic}: {e}")))
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

/// Connect to `url`, subscribe to `scan_topic` and advertise `cloud_topic`.
///
/// Returns the two halves of the connection.
pub async fn connect(
    url: &str,
    scan_topic: &str,
    cloud_topic: &str,
) -> Result<(RosbridgeScans, RosbridgeClouds), ReflectorError> {
    let (ws, _response) = connect_async(url)
        .await
        .map_err(|e| ReflectorError::Transport(format!("connect to {url}: {e}")))?;
    info!(url, scan_topic, cloud_topic, "connected to rosbridge");

    let (mut sink, stream) = ws.split();
    for op in [subscribe_op(scan_topic), advertise_op(cloud_topic)] {
        sink.send(Message::Text(op.to_string().into()))
            .await
            .map_err(|e| ReflectorError::Transport(format!("handshake: {e}")))?;
    }

    Ok((
        RosbridgeScans {
            stream,
            topic: scan_topic.to_string(),
        },
        RosbridgeClouds {
            sink,
            topic: cloud_topic.to_string(),
        },
    ))
}

/// Read half of a rosbridge connection.
pub struct RosbridgeScans {
    stream: SplitStream<WsStream>,
    topic: String,
}

#[async_trait]
impl ScanSource for RosbridgeScans {
    async fn next_scan(&mut self) -> Result<Option<LaserScan>, ReflectorError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    match parse_scan_frame(text.as_str(), &self.topic) {
                        Ok(Some(scan)) => return Ok(Some(scan)),
                        Ok(None) => debug!(topic = %self.topic, "ignoring unrelated frame"),
                        Err(e) => warn!(topic = %self.topic, error = %e, "dropping undecodable frame"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(topic = %self.topic, "rosbridge connection closed");
                    return Ok(None);
                }
                Some(Err(e)) => return Err(ReflectorError::Transport(e.to_string())),
                Some(Ok(_)) => {}
            }
        }
    }
}

/// Write half of a rosbridge connection.
pub struct RosbridgeClouds {
    sink: SplitSink<WsStream, Message>,
    topic: String,
}

#[async_trait]
impl CloudSink for RosbridgeClouds {
    async fn send_cloud(&mut self, cloud: &PointCloud) -> Result<(), ReflectorError> {
        let frame = publish_cloud_op(&self.topic, cloud)?;
        self.sink
            .send(Message::Text(frame.to_string().into()))
            .await
            .map_err(|e| ReflectorError::Transport(e.to_string()))
    }

    async fn finish(&mut self) -> Result<(), ReflectorError> {
        self.sink
            .close()
            .await
            .map_err(|e| ReflectorError::Transport(e.to_string()))
    }
}
