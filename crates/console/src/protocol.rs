// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol: envelope framing and the message types carried inside it.
//!
//! Framing is length-prefixed (§3): `{len: u32 BE}{type: u16 BE}{id: u32 BE}{body}`.
//! `len` covers `type + id + body`. Envelope body encode/decode is treated as
//! a provided black box by the spec; we implement it with `serde_json` so the
//! rest of the crate has something concrete to multiplex.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

/// Message type tags carried in the envelope header.
pub mod msg_type {
    pub const METRICS_UPDATE: u16 = 1;
    pub const LOG_ENTRY: u16 = 2;
    pub const ALERT_EVENT: u16 = 3;
    pub const CONTAINER_EVENT: u16 = 4;
    /// Generic successful reply; body shape depends on the originating request.
    pub const RESULT: u16 = 100;
    /// Generic error reply (spec.md §4.3).
    pub const ERROR: u16 = 101;

    // Request types sent by the client (spec.md §6). Replies to all of
    // these arrive tagged RESULT/ERROR, correlated by request id.
    pub const SUBSCRIBE_METRICS: u16 = 10;
    pub const SUBSCRIBE_LOGS: u16 = 11;
    pub const SUBSCRIBE_ALERTS: u16 = 12;
    pub const UNSUBSCRIBE: u16 = 13;
    pub const QUERY_CONTAINERS: u16 = 20;
    pub const QUERY_METRICS: u16 = 21;
    pub const QUERY_LOGS: u16 = 22;
    pub const QUERY_ALERTS: u16 = 23;
    pub const QUERY_ALERT_RULES: u16 = 24;
    pub const ACK_ALERT: u16 = 30;
    pub const SILENCE_ALERT: u16 = 31;
    pub const SET_TRACKING: u16 = 32;
}

/// Maximum frame body size accepted from the wire (guards against a
/// corrupt or hostile length prefix stalling the reader on an allocation).
pub const MAX_FRAME_BODY: u32 = 64 * 1024 * 1024;

/// On-wire envelope: `id == 0` is a streaming message, `id > 0` pairs a
/// request with its response.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub msg_type: u16,
    pub id: u32,
    pub body: Bytes,
}

impl Envelope {
    pub fn new(msg_type: u16, id: u32, body: Bytes) -> Self {
        Self { msg_type, id, body }
    }

    pub fn streaming(msg_type: u16, body: Bytes) -> Self {
        Self::new(msg_type, 0, body)
    }
}

/// Read one length-prefixed envelope from `reader`. Returns `Ok(None)` on
/// clean EOF at a frame boundary (the peer closed the stream).
pub async fn read_envelope<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> std::io::Result<Option<Envelope>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf);
    if len < 6 || len.saturating_sub(6) > MAX_FRAME_BODY {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length {len} out of bounds"),
        ));
    }
    let mut header = [0u8; 6];
    reader.read_exact(&mut header).await?;
    let msg_type = u16::from_be_bytes([header[0], header[1]]);
    let id = u32::from_be_bytes([header[2], header[3], header[4], header[5]]);
    let body_len = (len - 6) as usize;
    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body).await?;
    Ok(Some(Envelope::new(msg_type, id, Bytes::from(body))))
}

/// Write one length-prefixed envelope to `writer`.
pub async fn write_envelope<W: AsyncWrite + Unpin>(
    writer: &mut W,
    env: &Envelope,
) -> std::io::Result<()> {
    let len = 6u32 + env.body.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&env.msg_type.to_be_bytes()).await?;
    writer.write_all(&env.id.to_be_bytes()).await?;
    writer.write_all(&env.body).await?;
    writer.flush().await
}

/// Decode a JSON envelope body, mapping failure to [`TransportError::Decode`].
pub fn decode_body<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, TransportError> {
    serde_json::from_slice(body).map_err(|e| TransportError::Decode(e.to_string()))
}

/// Encode a value as a JSON envelope body.
pub fn encode_body<T: Serialize>(value: &T) -> Bytes {
    Bytes::from(serde_json::to_vec(value).unwrap_or_default())
}

/// Envelope-body encode/decode, kept behind a trait so the concrete wire
/// format (spec.md treats it as a provided black box) can be swapped
/// without touching the multiplexer.
pub trait Codec {
    fn encode<T: Serialize>(value: &T) -> Bytes;
    fn decode<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, TransportError>;
}

/// The concrete codec used throughout this crate.
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(value: &T) -> Bytes {
        encode_body(value)
    }

    fn decode<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, TransportError> {
        decode_body(body)
    }
}

// ---- data model -----------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceSample {
    pub name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostSample {
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub mem_used_percent: f64,
    #[serde(default)]
    pub net: Vec<InterfaceSample>,
}

/// One container's sample in a streaming metrics update or a live snapshot.
///
/// `project`/`service` are empty strings for standalone (non-orchestrated)
/// containers — see "Service identity" in the glossary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSample {
    pub id: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub service: String,
    pub name: String,
    pub cpu_percent: f64,
    pub mem_percent: f64,
    #[serde(default)]
    pub net_rx: u64,
    #[serde(default)]
    pub net_tx: u64,
    #[serde(default)]
    pub block_read: u64,
    #[serde(default)]
    pub block_write: u64,
}

impl ContainerSample {
    /// `(project, service)` identity, or `None` for standalone containers
    /// (empty service — these never participate in buffer transfer).
    pub fn service_identity(&self) -> Option<(&str, &str)> {
        if self.service.is_empty() {
            None
        } else {
            Some((self.project.as_str(), self.service.as_str()))
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsUpdate {
    pub ts: i64,
    #[serde(default)]
    pub host: Option<HostSample>,
    #[serde(default)]
    pub containers: Vec<ContainerSample>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntryMsg {
    pub container_id: String,
    pub container_name: String,
    pub ts: i64,
    pub level: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEventMsg {
    pub alert_id: i64,
    pub rule: String,
    /// e.g. "firing", "resolved".
    pub state: String,
    pub fired_at: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerEventMsg {
    /// e.g. "start", "stop", "die".
    pub action: String,
    pub id: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub service: String,
    pub name: String,
    #[serde(default)]
    pub tracked: bool,
}

/// Closed tagged union over the known streaming variants (spec.md §4.3,
/// §9 "Polymorphism over envelope bodies"). Unknown `msg_type`s never reach
/// this type — they are dropped by the reader before decoding.
#[derive(Debug, Clone)]
pub enum StreamingMessage {
    MetricsUpdate(MetricsUpdate),
    LogEntry(LogEntryMsg),
    AlertEvent(AlertEventMsg),
    ContainerEvent(ContainerEventMsg),
}

impl StreamingMessage {
    /// Decode a streaming envelope body by its `msg_type`. Returns `None`
    /// for an unrecognized type (caller should log and drop, per §7).
    pub fn decode(msg_type: u16, body: &[u8]) -> Option<Result<Self, TransportError>> {
        match msg_type {
            msg_type::METRICS_UPDATE => Some(decode_body(body).map(Self::MetricsUpdate)),
            msg_type::LOG_ENTRY => Some(decode_body(body).map(Self::LogEntry)),
            msg_type::ALERT_EVENT => Some(decode_body(body).map(Self::AlertEvent)),
            msg_type::CONTAINER_EVENT => Some(decode_body(body).map(Self::ContainerEvent)),
            _ => None,
        }
    }
}

/// One point in a historical host series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HostPoint {
    pub ts: i64,
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub mem_used_percent: f64,
}

/// One container's historical series, keyed by `(project, service)` — the
/// agent has already merged across redeployments server-side (spec.md §4.5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerSeries {
    pub project: String,
    pub service: String,
    /// CPU/mem percent points, aligned index-for-index with the response's
    /// host points (same timestamps).
    pub cpu_percent: Vec<f64>,
    pub mem_percent: Vec<f64>,
}

/// Response body for a `QueryMetrics` request.
///
/// `points == 0` marks a **live backfill** (push into existing buffers, no
/// replacement); `points > 0` marks a **historical backfill** (atomic
/// replacement) — spec.md §4.5.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsBackfillResponse {
    pub start: i64,
    pub end: i64,
    pub points: u32,
    pub gen: u64,
    #[serde(default)]
    pub host: Vec<HostPoint>,
    #[serde(default)]
    pub containers: Vec<ContainerSeries>,
}

/// Response body for a `QueryLogs` request used to prepend history ahead of
/// the oldest streamed entry (spec.md §4.7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogsBackfillResponse {
    pub gen: u64,
    #[serde(default)]
    pub entries: Vec<LogEntryMsg>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerInfoWire {
    pub id: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub service: String,
    pub name: String,
    #[serde(default)]
    pub tracked: bool,
    #[serde(default)]
    pub state: String,
}

// ---- request bodies (spec.md §6) ------------------------------------------

/// Body for `SubscribeMetrics` / `SubscribeLogs` / `SubscribeAlerts` — all
/// optional, narrows the subscription to one container or one project.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubscribeFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnsubscribeBody {
    pub topic: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryMetricsRequest {
    pub start: i64,
    pub end: i64,
    pub points: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryLogsRequest {
    pub start: i64,
    pub end: i64,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryAlertsRequest {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AckAlertRequest {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SilenceAlertRequest {
    pub rule: String,
    pub duration_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SetTrackingRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub tracked: bool,
}

/// A freshly-queried container list (`QueryContainers` response).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerListResponse {
    pub containers: Vec<ContainerInfoWire>,
}

/// A `QueryAlerts` response: resolved alerts within the requested window.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertHistoryResponse {
    pub alerts: Vec<AlertEventMsg>,
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
