// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tagged messages that flow into the orchestrator's single inbox
//! (spec.md §4.8). Every external stimulus — streaming data, a connection
//! lifecycle event, a backfill response, an SSH prompt — arrives here
//! tagged with the session it belongs to.

use std::sync::Arc;

use tokio::net::UnixStream;
use tokio::sync::oneshot;

use crate::error::TransportError;
use crate::protocol::{
    AlertEventMsg, ContainerInfoWire, LogsBackfillResponse, MetricsBackfillResponse,
    StreamingMessage,
};
use crate::transport::TransportClient;
use crate::tunnel::TunnelManager;

/// Which backfill scope a metrics response belongs to (spec.md §4.1
/// invariants). Logs backfills are routed through the separate
/// [`OrchestratorMessage::LogsBackfill`] variant instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillScope {
    GlobalMetrics,
    DetailMetrics,
}

/// The answer a user gives to an SSH interactive prompt (spec.md §4.4).
#[derive(Debug, Clone)]
pub enum PromptAnswer {
    Text(String),
    Accept,
    Reject,
    Cancelled,
}

/// One tagged stimulus delivered to the orchestrator's inbox.
pub enum OrchestratorMessage {
    /// A streaming message decoded by a transport's reader task.
    Streaming { server: Arc<str>, message: StreamingMessage },
    /// The reader task detected a socket read failure (not preceded by an
    /// explicit close).
    ConnectionLost { server: Arc<str> },
    /// A metrics backfill response, routed by `(server, scope, gen)`.
    MetricsBackfill {
        server: Arc<str>,
        scope: BackfillScope,
        gen: u64,
        result: Result<MetricsBackfillResponse, TransportError>,
    },
    /// A detail-view logs backfill response.
    LogsBackfill {
        server: Arc<str>,
        gen: u64,
        result: Result<LogsBackfillResponse, TransportError>,
    },
    /// The tunnel's forwarding subprocess needs an interactive answer.
    SshPrompt { server: Arc<str>, prompt: String, respond: oneshot::Sender<PromptAnswer> },
    /// Terminal window size changed; orchestrator does not touch sessions.
    WindowResize { width: u16, height: u16 },
    /// A connect attempt succeeded: transport is bound and ready, tunnel
    /// (if any) is alive.
    Connected {
        server: Arc<str>,
        transport: Arc<TransportClient<UnixStream>>,
        tunnel: Option<Arc<TunnelManager>>,
    },
    /// A connect attempt exhausted its retries.
    ConnectFailed { server: Arc<str>, error: String },
    /// Response to the one-shot `QueryContainers` issued right after
    /// connect (and whenever the registry needs a full refresh).
    ContainersLoaded {
        server: Arc<str>,
        result: Result<Vec<ContainerInfoWire>, TransportError>,
    },
    /// Resolved-alert history query response, feeding the alert-history
    /// view (spec.md §4.6).
    AlertsBackfill {
        server: Arc<str>,
        result: Result<Vec<AlertEventMsg>, TransportError>,
    },
}
