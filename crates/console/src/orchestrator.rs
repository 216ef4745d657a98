// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-threaded event loop: owns every session, consumes the tagged
//! message inbox, and is the only place session state is mutated
//! (spec.md §4.8-§4.9).
//!
//! Background tasks (connect flows, backfill queries, the tunnel's prompt
//! loop) never touch a [`Session`] directly — they only ever send a tagged
//! [`OrchestratorMessage`] back onto the inbox.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, ServerConfig};
use crate::event::{BackfillScope, OrchestratorMessage, PromptAnswer};
use crate::protocol::{
    self, msg_type, AckAlertRequest, AlertEventMsg, AlertHistoryResponse, ContainerListResponse,
    LogsBackfillResponse, QueryAlertsRequest, QueryLogsRequest, QueryMetricsRequest,
    SetTrackingRequest, SilenceAlertRequest, StreamingMessage, SubscribeFilter,
};
use crate::ring::{HISTORY_CAPACITY, LOG_CAPACITY};
use crate::session::{AgentTransport, ConnectionState, ContainerInfo, DetailTarget, LogFilters, Session};
use crate::tunnel::{AskpassCallback, TunnelManager, TunnelOptions};

/// Bounded connect retries, grounded on the teacher's exponential-backoff
/// registration loop (`mux_client.rs::run`).
const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BASE_BACKOFF: Duration = Duration::from_millis(500);

/// Historical backfill queries get exactly one retry after this delay, then
/// give up silently (spec.md §7 "Historical: enqueue one retry after a
/// short delay; give up silently after one retry.").
const BACKFILL_RETRY_DELAY: Duration = Duration::from_millis(750);

/// Alert-history view default lookback (spec.md §4.6 "past 24h by default").
const ALERT_HISTORY_WINDOW_SECS: i64 = 86_400;

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn container_state(action: &str) -> String {
    match action {
        "start" => "running".to_owned(),
        "stop" | "die" => "stopped".to_owned(),
        other => other.to_owned(),
    }
}

/// Owns every configured session and the one inbox all background work
/// reports back to.
pub struct Orchestrator {
    sessions: HashMap<Arc<str>, Session>,
    servers: HashMap<Arc<str>, ServerConfig>,
    inbox: mpsc::UnboundedReceiver<OrchestratorMessage>,
    dispatcher: mpsc::UnboundedSender<OrchestratorMessage>,
    connect_cancellations: HashMap<Arc<str>, CancellationToken>,
    request_timeout: Duration,
    backfill_timeout: Duration,
    /// Where `SshPrompt` / `WindowResize` messages are forwarded — the
    /// orchestrator itself never acts on them (spec.md §1 "out of scope").
    ui_events: mpsc::UnboundedSender<OrchestratorMessage>,
}

impl Orchestrator {
    /// Build an orchestrator for `servers`, plus a second channel carrying
    /// messages meant for the (out-of-scope) rendering layer — SSH prompts
    /// and window-resize notifications, which the orchestrator itself
    /// never acts on.
    pub fn new(config: &Config, servers: Vec<ServerConfig>) -> (Self, mpsc::UnboundedReceiver<OrchestratorMessage>) {
        let (dispatcher, inbox) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();

        let window_secs = crate::config::nearest_ladder_secs(config.default_window_secs);
        let sessions = servers
            .iter()
            .map(|s| {
                let name: Arc<str> = Arc::from(s.name.as_str());
                (Arc::clone(&name), Session::new(name, window_secs))
            })
            .collect();
        let servers = servers.into_iter().map(|s| (Arc::from(s.name.as_str()), s)).collect();

        let orchestrator = Self {
            sessions,
            servers,
            inbox,
            dispatcher,
            connect_cancellations: HashMap::new(),
            request_timeout: config.request_timeout(),
            backfill_timeout: config.backfill_timeout(),
            ui_events: ui_tx,
        };
        (orchestrator, ui_rx)
    }

    /// A cloneable handle background tasks use to post tagged messages
    /// back onto the main loop (transport readers bind with this).
    pub fn handle(&self) -> mpsc::UnboundedSender<OrchestratorMessage> {
        self.dispatcher.clone()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn session(&self, name: &str) -> Option<&Session> {
        self.sessions.get(name)
    }

    /// Connect every configured server that is not already connecting or
    /// connected — called once at startup.
    pub fn connect_all(&mut self) {
        let names: Vec<Arc<str>> = self.servers.keys().cloned().collect();
        for name in names {
            self.connect(&name);
        }
    }

    /// Start (or restart) a connect attempt for `server`. No-op if already
    /// connecting/ready.
    pub fn connect(&mut self, server: &str) {
        let Some(config) = self.servers.get(server).cloned() else { return };
        let Some(session) = self.sessions.get_mut(server) else { return };
        if matches!(session.connection(), ConnectionState::Connecting | ConnectionState::Ready | ConnectionState::SshPrompting) {
            return;
        }
        session.set_connection(ConnectionState::Connecting);
        let name = Arc::clone(session.name());

        let token = CancellationToken::new();
        self.connect_cancellations.insert(Arc::clone(&name), token.clone());
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(connect_flow(name, config, dispatcher, token));
    }

    /// Cancel any in-flight connect attempt for `server`, drop its
    /// transport/tunnel, and start a fresh connect (spec.md §4.8).
    pub fn reconnect(&mut self, server: &str) {
        if let Some(token) = self.connect_cancellations.remove(server) {
            token.cancel();
        }
        if let Some(session) = self.sessions.get_mut(server) {
            if let Some(tunnel) = session.on_connection_lost() {
                tokio::spawn(async move { tunnel.close().await });
            }
        }
        self.connect(server);
    }

    /// Process exactly one inbox message. Returns `false` once every
    /// dispatcher handle has been dropped (inbox permanently empty).
    pub async fn tick(&mut self) -> bool {
        let Some(message) = self.inbox.recv().await else { return false };
        self.handle_message(message);
        true
    }

    fn handle_message(&mut self, message: OrchestratorMessage) {
        match message {
            OrchestratorMessage::Streaming { server, message } => self.handle_streaming(server, message),
            OrchestratorMessage::ConnectionLost { server } => self.handle_connection_lost(&server),
            OrchestratorMessage::Connected { server, transport, tunnel } => {
                if let Some(session) = self.sessions.get_mut(server.as_ref()) {
                    session.set_transport(transport);
                    if let Some(tunnel) = tunnel {
                        session.set_tunnel(tunnel);
                    }
                    session.set_connection(ConnectionState::Ready);
                }
                self.connect_cancellations.remove(server.as_ref());
                info!(%server, "connected");
                self.fire_initial_subscriptions(&server);
                self.fire_metrics_backfill(Arc::clone(&server), BackfillScope::GlobalMetrics);
                self.fire_alerts_query(server);
            }
            OrchestratorMessage::ConnectFailed { server, error } => {
                if let Some(session) = self.sessions.get_mut(server.as_ref()) {
                    session.set_connection(ConnectionState::Error(error.clone()));
                }
                self.connect_cancellations.remove(server.as_ref());
                warn!(%server, %error, "connect failed");
            }
            OrchestratorMessage::ContainersLoaded { server, result } => {
                let Some(session) = self.sessions.get_mut(server.as_ref()) else { return };
                match result {
                    Ok(containers) => session.containers_mut().replace_all(containers),
                    Err(error) => warn!(%server, %error, "container list query failed"),
                }
            }
            OrchestratorMessage::AlertsBackfill { server, result } => {
                let Some(session) = self.sessions.get_mut(server.as_ref()) else { return };
                match result {
                    Ok(entries) => session.alerts_mut().apply_resolved_query(entries),
                    Err(error) => warn!(%server, %error, "alert history query failed"),
                }
            }
            OrchestratorMessage::MetricsBackfill { server, scope, gen, result } => {
                let Some(session) = self.sessions.get_mut(server.as_ref()) else { return };
                match result {
                    Ok(resp) => session.apply_metrics_backfill(scope, gen, resp),
                    Err(error) => warn!(%server, %error, "metrics backfill failed"),
                }
            }
            OrchestratorMessage::LogsBackfill { server, gen, result } => {
                let Some(session) = self.sessions.get_mut(server.as_ref()) else { return };
                match result {
                    Ok(resp) => {
                        session.apply_logs_backfill(gen, resp);
                    }
                    Err(error) => warn!(%server, %error, "logs backfill failed"),
                }
            }
            // SSH prompts and terminal resizes are rendering-layer concerns;
            // the orchestrator never mutates session state for them
            // (spec.md §4.8) — forward verbatim to whoever is consuming
            // `ui_events`.
            msg @ (OrchestratorMessage::SshPrompt { .. } | OrchestratorMessage::WindowResize { .. }) => {
                let _ = self.ui_events.send(msg);
            }
        }
    }

    fn handle_streaming(&mut self, server: Arc<str>, message: StreamingMessage) {
        let ready = matches!(self.sessions.get(server.as_ref()).map(Session::connection), Some(ConnectionState::Ready));
        if !ready {
            return;
        }

        let mut switched = false;
        if let Some(session) = self.sessions.get_mut(server.as_ref()) {
            match message {
                StreamingMessage::MetricsUpdate(update) => session.apply_metrics_update(update),
                StreamingMessage::LogEntry(entry) => {
                    let wanted = session.detail().target().map(|t| t.matches(&entry.container_id)).unwrap_or(false);
                    if wanted {
                        session.push_streamed_log(entry);
                    }
                }
                StreamingMessage::AlertEvent(event) => session.alerts_mut().on_event(event),
                StreamingMessage::ContainerEvent(event) => {
                    session.containers_mut().upsert(ContainerInfo {
                        id: event.id.clone(),
                        project: event.project.clone(),
                        service: event.service.clone(),
                        name: event.name.clone(),
                        tracked: event.tracked,
                        state: container_state(&event.action),
                    });
                    switched = session.detail_auto_switch(&event);
                }
            }
        }
        if switched {
            self.fire_metrics_backfill(Arc::clone(&server), BackfillScope::DetailMetrics);
            self.fire_logs_backfill(server);
        }
    }

    fn handle_connection_lost(&mut self, server: &str) {
        let Some(session) = self.sessions.get_mut(server) else { return };
        session.set_connection(ConnectionState::Error("connection lost".to_owned()));
        if let Some(tunnel) = session.on_connection_lost() {
            tokio::spawn(async move { tunnel.close().await });
        }
    }

    /// Select the next (`delta > 0`) / previous time window and, on a real
    /// change, fire a fresh historical backfill (plus a detail one if in
    /// detail view) (spec.md §4.8).
    pub fn zoom(&mut self, server: &str, delta: i32) {
        let (changed, in_detail, name) = {
            let Some(session) = self.sessions.get_mut(server) else { return };
            let changed = session.zoom(delta);
            (changed, session.detail().target().is_some(), Arc::clone(session.name()))
        };
        if !changed {
            return;
        }
        self.fire_metrics_backfill(Arc::clone(&name), BackfillScope::GlobalMetrics);
        if in_detail {
            self.fire_metrics_backfill(name, BackfillScope::DetailMetrics);
        }
    }

    /// Enter a detail view; fires metrics+logs backfill only on a genuine
    /// target change (same-target entry is a no-op, per `DetailState::enter`).
    pub fn enter_detail(&mut self, server: &str, target: DetailTarget, service_identity: Option<(String, String)>) {
        let (fire, name) = {
            let Some(session) = self.sessions.get_mut(server) else { return };
            let previous = session.detail().target().cloned();
            session.detail_mut().enter(target.clone(), service_identity);
            if previous.as_ref() == Some(&target) {
                (false, Arc::clone(session.name()))
            } else {
                session.detail_mut().mark_metrics_backfill_pending();
                session.detail_mut().mark_logs_backfill_pending();
                (true, Arc::clone(session.name()))
            }
        };
        if fire {
            self.fire_metrics_backfill(Arc::clone(&name), BackfillScope::DetailMetrics);
            self.fire_logs_backfill(name);
        }
    }

    /// Leave the detail view entirely.
    pub fn clear_detail(&mut self, server: &str) {
        if let Some(session) = self.sessions.get_mut(server) {
            session.detail_mut().reset();
        }
    }

    /// Apply new log filters. Re-queries the server: filters active push a
    /// filtered snapshot, filters cleared restore streaming and pull a
    /// fresh live backfill (spec.md §4.7).
    pub fn set_filters(&mut self, server: &str, filters: LogFilters) {
        let name = {
            let Some(session) = self.sessions.get_mut(server) else { return };
            session.detail_mut().set_filters(filters);
            session.detail_mut().mark_logs_backfill_pending();
            Arc::clone(session.name())
        };
        self.fire_logs_backfill(name);
    }

    /// Re-query the resolved-alert history view (spec.md §4.6).
    pub fn refresh_alert_history(&mut self, server: &str) {
        if let Some(name) = self.sessions.get(server).map(Session::name) {
            self.fire_alerts_query(Arc::clone(name));
        }
    }

    /// Optimistic ack: flips the local flag immediately, corrected by the
    /// next streaming alert event if the request ultimately fails
    /// (spec.md §4.6 — no rollback).
    pub fn ack_alert(&mut self, server: &str, id: i64) {
        let Some(session) = self.sessions.get_mut(server) else { return };
        session.alerts_mut().ack_optimistic(id);
        let Some(transport) = session.transport().cloned() else { return };
        let deadline = self.request_timeout;
        tokio::spawn(async move {
            let body = protocol::encode_body(&AckAlertRequest { id });
            let _ = transport.request(msg_type::ACK_ALERT, body, deadline).await;
        });
    }

    /// Fire-and-forget silence, matching ack's no-rollback property.
    pub fn silence_alert(&mut self, server: &str, rule: String, duration_secs: u64) {
        let Some(transport) = self.sessions.get(server).and_then(Session::transport).cloned() else { return };
        let deadline = self.request_timeout;
        tokio::spawn(async move {
            let body = protocol::encode_body(&SilenceAlertRequest { rule, duration_secs });
            let _ = transport.request(msg_type::SILENCE_ALERT, body, deadline).await;
        });
    }

    /// Toggle tracking for one container or a whole project.
    pub fn set_tracking(&mut self, server: &str, container: Option<String>, project: Option<String>, tracked: bool) {
        let Some(transport) = self.sessions.get(server).and_then(Session::transport).cloned() else { return };
        let deadline = self.request_timeout;
        tokio::spawn(async move {
            let body = protocol::encode_body(&SetTrackingRequest { container, project, tracked });
            let _ = transport.request(msg_type::SET_TRACKING, body, deadline).await;
        });
    }

    /// Cancel every in-flight connect attempt, then close every transport
    /// and tunnel. Called once, on quit.
    pub async fn shutdown(&mut self) {
        for (_, token) in self.connect_cancellations.drain() {
            token.cancel();
        }
        for session in self.sessions.values_mut() {
            if let Some(transport) = session.transport().cloned() {
                transport.close().await;
            }
            if let Some(tunnel) = session.on_connection_lost() {
                tunnel.close().await;
            }
        }
    }

    fn fire_initial_subscriptions(&self, server: &Arc<str>) {
        let Some(session) = self.sessions.get(server.as_ref()) else { return };
        let Some(transport) = session.transport().cloned() else { return };

        let sub_transport = Arc::clone(&transport);
        tokio::spawn(async move {
            let filter = protocol::encode_body(&SubscribeFilter::default());
            let _ = sub_transport.send_streaming(msg_type::SUBSCRIBE_METRICS, filter.clone()).await;
            let _ = sub_transport.send_streaming(msg_type::SUBSCRIBE_LOGS, filter.clone()).await;
            let _ = sub_transport.send_streaming(msg_type::SUBSCRIBE_ALERTS, filter).await;
        });

        let server = Arc::clone(server);
        let dispatcher = self.dispatcher.clone();
        let deadline = self.request_timeout;
        tokio::spawn(async move {
            let result = transport
                .request(msg_type::QUERY_CONTAINERS, Bytes::new(), deadline)
                .await
                .and_then(|body| protocol::decode_body::<ContainerListResponse>(&body))
                .map(|resp| resp.containers);
            let _ = dispatcher.send(OrchestratorMessage::ContainersLoaded { server, result });
        });
    }

    fn fire_metrics_backfill(&self, server: Arc<str>, scope: BackfillScope) {
        let Some(session) = self.sessions.get(server.as_ref()) else { return };
        let Some(transport) = session.transport().cloned() else { return };
        let gen = session.metrics_gen();
        let window = session.window_secs();
        let now = now_unix();

        let (project, service) = match scope {
            BackfillScope::DetailMetrics => match session.detail().service_identity() {
                Some((p, s)) => (Some(p.clone()), Some(s.clone())),
                None => return,
            },
            _ => (None, None),
        };

        let request = QueryMetricsRequest {
            start: now - window,
            end: now,
            points: HISTORY_CAPACITY as u32,
            project,
            service,
            container_id: None,
            container_ids: None,
        };
        let dispatcher = self.dispatcher.clone();
        let deadline = self.backfill_timeout;
        tokio::spawn(async move {
            let body = protocol::encode_body(&request);
            let mut result = transport.request(msg_type::QUERY_METRICS, body.clone(), deadline).await.and_then(|b| protocol::decode_body(&b));
            if result.is_err() {
                tokio::time::sleep(BACKFILL_RETRY_DELAY).await;
                result = transport.request(msg_type::QUERY_METRICS, body, deadline).await.and_then(|b| protocol::decode_body(&b));
            }
            let _ = dispatcher.send(OrchestratorMessage::MetricsBackfill { server, scope, gen, result });
        });
    }

    fn fire_logs_backfill(&self, server: Arc<str>) {
        let Some(session) = self.sessions.get(server.as_ref()) else { return };
        let Some(transport) = session.transport().cloned() else { return };
        let Some(target) = session.detail().target().cloned() else { return };
        let gen = session.metrics_gen();
        let window = session.window_secs();
        let now = now_unix();
        let filters = session.detail().filters().clone();

        let (container_id, container_ids, project) = match target {
            DetailTarget::Container(id) => (Some(id), None, None),
            DetailTarget::Project { project, ids } => (None, Some(ids), Some(project)),
        };

        let request = QueryLogsRequest {
            start: filters.start.unwrap_or(now - window),
            end: filters.end.unwrap_or(now),
            limit: LOG_CAPACITY as u32,
            level: filters.level,
            project,
            service: None,
            container_id,
            container_ids,
            search: filters.search,
        };
        let dispatcher = self.dispatcher.clone();
        let deadline = self.backfill_timeout;
        tokio::spawn(async move {
            let body = protocol::encode_body(&request);
            let mut result: Result<LogsBackfillResponse, _> =
                transport.request(msg_type::QUERY_LOGS, body.clone(), deadline).await.and_then(|b| protocol::decode_body(&b));
            if result.is_err() {
                tokio::time::sleep(BACKFILL_RETRY_DELAY).await;
                result = transport.request(msg_type::QUERY_LOGS, body, deadline).await.and_then(|b| protocol::decode_body(&b));
            }
            let _ = dispatcher.send(OrchestratorMessage::LogsBackfill { server, gen, result });
        });
    }

    /// Query the resolved-alert history (spec.md §4.6 "alert-history view").
    fn fire_alerts_query(&self, server: Arc<str>) {
        let Some(session) = self.sessions.get(server.as_ref()) else { return };
        let Some(transport) = session.transport().cloned() else { return };
        let now = now_unix();
        let request = QueryAlertsRequest { start: now - ALERT_HISTORY_WINDOW_SECS, end: now };
        let dispatcher = self.dispatcher.clone();
        let deadline = self.backfill_timeout;
        tokio::spawn(async move {
            let body = protocol::encode_body(&request);
            let mut result: Result<Vec<AlertEventMsg>, _> = transport
                .request(msg_type::QUERY_ALERTS, body.clone(), deadline)
                .await
                .and_then(|b| protocol::decode_body::<AlertHistoryResponse>(&b))
                .map(|resp| resp.alerts);
            if result.is_err() {
                tokio::time::sleep(BACKFILL_RETRY_DELAY).await;
                result = transport
                    .request(msg_type::QUERY_ALERTS, body, deadline)
                    .await
                    .and_then(|b| protocol::decode_body::<AlertHistoryResponse>(&b))
                    .map(|resp| resp.alerts);
            }
            let _ = dispatcher.send(OrchestratorMessage::AlertsBackfill { server, result });
        });
    }
}

/// Bridge the tunnel's `Fn(String) -> Future<Option<String>>` askpass shape
/// onto an `SshPrompt` round trip through the orchestrator's inbox.
fn make_askpass(server: Arc<str>, dispatcher: mpsc::UnboundedSender<OrchestratorMessage>) -> AskpassCallback {
    Arc::new(move |prompt: String| {
        let server = Arc::clone(&server);
        let dispatcher = dispatcher.clone();
        Box::pin(async move {
            let (respond, answer) = oneshot::channel();
            if dispatcher.send(OrchestratorMessage::SshPrompt { server, prompt, respond }).is_err() {
                return None;
            }
            match answer.await {
                Ok(PromptAnswer::Text(text)) => Some(text),
                Ok(PromptAnswer::Accept) => Some("yes".to_owned()),
                Ok(PromptAnswer::Reject) => Some("no".to_owned()),
                Ok(PromptAnswer::Cancelled) | Err(_) => None,
            }
        })
    })
}

/// Launch the tunnel (if configured) and the agent connection, retrying
/// the dial with exponential backoff; reports exactly one `Connected` or
/// `ConnectFailed` message, then terminates (spec.md §5 "short-lived
/// detached tasks").
async fn connect_flow(
    server: Arc<str>,
    config: ServerConfig,
    dispatcher: mpsc::UnboundedSender<OrchestratorMessage>,
    cancel: CancellationToken,
) {
    let tunnel = if let Some(ref host) = config.host {
        let askpass = make_askpass(Arc::clone(&server), dispatcher.clone());
        let opts = TunnelOptions { port: config.port, identity_file: config.identity_file.clone(), forward_cmd: None };
        match TunnelManager::new(host, &config.socket_path, askpass, opts).await {
            Ok(tunnel) => Some(Arc::new(tunnel)),
            Err(e) => {
                let _ = dispatcher.send(OrchestratorMessage::ConnectFailed { server, error: e.to_string() });
                return;
            }
        }
    } else {
        None
    };

    let dial_path: std::path::PathBuf = match &tunnel {
        Some(tunnel) => tunnel.local_socket().to_path_buf(),
        None => std::path::PathBuf::from(&config.socket_path),
    };

    let mut attempt = 0u32;
    let stream = loop {
        if cancel.is_cancelled() {
            if let Some(tunnel) = tunnel {
                tunnel.close().await;
            }
            return;
        }
        match UnixStream::connect(&dial_path).await {
            Ok(stream) => break stream,
            Err(e) => {
                attempt += 1;
                if attempt >= CONNECT_ATTEMPTS {
                    if let Some(tunnel) = tunnel {
                        tunnel.close().await;
                    }
                    let _ = dispatcher.send(OrchestratorMessage::ConnectFailed { server, error: e.to_string() });
                    return;
                }
                let delay = CONNECT_BASE_BACKOFF * 2u32.pow(attempt - 1);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        if let Some(tunnel) = tunnel {
                            tunnel.close().await;
                        }
                        return;
                    }
                }
            }
        }
    };

    let transport = Arc::new(AgentTransport::new(stream, Arc::clone(&server)));
    transport.bind(dispatcher.clone());
    let _ = dispatcher.send(OrchestratorMessage::Connected { server, transport, tunnel });
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
