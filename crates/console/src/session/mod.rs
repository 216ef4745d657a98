// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One server's client state: transport, tunnel, time series, alerts, and
//! detail view (spec.md §3 "Session", §4.5-§4.7).

pub mod alerts;
pub mod detail;
pub mod timeseries;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::UnixStream;

use crate::event::BackfillScope;
use crate::protocol::{
    ContainerEventMsg, ContainerInfoWire, HostSample, LogEntryMsg, LogsBackfillResponse,
    MetricsBackfillResponse, MetricsUpdate,
};
use crate::rate::{ContainerRates, HostRates, RateCalculator};
use crate::transport::TransportClient;
use crate::tunnel::TunnelManager;

pub use alerts::AlertState;
pub use detail::{DetailState, DetailTarget, LogFilters};
pub use timeseries::TimeSeries;

/// Transport flavor used by every real session; the generic [`TransportClient`]
/// is exercised directly against `tokio::io::DuplexStream` in its own tests.
pub type AgentTransport = TransportClient<UnixStream>;

/// Connection lifecycle for one session. Transitions are monotonic within
/// an attempt: `None -> Connecting -> (SshPrompting <-> Connecting) ->
/// Ready | Error`. `Error` is terminal; re-entry to `None` requires an
/// explicit reconnect (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    None,
    Connecting,
    SshPrompting,
    Ready,
    Error(String),
}

/// One container's identity and tracking state, as reported by the agent's
/// container list (spec.md §3).
#[derive(Debug, Clone, Default)]
pub struct ContainerInfo {
    pub id: String,
    pub project: String,
    pub service: String,
    pub name: String,
    pub tracked: bool,
    pub state: String,
}

impl From<ContainerInfoWire> for ContainerInfo {
    fn from(w: ContainerInfoWire) -> Self {
        Self { id: w.id, project: w.project, service: w.service, name: w.name, tracked: w.tracked, state: w.state }
    }
}

/// Sole source of truth for mapping `(project, service)` (or a standalone
/// name) to the current container id (spec.md §3 "Identity mapping seed").
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    by_id: HashMap<String, ContainerInfo>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_all(&mut self, infos: Vec<ContainerInfoWire>) {
        self.by_id = infos.into_iter().map(|w| (w.id.clone(), ContainerInfo::from(w))).collect();
    }

    pub fn upsert(&mut self, info: ContainerInfo) {
        self.by_id.insert(info.id.clone(), info);
    }

    pub fn get(&self, id: &str) -> Option<&ContainerInfo> {
        self.by_id.get(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &ContainerInfo> {
        self.by_id.values()
    }

    /// Resolve a backfill series' `(project, service)` to a current
    /// container id. Orchestrated containers match by `(project, service)`;
    /// standalone containers (empty project) match by name, which the
    /// agent encodes in the `service` field for that case.
    pub fn resolve(&self, project: &str, service: &str) -> Option<String> {
        if service.is_empty() {
            return None;
        }
        if project.is_empty() {
            self.by_id.values().find(|c| c.service.is_empty() && c.name == service).map(|c| c.id.clone())
        } else {
            self.by_id.values().find(|c| c.project == project && c.service == service).map(|c| c.id.clone())
        }
    }
}

/// All per-server client state owned by the orchestrator.
pub struct Session {
    name: Arc<str>,
    connection: ConnectionState,
    transport: Option<Arc<AgentTransport>>,
    tunnel: Option<Arc<TunnelManager>>,
    containers: ContainerRegistry,
    timeseries: TimeSeries,
    rates: RateCalculator,
    live_host: Option<HostSample>,
    live_host_rates: HostRates,
    live_container_rates: HashMap<String, ContainerRates>,
    alerts: AlertState,
    detail: DetailState,
    metrics_gen: u64,
    backfill_pending: bool,
    window_secs: i64,
}

/// Index into [`crate::config::WINDOW_LADDER_SECS`] new sessions start at.
const DEFAULT_WINDOW_INDEX: usize = 3;

impl Session {
    pub fn new(name: impl Into<Arc<str>>, window_secs: i64) -> Self {
        Self {
            name: name.into(),
            connection: ConnectionState::None,
            transport: None,
            tunnel: None,
            containers: ContainerRegistry::new(),
            timeseries: TimeSeries::new(),
            rates: RateCalculator::new(),
            live_host: None,
            live_host_rates: HostRates::default(),
            live_container_rates: HashMap::new(),
            alerts: AlertState::new(),
            detail: DetailState::new(),
            metrics_gen: 0,
            backfill_pending: false,
            window_secs,
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn set_connection(&mut self, state: ConnectionState) {
        self.connection = state;
    }

    pub fn transport(&self) -> Option<&Arc<AgentTransport>> {
        self.transport.as_ref()
    }

    pub fn set_transport(&mut self, transport: Arc<AgentTransport>) {
        self.transport = Some(transport);
    }

    pub fn tunnel(&self) -> Option<&Arc<TunnelManager>> {
        self.tunnel.as_ref()
    }

    pub fn set_tunnel(&mut self, tunnel: Arc<TunnelManager>) {
        self.tunnel = Some(tunnel);
    }

    pub fn containers(&self) -> &ContainerRegistry {
        &self.containers
    }

    pub fn containers_mut(&mut self) -> &mut ContainerRegistry {
        &mut self.containers
    }

    pub fn timeseries(&self) -> &TimeSeries {
        &self.timeseries
    }

    pub fn alerts(&self) -> &AlertState {
        &self.alerts
    }

    pub fn alerts_mut(&mut self) -> &mut AlertState {
        &mut self.alerts
    }

    pub fn detail(&self) -> &DetailState {
        &self.detail
    }

    pub fn detail_mut(&mut self) -> &mut DetailState {
        &mut self.detail
    }

    pub fn live_host(&self) -> Option<&HostSample> {
        self.live_host.as_ref()
    }

    pub fn live_host_rates(&self) -> HostRates {
        self.live_host_rates
    }

    pub fn live_container_rates(&self, id: &str) -> Option<ContainerRates> {
        self.live_container_rates.get(id).copied()
    }

    pub fn metrics_gen(&self) -> u64 {
        self.metrics_gen
    }

    pub fn backfill_pending(&self) -> bool {
        self.backfill_pending
    }

    pub fn window_secs(&self) -> i64 {
        self.window_secs
    }

    /// Clear transport/tunnel handles and mark the session disconnected.
    /// The caller is responsible for closing the returned tunnel handle
    /// (kept off the main loop per spec.md §5).
    pub fn on_connection_lost(&mut self) -> Option<Arc<TunnelManager>> {
        self.connection = ConnectionState::None;
        self.transport = None;
        self.tunnel.take()
    }

    /// Select the next (`delta > 0`) or previous window from the fixed
    /// ladder (spec.md §4.8 "Zoom"). Returns `false` (no-op) if already at
    /// the ladder's edge. On a real change: fresh empty host buffers, a new
    /// generation, `backfill_pending` set, and — if in detail view — the
    /// detail metrics backfill flag set too, so the caller knows to emit
    /// both backfill requests.
    pub fn zoom(&mut self, delta: i32) -> bool {
        let ladder = crate::config::WINDOW_LADDER_SECS;
        let current_idx = ladder.iter().position(|&s| s == self.window_secs).unwrap_or(DEFAULT_WINDOW_INDEX);
        let new_idx = if delta > 0 {
            (current_idx + 1).min(ladder.len() - 1)
        } else {
            current_idx.saturating_sub(1)
        };
        if new_idx == current_idx {
            return false;
        }
        self.window_secs = ladder[new_idx];
        self.metrics_gen += 1;
        self.backfill_pending = true;
        self.timeseries = TimeSeries::new();
        if self.detail.target().is_some() {
            self.detail.mark_metrics_backfill_pending();
        }
        true
    }

    fn detail_protected_container(&self) -> Option<String> {
        if self.detail.metrics_backfill_pending() {
            if let Some(DetailTarget::Container(id)) = self.detail.target() {
                return Some(id.clone());
            }
        }
        None
    }

    /// Apply one streaming metrics-update: push into time series, recompute
    /// rates, and refresh the live snapshot (spec.md §4.5).
    pub fn apply_metrics_update(&mut self, update: MetricsUpdate) {
        let protect = self.detail_protected_container();
        self.timeseries.push_update(&update, protect.as_deref());

        let net = update.host.as_ref().map(|h| h.net.as_slice()).unwrap_or(&[]);
        let (host_rates, container_rates) = self.rates.update(update.ts, net, &update.containers);
        self.live_host_rates = host_rates;
        self.live_container_rates = container_rates;
        self.live_host = update.host;
    }

    /// Route a metrics backfill response by scope and generation.
    /// Discards on a stale generation, per the debounce invariant
    /// (spec.md §4.5, §8).
    pub fn apply_metrics_backfill(&mut self, scope: BackfillScope, gen: u64, resp: MetricsBackfillResponse) {
        if gen != self.metrics_gen {
            return;
        }
        match scope {
            BackfillScope::GlobalMetrics => {
                let protect = self.detail_protected_container();
                let containers = &self.containers;
                if resp.points == 0 {
                    self.timeseries.apply_live_backfill(&resp, |p, s| containers.resolve(p, s));
                } else {
                    self.timeseries.apply_historical_backfill(&resp, |p, s| containers.resolve(p, s), protect.as_deref());
                }
                self.backfill_pending = false;
            }
            BackfillScope::DetailMetrics => {
                let containers = &self.containers;
                if resp.points == 0 {
                    self.timeseries.apply_live_backfill(&resp, |p, s| containers.resolve(p, s));
                } else {
                    self.timeseries.apply_historical_backfill(&resp, |p, s| containers.resolve(p, s), None);
                }
                self.detail.clear_metrics_backfill_pending();
            }
        }
    }

    pub fn apply_logs_backfill(&mut self, gen: u64, resp: LogsBackfillResponse) -> bool {
        self.detail.apply_logs_backfill(resp, gen)
    }

    pub fn push_streamed_log(&mut self, entry: LogEntryMsg) -> bool {
        self.detail.push_streamed(entry)
    }

    /// Detail-view auto-switch on container redeploy (spec.md §4.9).
    /// Returns `true` if the detail view's bound container id was swapped,
    /// in which case the caller must fire a fresh detail backfill.
    pub fn detail_auto_switch(&mut self, evt: &ContainerEventMsg) -> bool {
        if evt.action != "start" {
            return false;
        }
        let Some(DetailTarget::Container(current_id)) = self.detail.target() else { return false };
        if current_id == &evt.id {
            return false;
        }
        let matches = match self.detail.service_identity() {
            Some((p, s)) if !s.is_empty() => p == &evt.project && s == &evt.service,
            Some((p, s)) if p.is_empty() => evt.project.is_empty() && evt.service.is_empty() && *s == evt.name,
            _ => false,
        };
        if !matches {
            return false;
        }
        self.detail.switch_container(evt.id.clone());
        true
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
