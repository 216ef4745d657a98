// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Detail-view state: the drill-down into one container or one compose
//! project (spec.md §4.7).

use crate::protocol::LogEntryMsg;
use crate::protocol::LogsBackfillResponse;
use crate::ring::{replace_with, RingBuffer, LOG_CAPACITY};

/// What a detail view is bound to — never both at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailTarget {
    Container(String),
    Project { project: String, ids: Vec<String> },
}

impl DetailTarget {
    pub fn matches(&self, container_id: &str) -> bool {
        match self {
            DetailTarget::Container(id) => id == container_id,
            DetailTarget::Project { ids, .. } => ids.iter().any(|id| id == container_id),
        }
    }
}

/// Active log filters. Any field set suppresses streaming and re-queries
/// the server instead (spec.md §4.7).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogFilters {
    pub level: Option<String>,
    pub search: Option<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl LogFilters {
    pub fn is_active(&self) -> bool {
        self.level.is_some() || self.search.is_some() || self.start.is_some() || self.end.is_some()
    }
}

#[derive(Debug, Default)]
pub struct DetailState {
    target: Option<DetailTarget>,
    /// `(project, service)` captured on entry; empty project marks a
    /// standalone container, with `service` holding its name instead.
    service_identity: Option<(String, String)>,
    logs: RingBuffer<LogEntryMsg>,
    metrics_backfill_pending: bool,
    logs_backfill_pending: bool,
    /// Generation the logs backfill was last successfully applied for —
    /// guards against a duplicate response re-applying (spec.md §8).
    logs_applied_gen: Option<u64>,
    filters: LogFilters,
    last_entry: Option<(String, String)>,
}

impl DetailState {
    pub fn new() -> Self {
        Self { logs: RingBuffer::new(LOG_CAPACITY), ..Default::default() }
    }

    pub fn target(&self) -> Option<&DetailTarget> {
        self.target.as_ref()
    }

    pub fn service_identity(&self) -> Option<&(String, String)> {
        self.service_identity.as_ref()
    }

    pub fn metrics_backfill_pending(&self) -> bool {
        self.metrics_backfill_pending
    }

    pub fn logs_backfill_pending(&self) -> bool {
        self.logs_backfill_pending
    }

    pub fn filters(&self) -> &LogFilters {
        &self.filters
    }

    pub fn logs(&self) -> Vec<LogEntryMsg> {
        self.logs.data()
    }

    /// Enter a detail view. Same target: no-op (spec.md §4.7). Different
    /// target: full reset — new empty buffers, backfill flags cleared.
    pub fn enter(&mut self, target: DetailTarget, service_identity: Option<(String, String)>) {
        if self.target.as_ref() == Some(&target) {
            return;
        }
        self.target = Some(target);
        self.service_identity = service_identity;
        self.logs = RingBuffer::new(LOG_CAPACITY);
        self.metrics_backfill_pending = false;
        self.logs_backfill_pending = false;
        self.logs_applied_gen = None;
        self.last_entry = None;
        self.filters = LogFilters::default();
    }

    pub fn reset(&mut self) {
        self.target = None;
        self.service_identity = None;
        self.logs = RingBuffer::new(LOG_CAPACITY);
        self.metrics_backfill_pending = false;
        self.logs_backfill_pending = false;
        self.logs_applied_gen = None;
        self.last_entry = None;
        self.filters = LogFilters::default();
    }

    pub fn set_filters(&mut self, filters: LogFilters) {
        self.filters = filters;
    }

    pub fn mark_metrics_backfill_pending(&mut self) {
        self.metrics_backfill_pending = true;
    }

    pub fn mark_logs_backfill_pending(&mut self) {
        self.logs_backfill_pending = true;
    }

    pub fn clear_metrics_backfill_pending(&mut self) {
        self.metrics_backfill_pending = false;
    }

    /// Swap the bound container id on an auto-switch redeploy (spec.md
    /// §4.9). No-op if the target isn't single-container.
    pub fn switch_container(&mut self, new_id: String) {
        if let Some(DetailTarget::Container(id)) = &mut self.target {
            *id = new_id;
        }
        self.metrics_backfill_pending = false;
        self.logs_backfill_pending = false;
    }

    /// Push one streamed log entry, suppressed while filters are active.
    pub fn push_streamed(&mut self, entry: LogEntryMsg) -> bool {
        if self.filters.is_active() {
            return false;
        }
        if let Some((name, id)) = &self.last_entry {
            if name == &entry.container_name && id != &entry.container_id {
                self.logs.push(deploy_separator(entry.container_name.clone(), entry.ts));
            }
        }
        self.last_entry = Some((entry.container_name.clone(), entry.container_id.clone()));
        self.logs.push(entry);
        true
    }

    /// Prepend history ahead of the oldest streamed entry. Returns `false`
    /// (no-op) on a stale or duplicate generation.
    pub fn apply_logs_backfill(&mut self, resp: LogsBackfillResponse, current_gen: u64) -> bool {
        if resp.gen != current_gen || self.logs_applied_gen == Some(resp.gen) {
            return false;
        }

        let oldest_ts = self.logs.data().first().map(|e| e.ts);
        let mut prepend: Vec<LogEntryMsg> = match oldest_ts {
            Some(ts) => resp.entries.into_iter().filter(|e| e.ts < ts).collect(),
            None => resp.entries,
        };
        prepend.sort_by_key(|e| e.ts);

        let mut combined = prepend;
        combined.extend(self.logs.data());
        self.logs = replace_with(LOG_CAPACITY, inject_deploy_separators(combined));

        self.logs_applied_gen = Some(resp.gen);
        self.logs_backfill_pending = false;
        true
    }
}

fn deploy_separator(container_name: String, ts: i64) -> LogEntryMsg {
    LogEntryMsg {
        container_id: String::new(),
        container_name,
        ts,
        level: "event".to_owned(),
        message: "container redeployed".to_owned(),
    }
}

/// Insert a synthetic separator wherever consecutive entries share a
/// container name but not a container id (spec.md §4.7).
fn inject_deploy_separators(entries: Vec<LogEntryMsg>) -> Vec<LogEntryMsg> {
    let mut out = Vec::with_capacity(entries.len());
    let mut last: Option<(String, String)> = None;
    for entry in entries {
        if let Some((name, id)) = &last {
            if name == &entry.container_name && id != &entry.container_id {
                out.push(deploy_separator(entry.container_name.clone(), entry.ts));
            }
        }
        last = Some((entry.container_name.clone(), entry.container_id.clone()));
        out.push(entry);
    }
    out
}

#[cfg(test)]
#[path = "detail_tests.rs"]
mod tests;
