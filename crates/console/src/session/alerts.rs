// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live and historical alert state for one session (spec.md §4.6).

use std::collections::HashMap;

use crate::protocol::AlertEventMsg;

/// Live alert map size cap; past this, the entry with the smallest
/// `fired_at` is evicted (tie-break: smallest id — spec.md §9).
pub const ALERT_CAP: usize = 1000;

#[derive(Debug, Clone)]
struct AlertEntry {
    event: AlertEventMsg,
    /// Optimistic local ack flag; corrected by the next streaming event.
    acked: bool,
}

#[derive(Debug, Default)]
pub struct AlertState {
    live: HashMap<i64, AlertEntry>,
    resolved: Vec<AlertEventMsg>,
}

impl AlertState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    pub fn is_acked(&self, id: i64) -> bool {
        self.live.get(&id).map(|e| e.acked).unwrap_or(false)
    }

    pub fn live_events(&self) -> impl Iterator<Item = &AlertEventMsg> {
        self.live.values().map(|e| &e.event)
    }

    pub fn resolved_events(&self) -> &[AlertEventMsg] {
        &self.resolved
    }

    /// Apply one streaming alert-event. A resolved state removes the id
    /// (idempotent); otherwise insert/replace, evicting past the cap.
    pub fn on_event(&mut self, event: AlertEventMsg) {
        if event.state == "resolved" {
            self.live.remove(&event.alert_id);
            return;
        }
        let acked = self.is_acked(event.alert_id);
        self.live.insert(event.alert_id, AlertEntry { event, acked });

        while self.live.len() > ALERT_CAP {
            let evict = self
                .live
                .iter()
                .min_by_key(|(&id, entry)| (entry.event.fired_at, id))
                .map(|(&id, _)| id);
            if let Some(id) = evict {
                self.live.remove(&id);
            } else {
                break;
            }
        }
    }

    /// Optimistic local flip; no rollback on failure (the next streaming
    /// event corrects the state).
    pub fn ack_optimistic(&mut self, id: i64) {
        if let Some(entry) = self.live.get_mut(&id) {
            entry.acked = true;
        }
    }

    /// Apply a historical-alerts query response, filtering out ids already
    /// present in the live map to avoid duplicates in the history view.
    pub fn apply_resolved_query(&mut self, entries: Vec<AlertEventMsg>) {
        self.resolved = entries.into_iter().filter(|e| !self.live.contains_key(&e.alert_id)).collect();
    }
}

#[cfg(test)]
#[path = "alerts_tests.rs"]
mod tests;
