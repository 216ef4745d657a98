// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session ring buffers for host and container CPU/memory, and the
//! rules combining live streaming pushes with backfill responses
//! (spec.md §4.5).

use std::collections::{HashMap, HashSet};

use crate::protocol::{ContainerSample, MetricsBackfillResponse, MetricsUpdate};
use crate::ring::{replace_with, RingBuffer, HISTORY_CAPACITY};

/// Host + per-container time series for one session.
#[derive(Debug)]
pub struct TimeSeries {
    host_cpu: RingBuffer<f64>,
    host_mem_percent: RingBuffer<f64>,
    host_mem_used_percent: RingBuffer<f64>,
    container_cpu: HashMap<String, RingBuffer<f64>>,
    container_mem: HashMap<String, RingBuffer<f64>>,
    /// Latest sample per container id, used to resolve buffer transfer on
    /// redeploy — the previous identity, not the container-info registry.
    live_containers: HashMap<String, ContainerSample>,
}

impl Default for TimeSeries {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSeries {
    pub fn new() -> Self {
        Self {
            host_cpu: RingBuffer::new(HISTORY_CAPACITY),
            host_mem_percent: RingBuffer::new(HISTORY_CAPACITY),
            host_mem_used_percent: RingBuffer::new(HISTORY_CAPACITY),
            container_cpu: HashMap::new(),
            container_mem: HashMap::new(),
            live_containers: HashMap::new(),
        }
    }

    pub fn host_cpu(&self) -> &RingBuffer<f64> {
        &self.host_cpu
    }

    pub fn host_mem_percent(&self) -> &RingBuffer<f64> {
        &self.host_mem_percent
    }

    pub fn host_mem_used_percent(&self) -> &RingBuffer<f64> {
        &self.host_mem_used_percent
    }

    pub fn container_cpu(&self, id: &str) -> Option<&RingBuffer<f64>> {
        self.container_cpu.get(id)
    }

    pub fn container_mem(&self, id: &str) -> Option<&RingBuffer<f64>> {
        self.container_mem.get(id)
    }

    pub fn container_ids(&self) -> impl Iterator<Item = &str> {
        self.live_containers.keys().map(String::as_str)
    }

    /// Apply one streaming metrics-update (spec.md §4.5 steps 1-5).
    ///
    /// `protect_id`, when set, is spared from the trailing garbage-collect
    /// even if absent from this update — used when a detail-view backfill
    /// for that container is still in flight (§8 "Stale container cleanup").
    pub fn push_update(&mut self, update: &MetricsUpdate, protect_id: Option<&str>) {
        if let Some(host) = &update.host {
            self.host_cpu.push(host.cpu_percent);
            self.host_mem_percent.push(host.mem_percent);
            // Pushed unconditionally, even at zero, to stay lockstep with
            // host_cpu/host_mem_percent.
            self.host_mem_used_percent.push(host.mem_used_percent);
        }

        let mut identity_index: HashMap<(&str, &str), &str> = HashMap::new();
        for (id, sample) in &self.live_containers {
            if let Some(identity) = sample.service_identity() {
                identity_index.insert(identity, id.as_str());
            }
        }

        for sample in &update.containers {
            let target_id = match sample.service_identity() {
                Some(identity) => {
                    let old_id = identity_index.get(&identity).map(|s| s.to_string());
                    if let Some(old_id) = old_id {
                        if old_id != sample.id {
                            if let Some(buf) = self.container_cpu.remove(&old_id) {
                                self.container_cpu.insert(sample.id.clone(), buf);
                            }
                            if let Some(buf) = self.container_mem.remove(&old_id) {
                                self.container_mem.insert(sample.id.clone(), buf);
                            }
                        }
                    }
                    sample.id.clone()
                }
                None => sample.id.clone(),
            };

            self.container_cpu
                .entry(target_id.clone())
                .or_insert_with(|| RingBuffer::new(HISTORY_CAPACITY))
                .push(sample.cpu_percent);
            self.container_mem
                .entry(target_id)
                .or_insert_with(|| RingBuffer::new(HISTORY_CAPACITY))
                .push(sample.mem_percent);
        }

        self.live_containers =
            update.containers.iter().map(|s| (s.id.clone(), s.clone())).collect();

        let keep: HashSet<&str> = self.live_containers.keys().map(String::as_str).collect();
        self.container_cpu.retain(|id, _| keep.contains(id.as_str()) || protect_id == Some(id.as_str()));
        self.container_mem.retain(|id, _| keep.contains(id.as_str()) || protect_id == Some(id.as_str()));
    }

    /// Live backfill (`points == 0`): push into existing buffers, no
    /// replacement. `resolve` maps a series' `(project, service)` to its
    /// current container id via the session's container-info list.
    pub fn apply_live_backfill(
        &mut self,
        resp: &MetricsBackfillResponse,
        resolve: impl Fn(&str, &str) -> Option<String>,
    ) {
        for point in &resp.host {
            self.host_cpu.push(point.cpu_percent);
            self.host_mem_percent.push(point.mem_percent);
            self.host_mem_used_percent.push(point.mem_used_percent);
        }
        for series in &resp.containers {
            let Some(id) = resolve(&series.project, &series.service) else { continue };
            let cpu = self.container_cpu.entry(id.clone()).or_insert_with(|| RingBuffer::new(HISTORY_CAPACITY));
            for v in &series.cpu_percent {
                cpu.push(*v);
            }
            let mem = self.container_mem.entry(id).or_insert_with(|| RingBuffer::new(HISTORY_CAPACITY));
            for v in &series.mem_percent {
                mem.push(*v);
            }
        }
    }

    /// Historical backfill (`points > 0`): atomically replace the host
    /// buffers and every resolvable container series. `protect_id` (the
    /// detail-view container with its own backfill in flight) is carried
    /// over untouched rather than replaced or dropped.
    pub fn apply_historical_backfill(
        &mut self,
        resp: &MetricsBackfillResponse,
        resolve: impl Fn(&str, &str) -> Option<String>,
        protect_id: Option<&str>,
    ) {
        self.host_cpu = replace_with(HISTORY_CAPACITY, resp.host.iter().map(|p| p.cpu_percent));
        self.host_mem_percent = replace_with(HISTORY_CAPACITY, resp.host.iter().map(|p| p.mem_percent));
        self.host_mem_used_percent =
            replace_with(HISTORY_CAPACITY, resp.host.iter().map(|p| p.mem_used_percent));

        let mut new_cpu = HashMap::new();
        let mut new_mem = HashMap::new();
        if let Some(pid) = protect_id {
            if let Some(buf) = self.container_cpu.get(pid) {
                new_cpu.insert(pid.to_owned(), buf.clone());
            }
            if let Some(buf) = self.container_mem.get(pid) {
                new_mem.insert(pid.to_owned(), buf.clone());
            }
        }
        for series in &resp.containers {
            let Some(id) = resolve(&series.project, &series.service) else { continue };
            if Some(id.as_str()) == protect_id {
                continue;
            }
            new_cpu.insert(id.clone(), replace_with(HISTORY_CAPACITY, series.cpu_percent.iter().copied()));
            new_mem.insert(id, replace_with(HISTORY_CAPACITY, series.mem_percent.iter().copied()));
        }
        self.container_cpu = new_cpu;
        self.container_mem = new_mem;
    }
}

#[cfg(test)]
#[path = "timeseries_tests.rs"]
mod tests;
