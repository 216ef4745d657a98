// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-interface and per-container cumulative-counter to rate conversion
//! (spec.md §4.2).

use std::collections::HashMap;

use crate::protocol::{ContainerSample, InterfaceSample};

#[derive(Debug, Clone, Copy)]
struct PrevInterface {
    rx_bytes: u64,
    tx_bytes: u64,
    ts: i64,
}

#[derive(Debug, Clone, Copy)]
struct PrevContainer {
    net_rx: u64,
    net_tx: u64,
    block_read: u64,
    block_write: u64,
    ts: i64,
}

/// Host-level rates summed across all interfaces present in one update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostRates {
    pub rx_bytes_per_sec: f64,
    pub tx_bytes_per_sec: f64,
}

/// Per-container rates for one update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContainerRates {
    pub net_rx_per_sec: f64,
    pub net_tx_per_sec: f64,
    pub block_read_per_sec: f64,
    pub block_write_per_sec: f64,
}

/// Tracks previous samples so repeated `update` calls can derive rates from
/// successive cumulative counters.
#[derive(Debug, Default)]
pub struct RateCalculator {
    prev_interfaces: HashMap<String, PrevInterface>,
    prev_containers: HashMap<String, PrevContainer>,
}

/// Rate of change of a monotonic counter, treating a decrease as a reset
/// (contributes zero rather than going negative).
fn counter_rate(prev: u64, new: u64, dt: f64) -> f64 {
    if dt <= 0.0 {
        return 0.0;
    }
    if new < prev {
        return 0.0;
    }
    (new - prev) as f64 / dt
}

impl RateCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the calculator with one sample set. Evicts any
    /// interface/container absent from this update so disappearing
    /// containers don't leak state.
    pub fn update(
        &mut self,
        ts: i64,
        net: &[InterfaceSample],
        containers: &[ContainerSample],
    ) -> (HostRates, HashMap<String, ContainerRates>) {
        let mut host = HostRates::default();
        for sample in net {
            if let Some(prev) = self.prev_interfaces.get(&sample.name) {
                let dt = (ts - prev.ts) as f64;
                host.rx_bytes_per_sec += counter_rate(prev.rx_bytes, sample.rx_bytes, dt);
                host.tx_bytes_per_sec += counter_rate(prev.tx_bytes, sample.tx_bytes, dt);
            }
            self.prev_interfaces.insert(
                sample.name.clone(),
                PrevInterface { rx_bytes: sample.rx_bytes, tx_bytes: sample.tx_bytes, ts },
            );
        }
        let present: std::collections::HashSet<&str> =
            net.iter().map(|s| s.name.as_str()).collect();
        self.prev_interfaces.retain(|name, _| present.contains(name.as_str()));

        let mut container_rates = HashMap::with_capacity(containers.len());
        for sample in containers {
            let rates = if let Some(prev) = self.prev_containers.get(&sample.id) {
                let dt = (ts - prev.ts) as f64;
                ContainerRates {
                    net_rx_per_sec: counter_rate(prev.net_rx, sample.net_rx, dt),
                    net_tx_per_sec: counter_rate(prev.net_tx, sample.net_tx, dt),
                    block_read_per_sec: counter_rate(prev.block_read, sample.block_read, dt),
                    block_write_per_sec: counter_rate(prev.block_write, sample.block_write, dt),
                }
            } else {
                ContainerRates::default()
            };
            container_rates.insert(sample.id.clone(), rates);
            self.prev_containers.insert(
                sample.id.clone(),
                PrevContainer {
                    net_rx: sample.net_rx,
                    net_tx: sample.net_tx,
                    block_read: sample.block_read,
                    block_write: sample.block_write,
                    ts,
                },
            );
        }
        let present: std::collections::HashSet<&str> =
            containers.iter().map(|c| c.id.as_str()).collect();
        self.prev_containers.retain(|id, _| present.contains(id.as_str()));

        (host, container_rates)
    }
}

#[cfg(test)]
#[path = "rate_tests.rs"]
mod tests;
