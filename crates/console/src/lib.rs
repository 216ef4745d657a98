// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client core of a terminal-based multi-server observability console:
//! transport, tunnel, session/time-series model, and the event-loop
//! orchestrator. Rendering, layout, and key-binding dispatch are external
//! collaborators this crate does not implement.

pub mod config;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod protocol;
pub mod rate;
pub mod ring;
pub mod session;
pub mod transport;
pub mod tunnel;

use tracing::info;

use crate::config::Config;
use crate::orchestrator::Orchestrator;

/// Load the server list, connect every session, and run the orchestrator's
/// inbox loop until `Ctrl-C` or every session inbox handle is dropped.
///
/// This is a headless driver: it forwards SSH prompts and window-resize
/// events into the returned-and-discarded UI channel, since rendering
/// those is an external collaborator's job. A real frontend would instead
/// hold onto that channel and drive [`Orchestrator::tick`] from its own
/// event loop alongside terminal input.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let servers = config.load_servers()?;
    info!(count = servers.len(), "loaded server list");

    let (mut orchestrator, mut ui_events) = Orchestrator::new(&config, servers);
    orchestrator.connect_all();

    // Drain UI-bound messages so the unbounded channel doesn't grow
    // forever when nothing is attached to render them.
    tokio::spawn(async move { while ui_events.recv().await.is_some() {} });

    loop {
        tokio::select! {
            alive = orchestrator.tick() => {
                if !alive {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                orchestrator.shutdown().await;
                break;
            }
        }
    }

    Ok(())
}
