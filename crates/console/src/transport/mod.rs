// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection message multiplexer: overlays request/response on one
//! duplex byte stream with a streaming channel, tagged by session name
//! (spec.md §4.3).

pub mod pending;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex as SyncMutex;
use tokio::io::{split, AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::debug;

use crate::error::TransportError;
use crate::event::OrchestratorMessage;
use crate::protocol::{self, msg_type, Envelope, StreamingMessage};
use pending::PendingMap;

/// A duplex byte stream usable as transport. Implemented for
/// `tokio::net::UnixStream` and, in tests, `tokio::io::DuplexStream`.
pub trait Duplex: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Duplex for T {}

/// One connection's multiplexer state. Construction wraps an already
/// established stream; the reader task only starts once [`TransportClient::bind`]
/// is called (idempotent — only the first call starts it).
pub struct TransportClient<S: Duplex> {
    session_name: Arc<str>,
    next_id: AtomicU32,
    pending: Arc<PendingMap>,
    write_half: Arc<AsyncMutex<WriteHalf<S>>>,
    read_half: SyncMutex<Option<ReadHalf<S>>>,
    closed: Arc<AtomicBool>,
    bound: AtomicBool,
}

impl<S: Duplex> TransportClient<S> {
    /// Wrap an established stream. The reader task is not started yet.
    pub fn new(stream: S, session_name: impl Into<Arc<str>>) -> Self {
        let (read_half, write_half) = split(stream);
        Self {
            session_name: session_name.into(),
            next_id: AtomicU32::new(1),
            pending: Arc::new(PendingMap::new()),
            write_half: Arc::new(AsyncMutex::new(write_half)),
            read_half: SyncMutex::new(Some(read_half)),
            closed: Arc::new(AtomicBool::new(false)),
            bound: AtomicBool::new(false),
        }
    }

    pub fn session_name(&self) -> &Arc<str> {
        &self.session_name
    }

    /// Start the reader task, dispatching streaming messages into
    /// `dispatcher` tagged with this client's session name. Idempotent:
    /// only the first call does anything.
    pub fn bind(&self, dispatcher: mpsc::UnboundedSender<OrchestratorMessage>) {
        if self.bound.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(read_half) = self.read_half.lock().take() else {
            return;
        };
        let pending = Arc::clone(&self.pending);
        let closed = Arc::clone(&self.closed);
        let session_name = Arc::clone(&self.session_name);
        tokio::spawn(reader_loop(read_half, pending, closed, session_name, dispatcher));
    }

    /// Send a request and await its response within `deadline`.
    ///
    /// Always removes the pending entry on exit (response, deadline, or
    /// connection-closed — whichever completes first).
    pub async fn request(
        &self,
        msg_type: u16,
        body: Bytes,
        deadline: Duration,
    ) -> Result<Bytes, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.pending.insert(id);
        let env = Envelope::new(msg_type, id, body);

        if let Err(e) = self.write_envelope(&env).await {
            self.pending.remove(id);
            debug!(server = %self.session_name, err = %e, "transport write failed");
            return Err(TransportError::ConnectionClosed);
        }

        let outcome = tokio::select! {
            result = rx => result.unwrap_or(Err(TransportError::ConnectionClosed)),
            _ = tokio::time::sleep(deadline) => Err(TransportError::Timeout),
        };
        self.pending.remove(id);
        outcome
    }

    /// Send a fire-and-forget streaming message (subscribe/unsubscribe,
    /// actions with no reply). `id` is always 0.
    pub async fn send_streaming(&self, msg_type: u16, body: Bytes) -> Result<(), TransportError> {
        let env = Envelope::streaming(msg_type, body);
        self.write_envelope(&env).await.map_err(|_| TransportError::ConnectionClosed)
    }

    async fn write_envelope(&self, env: &Envelope) -> std::io::Result<()> {
        let mut guard = self.write_half.lock().await;
        protocol::write_envelope(&mut *guard, env).await
    }

    /// Explicit close: sets the closed flag, shuts the socket down. The
    /// reader drains pending waiters but does NOT emit connection-lost.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut guard = self.write_half.lock().await;
        let _ = tokio::io::AsyncWriteExt::shutdown(&mut *guard).await;
    }
}

async fn reader_loop<S: Duplex>(
    mut read_half: ReadHalf<S>,
    pending: Arc<PendingMap>,
    closed: Arc<AtomicBool>,
    session_name: Arc<str>,
    dispatcher: mpsc::UnboundedSender<OrchestratorMessage>,
) {
    loop {
        let envelope = match protocol::read_envelope(&mut read_half).await {
            Ok(Some(env)) => env,
            Ok(None) | Err(_) => break,
        };

        if envelope.id > 0 {
            let outcome = if envelope.msg_type == msg_type::ERROR {
                let message = String::from_utf8_lossy(&envelope.body).into_owned();
                Err(TransportError::agent(message))
            } else {
                Ok(envelope.body)
            };
            pending.deliver(envelope.id, outcome);
            continue;
        }

        match StreamingMessage::decode(envelope.msg_type, &envelope.body) {
            Some(Ok(message)) => {
                let _ = dispatcher.send(OrchestratorMessage::Streaming {
                    server: Arc::clone(&session_name),
                    message,
                });
            }
            Some(Err(e)) => {
                debug!(server = %session_name, err = %e, "dropping undecodable streaming message");
            }
            None => {
                debug!(server = %session_name, msg_type = envelope.msg_type, "dropping unknown streaming message type");
            }
        }
    }

    pending.drain_closed();
    if !closed.load(Ordering::Acquire) {
        let _ = dispatcher.send(OrchestratorMessage::ConnectionLost {
            server: Arc::clone(&session_name),
        });
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
