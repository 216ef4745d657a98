// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport-level error taxonomy shared across the request path and the
//! streaming reader.

use std::fmt;

/// Agent error messages are truncated to this many characters before being
/// surfaced to the requester (spec.md §4.3).
pub const AGENT_MESSAGE_MAX_LEN: usize = 256;

/// Failure modes a transport-client caller can observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection was closed (explicitly or by a read failure) while a
    /// request was pending.
    ConnectionClosed,
    /// The caller's deadline elapsed before a response arrived.
    Timeout,
    /// A streaming or response envelope's body failed to decode.
    Decode(String),
    /// The agent replied with a generic error envelope.
    Agent(String),
}

impl TransportError {
    /// Build an [`TransportError::Agent`], truncating the message per
    /// spec.md §4.3.
    pub fn agent(message: impl AsRef<str>) -> Self {
        let message = message.as_ref();
        let truncated: String = message.chars().take(AGENT_MESSAGE_MAX_LEN).collect();
        Self::Agent(truncated)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::Timeout => write!(f, "request timed out"),
            Self::Decode(detail) => write!(f, "decode error: {detail}"),
            Self::Agent(message) => write!(f, "agent error: {message}"),
        }
    }
}

impl std::error::Error for TransportError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
