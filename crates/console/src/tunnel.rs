// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervises the external forwarding subprocess that tunnels a remote
//! agent's Unix socket to a local one (spec.md §4.4).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Default forwarding binary. Overridable via [`TunnelOptions::forward_cmd`]
/// for testing (spec.md §6 describes the flags as ssh-compatible: `-N -L
/// <local>:<remote> [-p <port>] [-i <ident>] <host>`).
pub const DEFAULT_FORWARD_CMD: &str = "ssh";

/// Optional tunnel parameters.
#[derive(Debug, Clone, Default)]
pub struct TunnelOptions {
    pub port: Option<u16>,
    pub identity_file: Option<String>,
    /// Overrides [`DEFAULT_FORWARD_CMD`] — used by tests to point at a
    /// stand-in script instead of a real `ssh` binary.
    pub forward_cmd: Option<String>,
}

/// Classification of an interactive prompt from the forwarding subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// Host-key confirmation, answered with a single y/n keystroke.
    HostKey,
    /// Password/passphrase prompt.
    Password,
}

/// Classify a prompt string read from the subprocess (spec.md §4.4).
pub fn classify_prompt(prompt: &str) -> PromptKind {
    let lower = prompt.to_lowercase();
    if lower.contains("authenticity") || lower.contains("fingerprint") || lower.contains("yes/no") {
        PromptKind::HostKey
    } else {
        PromptKind::Password
    }
}

/// Reject forward-process argument injection: host/identity fields must not
/// begin with `-` (spec.md §4.4, §6).
fn reject_dash_prefixed(field: &str, value: &str) -> anyhow::Result<()> {
    if value.starts_with('-') {
        bail!("{field} must not begin with '-' (got {value:?})");
    }
    Ok(())
}

/// Callback invoked when the forwarding subprocess needs an interactive
/// answer. Returns `None` if the user cancelled.
pub type AskpassCallback = Arc<
    dyn Fn(String) -> std::pin::Pin<Box<dyn std::future::Future<Output = Option<String>> + Send>>
        + Send
        + Sync,
>;

/// Supervises one forwarding subprocess and its local socket.
pub struct TunnelManager {
    child: Mutex<Option<Child>>,
    local_socket: PathBuf,
    #[allow(dead_code)] // kept alive so the temp dir isn't removed until `close`
    temp_dir: tempfile::TempDir,
}

impl TunnelManager {
    /// Launch the forwarding subprocess and wait for its local socket to
    /// appear (5s deadline). If the subprocess exits first, its stderr is
    /// surfaced.
    pub async fn new(
        host: &str,
        remote_socket_path: &str,
        askpass: AskpassCallback,
        opts: TunnelOptions,
    ) -> anyhow::Result<Self> {
        reject_dash_prefixed("host", host)?;
        if let Some(ref identity) = opts.identity_file {
            reject_dash_prefixed("identity_file", identity)?;
        }

        let temp_dir = tempfile::tempdir().context("creating tunnel temp dir")?;
        let local_socket = temp_dir.path().join("agent.sock");

        let forward_cmd = opts.forward_cmd.as_deref().unwrap_or(DEFAULT_FORWARD_CMD);
        let mut cmd = Command::new(forward_cmd);
        cmd.arg("-N")
            .arg("-L")
            .arg(format!("{}:{}", local_socket.display(), remote_socket_path));
        if let Some(port) = opts.port {
            cmd.arg("-p").arg(port.to_string());
        }
        if let Some(ref identity) = opts.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(host);
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd.spawn().with_context(|| format!("launching {forward_cmd}"))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        if let (Some(stdin), Some(stdout)) = (stdin, stdout) {
            tokio::spawn(prompt_loop(stdin, stdout, askpass));
        }

        let stderr_capture = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = stderr {
            let capture = Arc::clone(&stderr_capture);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    capture.lock().await.push_str(&line);
                    capture.lock().await.push('\n');
                }
            });
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if local_socket.exists() {
                break;
            }
            if let Ok(Some(status)) = child.try_wait() {
                let captured = stderr_capture.lock().await.clone();
                bail!("{forward_cmd} exited before socket appeared (status {status}): {captured}");
            }
            if tokio::time::Instant::now() >= deadline {
                let _ = child.start_kill();
                bail!("timed out waiting for local socket {}", local_socket.display());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        Ok(Self { child: Mutex::new(Some(child)), local_socket, temp_dir })
    }

    /// The local Unix-domain socket path, ready to dial, once construction
    /// succeeds.
    pub fn local_socket(&self) -> &Path {
        &self.local_socket
    }

    /// Send interrupt, wait up to 3s, then kill. Idempotent and safe even
    /// if the subprocess was never started or already reaped.
    pub async fn close(&self) {
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else { return };

        if let Some(pid) = child.id() {
            // Best-effort graceful stop; a missed SIGINT just falls through
            // to the hard kill below.
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGINT);
        }

        let waited = tokio::time::timeout(Duration::from_secs(3), child.wait()).await;
        if waited.is_err() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

async fn prompt_loop(
    mut stdin: tokio::process::ChildStdin,
    stdout: tokio::process::ChildStdout,
    askpass: AskpassCallback,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !looks_like_prompt(&line) {
                    continue;
                }
                debug!(prompt = %line, kind = ?classify_prompt(&line), "tunnel askpass prompt");
                match askpass(line).await {
                    Some(answer) => {
                        if stdin.write_all(answer.as_bytes()).await.is_err() {
                            break;
                        }
                        if stdin.write_all(b"\n").await.is_err() {
                            break;
                        }
                    }
                    None => break, // user cancelled
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(err = %e, "tunnel stdout read error");
                break;
            }
        }
    }
}

/// Heuristic: does this line from the forwarding subprocess look like an
/// interactive prompt rather than ordinary status chatter?
fn looks_like_prompt(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("password")
        || lower.contains("passphrase")
        || lower.contains("authenticity")
        || lower.contains("fingerprint")
        || lower.contains("yes/no")
}

#[cfg(test)]
#[path = "tunnel_tests.rs"]
mod tests;
