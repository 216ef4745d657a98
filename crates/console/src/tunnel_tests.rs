use super::*;
use std::os::unix::fs::PermissionsExt;

fn noop_askpass() -> AskpassCallback {
    Arc::new(|_prompt| Box::pin(async { None }))
}

fn write_script(contents: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fake_forward.sh");
    std::fs::write(&path, contents).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    dir
}

#[test]
fn classify_prompt_detects_host_key_prompts() {
    assert_eq!(
        classify_prompt("The authenticity of host 'x' can't be established."),
        PromptKind::HostKey
    );
    assert_eq!(classify_prompt("Are you sure you want to continue connecting (yes/no)?"), PromptKind::HostKey);
    assert_eq!(classify_prompt("ED25519 key fingerprint is SHA256:abc"), PromptKind::HostKey);
}

#[test]
fn classify_prompt_defaults_to_password() {
    assert_eq!(classify_prompt("Enter passphrase for key '/home/u/.ssh/id_ed25519': "), PromptKind::Password);
    assert_eq!(classify_prompt("user@host's password: "), PromptKind::Password);
}

#[tokio::test]
async fn rejects_host_beginning_with_dash() {
    let result =
        TunnelManager::new("-oProxyCommand=evil", "/remote.sock", noop_askpass(), TunnelOptions::default())
            .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn rejects_identity_file_beginning_with_dash() {
    let opts = TunnelOptions { identity_file: Some("-oProxyCommand=evil".to_owned()), ..Default::default() };
    let result = TunnelManager::new("host", "/remote.sock", noop_askpass(), opts).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn local_socket_becomes_ready() {
    let dir = write_script(
        "#!/bin/sh\n\
         for arg in \"$@\"; do\n\
           case \"$arg\" in\n\
             *:*) spec=\"$arg\" ;;\n\
           esac\n\
         done\n\
         local=$(echo \"$spec\" | cut -d: -f1)\n\
         touch \"$local\"\n\
         sleep 5\n",
    );
    let script = dir.path().join("fake_forward.sh").to_string_lossy().into_owned();
    let opts = TunnelOptions { forward_cmd: Some(script), ..Default::default() };

    let tunnel = TunnelManager::new("host", "/remote.sock", noop_askpass(), opts).await.unwrap();
    assert!(tunnel.local_socket().exists());
    tunnel.close().await;
}

#[tokio::test]
async fn surfaces_stderr_when_subprocess_exits_early() {
    let dir = write_script("#!/bin/sh\necho 'boom' >&2\nexit 1\n");
    let script = dir.path().join("fake_forward.sh").to_string_lossy().into_owned();
    let opts = TunnelOptions { forward_cmd: Some(script), ..Default::default() };

    let result = TunnelManager::new("host", "/remote.sock", noop_askpass(), opts).await;
    let err = result.unwrap_err();
    assert!(err.to_string().contains("boom"), "error was: {err}");
}

#[tokio::test]
async fn close_is_idempotent() {
    let dir = write_script(
        "#!/bin/sh\n\
         for arg in \"$@\"; do\n\
           case \"$arg\" in\n\
             *:*) spec=\"$arg\" ;;\n\
           esac\n\
         done\n\
         local=$(echo \"$spec\" | cut -d: -f1)\n\
         touch \"$local\"\n\
         sleep 5\n",
    );
    let script = dir.path().join("fake_forward.sh").to_string_lossy().into_owned();
    let opts = TunnelOptions { forward_cmd: Some(script), ..Default::default() };

    let tunnel = TunnelManager::new("host", "/remote.sock", noop_askpass(), opts).await.unwrap();
    tunnel.close().await;
    tunnel.close().await; // second call is a no-op, not a panic
}
