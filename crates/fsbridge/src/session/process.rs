//! Spawning the helper and waiting for it to become ready.

use std::io::Read;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use crate::config::HelperConfig;
use crate::error::{BridgeError, Result};
use crate::identity::UnixIdentity;

/// Random bytes per boundary token, before hex encoding.
const TOKEN_BYTES: usize = 16;

/// The two boundary tokens of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryPair {
    /// Terminates requests written to the helper.
    pub client: String,
    /// Terminates everything the helper writes back.
    pub server: String,
}

impl BoundaryPair {
    pub fn generate() -> Self {
        let client = random_token();
        let mut server = random_token();
        while server == client {
            server = random_token();
        }
        Self { client, server }
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// A freshly spawned helper with all three pipes.
pub(crate) struct SpawnedHelper {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Start the helper as `<program> <args..> <client> <server> <uid> <gid>`.
pub(crate) fn spawn_helper(
    config: &HelperConfig,
    boundaries: &BoundaryPair,
    identity: &UnixIdentity,
) -> Result<SpawnedHelper> {
    debug!(
        "Spawning {} for {} (uid {}, gid {})",
        config.program, identity.cloud_user, identity.uid, identity.gid
    );

    let mut child = Command::new(&config.program)
        .args(&config.args)
        .arg(&boundaries.client)
        .arg(&boundaries.server)
        .arg(identity.uid.to_string())
        .arg(identity.gid.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| BridgeError::Spawn {
            program: config.program.clone(),
            source,
        })?;

    let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
    let (Some(stdin), Some(stdout), Some(stderr)) = pipes else {
        terminate(&mut child);
        return Err(BridgeError::NotReady("helper pipes unavailable".to_string()));
    };

    Ok(SpawnedHelper {
        child,
        stdin,
        stdout,
        stderr,
    })
}

/// Wait until the helper writes the server boundary to stderr.
///
/// Exactly `expected.len()` bytes are read and compared; nothing past the
/// handshake is consumed. The stream is handed back on success.
pub(crate) fn await_ready(
    child: &mut Child,
    stderr: ChildStderr,
    expected: &[u8],
    timeout: Duration,
    poll_interval: Duration,
) -> Result<ChildStderr> {
    let (tx, rx) = mpsc::channel();
    let len = expected.len();
    thread::Builder::new()
        .name("fsbridge-handshake".to_string())
        .spawn(move || {
            let mut stderr = stderr;
            let mut buf = vec![0u8; len];
            let result = stderr.read_exact(&mut buf).map(|()| buf);
            let _ = tx.send((stderr, result));
        })?;

    let deadline = Instant::now() + timeout;
    loop {
        match rx.recv_timeout(poll_interval) {
            Ok((stderr, Ok(received))) => {
                if received == expected {
                    return Ok(stderr);
                }
                warn!(
                    "Helper wrote {:?} instead of its ready boundary",
                    String::from_utf8_lossy(&received)
                );
                return Err(BridgeError::NotReady(
                    "unexpected handshake output".to_string(),
                ));
            }
            Ok((_, Err(e))) => {
                return Err(BridgeError::NotReady(format!(
                    "stderr closed before ready: {}",
                    e
                )));
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(BridgeError::NotReady(
                    "handshake reader stopped".to_string(),
                ));
            }
        }

        if let Some(status) = child.try_wait()? {
            return Err(BridgeError::NotReady(format!(
                "helper exited with {} before ready",
                status
            )));
        }

        if Instant::now() >= deadline {
            return Err(BridgeError::NotReady(format!(
                "no ready boundary within {:?}",
                timeout
            )));
        }
    }
}

/// Kill the helper and reap it. Failures are logged and swallowed.
pub(crate) fn terminate(child: &mut Child) {
    match child.try_wait() {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(e) => warn!("Error checking helper {}: {:?}", child.id(), e),
    }

    if let Err(e) = child.kill() {
        warn!("Failed to kill helper {}: {:?}", child.id(), e);
    }

    if let Err(e) = child.wait() {
        warn!("Error waiting for helper {}: {:?}", child.id(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_pair_is_random_hex() {
        let pair = BoundaryPair::generate();
        assert_eq!(pair.client.len(), TOKEN_BYTES * 2);
        assert_eq!(pair.server.len(), TOKEN_BYTES * 2);
        assert_ne!(pair.client, pair.server);
        assert!(pair.client.chars().all(|c| c.is_ascii_hexdigit()));

        let other = BoundaryPair::generate();
        assert_ne!(pair, other);
    }

    fn sh(script: &str) -> (Child, ChildStderr) {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let stderr = child.stderr.take().unwrap();
        (child, stderr)
    }

    #[test]
    fn test_await_ready_accepts_exact_boundary() {
        let (mut child, stderr) = sh("printf READY; sleep 5");
        let result = await_ready(
            &mut child,
            stderr,
            b"READY",
            Duration::from_secs(5),
            Duration::from_millis(10),
        );
        assert!(result.is_ok());
        terminate(&mut child);
    }

    #[test]
    fn test_await_ready_fails_fast_when_helper_dies() {
        let (mut child, stderr) = sh("exit 3");
        let started = Instant::now();
        let result = await_ready(
            &mut child,
            stderr,
            b"READY",
            Duration::from_secs(30),
            Duration::from_millis(10),
        );
        assert!(matches!(result, Err(BridgeError::NotReady(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
        terminate(&mut child);
    }

    #[test]
    fn test_await_ready_rejects_wrong_token() {
        let (mut child, stderr) = sh("printf NOPE!; sleep 5");
        let result = await_ready(
            &mut child,
            stderr,
            b"READY",
            Duration::from_secs(5),
            Duration::from_millis(10),
        );
        assert!(matches!(result, Err(BridgeError::NotReady(_))));
        terminate(&mut child);
    }

    #[test]
    fn test_await_ready_times_out() {
        let (mut child, stderr) = sh("sleep 5");
        let result = await_ready(
            &mut child,
            stderr,
            b"READY",
            Duration::from_millis(100),
            Duration::from_millis(10),
        );
        assert!(matches!(result, Err(BridgeError::NotReady(msg)) if msg.contains("within")));
        terminate(&mut child);
    }
}
