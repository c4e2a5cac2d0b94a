//! One helper process per user and the command cycle that drives it.
//!
//! A command is written to stdin as a framed request. The consumer then reads
//! the response frame from stdout (and stderr, if it cares). Whatever the
//! consumer leaves behind is drained up to the server boundary before the
//! next command can be written, including when the consumer fails or panics.

mod cache;
mod process;

use std::any::Any;
use std::io::{self, BufRead, BufWriter, Read, Write};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use std::time::{Duration, Instant};

use fsbridge_protocol::{BoundaryReader, Command, boundary_pattern, encode_header};
use tracing::{debug, info, warn};

pub use cache::{CacheKey, SessionCache};
pub use process::BoundaryPair;

use crate::config::HelperConfig;
use crate::error::{BridgeError, Result};
use crate::identity::UnixIdentity;

/// A live helper process bound to one user.
pub struct Session {
    identity: UnixIdentity,
    boundaries: BoundaryPair,
    child: Child,
    io: Option<HelperIo>,
    cache: SessionCache,
    open: bool,
    torn_down: bool,
    last_used: Instant,
}

impl Session {
    /// Spawn the helper for `identity` and wait for its ready boundary.
    pub fn open(config: &HelperConfig, identity: &UnixIdentity) -> Result<Self> {
        let boundaries = BoundaryPair::generate();
        let server = boundary_pattern(&boundaries.server)?;

        let mut helper = process::spawn_helper(config, &boundaries, identity)?;
        let stderr = match process::await_ready(
            &mut helper.child,
            helper.stderr,
            server.as_bytes(),
            config.handshake_timeout(),
            config.poll_interval(),
        ) {
            Ok(stderr) => stderr,
            Err(e) => {
                warn!("Helper for {} not ready: {}", identity.cloud_user, e);
                process::terminate(&mut helper.child);
                return Err(e);
            }
        };

        info!(
            "Session opened for {} (helper pid {})",
            identity.cloud_user,
            helper.child.id()
        );

        Ok(Self {
            identity: identity.clone(),
            io: Some(HelperIo {
                stdin: helper.stdin,
                stdout: BoundaryReader::with_capacity(
                    config.buffer_size,
                    helper.stdout,
                    server.clone(),
                ),
                stderr: BoundaryReader::with_capacity(config.buffer_size, stderr, server),
                lost_sync: false,
            }),
            boundaries,
            child: helper.child,
            cache: SessionCache::new(),
            open: true,
            torn_down: false,
            last_used: Instant::now(),
        })
    }

    /// Cloud user this session acts for.
    pub fn user(&self) -> &str {
        &self.identity.cloud_user
    }

    pub fn identity(&self) -> &UnixIdentity {
        &self.identity
    }

    pub fn boundaries(&self) -> &BoundaryPair {
        &self.boundaries
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// True until the session is closed or loses sync with its helper.
    pub fn is_open(&self) -> bool {
        self.open && self.io.as_ref().is_some_and(|io| !io.lost_sync)
    }

    /// Check if the helper process is still running.
    pub fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => self.is_open(),
            Ok(Some(_)) | Err(_) => false,
        }
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Run a command without payload.
    pub fn run_command<S, F, T>(&mut self, command: Command, args: &[S], consumer: F) -> Result<T>
    where
        S: AsRef<str>,
        F: FnOnce(&mut CommandStreams<'_>) -> Result<T>,
    {
        self.run_command_with_payload(command, args, |_| Ok(()), consumer)
    }

    /// Write the request, `payload` and the client boundary, then hand the
    /// response streams to `consumer`.
    pub fn run_command_with_payload<S, W, F, T>(
        &mut self,
        command: Command,
        args: &[S],
        payload: W,
        consumer: F,
    ) -> Result<T>
    where
        S: AsRef<str>,
        W: FnOnce(&mut dyn Write) -> io::Result<()>,
        F: FnOnce(&mut CommandStreams<'_>) -> Result<T>,
    {
        if !self.is_open() {
            self.open = false;
            return Err(BridgeError::Closed);
        }
        let Some(io) = self.io.as_mut() else {
            return Err(BridgeError::Closed);
        };

        let header = encode_header(command, args)?;
        self.last_used = Instant::now();
        debug!("{} -> {} ({} args)", self.identity.cloud_user, command, args.len());

        if let Err(e) = io.write_request(&header, payload, self.boundaries.client.as_bytes()) {
            warn!(
                "Writing {} to helper for {} failed: {}",
                command, self.identity.cloud_user, e
            );
            self.open = false;
            return Err(e.into());
        }

        let mut streams = CommandStreams::new(io);
        let outcome = consumer(&mut streams);
        let drained = streams.finish();

        match (outcome, drained) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(e), Ok(())) => {
                if e.is_fatal() {
                    warn!("{} failed for {}: {}", command, self.identity.cloud_user, e);
                    self.open = false;
                }
                Err(e)
            }
            (outcome, Err(e)) => {
                warn!(
                    "Helper for {} lost sync after {}: {}",
                    self.identity.cloud_user, command, e
                );
                self.open = false;
                outcome.and(Err(e))
            }
        }
    }

    pub fn store<T: Any + Send>(&mut self, key: CacheKey<T>, value: T) -> Option<T> {
        self.cache.store(key, value)
    }

    /// Cached value, or [`BridgeError::MissingCacheEntry`].
    pub fn retrieve<T: Any + Send>(&self, key: CacheKey<T>) -> Result<&T> {
        self.cache
            .retrieve(key)
            .ok_or_else(|| BridgeError::MissingCacheEntry(key.name().to_string()))
    }

    pub fn retrieve_or_none<T: Any + Send>(&self, key: CacheKey<T>) -> Option<&T> {
        self.cache.retrieve(key)
    }

    pub fn invalidate<T: Any + Send>(&mut self, key: CacheKey<T>) -> Option<T> {
        self.cache.invalidate(key)
    }

    /// Close all three pipes, then stop the helper. Safe to call more than once.
    pub fn close(&mut self) {
        self.open = false;
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        drop(self.io.take());
        process::terminate(&mut self.child);
        self.cache.clear();
        info!("Session closed for {}", self.identity.cloud_user);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.identity.cloud_user)
            .field("pid", &self.child.id())
            .field("open", &self.open)
            .field("cache", &self.cache)
            .finish()
    }
}

struct HelperIo {
    stdin: ChildStdin,
    stdout: BoundaryReader<ChildStdout>,
    stderr: BoundaryReader<ChildStderr>,
    lost_sync: bool,
}

impl HelperIo {
    fn write_request<W>(&mut self, header: &[u8], payload: W, boundary: &[u8]) -> io::Result<()>
    where
        W: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        let mut out = BufWriter::new(&mut self.stdin);
        out.write_all(header)?;
        payload(&mut out)?;
        out.write_all(boundary)?;
        out.flush()
    }
}

/// The response side of one command.
///
/// Dropping it without [`CommandStreams::finish`] (a panicking consumer)
/// still drains both streams.
pub struct CommandStreams<'a> {
    io: &'a mut HelperIo,
    finished: bool,
}

impl<'a> CommandStreams<'a> {
    fn new(io: &'a mut HelperIo) -> Self {
        Self {
            io,
            finished: false,
        }
    }

    pub fn stdout(&mut self) -> FrameReader<'_, ChildStdout> {
        FrameReader {
            inner: &mut self.io.stdout,
        }
    }

    pub fn stderr(&mut self) -> FrameReader<'_, ChildStderr> {
        FrameReader {
            inner: &mut self.io.stderr,
        }
    }

    /// Lines of the stdout frame, without terminators.
    pub fn stdout_lines(&mut self) -> io::Lines<FrameReader<'_, ChildStdout>> {
        self.stdout().lines()
    }

    /// Hand out the next `n` stdout bytes without boundary scanning.
    pub fn clear_bytes(&mut self, n: u64) {
        self.io.stdout.manual_clear_next_bytes(n);
    }

    fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.drain()
    }

    fn drain(&mut self) -> Result<()> {
        let stdout = self.io.stdout.drain();
        let stderr = drain_logged(&mut self.io.stderr);
        self.io.stdout.discard_and_reset();
        self.io.stderr.discard_and_reset();
        match (stdout?, stderr?) {
            (true, true) => Ok(()),
            _ => Err(BridgeError::UnexpectedEof),
        }
    }
}

impl Drop for CommandStreams<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.drain() {
            warn!("Draining helper output after an aborted command: {}", e);
            self.io.lost_sync = true;
        }
    }
}

fn drain_logged<R: Read>(reader: &mut BoundaryReader<R>) -> io::Result<bool> {
    let mut residue = Vec::new();
    reader.read_to_end(&mut residue)?;
    if !residue.is_empty() {
        debug!("helper stderr: {}", String::from_utf8_lossy(&residue).trim_end());
    }
    Ok(reader.boundary_reached())
}

/// A response stream limited to the current frame.
///
/// There is no way to close or reset the underlying pipe through it.
pub struct FrameReader<'a, R> {
    inner: &'a mut BoundaryReader<R>,
}

impl<R: Read> FrameReader<'_, R> {
    /// One line without its terminator, `None` at the end of the frame.
    pub fn read_frame_line(&mut self) -> io::Result<Option<String>> {
        self.inner.read_frame_line()
    }

    pub fn clear_next_bytes(&mut self, n: u64) {
        self.inner.manual_clear_next_bytes(n);
    }

    pub fn at_boundary(&self) -> bool {
        self.inner.boundary_reached()
    }
}

impl<R: Read> Read for FrameReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read> BufRead for FrameReader<'_, R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt)
    }
}
