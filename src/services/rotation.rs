// src/services/rotation.rs

//! Egress identity rotation for throttled upstream requests.
//!
//! `RotationController` owns the process-wide "next eligible rotation" bound.
//! Concurrent fetch workers that hit throttling at the same time go through
//! the same mutex, so only the first one rotates and the rest are told how
//! long to wait for the cool-down to elapse.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::RotationError;

/// Minimum spacing Tor enforces between NEWNYM signals.
pub const NEWNYM_COOLDOWN: Duration = Duration::from_secs(10);

/// Something that can hand us a fresh egress identity.
#[async_trait]
pub trait IdentityRotator: Send + Sync {
    /// Request a new identity and return the cool-down before the next request.
    async fn rotate(&self) -> Result<Duration, RotationError>;
}

/// What the caller should do after asking for a fresh identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    /// A new identity was obtained; retry immediately.
    Rotated { cooldown: Duration },
    /// Still inside the cool-down; sleep this long before retrying.
    Wait(Duration),
}

impl Rotation {
    /// How long the caller has to sleep before its next attempt.
    pub fn wait(&self) -> Duration {
        match self {
            Rotation::Rotated { .. } => Duration::ZERO,
            Rotation::Wait(d) => *d,
        }
    }
}

/// Serializes rotation requests and enforces the cool-down between them.
pub struct RotationController {
    rotator: Arc<dyn IdentityRotator>,
    next_eligible: Mutex<Option<Instant>>,
}

impl RotationController {
    pub fn new(rotator: Arc<dyn IdentityRotator>) -> Self {
        Self {
            rotator,
            next_eligible: Mutex::new(None),
        }
    }

    /// Rotate if the cool-down has elapsed, otherwise report the remaining wait.
    ///
    /// On failure the bound is left untouched; the caller backs off on its own.
    pub async fn obtain_fresh_identity(&self) -> Result<Rotation, RotationError> {
        let mut next = self.next_eligible.lock().await;

        let now = Instant::now();
        if let Some(at) = *next {
            if now < at {
                let wait = at - now;
                log::debug!("Rotation cool-down active, {:.1}s left", wait.as_secs_f64());
                return Ok(Rotation::Wait(wait));
            }
        }

        let cooldown = self.rotator.rotate().await?;
        *next = Some(Instant::now() + cooldown);
        log::info!(
            "Egress identity rotated, next rotation allowed in {:.1}s",
            cooldown.as_secs_f64()
        );
        Ok(Rotation::Rotated { cooldown })
    }
}

/// Rotator that changes nothing and only imposes a fixed pause.
///
/// Used when no control endpoint is configured, so throttling degrades to
/// plain backoff under the same budget.
pub struct BackoffOnly {
    pause: Duration,
}

impl BackoffOnly {
    pub fn new(pause: Duration) -> Self {
        Self { pause }
    }
}

#[async_trait]
impl IdentityRotator for BackoffOnly {
    async fn rotate(&self) -> Result<Duration, RotationError> {
        Ok(self.pause)
    }
}

/// Tor control-port client issuing `SIGNAL NEWNYM`.
pub struct TorControl {
    addr: String,
    password: String,
    timeout: Duration,
}

impl TorControl {
    pub fn new(addr: impl Into<String>, password: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            password: password.into(),
            timeout,
        }
    }

    async fn newnym(&self) -> Result<Duration, RotationError> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let auth = format!("AUTHENTICATE \"{}\"", quote(&self.password));
        let reply = command(&mut reader, &mut write_half, &auth).await?;
        if !reply.starts_with("250") {
            return Err(RotationError::Authentication(reply));
        }

        let reply = command(&mut reader, &mut write_half, "SIGNAL NEWNYM").await?;
        if !reply.starts_with("250") {
            return Err(RotationError::UnexpectedReply {
                command: "SIGNAL NEWNYM".into(),
                reply,
            });
        }

        // Best effort; the signal has already been accepted.
        let _ = write_half.write_all(b"QUIT\r\n").await;
        Ok(NEWNYM_COOLDOWN)
    }
}

#[async_trait]
impl IdentityRotator for TorControl {
    async fn rotate(&self) -> Result<Duration, RotationError> {
        match tokio::time::timeout(self.timeout, self.newnym()).await {
            Ok(result) => result,
            Err(_) => Err(RotationError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("control port {} timed out", self.addr),
            ))),
        }
    }
}

/// Send one command line and read its final reply line.
///
/// Multi-line replies use `250-`/`250+` continuation; the final line has a space
/// after the status code.
async fn command<R, W>(reader: &mut R, writer: &mut W, line: &str) -> Result<String, RotationError>
where
    R: AsyncBufReadExt + Unpin,
    W: AsyncWriteExt + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await?;

    loop {
        let mut buf = String::new();
        if reader.read_line(&mut buf).await? == 0 {
            return Err(RotationError::Closed);
        }
        let reply = buf.trim_end().to_string();
        if reply.len() < 4 || reply.as_bytes()[3] == b' ' {
            return Ok(reply);
        }
    }
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
