//! Proxy identity rotation over the control port.
//!
//! Runs beside the crawl as its own task (or standalone). The crawl loop
//! never waits on it and simply sees a new exit identity mid-run.

use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backoff::RetryBackoff;
use crate::orchestration::shutdown::wait_for_shutdown;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_BASE: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum CircuitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("control port did not answer within {0:?}")]
    Timeout(Duration),

    #[error("control port rejected command: {0}")]
    Rejected(String),

    #[error("control port closed the connection")]
    Closed,
}

/// Anything that can request a fresh proxy identity.
#[async_trait]
pub trait IdentityRotator: Send + Sync {
    async fn new_identity(&self) -> Result<(), CircuitError>;
}

#[derive(Debug, Clone)]
pub struct CircuitController {
    control_addr: String,
    password: Option<String>,
}

impl CircuitController {
    pub fn new(control_addr: impl Into<String>, password: Option<String>) -> Self {
        Self {
            control_addr: control_addr.into(),
            password: password.filter(|p| !p.is_empty()),
        }
    }

    pub fn control_addr(&self) -> &str {
        &self.control_addr
    }

    fn authenticate_command(&self) -> String {
        match &self.password {
            Some(password) => {
                let escaped = password.replace('\\', "\\\\").replace('"', "\\\"");
                format!("AUTHENTICATE \"{escaped}\"")
            }
            None => "AUTHENTICATE".to_string(),
        }
    }

    async fn session(&self) -> Result<(), CircuitError> {
        let stream = TcpStream::connect(&self.control_addr).await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        for command in [self.authenticate_command(), "SIGNAL NEWNYM".to_string()] {
            write_half.write_all(format!("{command}\r\n").as_bytes()).await?;
            read_reply(&mut reader).await?;
        }

        // The identity is already rotated; a sloppy goodbye is not an error.
        if write_half.write_all(b"QUIT\r\n").await.is_ok() {
            let _ = read_reply(&mut reader).await;
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityRotator for CircuitController {
    async fn new_identity(&self) -> Result<(), CircuitError> {
        tokio::time::timeout(CONTROL_TIMEOUT, self.session())
            .await
            .map_err(|_| CircuitError::Timeout(CONTROL_TIMEOUT))?
    }
}

/// Read one (possibly multi-line) reply and require status 250.
async fn read_reply<R>(reader: &mut R) -> Result<(), CircuitError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(CircuitError::Closed);
        }
        let line = line.trim_end();
        if !line.starts_with("250") {
            return Err(CircuitError::Rejected(line.to_string()));
        }
        // "250-" and "250+" continue the reply, "250 " ends it
        if line.as_bytes().get(3).is_none_or(|b| *b == b' ') {
            return Ok(());
        }
    }
}

/// Time until the next wall-clock multiple of `period`.
pub fn next_rotation_delay(since_epoch: Duration, period: Duration) -> Duration {
    let period_ms = period.as_millis().max(1);
    let into_period = since_epoch.as_millis() % period_ms;
    Duration::from_millis((period_ms - into_period) as u64)
}

/// Request a new identity at every wall-clock boundary of `period` until
/// shutdown. Failed attempts retry with backoff capped at `period`.
/// Returns the number of successful rotations.
pub async fn run_rotation<R>(rotator: &R, period: Duration, mut shutdown: watch::Receiver<bool>) -> u64
where
    R: IdentityRotator + ?Sized,
{
    let backoff = RetryBackoff::new(RETRY_BASE, period);
    let mut rotations = 0;
    info!(period_secs = period.as_secs(), "circuit rotation started");

    loop {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let wait = next_rotation_delay(now, period);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = wait_for_shutdown(&mut shutdown) => break,
        }

        let mut attempt = 0;
        loop {
            match rotator.new_identity().await {
                Ok(()) => {
                    rotations += 1;
                    debug!(rotations, "new circuit identity requested");
                    break;
                }
                Err(e) => {
                    let delay = backoff.delay(attempt);
                    warn!(error = %e, attempt, retry_in_ms = delay.as_millis() as u64, "circuit rotation failed");
                    attempt += 1;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = wait_for_shutdown(&mut shutdown) => {
                            info!(rotations, "circuit rotation stopped");
                            return rotations;
                        }
                    }
                }
            }
        }
    }

    info!(rotations, "circuit rotation stopped");
    rotations
}
