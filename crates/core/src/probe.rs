//! Readiness probing of the tunnel's local endpoint.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{Result, TunnelError};
use crate::rewrite::LOOPBACK_HOST;

/// Delay between failed connection attempts.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(500);
/// Upper bound on a single connection attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

/// Confirms a local port accepts TCP connections.
#[derive(Debug, Clone)]
pub struct ReadinessProber {
	host: String,
	interval: Duration,
	attempt_timeout: Duration,
}

impl Default for ReadinessProber {
	fn default() -> Self {
		Self {
			host: LOOPBACK_HOST.to_string(),
			interval: DEFAULT_PROBE_INTERVAL,
			attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
		}
	}
}

impl ReadinessProber {
	pub fn with_interval(mut self, interval: Duration) -> Self {
		self.interval = interval;
		self
	}

	pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
		self.attempt_timeout = attempt_timeout;
		self
	}

	/// Retries a bare connect to `port` until one succeeds or `timeout` elapses.
	///
	/// The connection is closed immediately; no bytes are exchanged.
	pub async fn probe(&self, port: u16, timeout: Duration) -> Result<()> {
		let deadline = Instant::now() + timeout;
		let mut attempts = 0u32;

		loop {
			attempts += 1;
			let budget = self.attempt_timeout.min(deadline.saturating_duration_since(Instant::now()));
			match tokio::time::timeout(budget, TcpStream::connect((self.host.as_str(), port))).await {
				Ok(Ok(stream)) => {
					drop(stream);
					debug!(target = "iap.probe", port, attempts, "tunnel endpoint accepted connection");
					return Ok(());
				}
				Ok(Err(err)) => trace!(target = "iap.probe", port, attempts, error = %err, "tunnel endpoint not ready"),
				Err(_) => trace!(target = "iap.probe", port, attempts, "tunnel endpoint connect timed out"),
			}

			if Instant::now() + self.interval >= deadline {
				return Err(TunnelError::NotReady { port, timeout });
			}
			tokio::time::sleep(self.interval).await;
		}
	}
}
