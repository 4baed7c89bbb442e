//! Launcher interface: a process that yields diagnostic lines and an exit status.
//!
//! The supervisor only ever talks to these traits, so port discovery and
//! teardown can be exercised against a scripted fake with no subprocess.

use std::fmt;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::TunnelSpec;
use crate::error::Result;

/// How a tunnel process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelExit {
	code: Option<i32>,
	signal: Option<i32>,
}

impl TunnelExit {
	pub fn from_code(code: i32) -> Self {
		Self { code: Some(code), signal: None }
	}

	pub fn from_signal(signal: i32) -> Self {
		Self { code: None, signal: Some(signal) }
	}

	pub fn code(&self) -> Option<i32> {
		self.code
	}

	pub fn signal(&self) -> Option<i32> {
		self.signal
	}

	pub fn success(&self) -> bool {
		self.code == Some(0)
	}
}

impl From<std::process::ExitStatus> for TunnelExit {
	fn from(status: std::process::ExitStatus) -> Self {
		#[cfg(unix)]
		let signal = std::os::unix::process::ExitStatusExt::signal(&status);
		#[cfg(not(unix))]
		let signal = None;
		Self { code: status.code(), signal }
	}
}

impl fmt::Display for TunnelExit {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match (self.code, self.signal) {
			(Some(code), _) => write!(f, "exit code {}", code),
			(None, Some(signal)) => write!(f, "killed by signal {}", signal),
			(None, None) => f.write_str("unknown exit status"),
		}
	}
}

/// Lifecycle control over one launched tunnel process.
#[async_trait]
pub trait ProcessControl: Send {
	/// OS process id, when the process is real and not yet reaped.
	fn pid(&self) -> Option<u32>;

	/// Non-blocking exit check; reaps the process if it has exited.
	fn try_exit(&mut self) -> io::Result<Option<TunnelExit>>;

	/// Waits for the process to exit and reaps it.
	async fn wait(&mut self) -> io::Result<TunnelExit>;

	/// Requests graceful termination, escalates to a forceful kill after
	/// `grace`, and reaps. Succeeds when the process had already exited.
	async fn terminate(&mut self, grace: Duration) -> io::Result<TunnelExit>;
}

/// Capacity of the diagnostic line channel between reader and supervisor.
pub const LINE_BUFFER: usize = 256;

/// A freshly launched tunnel: its diagnostic line stream plus process control.
///
/// The line stream is bounded by [`LINE_BUFFER`] and closes once the process's
/// diagnostic output reaches EOF. A full buffer applies backpressure to the
/// reader; dropping the receiver stops capture, after which implementations
/// keep draining the underlying pipe so the process never blocks.
pub struct LaunchedTunnel {
	pub lines: mpsc::Receiver<String>,
	pub control: Box<dyn ProcessControl>,
}

impl fmt::Debug for LaunchedTunnel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LaunchedTunnel").field("pid", &self.control.pid()).finish()
	}
}

/// Starts tunnel processes for a [`TunnelSpec`].
pub trait TunnelLauncher: Send + Sync {
	/// Starts the process without waiting for it to become useful.
	///
	/// Must be called from within a tokio runtime.
	fn launch(&self, spec: &TunnelSpec) -> Result<LaunchedTunnel>;
}
