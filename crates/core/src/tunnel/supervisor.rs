//! Lifecycle owner for one tunnel process: launch, port discovery, teardown.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use super::launcher::{ProcessControl, TunnelExit, TunnelLauncher};
use super::scanner::{ScanOutcome, classify};
use crate::config::TunnelSpec;
use crate::error::{Phase, Result, TunnelError};

/// Time a tunnel gets to exit after SIGTERM before it is killed.
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// How often port discovery checks for a silent process exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// How long to keep collecting output after the process is seen to exit.
const EXIT_DRAIN_WINDOW: Duration = Duration::from_millis(200);
/// Diagnostic lines kept for error reports; older lines are discarded.
pub const CAPTURED_LINE_LIMIT: usize = 200;

/// Owns at most one tunnel process and the output captured from it.
pub struct TunnelSupervisor {
	launcher: Arc<dyn TunnelLauncher>,
	process: Option<Box<dyn ProcessControl>>,
	lines: Option<mpsc::Receiver<String>>,
	captured: VecDeque<String>,
	port: Option<u16>,
	instance: String,
	terminate_grace: Duration,
}

impl TunnelSupervisor {
	pub fn new(launcher: Arc<dyn TunnelLauncher>) -> Self {
		Self {
			launcher,
			process: None,
			lines: None,
			captured: VecDeque::new(),
			port: None,
			instance: String::new(),
			terminate_grace: DEFAULT_TERMINATE_GRACE,
		}
	}

	pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
		self.terminate_grace = grace;
		self
	}

	/// Starts the tunnel process. A supervisor launches at most once.
	pub fn launch(&mut self, spec: &TunnelSpec) -> Result<()> {
		if self.process.is_some() || self.port.is_some() || !self.instance.is_empty() {
			return Err(TunnelError::Programming("tunnel supervisor already launched a process".to_string()));
		}

		self.instance = spec.instance().to_string();
		let launched = self.launcher.launch(spec)?;
		self.lines = Some(launched.lines);
		self.process = Some(launched.control);
		Ok(())
	}

	/// Reads diagnostic output until a port is announced, the process exits,
	/// or `timeout` elapses. The deadline holds even while output keeps
	/// arriving; only the last [`CAPTURED_LINE_LIMIT`] lines are kept.
	///
	/// The discovered port is write-once: later calls return it unchanged.
	pub async fn await_port(&mut self, timeout: Duration) -> Result<u16> {
		if let Some(port) = self.port {
			return Ok(port);
		}

		let deadline = Instant::now() + timeout;
		let (Some(lines), Some(process)) = (self.lines.as_mut(), self.process.as_mut()) else {
			return Err(TunnelError::Programming("await_port called without a running tunnel".to_string()));
		};

		loop {
			if Instant::now() >= deadline {
				return Err(self.timed_out(timeout));
			}

			let tick = (Instant::now() + EXIT_POLL_INTERVAL).min(deadline);
			match timeout_at(tick, lines.recv()).await {
				Ok(Some(line)) => {
					let outcome = classify(&line);
					capture(&mut self.captured, line);
					match outcome {
						ScanOutcome::Port(port) => {
							debug!(target = "iap.tunnel", instance = %self.instance, port, "tunnel announced local port");
							self.port = Some(port);
							// Stop capturing; the reader keeps draining the pipe.
							self.lines = None;
							return Ok(port);
						}
						ScanOutcome::Anomaly(raw) => {
							warn!(target = "iap.tunnel", instance = %self.instance, raw = %raw, "ignoring out-of-range port announcement");
						}
						ScanOutcome::NoMatch => {}
					}
				}
				Ok(None) => {
					// Output closed: the process is exiting. Reap it within the budget.
					return match timeout_at(deadline, process.wait()).await {
						Ok(exit) => Err(exited(Phase::PortDiscovery, exit?, &self.captured)),
						Err(_) => Err(self.timed_out(timeout)),
					};
				}
				Err(_) => {
					if let Some(exit) = process.try_exit()? {
						drain_until(lines, &mut self.captured, Instant::now() + EXIT_DRAIN_WINDOW).await;
						return Err(exited(Phase::PortDiscovery, exit, &self.captured));
					}
				}
			}
		}
	}

	/// Resolves when the tunnel process exits; never resolves without one.
	pub async fn wait_exit(&mut self) -> Option<TunnelExit> {
		match self.process.as_mut() {
			Some(process) => match process.wait().await {
				Ok(exit) => Some(exit),
				Err(err) => {
					debug!(target = "iap.tunnel", instance = %self.instance, error = %err, "waiting on tunnel failed");
					std::future::pending().await
				}
			},
			None => std::future::pending().await,
		}
	}

	/// Stops and reaps the tunnel process. Idempotent and infallible: errors
	/// are logged and the process handle is released either way.
	pub async fn terminate(&mut self) -> Option<TunnelExit> {
		self.lines = None;
		let mut process = self.process.take()?;
		let pid = process.pid();

		match process.terminate(self.terminate_grace).await {
			Ok(exit) => {
				debug!(target = "iap.tunnel", instance = %self.instance, pid, %exit, "tunnel process stopped");
				Some(exit)
			}
			Err(err) => {
				warn!(target = "iap.tunnel", instance = %self.instance, pid, error = %err, "failed to stop tunnel process cleanly");
				None
			}
		}
	}

	/// Port announced by the tunnel, once discovered.
	pub fn port(&self) -> Option<u16> {
		self.port
	}

	/// OS pid of the live tunnel process, if any.
	pub fn pid(&self) -> Option<u32> {
		self.process.as_ref().and_then(|p| p.pid())
	}

	/// Whether a process handle is still held (launched and not yet terminated).
	pub fn is_running(&self) -> bool {
		self.process.is_some()
	}

	/// Diagnostic output captured up to port discovery.
	pub fn captured_output(&self) -> String {
		join_lines(&self.captured)
	}

	fn timed_out(&self, timeout: Duration) -> TunnelError {
		TunnelError::TunnelTimeout {
			timeout,
			output: join_lines(&self.captured),
		}
	}

	pub(crate) fn exited_during(&self, phase: Phase, exit: TunnelExit) -> TunnelError {
		exited(phase, exit, &self.captured)
	}
}

async fn drain_until(lines: &mut mpsc::Receiver<String>, captured: &mut VecDeque<String>, until: Instant) {
	while let Ok(Some(line)) = timeout_at(until, lines.recv()).await {
		capture(captured, line);
	}
}

fn capture(captured: &mut VecDeque<String>, line: String) {
	if captured.len() == CAPTURED_LINE_LIMIT {
		captured.pop_front();
	}
	captured.push_back(line);
}

fn exited(phase: Phase, exit: TunnelExit, captured: &VecDeque<String>) -> TunnelError {
	TunnelError::TunnelExited {
		phase,
		status: exit.to_string(),
		output: join_lines(captured),
	}
}

fn join_lines(lines: &VecDeque<String>) -> String {
	let mut out = String::new();
	for line in lines {
		out.push_str(line);
		out.push('\n');
	}
	out
}
