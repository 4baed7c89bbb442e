//! Real subprocess adapter for the launcher interface.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::launcher::{LINE_BUFFER, LaunchedTunnel, ProcessControl, TunnelExit, TunnelLauncher};
use crate::config::TunnelSpec;
use crate::error::{Result, TunnelError};

/// Fully resolved program invocation for a tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandLine {
	pub program: PathBuf,
	pub args: Vec<String>,
	/// Variables added to the child's environment only.
	pub env: Vec<(String, String)>,
}

impl fmt::Display for CommandLine {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.program.display())?;
		for arg in &self.args {
			write!(f, " {}", arg)?;
		}
		Ok(())
	}
}

/// Builds the command line that starts a tunnel for a spec.
pub trait TunnelCommand: Send + Sync {
	fn command_line(&self, spec: &TunnelSpec) -> Result<CommandLine>;
}

/// Launches tunnels as child processes in their own process group.
#[derive(Debug, Clone)]
pub struct SubprocessLauncher<C> {
	command: C,
}

impl<C: TunnelCommand> SubprocessLauncher<C> {
	pub fn new(command: C) -> Self {
		Self { command }
	}

	pub fn command(&self) -> &C {
		&self.command
	}
}

impl<C: TunnelCommand> TunnelLauncher for SubprocessLauncher<C> {
	fn launch(&self, spec: &TunnelSpec) -> Result<LaunchedTunnel> {
		let line = self.command.command_line(spec)?;
		debug!(target = "iap.tunnel", instance = spec.instance(), command = %line, "starting tunnel");

		let mut cmd = Command::new(&line.program);
		cmd.args(&line.args)
			.envs(line.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		// Own process group, so teardown reaches helpers the tool forks.
		#[cfg(unix)]
		cmd.process_group(0);

		let mut child = cmd.spawn().map_err(|source| TunnelError::Launch {
			program: line.program.clone(),
			source,
		})?;

		let pid = child.id();
		let stderr = child
			.stderr
			.take()
			.ok_or_else(|| TunnelError::Io(io::Error::other("tunnel stderr was not captured")))?;

		let (tx, rx) = mpsc::channel(LINE_BUFFER);
		tokio::spawn(forward_lines(stderr, tx, spec.instance().to_string()));

		debug!(target = "iap.tunnel", instance = spec.instance(), pid, "tunnel process spawned");
		Ok(LaunchedTunnel {
			lines: rx,
			control: Box::new(ChildControl { child, pid }),
		})
	}
}

/// Reads `reader` line by line until EOF, logging every line and forwarding it
/// while anyone is still listening. Once the receiver is gone lines are only
/// logged, so the pipe keeps draining.
async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<String>, instance: String) {
	let mut reader = BufReader::new(reader);
	let mut buf = Vec::new();
	loop {
		buf.clear();
		match reader.read_until(b'\n', &mut buf).await {
			Ok(0) => break,
			Ok(_) => {
				let line = String::from_utf8_lossy(&buf).trim_end_matches(['\r', '\n']).to_string();
				debug!(target = "iap.tunnel", instance = %instance, line = %line, "tunnel stderr");
				// Waits while the supervisor's buffer is full; fails fast once it is gone.
				let _ = tx.send(line).await;
			}
			Err(err) => {
				debug!(target = "iap.tunnel", instance = %instance, error = %err, "tunnel stderr read failed");
				break;
			}
		}
	}
	trace!(target = "iap.tunnel", instance = %instance, "tunnel stderr closed");
}

struct ChildControl {
	child: Child,
	pid: Option<u32>,
}

impl ChildControl {
	fn signal_group(&mut self, signal: iap_runtime::StopSignal) {
		#[cfg(unix)]
		if let Some(pid) = self.pid {
			match iap_runtime::signal_process_group(pid, signal) {
				Ok(true) => return,
				Ok(false) => {}
				Err(err) => debug!(target = "iap.tunnel", pid, ?signal, error = %err, "process group signal failed"),
			}
		}

		if signal == iap_runtime::StopSignal::Kill || cfg!(not(unix)) {
			if let Err(err) = self.child.start_kill() {
				trace!(target = "iap.tunnel", pid = self.pid, error = %err, "start_kill failed");
			}
		}
	}
}

#[async_trait]
impl ProcessControl for ChildControl {
	fn pid(&self) -> Option<u32> {
		self.child.id()
	}

	fn try_exit(&mut self) -> io::Result<Option<TunnelExit>> {
		Ok(self.child.try_wait()?.map(TunnelExit::from))
	}

	async fn wait(&mut self) -> io::Result<TunnelExit> {
		Ok(self.child.wait().await?.into())
	}

	async fn terminate(&mut self, grace: Duration) -> io::Result<TunnelExit> {
		if let Some(status) = self.child.try_wait()? {
			return Ok(status.into());
		}

		self.signal_group(iap_runtime::StopSignal::Terminate);
		if let Ok(status) = tokio::time::timeout(grace, self.child.wait()).await {
			return Ok(status?.into());
		}

		debug!(target = "iap.tunnel", pid = self.pid, grace_ms = grace.as_millis() as u64, "tunnel ignored SIGTERM; killing");
		self.signal_group(iap_runtime::StopSignal::Kill);
		Ok(self.child.wait().await?.into())
	}
}
