//! Error taxonomy for tunnel establishment and session use.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Establishment phase in which a tunnel failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	/// Starting the tunnelling subprocess.
	Launch,
	/// Waiting for the subprocess to announce its bound local port.
	PortDiscovery,
	/// Waiting for the announced local port to accept connections.
	Readiness,
}

impl fmt::Display for Phase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Phase::Launch => "launch",
			Phase::PortDiscovery => "port discovery",
			Phase::Readiness => "readiness",
		})
	}
}

/// Errors produced while configuring, establishing, using, or tearing down a tunnel session.
#[derive(Error, Debug)]
pub enum TunnelError {
	#[error("invalid tunnel configuration: {0}")]
	Config(String),

	#[error("tunnel launch failed: could not start {}: {source}", .program.display())]
	Launch {
		program: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("tunnel {phase} failed: tunnel process exited ({status}){}", render_output(.output))]
	TunnelExited { phase: Phase, status: String, output: String },

	#[error("tunnel port discovery failed: no recognizable port line within {}s{}", .timeout.as_secs_f64(), render_output(.output))]
	TunnelTimeout { timeout: Duration, output: String },

	#[error("tunnel readiness failed: localhost:{port} did not accept connections within {}s", .timeout.as_secs_f64())]
	NotReady { port: u16, timeout: Duration },

	#[error("session misuse: {0}")]
	Programming(String),

	#[error("transport error: {0}")]
	Transport(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

impl TunnelError {
	/// Returns the establishment phase that failed, if this is an establishment error.
	pub fn phase(&self) -> Option<Phase> {
		match self {
			TunnelError::Launch { .. } => Some(Phase::Launch),
			TunnelError::TunnelExited { phase, .. } => Some(*phase),
			TunnelError::TunnelTimeout { .. } => Some(Phase::PortDiscovery),
			TunnelError::NotReady { .. } => Some(Phase::Readiness),
			_ => None,
		}
	}

	/// Captured subprocess diagnostic text attached to this error, if any.
	pub fn captured_output(&self) -> Option<&str> {
		match self {
			TunnelError::TunnelExited { output, .. } | TunnelError::TunnelTimeout { output, .. } if !output.is_empty() => Some(output.as_str()),
			_ => None,
		}
	}
}

fn render_output(output: &str) -> String {
	let trimmed = output.trim_end();
	if trimmed.is_empty() {
		String::new()
	} else {
		format!("; output:\n{trimmed}")
	}
}

pub type Result<T> = std::result::Result<T, TunnelError>;
