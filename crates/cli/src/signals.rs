//! Interrupt handling, so an interrupted command still closes its tunnel.
//!
//! The tunnel runs in its own process group and never sees a terminal Ctrl-C,
//! so the CLI must catch the signal and run the session teardown itself.

use std::io;

/// Signal listeners registered up front; signals delivered after
/// [`Shutdown::install`] are never lost.
pub struct Shutdown {
	#[cfg(unix)]
	interrupt: tokio::signal::unix::Signal,
	#[cfg(unix)]
	terminate: tokio::signal::unix::Signal,
}

impl Shutdown {
	#[cfg(unix)]
	pub fn install() -> io::Result<Self> {
		use tokio::signal::unix::{SignalKind, signal};

		Ok(Self {
			interrupt: signal(SignalKind::interrupt())?,
			terminate: signal(SignalKind::terminate())?,
		})
	}

	#[cfg(not(unix))]
	pub fn install() -> io::Result<Self> {
		Ok(Self {})
	}

	/// Resolves with the signal's name once SIGINT or SIGTERM arrives.
	#[cfg(unix)]
	pub async fn recv(&mut self) -> &'static str {
		tokio::select! {
			Some(()) = self.interrupt.recv() => "SIGINT",
			Some(()) = self.terminate.recv() => "SIGTERM",
			else => std::future::pending().await,
		}
	}

	#[cfg(not(unix))]
	pub async fn recv(&mut self) -> &'static str {
		match tokio::signal::ctrl_c().await {
			Ok(()) => "Ctrl-C",
			Err(_) => std::future::pending().await,
		}
	}
}
