//! Liveness, port, and process-group signalling helpers for tunnel subprocesses.

use std::io;
#[cfg(unix)]
use std::path::PathBuf;

use tracing::trace;

/// Signal sent to a tunnel subprocess group during teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
	/// Graceful termination request (`SIGTERM`).
	Terminate,
	/// Forceful kill (`SIGKILL`).
	Kill,
}

impl StopSignal {
	#[cfg(unix)]
	fn as_raw(self) -> libc::c_int {
		match self {
			StopSignal::Terminate => libc::SIGTERM,
			StopSignal::Kill => libc::SIGKILL,
		}
	}
}

/// Returns `true` when a process with `pid` appears alive on this platform.
///
/// A zombie still has a process-table entry, so this also reports children
/// that exited but were never reaped.
pub fn pid_is_alive(pid: u32) -> bool {
	#[cfg(unix)]
	{
		if pid == 0 {
			return false;
		}

		if PathBuf::from("/proc").exists() {
			return PathBuf::from("/proc").join(pid.to_string()).exists();
		}

		// SAFETY: signal 0 performs only the existence/permission check.
		let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
		rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
	}

	#[cfg(not(unix))]
	{
		pid == std::process::id()
	}
}

/// Returns `true` when `port` can be bound on localhost.
pub fn port_available(port: u16) -> bool {
	std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Sends `signal` to every process in the group led by `pgid`.
///
/// Returns `Ok(false)` when the group no longer exists, which callers treat as
/// "already gone" rather than an error.
#[cfg(unix)]
pub fn signal_process_group(pgid: u32, signal: StopSignal) -> io::Result<bool> {
	if pgid == 0 {
		return Err(io::Error::new(io::ErrorKind::InvalidInput, "refusing to signal process group 0"));
	}

	trace!(target = "iap.runtime", pgid, ?signal, "signalling process group");
	// SAFETY: killpg has no memory-safety preconditions; pgid is non-zero.
	let rc = unsafe { libc::killpg(pgid as libc::pid_t, signal.as_raw()) };
	if rc == 0 {
		return Ok(true);
	}

	let err = io::Error::last_os_error();
	match err.raw_os_error() {
		Some(libc::ESRCH) => Ok(false),
		_ => Err(err),
	}
}

/// Process groups are a unix concept; other platforms kill the child directly.
#[cfg(not(unix))]
pub fn signal_process_group(_pgid: u32, _signal: StopSignal) -> io::Result<bool> {
	trace!(target = "iap.runtime", "process-group signalling unsupported on this platform");
	Err(io::Error::new(io::ErrorKind::Unsupported, "process groups are not supported on this platform"))
}
