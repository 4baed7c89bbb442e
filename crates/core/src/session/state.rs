//! Session lifecycle states.

use std::fmt;

/// Where a session is in its single pass from `Idle` to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Idle,
	Launching,
	AwaitingPort,
	Probing,
	Ready,
	Closing,
	Closed,
	Failed,
}

impl SessionState {
	/// `Closed` and `Failed` sessions can never be connected again.
	pub fn is_terminal(self) -> bool {
		matches!(self, SessionState::Closed | SessionState::Failed)
	}

	/// Whether establishment is in progress.
	pub fn is_establishing(self) -> bool {
		matches!(self, SessionState::Launching | SessionState::AwaitingPort | SessionState::Probing)
	}
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			SessionState::Idle => "idle",
			SessionState::Launching => "launching",
			SessionState::AwaitingPort => "awaiting-port",
			SessionState::Probing => "probing",
			SessionState::Ready => "ready",
			SessionState::Closing => "closing",
			SessionState::Closed => "closed",
			SessionState::Failed => "failed",
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn terminal_and_establishing_states() {
		assert!(SessionState::Closed.is_terminal());
		assert!(SessionState::Failed.is_terminal());
		assert!(!SessionState::Ready.is_terminal());
		assert!(SessionState::AwaitingPort.is_establishing());
		assert!(!SessionState::Idle.is_establishing());
		assert_eq!(SessionState::AwaitingPort.to_string(), "awaiting-port");
	}
}
