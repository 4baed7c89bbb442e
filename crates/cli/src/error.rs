use std::path::PathBuf;

use thiserror::Error;
use winrm_iap::TunnelError;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("no host file given; pass --config FILE")]
	MissingConfig,

	#[error(transparent)]
	Tunnel(#[from] TunnelError),

	#[error("interrupted by {0}; tunnel closed")]
	Interrupted(&'static str),

	#[error("failed to run {}: {source}", .program.display())]
	Spawn {
		program: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Exit status for a command stopped by a signal, as shells report SIGINT.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

impl CliError {
	pub fn exit_code(&self) -> i32 {
		match self {
			CliError::Interrupted(_) => INTERRUPTED_EXIT_CODE,
			_ => 1,
		}
	}
}

pub type Result<T> = std::result::Result<T, CliError>;
