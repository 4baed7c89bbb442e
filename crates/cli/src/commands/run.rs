use std::path::PathBuf;

use tokio::process::Command;
use tracing::{debug, warn};

use super::CommandContext;
use super::connect::endpoint;
use crate::cli::RunArgs;
use crate::error::{CliError, Result};
use crate::output::EndpointReport;
use crate::signals::Shutdown;

pub const HOST_VAR: &str = "WINRM_IAP_HOST";
pub const PORT_VAR: &str = "WINRM_IAP_PORT";
pub const URL_VAR: &str = "WINRM_IAP_URL";

pub async fn execute(ctx: &CommandContext, args: RunArgs, shutdown: &mut Shutdown) -> Result<i32> {
	let mut session = ctx.open_session(shutdown).await?;
	let result = match endpoint(&session) {
		Ok(endpoint) => run_child(&endpoint, &args.command, shutdown).await,
		Err(err) => Err(err),
	};
	session.close().await;
	result
}

/// Runs `command` to completion with the endpoint exported, returning its exit
/// code. A signal kills the command and reports the interruption.
async fn run_child(endpoint: &EndpointReport, command: &[String], shutdown: &mut Shutdown) -> Result<i32> {
	let Some((program, rest)) = command.split_first() else {
		return Ok(0);
	};

	debug!(target = "iap.cli", program = %program, url = %endpoint.url, "running command through tunnel");
	let mut child = Command::new(program)
		.args(rest)
		.env(HOST_VAR, &endpoint.host)
		.env(PORT_VAR, endpoint.port.to_string())
		.env(URL_VAR, &endpoint.url)
		.kill_on_drop(true)
		.spawn()
		.map_err(|source| CliError::Spawn {
			program: PathBuf::from(program),
			source,
		})?;

	tokio::select! {
		status = child.wait() => Ok(exit_code(status?)),
		signal = shutdown.recv() => {
			warn!(target = "iap.cli", program = %program, signal, "interrupted; stopping command");
			if let Err(err) = child.start_kill() {
				debug!(target = "iap.cli", error = %err, "command already exited");
			}
			let _ = child.wait().await;
			Err(CliError::Interrupted(signal))
		}
	}
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
	if let Some(code) = status.code() {
		return code;
	}
	#[cfg(unix)]
	{
		use std::os::unix::process::ExitStatusExt;
		if let Some(signal) = status.signal() {
			return 128 + signal;
		}
	}
	1
}
