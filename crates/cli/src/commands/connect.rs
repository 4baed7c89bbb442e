use tracing::{info, warn};
use winrm_iap::Session;

use super::CommandContext;
use crate::cli::ConnectArgs;
use crate::error::{CliError, Result};
use crate::output::{self, EndpointReport};
use crate::signals::Shutdown;

pub async fn execute(ctx: &CommandContext, args: ConnectArgs, shutdown: &mut Shutdown) -> Result<()> {
	let mut session = ctx.open_session(shutdown).await?;
	let result = report_and_hold(&mut session, ctx, args.hold, shutdown).await;
	session.close().await;
	result
}

/// With `hold`, a signal is the normal way to finish and is not an error.
async fn report_and_hold(session: &mut Session, ctx: &CommandContext, hold: bool, shutdown: &mut Shutdown) -> Result<()> {
	output::print(ctx.format, &endpoint(session)?)?;
	if !hold {
		return Ok(());
	}

	info!(target = "iap.cli", instance = session.spec().instance(), "holding tunnel open; press Ctrl-C to close");
	tokio::select! {
		signal = shutdown.recv() => {
			info!(target = "iap.cli", instance = session.spec().instance(), signal, "closing held tunnel");
		}
		exit = session.wait_tunnel_exit() => {
			warn!(target = "iap.cli", instance = session.spec().instance(), exit = ?exit, "tunnel exited while held open");
		}
	}
	Ok(())
}

pub(super) fn endpoint(session: &Session) -> Result<EndpointReport> {
	let config = session
		.transport_config()
		.ok_or_else(|| CliError::Tunnel(winrm_iap::TunnelError::Programming("session is not ready".to_string())))?;
	Ok(EndpointReport {
		instance: session.spec().instance().to_string(),
		host: config.host.clone(),
		port: config.port,
		url: config.endpoint_url(),
		pid: session.tunnel_pid(),
	})
}
