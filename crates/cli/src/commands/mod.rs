mod config;
mod connect;
mod run;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};
use winrm_iap::{GcloudIap, HostConfig, Session, TunnelSpec};

use crate::cli::{Cli, Commands};
use crate::error::{CliError, Result};
use crate::output::OutputFormat;
use crate::signals::Shutdown;

/// Runs the selected command and returns the process exit code.
pub async fn dispatch(cli: Cli) -> Result<i32> {
	let mut shutdown = Shutdown::install()?;
	let ctx = CommandContext::load(cli.config, cli.gcloud, cli.format)?;
	match cli.command {
		Commands::Config => config::execute(&ctx).map(|()| 0),
		Commands::Connect(args) => connect::execute(&ctx, args, &mut shutdown).await.map(|()| 0),
		Commands::Run(args) => run::execute(&ctx, args, &mut shutdown).await,
	}
}

/// Everything a command needs, resolved once from the command line and host file.
pub struct CommandContext {
	pub host: HostConfig,
	pub spec: TunnelSpec,
	pub gcloud: GcloudIap,
	pub format: OutputFormat,
}

impl CommandContext {
	pub fn load(config: Option<PathBuf>, gcloud: Option<PathBuf>, format: OutputFormat) -> Result<Self> {
		let path = config.ok_or(CliError::MissingConfig)?;
		let host = HostConfig::load(&path)?;
		let spec = host.spec()?;
		let binary = gcloud.or_else(|| host.tunnel.gcloud_path.clone());
		debug!(target = "iap.cli", config = %path.display(), instance = spec.instance(), gcloud = ?binary, "host file loaded");

		Ok(Self {
			gcloud: GcloudIap::with_binary(binary),
			host,
			spec,
			format,
		})
	}

	pub fn session(&self) -> Session {
		let launcher = Arc::new(self.gcloud.clone().launcher());
		Session::new(self.spec.clone(), self.host.transport.clone(), launcher)
	}

	/// Connects a fresh session, giving up when `shutdown` fires. On failure
	/// or interruption the session is already closed.
	pub async fn open_session(&self, shutdown: &mut Shutdown) -> Result<Session> {
		let mut session = self.session();
		let outcome = tokio::select! {
			connected = session.connect() => connected.map_err(CliError::from),
			signal = shutdown.recv() => {
				warn!(target = "iap.cli", instance = self.spec.instance(), signal, "interrupted while establishing tunnel");
				Err(CliError::Interrupted(signal))
			}
		};

		if let Err(err) = outcome {
			session.close().await;
			return Err(err);
		}
		Ok(session)
	}
}
