use clap::Parser;
use tracing::debug;
use winrm_iap_cli::{cli::Cli, commands, logging};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	match commands::dispatch(cli).await {
		Ok(code) => std::process::exit(code),
		Err(err) => {
			debug!(target = "iap.cli", error = ?err, "command failed");
			eprintln!("error: {err}");
			std::process::exit(err.exit_code());
		}
	}
}
