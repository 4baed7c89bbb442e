use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "winrm-iap")]
#[command(about = "Per-session IAP tunnels for WinRM endpoints")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug, -vvv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Host file (JSON) with tunnel options and the transport config
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// gcloud binary to run instead of the one on PATH or in the host file
	#[arg(long, global = true, value_name = "PATH")]
	pub gcloud: Option<PathBuf>,

	/// Output format
	#[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
	pub format: OutputFormat,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Validate the host file and show the tunnel command without starting it
	Config,

	/// Open a tunnel, report the local endpoint, then close it
	Connect(ConnectArgs),

	/// Run a command with the tunnel endpoint in its environment
	Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
	/// Keep the tunnel open until Ctrl-C
	#[arg(long)]
	pub hold: bool,
}

#[derive(Args, Debug)]
pub struct RunArgs {
	/// Program and arguments to run
	#[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true, value_name = "COMMAND")]
	pub command: Vec<String>,
}
