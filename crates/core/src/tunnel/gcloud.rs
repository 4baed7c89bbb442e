//! `gcloud compute start-iap-tunnel` command construction.

use std::path::PathBuf;

use super::subprocess::{CommandLine, SubprocessLauncher, TunnelCommand};
use crate::config::TunnelSpec;
use crate::error::Result;

/// Local bind requested from gcloud. Port 0 makes the OS pick a free port,
/// so parallel workers never race for the same one.
pub const LOCAL_HOST_PORT_ARG: &str = "--local-host-port=localhost:0";

const NO_PROXY_VAR: &str = "NO_PROXY";
const LOOPBACK_NO_PROXY: &str = "localhost";

/// Builds IAP tunnel invocations of the Google Cloud CLI.
#[derive(Debug, Clone, Default)]
pub struct GcloudIap {
	binary: Option<PathBuf>,
}

impl GcloudIap {
	/// Uses `gcloud` resolved from `PATH` at launch time.
	pub fn new() -> Self {
		Self::default()
	}

	/// Uses an explicit gcloud binary (or any compatible wrapper).
	pub fn with_binary(binary: Option<PathBuf>) -> Self {
		Self { binary }
	}

	/// Wraps this command in a subprocess launcher.
	pub fn launcher(self) -> SubprocessLauncher<Self> {
		SubprocessLauncher::new(self)
	}

	fn resolve_binary(&self) -> PathBuf {
		if let Some(binary) = &self.binary {
			return binary.clone();
		}
		// An unresolvable name still goes to spawn, which reports the launch error.
		which::which("gcloud").unwrap_or_else(|_| PathBuf::from("gcloud"))
	}
}

impl TunnelCommand for GcloudIap {
	fn command_line(&self, spec: &TunnelSpec) -> Result<CommandLine> {
		let mut args = vec![
			"compute".to_string(),
			"start-iap-tunnel".to_string(),
			spec.instance().to_string(),
			spec.remote_port().to_string(),
			LOCAL_HOST_PORT_ARG.to_string(),
			"--zone".to_string(),
			spec.zone().to_string(),
			"--project".to_string(),
			spec.project().to_string(),
		];

		if let Some(account) = spec.impersonate_service_account() {
			args.push("--impersonate-service-account".to_string());
			args.push(account.to_string());
		}

		let inherited = std::env::var(NO_PROXY_VAR).ok();
		Ok(CommandLine {
			program: self.resolve_binary(),
			args,
			env: vec![(NO_PROXY_VAR.to_string(), loopback_no_proxy(inherited.as_deref()))],
		})
	}
}

/// Extends an inherited `NO_PROXY` so the loopback host always bypasses proxies.
///
/// System proxy auto-detection can deadlock in forked workers; excluding the
/// loopback host keeps it out of the picture for the tunnel's local endpoint.
pub fn loopback_no_proxy(inherited: Option<&str>) -> String {
	match inherited.map(str::trim).filter(|v| !v.is_empty()) {
		None => LOOPBACK_NO_PROXY.to_string(),
		Some(existing) if existing.split(',').any(|entry| entry.trim() == LOOPBACK_NO_PROXY) => existing.to_string(),
		Some(existing) => format!("{},{}", existing, LOOPBACK_NO_PROXY),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn spec() -> TunnelSpec {
		TunnelSpec::new("ripcord-staging-win-01", "armory-ripcord-staging", "us-east4-a")
	}

	#[test]
	fn command_requests_os_assigned_port() {
		let line = GcloudIap::with_binary(Some("/opt/gcloud/bin/gcloud".into())).command_line(&spec()).unwrap();
		assert_eq!(line.program, PathBuf::from("/opt/gcloud/bin/gcloud"));
		assert_eq!(
			line.args,
			vec![
				"compute",
				"start-iap-tunnel",
				"ripcord-staging-win-01",
				"5986",
				"--local-host-port=localhost:0",
				"--zone",
				"us-east4-a",
				"--project",
				"armory-ripcord-staging",
			]
		);
	}

	#[test]
	fn impersonation_flag_is_appended() {
		let spec = spec().with_impersonation(Some("iap@armory.iam.gserviceaccount.com".into()));
		let line = GcloudIap::with_binary(Some("gcloud".into())).command_line(&spec).unwrap();
		let tail: Vec<&str> = line.args.iter().rev().take(2).rev().map(String::as_str).collect();
		assert_eq!(tail, vec!["--impersonate-service-account", "iap@armory.iam.gserviceaccount.com"]);
	}

	#[test]
	fn proxy_override_is_scoped_to_child_env() {
		let line = GcloudIap::with_binary(Some("gcloud".into())).command_line(&spec()).unwrap();
		assert!(line.env.iter().any(|(k, v)| k == "NO_PROXY" && v.split(',').any(|e| e == "localhost")));
	}

	#[test]
	fn no_proxy_merges_with_inherited_value() {
		assert_eq!(loopback_no_proxy(None), "localhost");
		assert_eq!(loopback_no_proxy(Some("")), "localhost");
		assert_eq!(loopback_no_proxy(Some(".corp.example")), ".corp.example,localhost");
		assert_eq!(loopback_no_proxy(Some("127.0.0.1, localhost")), "127.0.0.1, localhost");
	}

	#[test]
	fn display_renders_program_and_args() {
		let line = GcloudIap::with_binary(Some("gcloud".into())).command_line(&TunnelSpec::new("vm1", "p", "z")).unwrap();
		assert_eq!(
			line.to_string(),
			"gcloud compute start-iap-tunnel vm1 5986 --local-host-port=localhost:0 --zone z --project p"
		);
	}
}
