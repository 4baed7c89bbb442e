//! Caller-facing tunnel options and the immutable per-session tunnel spec.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunnelError};
use crate::transport::TransportConfig;

/// Port discovery timeout applied when none is configured.
pub const DEFAULT_TUNNEL_READY_TIMEOUT: Duration = Duration::from_secs(30);
/// Readiness probe timeout applied when none is configured.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunnel options as supplied by the caller (host file or inventory variables).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelOptions {
	/// Instance to tunnel to; falls back to the transport host.
	#[serde(default, alias = "gcp_instance_name", alias = "ansible_gcp_instance_name")]
	pub instance_name: Option<String>,
	#[serde(default, alias = "gcp_project", alias = "ansible_gcp_project")]
	pub project: Option<String>,
	#[serde(default, alias = "gcp_zone", alias = "ansible_gcp_zone")]
	pub zone: Option<String>,
	#[serde(default, alias = "gcp_iap_service_account", alias = "ansible_gcp_iap_service_account")]
	pub impersonate_service_account: Option<String>,
	/// Seconds to wait for the tunnel to announce its port.
	#[serde(
		default,
		alias = "iap_tunnel_timeout",
		alias = "ansible_iap_tunnel_timeout",
		alias = "tunnel_ready_timeout_seconds"
	)]
	pub tunnel_ready_timeout: Option<u64>,
	/// Seconds to wait for the announced port to accept connections.
	#[serde(default)]
	pub probe_timeout: Option<u64>,
	/// Explicit path to the `gcloud` binary.
	#[serde(default)]
	pub gcloud_path: Option<PathBuf>,
}

impl TunnelOptions {
	/// Validates these options against `transport` and builds the session's tunnel spec.
	pub fn to_spec(&self, transport: &TransportConfig) -> Result<TunnelSpec> {
		let instance = non_empty(self.instance_name.as_deref())
			.or_else(|| non_empty(Some(transport.host.as_str())))
			.ok_or_else(|| TunnelError::Config("instance_name is required (no transport host to fall back to)".to_string()))?;
		let project = non_empty(self.project.as_deref()).ok_or_else(|| TunnelError::Config("project is required".to_string()))?;
		let zone = non_empty(self.zone.as_deref()).ok_or_else(|| TunnelError::Config("zone is required".to_string()))?;
		if transport.port == 0 {
			return Err(TunnelError::Config("remote port must be non-zero".to_string()));
		}

		Ok(TunnelSpec::new(instance, project, zone)
			.with_remote_port(transport.port)
			.with_impersonation(non_empty(self.impersonate_service_account.as_deref()).map(str::to_string))
			.with_ready_timeout(seconds_or(self.tunnel_ready_timeout, DEFAULT_TUNNEL_READY_TIMEOUT))
			.with_probe_timeout(seconds_or(self.probe_timeout, DEFAULT_PROBE_TIMEOUT)))
	}
}

fn non_empty(value: Option<&str>) -> Option<&str> {
	value.map(str::trim).filter(|v| !v.is_empty())
}

// Zero means "unset", matching how inventory tooling treats falsy values.
fn seconds_or(value: Option<u64>, default: Duration) -> Duration {
	match value {
		Some(secs) if secs > 0 => Duration::from_secs(secs),
		_ => default,
	}
}

/// Immutable description of what one session tunnels to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
	instance: String,
	project: String,
	zone: String,
	remote_port: u16,
	impersonate_service_account: Option<String>,
	ready_timeout: Duration,
	probe_timeout: Duration,
}

impl TunnelSpec {
	/// Creates a spec with the default WinRM port and timeouts.
	pub fn new(instance: impl Into<String>, project: impl Into<String>, zone: impl Into<String>) -> Self {
		Self {
			instance: instance.into(),
			project: project.into(),
			zone: zone.into(),
			remote_port: crate::transport::DEFAULT_WINRM_PORT,
			impersonate_service_account: None,
			ready_timeout: DEFAULT_TUNNEL_READY_TIMEOUT,
			probe_timeout: DEFAULT_PROBE_TIMEOUT,
		}
	}

	pub fn with_remote_port(mut self, port: u16) -> Self {
		self.remote_port = port;
		self
	}

	pub fn with_impersonation(mut self, account: Option<String>) -> Self {
		self.impersonate_service_account = account;
		self
	}

	pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
		self.ready_timeout = timeout;
		self
	}

	pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
		self.probe_timeout = timeout;
		self
	}

	pub fn instance(&self) -> &str {
		&self.instance
	}

	pub fn project(&self) -> &str {
		&self.project
	}

	pub fn zone(&self) -> &str {
		&self.zone
	}

	pub fn remote_port(&self) -> u16 {
		self.remote_port
	}

	pub fn impersonate_service_account(&self) -> Option<&str> {
		self.impersonate_service_account.as_deref()
	}

	/// Budget for the tunnel to announce its bound port.
	pub fn ready_timeout(&self) -> Duration {
		self.ready_timeout
	}

	/// Budget for the announced port to accept a connection.
	pub fn probe_timeout(&self) -> Duration {
		self.probe_timeout
	}
}

/// On-disk host file: tunnel options alongside the transport config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
	#[serde(flatten)]
	pub tunnel: TunnelOptions,
	pub transport: TransportConfig,
}

impl HostConfig {
	/// Reads and parses a JSON host file.
	pub fn load(path: &Path) -> Result<Self> {
		let content = fs::read_to_string(path)
			.map_err(|e| TunnelError::Config(format!("failed to read host file {}: {}", path.display(), e)))?;
		Self::from_json(&content).map_err(|e| match e {
			TunnelError::Config(msg) => TunnelError::Config(format!("{}: {}", path.display(), msg)),
			other => other,
		})
	}

	/// Parses a JSON host document.
	pub fn from_json(content: &str) -> Result<Self> {
		serde_json::from_str(content).map_err(|e| TunnelError::Config(format!("invalid host file: {}", e)))
	}

	pub fn spec(&self) -> Result<TunnelSpec> {
		self.tunnel.to_spec(&self.transport)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn options() -> TunnelOptions {
		TunnelOptions {
			project: Some("armory-ripcord-staging".into()),
			zone: Some("us-east4-a".into()),
			..Default::default()
		}
	}

	#[test]
	fn instance_falls_back_to_transport_host() {
		let spec = options().to_spec(&TransportConfig::new("ripcord-staging-win-01")).unwrap();
		assert_eq!(spec.instance(), "ripcord-staging-win-01");
		assert_eq!(spec.remote_port(), 5986);
		assert_eq!(spec.ready_timeout(), DEFAULT_TUNNEL_READY_TIMEOUT);
		assert_eq!(spec.probe_timeout(), DEFAULT_PROBE_TIMEOUT);
	}

	#[test]
	fn explicit_instance_wins() {
		let mut opts = options();
		opts.instance_name = Some("vm1".into());
		let spec = opts.to_spec(&TransportConfig::new("10.0.0.4")).unwrap();
		assert_eq!(spec.instance(), "vm1");
	}

	#[test]
	fn missing_project_or_zone_is_a_config_error() {
		let mut opts = options();
		opts.project = None;
		let err = opts.to_spec(&TransportConfig::new("vm1")).unwrap_err();
		assert!(matches!(err, TunnelError::Config(ref m) if m.contains("project")));

		let mut opts = options();
		opts.zone = Some("  ".into());
		let err = opts.to_spec(&TransportConfig::new("vm1")).unwrap_err();
		assert!(matches!(err, TunnelError::Config(ref m) if m.contains("zone")));
	}

	#[test]
	fn zero_timeout_means_default() {
		let mut opts = options();
		opts.tunnel_ready_timeout = Some(0);
		opts.probe_timeout = Some(3);
		let spec = opts.to_spec(&TransportConfig::new("vm1")).unwrap();
		assert_eq!(spec.ready_timeout(), DEFAULT_TUNNEL_READY_TIMEOUT);
		assert_eq!(spec.probe_timeout(), Duration::from_secs(3));
	}

	#[test]
	fn host_file_accepts_inventory_variable_names() {
		let host = HostConfig::from_json(
			r#"{
  "ansible_gcp_project": "armory-ripcord-staging",
  "gcp_zone": "us-east4-a",
  "gcp_iap_service_account": "iap@armory.iam.gserviceaccount.com",
  "ansible_iap_tunnel_timeout": 45,
  "transport": {
    "ansible_host": "ripcord-staging-win-01",
    "ansible_winrm_transport": ["ntlm"],
    "ansible_user": "Administrator"
  }
}"#,
		)
		.unwrap();
		let spec = host.spec().unwrap();
		assert_eq!(spec.project(), "armory-ripcord-staging");
		assert_eq!(spec.zone(), "us-east4-a");
		assert_eq!(spec.impersonate_service_account(), Some("iap@armory.iam.gserviceaccount.com"));
		assert_eq!(spec.ready_timeout(), Duration::from_secs(45));
		assert_eq!(host.transport.user.as_deref(), Some("Administrator"));
	}

	#[test]
	fn malformed_host_file_is_a_config_error() {
		let err = HostConfig::from_json("{ not json").unwrap_err();
		assert!(matches!(err, TunnelError::Config(_)));
	}

	#[test]
	fn load_reads_host_file_and_names_it_in_errors() -> anyhow::Result<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("ripcord.json");
		fs::write(&path, r#"{"project": "p", "zone": "z", "transport": {"host": "vm1", "port": 5985}}"#)?;
		let host = HostConfig::load(&path)?;
		assert_eq!(host.spec()?.remote_port(), 5985);

		let missing = dir.path().join("absent.json");
		let err = HostConfig::load(&missing).unwrap_err();
		assert!(err.to_string().contains("absent.json"), "{err}");
		Ok(())
	}
}
