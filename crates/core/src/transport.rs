//! Remote-execution transport boundary.
//!
//! This crate never speaks the remote-execution protocol itself. It owns the
//! endpoint fields of [`TransportConfig`] for the lifetime of a session and
//! hands the rewritten config to a caller-supplied [`TransportConnector`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default HTTPS port for WinRM.
pub const DEFAULT_WINRM_PORT: u16 = 5986;
/// Plain-HTTP WinRM port; selects `http` when no scheme is given.
pub const WINRM_HTTP_PORT: u16 = 5985;

/// Server certificate validation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertValidation {
	#[default]
	Validate,
	Ignore,
}

/// Password wrapper that never prints its contents.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for Secret {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("Secret(***)")
	}
}

/// Caller's remote-execution transport settings.
///
/// The tunnel rewrites only the endpoint fields: `host`, `port`, `scheme` and
/// `cert_validation`. `scheme` is pinned to its effective value so an implicit
/// `http` on 5985 survives the port change. Every other field passes through
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
	#[serde(alias = "remote_addr", alias = "ansible_host", alias = "ansible_winrm_host")]
	pub host: String,
	#[serde(default = "default_port", alias = "ansible_port", alias = "ansible_winrm_port")]
	pub port: u16,
	#[serde(default, alias = "ansible_winrm_scheme")]
	pub scheme: Option<String>,
	#[serde(default = "default_path", alias = "ansible_winrm_path")]
	pub path: String,
	#[serde(default, alias = "ansible_winrm_server_cert_validation")]
	pub cert_validation: CertValidation,
	#[serde(default, alias = "remote_user", alias = "ansible_user", alias = "ansible_winrm_user")]
	pub user: Option<String>,
	#[serde(default, alias = "remote_password", alias = "ansible_password", alias = "ansible_winrm_password")]
	pub password: Option<Secret>,
	/// Authentication transports to attempt (ntlm, kerberos, ...).
	#[serde(default, alias = "ansible_winrm_transport")]
	pub auth_transports: Vec<String>,
	#[serde(default, alias = "ansible_winrm_kinit_cmd")]
	pub kerberos_command: Option<String>,
	#[serde(default, alias = "ansible_winrm_kinit_args")]
	pub kinit_args: Option<String>,
	/// Environment variable names passed through to the kinit command.
	#[serde(default, alias = "ansible_winrm_kinit_env_vars")]
	pub kinit_env_vars: Vec<String>,
	#[serde(default, alias = "ansible_winrm_kinit_mode")]
	pub kerberos_mode: Option<String>,
	/// Operation and read timeout, in seconds.
	#[serde(default, alias = "ansible_winrm_connection_timeout")]
	pub connection_timeout: Option<u64>,
	#[serde(default, alias = "ansible_shell_type")]
	pub shell_type: Option<String>,
	#[serde(default)]
	pub extras: BTreeMap<String, String>,
}

fn default_port() -> u16 {
	DEFAULT_WINRM_PORT
}

fn default_path() -> String {
	"/wsman".to_string()
}

impl TransportConfig {
	/// Creates a config for `host` with every other field at its default.
	pub fn new(host: impl Into<String>) -> Self {
		Self {
			host: host.into(),
			port: DEFAULT_WINRM_PORT,
			scheme: None,
			path: default_path(),
			cert_validation: CertValidation::default(),
			user: None,
			password: None,
			auth_transports: Vec::new(),
			kerberos_command: None,
			kinit_args: None,
			kinit_env_vars: Vec::new(),
			kerberos_mode: None,
			connection_timeout: None,
			shell_type: None,
			extras: BTreeMap::new(),
		}
	}

	/// Effective URI scheme: explicit scheme, else `http` on 5985 and `https` otherwise.
	pub fn effective_scheme(&self) -> &str {
		match self.scheme.as_deref() {
			Some(scheme) => scheme,
			None if self.port == WINRM_HTTP_PORT => "http",
			None => "https",
		}
	}

	/// Renders the endpoint URL the transport should connect to.
	pub fn endpoint_url(&self) -> String {
		let path = if self.path.starts_with('/') { self.path.clone() } else { format!("/{}", self.path) };
		format!("{}://{}:{}{}", self.effective_scheme(), self.host, self.port, path)
	}
}

/// Result of a remote command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
	pub status_code: i32,
	pub stdout: Vec<u8>,
	pub stderr: Vec<u8>,
}

/// An open remote-execution channel over the rewritten endpoint.
#[async_trait]
pub trait RemoteTransport: Send {
	async fn exec_command(&mut self, command: &str, stdin: Option<&[u8]>) -> Result<CommandOutput>;

	async fn put_file(&mut self, local: &Path, remote: &str) -> Result<()>;

	async fn fetch_file(&mut self, remote: &str, local: &Path) -> Result<()>;

	/// Releases the remote shell. Errors are logged by the session, never propagated.
	async fn close(&mut self) -> Result<()>;
}

/// Opens a [`RemoteTransport`] against a (rewritten) transport config.
#[async_trait]
pub trait TransportConnector: Send + Sync {
	async fn open(&self, config: &TransportConfig) -> Result<Box<dyn RemoteTransport>>;
}
