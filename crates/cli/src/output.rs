//! Result rendering for stdout.

use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;
use winrm_iap::tunnel::CommandLine;
use winrm_iap::{CertValidation, TransportConfig, TunnelSpec};

use crate::error::Result;

/// Output format for command results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
	/// `key: value` lines
	#[default]
	Text,
	/// A single JSON document
	Json,
}

impl std::fmt::Display for OutputFormat {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			OutputFormat::Text => write!(f, "text"),
			OutputFormat::Json => write!(f, "json"),
		}
	}
}

/// Transport settings safe to print; credentials are left out.
#[derive(Debug, Serialize)]
pub struct TransportSummary {
	pub host: String,
	pub port: u16,
	pub url: String,
	pub cert_validation: CertValidation,
	pub user: Option<String>,
	pub auth_transports: Vec<String>,
}

impl From<&TransportConfig> for TransportSummary {
	fn from(config: &TransportConfig) -> Self {
		Self {
			host: config.host.clone(),
			port: config.port,
			url: config.endpoint_url(),
			cert_validation: config.cert_validation,
			user: config.user.clone(),
			auth_transports: config.auth_transports.clone(),
		}
	}
}

#[derive(Debug, Serialize)]
pub struct ConfigReport {
	pub instance: String,
	pub project: String,
	pub zone: String,
	pub remote_port: u16,
	pub impersonate_service_account: Option<String>,
	pub tunnel_ready_timeout_secs: u64,
	pub probe_timeout_secs: u64,
	pub command: CommandLine,
	pub transport: TransportSummary,
}

impl ConfigReport {
	pub fn new(spec: &TunnelSpec, command: CommandLine, transport: &TransportConfig) -> Self {
		Self {
			instance: spec.instance().to_string(),
			project: spec.project().to_string(),
			zone: spec.zone().to_string(),
			remote_port: spec.remote_port(),
			impersonate_service_account: spec.impersonate_service_account().map(str::to_string),
			tunnel_ready_timeout_secs: spec.ready_timeout().as_secs(),
			probe_timeout_secs: spec.probe_timeout().as_secs(),
			command,
			transport: transport.into(),
		}
	}
}

/// Where a ready tunnel can be reached.
#[derive(Debug, Serialize)]
pub struct EndpointReport {
	pub instance: String,
	pub host: String,
	pub port: u16,
	pub url: String,
	pub pid: Option<u32>,
}

pub fn print<T: Serialize>(format: OutputFormat, value: &T) -> Result<()> {
	println!("{}", render(format, value)?);
	Ok(())
}

pub fn render<T: Serialize>(format: OutputFormat, value: &T) -> Result<String> {
	let value = serde_json::to_value(value)?;
	Ok(match format {
		OutputFormat::Json => serde_json::to_string_pretty(&value)?,
		OutputFormat::Text => {
			let mut lines = Vec::new();
			flatten("", &value, &mut lines);
			lines.join("\n")
		}
	})
}

fn flatten(prefix: &str, value: &Value, lines: &mut Vec<String>) {
	match value {
		Value::Null => {}
		Value::Object(map) => {
			for (key, value) in map {
				let key = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
				flatten(&key, value, lines);
			}
		}
		Value::Array(items) if items.iter().all(|v| !v.is_object() && !v.is_array()) => {
			let joined: Vec<String> = items.iter().map(scalar).collect();
			lines.push(format!("{prefix}: {}", joined.join(" ")));
		}
		Value::Array(items) => {
			for (i, item) in items.iter().enumerate() {
				flatten(&format!("{prefix}.{i}"), item, lines);
			}
		}
		other => lines.push(format!("{prefix}: {}", scalar(other))),
	}
}

fn scalar(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		other => other.to_string(),
	}
}
