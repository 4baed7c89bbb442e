//! Transport endpoint rewriting for tunnelled sessions.

use crate::transport::{CertValidation, TransportConfig};

/// Host the rewritten transport connects to; the tunnel listens here.
pub const LOOPBACK_HOST: &str = "localhost";

/// Points `config` at the local tunnel endpoint on `port`.
///
/// Certificate validation is forced off because the server certificate names
/// the remote host, never the loopback address. Credentials, auth schemes,
/// timeouts and shell settings pass through unchanged. An implicit scheme is
/// pinned first, since it is derived from the port being replaced.
pub fn rewrite(config: &TransportConfig, port: u16) -> TransportConfig {
	TransportConfig {
		host: LOOPBACK_HOST.to_string(),
		port,
		scheme: Some(config.effective_scheme().to_string()),
		cert_validation: CertValidation::Ignore,
		..config.clone()
	}
}
