//! Per-session IAP TCP tunnels for WinRM transports.
//!
//! A remote-execution client that must reach a host without a public address
//! gets a [`Session`] per (host, worker). The session spawns
//! `gcloud compute start-iap-tunnel` bound to an OS-assigned local port, learns
//! that port from the tool's diagnostic output, waits until it accepts
//! connections, and rewrites the transport endpoint to `localhost:<port>`.
//! [`Session::close`] tears the tunnel down exactly once on every exit path.
//!
//! ```ignore
//! let host = HostConfig::load(path)?;
//! let launcher = Arc::new(GcloudIap::with_binary(host.tunnel.gcloud_path.clone()).launcher());
//! let mut session = Session::new(host.spec()?, host.transport.clone(), launcher);
//! session.connect().await?;
//! let endpoint = session.transport_config().map(TransportConfig::endpoint_url);
//! session.close().await;
//! ```

pub mod config;
pub mod error;
pub mod probe;
pub mod rewrite;
pub mod session;
pub mod testing;
pub mod transport;
pub mod tunnel;

pub use config::{DEFAULT_PROBE_TIMEOUT, DEFAULT_TUNNEL_READY_TIMEOUT, HostConfig, TunnelOptions, TunnelSpec};
pub use error::{Phase, Result, TunnelError};
pub use probe::ReadinessProber;
pub use rewrite::{LOOPBACK_HOST, rewrite};
pub use session::{Session, SessionState};
pub use transport::{CertValidation, CommandOutput, RemoteTransport, Secret, TransportConfig, TransportConnector};
pub use tunnel::{GcloudIap, SubprocessLauncher, TunnelExit, TunnelLauncher, TunnelSupervisor};
