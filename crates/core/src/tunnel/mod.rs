//! Tunnel subprocess launch, port discovery, and teardown.

mod gcloud;
mod launcher;
pub mod scanner;
mod subprocess;
mod supervisor;

pub use gcloud::{GcloudIap, LOCAL_HOST_PORT_ARG, loopback_no_proxy};
pub use launcher::{LINE_BUFFER, LaunchedTunnel, ProcessControl, TunnelExit, TunnelLauncher};
pub use subprocess::{CommandLine, SubprocessLauncher, TunnelCommand};
pub use supervisor::{CAPTURED_LINE_LIMIT, DEFAULT_TERMINATE_GRACE, TunnelSupervisor};
