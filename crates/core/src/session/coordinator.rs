//! Session coordinator: one tunnel, one rewritten transport, one teardown.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::state::SessionState;
use crate::config::TunnelSpec;
use crate::error::{Phase, Result, TunnelError};
use crate::probe::ReadinessProber;
use crate::rewrite::rewrite;
use crate::transport::{CommandOutput, RemoteTransport, TransportConfig, TransportConnector};
use crate::tunnel::{DEFAULT_TERMINATE_GRACE, TunnelExit, TunnelLauncher, TunnelSupervisor};

/// Public entry point used once per (host, worker) pair.
///
/// Owns at most one tunnel process. [`Session::close`] is the single cleanup
/// path and is safe to call from any state, any number of times.
pub struct Session {
	spec: TunnelSpec,
	transport_config: TransportConfig,
	launcher: Arc<dyn TunnelLauncher>,
	connector: Option<Arc<dyn TransportConnector>>,
	prober: ReadinessProber,
	terminate_grace: Duration,
	supervisor: TunnelSupervisor,
	state: SessionState,
	rewritten: Option<TransportConfig>,
	transport: Option<Box<dyn RemoteTransport>>,
}

impl Session {
	/// Creates an idle, tunnel-only session.
	pub fn new(spec: TunnelSpec, transport_config: TransportConfig, launcher: Arc<dyn TunnelLauncher>) -> Self {
		Self {
			supervisor: TunnelSupervisor::new(Arc::clone(&launcher)),
			spec,
			transport_config,
			launcher,
			connector: None,
			prober: ReadinessProber::default(),
			terminate_grace: DEFAULT_TERMINATE_GRACE,
			state: SessionState::Idle,
			rewritten: None,
			transport: None,
		}
	}

	/// Opens a remote transport through the tunnel once it is ready.
	pub fn with_connector(mut self, connector: Arc<dyn TransportConnector>) -> Self {
		self.connector = Some(connector);
		self
	}

	pub fn with_prober(mut self, prober: ReadinessProber) -> Self {
		self.prober = prober;
		self
	}

	/// Sets how long the tunnel gets to exit after SIGTERM during teardown.
	pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
		self.terminate_grace = grace;
		self.supervisor = TunnelSupervisor::new(Arc::clone(&self.launcher)).with_terminate_grace(grace);
		self
	}

	pub fn state(&self) -> SessionState {
		self.state
	}

	pub fn spec(&self) -> &TunnelSpec {
		&self.spec
	}

	/// Local tunnel port, once discovered.
	pub fn local_port(&self) -> Option<u16> {
		self.supervisor.port()
	}

	/// OS pid of the live tunnel process.
	pub fn tunnel_pid(&self) -> Option<u32> {
		self.supervisor.pid()
	}

	/// Diagnostic output captured from the tunnel before its port was announced.
	pub fn tunnel_output(&self) -> String {
		self.supervisor.captured_output()
	}

	/// Resolves when the tunnel process exits on its own. Pending forever when
	/// no tunnel is running, so it is meant for `select!` against other events.
	pub async fn wait_tunnel_exit(&mut self) -> Option<TunnelExit> {
		self.supervisor.wait_exit().await
	}

	/// Transport config pointed at the tunnel; present only while `Ready`.
	pub fn transport_config(&self) -> Option<&TransportConfig> {
		self.rewritten.as_ref().filter(|_| self.state == SessionState::Ready)
	}

	/// Establishes the tunnel and, with a connector, the remote transport.
	///
	/// Valid only from `Idle`. Any establishment failure tears the tunnel down
	/// before returning and leaves the session `Failed`.
	pub async fn connect(&mut self) -> Result<()> {
		if self.state != SessionState::Idle {
			return Err(TunnelError::Programming(format!(
				"connect() called on a session in state {}; sessions connect once, create a new one instead",
				self.state
			)));
		}

		match self.establish().await {
			Ok(port) => {
				self.state = SessionState::Ready;
				info!(
					target = "iap.session",
					instance = self.spec.instance(),
					port,
					remote_port = self.spec.remote_port(),
					"tunnel ready on localhost:{} -> {}:{}",
					port,
					self.spec.instance(),
					self.spec.remote_port()
				);
				Ok(())
			}
			Err(err) => {
				error!(
					target = "iap.session",
					instance = self.spec.instance(),
					phase = %err.phase().map_or_else(|| "connect".to_string(), |p| p.to_string()),
					error = %err,
					"tunnel session failed"
				);
				self.state = SessionState::Failed;
				self.transport = None;
				self.supervisor.terminate().await;
				Err(err)
			}
		}
	}

	async fn establish(&mut self) -> Result<u16> {
		self.state = SessionState::Launching;
		self.supervisor.launch(&self.spec)?;

		self.state = SessionState::AwaitingPort;
		let port = self.supervisor.await_port(self.spec.ready_timeout()).await?;

		self.state = SessionState::Probing;
		tokio::select! {
			ready = self.prober.probe(port, self.spec.probe_timeout()) => ready?,
			Some(exit) = self.supervisor.wait_exit() => {
				return Err(self.supervisor.exited_during(Phase::Readiness, exit));
			}
		}

		let rewritten = rewrite(&self.transport_config, port);
		debug!(target = "iap.session", instance = self.spec.instance(), endpoint = %rewritten.endpoint_url(), "transport rewritten");

		if let Some(connector) = &self.connector {
			self.transport = Some(connector.open(&rewritten).await?);
		}
		self.rewritten = Some(rewritten);
		Ok(port)
	}

	/// Runs `command` on the remote host over the tunnelled transport.
	pub async fn exec_command(&mut self, command: &str, stdin: Option<&[u8]>) -> Result<CommandOutput> {
		self.ready_transport()?.exec_command(command, stdin).await
	}

	/// Copies a local file to the remote host.
	pub async fn put_file(&mut self, local: &Path, remote: &str) -> Result<()> {
		self.ready_transport()?.put_file(local, remote).await
	}

	/// Copies a remote file to the local host.
	pub async fn fetch_file(&mut self, remote: &str, local: &Path) -> Result<()> {
		self.ready_transport()?.fetch_file(remote, local).await
	}

	fn ready_transport(&mut self) -> Result<&mut Box<dyn RemoteTransport>> {
		if self.state != SessionState::Ready {
			return Err(TunnelError::Programming(format!(
				"remote operation issued on a session in state {}",
				self.state
			)));
		}
		self.transport
			.as_mut()
			.ok_or_else(|| TunnelError::Programming("session has no transport connector; it only provides a tunnel".to_string()))
	}

	/// Releases the transport and tears down the tunnel. Never fails; safe in
	/// any state and idempotent.
	pub async fn close(&mut self) {
		if self.state == SessionState::Closed {
			return;
		}

		let prior = self.state;
		self.state = SessionState::Closing;

		if let Some(mut transport) = self.transport.take() {
			if let Err(err) = transport.close().await {
				warn!(target = "iap.session", instance = self.spec.instance(), error = %err, "transport close failed");
			}
		}

		let exit = self.supervisor.terminate().await;
		self.rewritten = None;
		self.state = SessionState::Closed;
		debug!(
			target = "iap.session",
			instance = self.spec.instance(),
			from = %prior,
			exit = ?exit,
			"session closed"
		);
	}

	/// Closes this session and connects a fresh one built from the same inputs.
	pub async fn reconnect(mut self) -> Result<Session> {
		self.close().await;

		let mut next = Session {
			supervisor: TunnelSupervisor::new(Arc::clone(&self.launcher)).with_terminate_grace(self.terminate_grace),
			spec: self.spec.clone(),
			transport_config: self.transport_config.clone(),
			launcher: Arc::clone(&self.launcher),
			connector: self.connector.clone(),
			prober: self.prober.clone(),
			terminate_grace: self.terminate_grace,
			state: SessionState::Idle,
			rewritten: None,
			transport: None,
		};
		next.connect().await?;
		Ok(next)
	}
}

impl Drop for Session {
	fn drop(&mut self) {
		if self.supervisor.is_running() {
			warn!(
				target = "iap.session",
				instance = self.spec.instance(),
				state = %self.state,
				"session dropped without close(); tunnel process is killed on drop"
			);
		}
	}
}
