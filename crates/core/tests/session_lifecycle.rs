//! Session coordinator scenarios against the scripted launcher.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use iap_runtime::port_available;
use winrm_iap::testing::{ScriptedLauncher, Step};
use winrm_iap::{
	CertValidation, CommandOutput, Phase, ReadinessProber, RemoteTransport, Secret, Session, SessionState, TransportConfig, TransportConnector,
	TunnelError, TunnelSpec,
};

fn spec() -> TunnelSpec {
	TunnelSpec::new("vm1", "armory-ripcord-staging", "us-east4-a")
}

fn transport() -> TransportConfig {
	let mut config = TransportConfig::new("vm1");
	config.user = Some("Administrator".into());
	config.password = Some(Secret::new("hunter2"));
	config.auth_transports = vec!["ntlm".into()];
	config.shell_type = Some("powershell".into());
	config
}

fn session(launcher: &ScriptedLauncher, spec: TunnelSpec) -> Session {
	Session::new(spec, transport(), Arc::new(launcher.clone()))
		.with_prober(ReadinessProber::default().with_interval(Duration::from_millis(50)))
		.with_terminate_grace(Duration::from_millis(200))
}

fn closed_port() -> u16 {
	let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
	listener.local_addr().unwrap().port()
}

#[derive(Default)]
struct Recorded {
	opened: Mutex<Vec<TransportConfig>>,
	commands: Mutex<Vec<String>>,
	files: Mutex<Vec<(String, PathBuf)>>,
	closed: AtomicUsize,
}

struct RecordingConnector(Arc<Recorded>);

struct RecordingTransport(Arc<Recorded>);

#[async_trait]
impl TransportConnector for RecordingConnector {
	async fn open(&self, config: &TransportConfig) -> winrm_iap::Result<Box<dyn RemoteTransport>> {
		self.0.opened.lock().unwrap().push(config.clone());
		Ok(Box::new(RecordingTransport(Arc::clone(&self.0))))
	}
}

#[async_trait]
impl RemoteTransport for RecordingTransport {
	async fn exec_command(&mut self, command: &str, _stdin: Option<&[u8]>) -> winrm_iap::Result<CommandOutput> {
		self.0.commands.lock().unwrap().push(command.to_string());
		Ok(CommandOutput {
			status_code: 0,
			stdout: command.as_bytes().to_vec(),
			stderr: Vec::new(),
		})
	}

	async fn put_file(&mut self, local: &Path, remote: &str) -> winrm_iap::Result<()> {
		self.0.files.lock().unwrap().push((remote.to_string(), local.to_path_buf()));
		Ok(())
	}

	async fn fetch_file(&mut self, remote: &str, local: &Path) -> winrm_iap::Result<()> {
		self.0.files.lock().unwrap().push((remote.to_string(), local.to_path_buf()));
		Ok(())
	}

	async fn close(&mut self) -> winrm_iap::Result<()> {
		self.0.closed.fetch_add(1, Ordering::SeqCst);
		Err(TunnelError::Transport("shell already gone".into()))
	}
}

#[tokio::test]
async fn happy_path_rewrites_transport_to_tunnel() {
	let launcher = ScriptedLauncher::new(vec![Step::Sleep(Duration::from_millis(200)), Step::AnnounceBoundPort]);
	let mut session = session(&launcher, spec());
	assert_eq!(session.state(), SessionState::Idle);

	session.connect().await.unwrap();
	assert_eq!(session.state(), SessionState::Ready);

	let port = session.local_port().expect("port discovered");
	let config = session.transport_config().expect("rewritten config while ready");
	assert_eq!(config.host, "localhost");
	assert_eq!(config.port, port);
	assert_eq!(config.cert_validation, CertValidation::Ignore);
	assert_eq!(config.user.as_deref(), Some("Administrator"));
	assert_eq!(config.password, Some(Secret::new("hunter2")));
	assert_eq!(config.shell_type.as_deref(), Some("powershell"));

	session.close().await;
	assert_eq!(session.state(), SessionState::Closed);
	assert!(session.transport_config().is_none());
	assert_eq!(launcher.live(), 0);
}

#[tokio::test]
async fn announced_port_54321_becomes_the_transport_port() {
	if !port_available(54321) {
		eprintln!("port 54321 busy on this host; skipping");
		return;
	}
	let listener = tokio::net::TcpListener::bind("127.0.0.1:54321").await.unwrap();

	let launcher = ScriptedLauncher::new(vec![Step::Sleep(Duration::from_millis(200)), Step::emit("Listening on port [54321].")]);
	let mut session = session(&launcher, spec());
	session.connect().await.unwrap();
	assert_eq!(session.transport_config().map(|c| c.port), Some(54321));

	session.close().await;
	drop(listener);
}

#[tokio::test]
async fn missing_port_line_times_out_and_close_leaves_nothing_running() {
	let launcher = ScriptedLauncher::new(vec![Step::emit("Testing if tunnel connection works.")]);
	let mut session = session(&launcher, spec().with_ready_timeout(Duration::from_secs(1)));

	let started = Instant::now();
	let err = session.connect().await.unwrap_err();
	let elapsed = started.elapsed();

	assert!(matches!(err, TunnelError::TunnelTimeout { .. }), "got {err:?}");
	assert_eq!(err.phase(), Some(Phase::PortDiscovery));
	assert!(elapsed >= Duration::from_millis(950) && elapsed < Duration::from_secs(3), "took {elapsed:?}");
	assert_eq!(session.state(), SessionState::Failed);

	session.close().await;
	assert_eq!(session.state(), SessionState::Closed);
	assert_eq!(launcher.live(), 0);
}

#[tokio::test]
async fn early_exit_surfaces_diagnostic_text() {
	let launcher = ScriptedLauncher::new(vec![Step::emit("permission denied"), Step::Exit(1)]);
	let mut session = session(&launcher, spec());

	let err = session.connect().await.unwrap_err();
	assert!(matches!(err, TunnelError::TunnelExited { phase: Phase::PortDiscovery, .. }), "got {err:?}");
	assert_eq!(err.captured_output().map(str::trim), Some("permission denied"));
	assert!(session.tunnel_output().contains("permission denied"));

	session.close().await;
	assert_eq!(launcher.live(), 0);
}

#[tokio::test]
async fn unconnectable_port_is_not_ready() {
	let port = closed_port();
	let launcher = ScriptedLauncher::new(vec![Step::emit(format!("Listening on port [{port}]."))]);
	let mut session = session(&launcher, spec().with_probe_timeout(Duration::from_millis(400)));

	let err = session.connect().await.unwrap_err();
	assert!(matches!(err, TunnelError::NotReady { port: p, .. } if p == port), "got {err:?}");
	assert_eq!(err.phase(), Some(Phase::Readiness));
	assert_eq!(session.state(), SessionState::Failed);
	// Establishment failures tear the tunnel down before returning.
	assert_eq!(launcher.live(), 0);

	session.close().await;
}

#[tokio::test]
async fn tunnel_dying_while_probing_is_reported_as_exit() {
	let port = closed_port();
	let launcher = ScriptedLauncher::new(vec![
		Step::emit(format!("Listening on port [{port}].")),
		Step::Sleep(Duration::from_millis(200)),
		Step::Exit(2),
	]);
	let mut session = session(&launcher, spec().with_probe_timeout(Duration::from_secs(10)));

	let started = Instant::now();
	let err = session.connect().await.unwrap_err();
	assert!(matches!(err, TunnelError::TunnelExited { phase: Phase::Readiness, .. }), "got {err:?}");
	assert!(started.elapsed() < Duration::from_secs(5));
	session.close().await;
}

#[tokio::test]
async fn connect_twice_is_a_programming_error() {
	let launcher = ScriptedLauncher::new(vec![Step::AnnounceBoundPort]);
	let mut session = session(&launcher, spec());
	session.connect().await.unwrap();

	let err = session.connect().await.unwrap_err();
	assert!(matches!(err, TunnelError::Programming(_)));
	assert_eq!(err.phase(), None);
	assert_eq!(session.state(), SessionState::Ready);
	assert_eq!(launcher.launched(), 1);

	session.close().await;
	let err = session.connect().await.unwrap_err();
	assert!(matches!(err, TunnelError::Programming(_)));
	assert_eq!(launcher.launched(), 1);
}

#[tokio::test]
async fn close_is_idempotent_from_idle() {
	let launcher = ScriptedLauncher::new(vec![Step::AnnounceBoundPort]);
	let mut session = session(&launcher, spec());
	session.close().await;
	session.close().await;
	assert_eq!(session.state(), SessionState::Closed);
	assert_eq!(launcher.launched(), 0);
}

#[tokio::test]
async fn cancelled_connect_is_cleaned_up_by_close() {
	let launcher = ScriptedLauncher::new(vec![Step::emit("Testing if tunnel connection works.")]);
	let mut session = session(&launcher, spec());

	let abandoned = tokio::time::timeout(Duration::from_millis(300), session.connect()).await;
	assert!(abandoned.is_err(), "connect should still be waiting for a port");
	assert_eq!(session.state(), SessionState::AwaitingPort);
	assert_eq!(launcher.live(), 1);

	session.close().await;
	assert_eq!(session.state(), SessionState::Closed);
	assert_eq!(launcher.live(), 0);
}

#[tokio::test]
async fn remote_operations_delegate_to_the_rewritten_transport() {
	let recorded = Arc::new(Recorded::default());
	let launcher = ScriptedLauncher::new(vec![Step::AnnounceBoundPort]);
	let mut session = session(&launcher, spec()).with_connector(Arc::new(RecordingConnector(Arc::clone(&recorded))));

	let err = session.exec_command("hostname", None).await.unwrap_err();
	assert!(matches!(err, TunnelError::Programming(_)));

	session.connect().await.unwrap();
	let port = session.local_port().unwrap();
	{
		let opened = recorded.opened.lock().unwrap();
		assert_eq!(opened.len(), 1);
		assert_eq!(opened[0].host, "localhost");
		assert_eq!(opened[0].port, port);
		assert_eq!(opened[0].cert_validation, CertValidation::Ignore);
		assert_eq!(opened[0].auth_transports, vec!["ntlm".to_string()]);
	}

	let output = session.exec_command("hostname", None).await.unwrap();
	assert_eq!(output.stdout, b"hostname");
	session.put_file(Path::new("/tmp/setup.ps1"), "C:\\Windows\\Temp\\setup.ps1").await.unwrap();
	session.fetch_file("C:\\Windows\\Temp\\out.log", Path::new("/tmp/out.log")).await.unwrap();
	assert_eq!(recorded.files.lock().unwrap().len(), 2);

	// Transport close errors are logged, never propagated.
	session.close().await;
	session.close().await;
	assert_eq!(recorded.closed.load(Ordering::SeqCst), 1);
	assert_eq!(launcher.live(), 0);

	let err = session.exec_command("hostname", None).await.unwrap_err();
	assert!(matches!(err, TunnelError::Programming(_)));
}

#[tokio::test]
async fn tunnel_only_session_rejects_remote_operations() {
	let launcher = ScriptedLauncher::new(vec![Step::AnnounceBoundPort]);
	let mut session = session(&launcher, spec());
	session.connect().await.unwrap();

	let err = session.exec_command("hostname", None).await.unwrap_err();
	assert!(matches!(err, TunnelError::Programming(ref m) if m.contains("transport connector")));
	session.close().await;
}

#[tokio::test]
async fn concurrent_sessions_get_distinct_ports_and_private_output() {
	let launcher = ScriptedLauncher::new(vec![Step::Sleep(Duration::from_millis(100)), Step::AnnounceBoundPort]);
	let mut first = session(&launcher, spec());
	let mut second = session(&launcher, spec());

	let (a, b) = tokio::join!(first.connect(), second.connect());
	a.unwrap();
	b.unwrap();

	let (port_a, port_b) = (first.local_port().unwrap(), second.local_port().unwrap());
	assert_ne!(port_a, port_b);
	assert!(first.tunnel_output().contains(&format!("[{port_a}]")));
	assert!(!first.tunnel_output().contains(&format!("[{port_b}]")));
	assert!(second.tunnel_output().contains(&format!("[{port_b}]")));
	assert!(!second.tunnel_output().contains(&format!("[{port_a}]")));
	assert_eq!(launcher.live(), 2);

	first.close().await;
	assert_eq!(launcher.live(), 1);
	assert_eq!(second.state(), SessionState::Ready);
	second.close().await;
	assert_eq!(launcher.live(), 0);
}

#[tokio::test]
async fn reconnect_replaces_the_tunnel() {
	let launcher = ScriptedLauncher::new(vec![Step::AnnounceBoundPort]);
	let mut session = session(&launcher, spec());
	session.connect().await.unwrap();

	let mut session = session.reconnect().await.unwrap();
	assert_eq!(session.state(), SessionState::Ready);
	assert_eq!(launcher.launched(), 2);
	assert_eq!(launcher.live(), 1);

	session.close().await;
	assert_eq!(launcher.live(), 0);
}
