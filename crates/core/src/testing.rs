//! Scripted in-process launcher for exercising sessions without subprocesses.
//!
//! # Example
//!
//! ```ignore
//! let launcher = ScriptedLauncher::new(vec![
//!     Step::Sleep(Duration::from_millis(200)),
//!     Step::AnnounceBoundPort,
//! ]);
//! let mut session = Session::new(spec, transport, Arc::new(launcher.clone()));
//! session.connect().await?;
//! ```

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use crate::config::TunnelSpec;
use crate::error::Result;
use crate::tunnel::{LINE_BUFFER, LaunchedTunnel, ProcessControl, TunnelExit, TunnelLauncher};

const SIGTERM: i32 = 15;
const SIGKILL: i32 = 9;

/// One action of a scripted tunnel process.
#[derive(Debug, Clone)]
pub enum Step {
	/// Write a diagnostic line.
	Emit(String),
	/// Bind a real listener on an OS-assigned loopback port (held until exit)
	/// and announce it the way the tunnelling tool does.
	AnnounceBoundPort,
	/// Pause before the next step.
	Sleep(Duration),
	/// Write the same line over and over until the output is closed.
	Flood(String),
	/// Exit with the given code.
	Exit(i32),
	/// Stop reacting to graceful termination; only a kill ends the process.
	IgnoreTerminate,
}

impl Step {
	pub fn emit(line: impl Into<String>) -> Self {
		Step::Emit(line.into())
	}
}

/// Launcher whose processes play a fixed script.
///
/// A script that runs out of steps without [`Step::Exit`] keeps the process
/// alive until it is terminated.
#[derive(Debug, Clone)]
pub struct ScriptedLauncher {
	script: Arc<Vec<Step>>,
	launched: Arc<AtomicUsize>,
	live: Arc<AtomicUsize>,
}

impl ScriptedLauncher {
	pub fn new(script: Vec<Step>) -> Self {
		Self {
			script: Arc::new(script),
			launched: Arc::new(AtomicUsize::new(0)),
			live: Arc::new(AtomicUsize::new(0)),
		}
	}

	/// Number of processes launched so far.
	pub fn launched(&self) -> usize {
		self.launched.load(Ordering::SeqCst)
	}

	/// Number of launched processes that have not exited.
	pub fn live(&self) -> usize {
		self.live.load(Ordering::SeqCst)
	}
}

impl TunnelLauncher for ScriptedLauncher {
	fn launch(&self, _spec: &TunnelSpec) -> Result<LaunchedTunnel> {
		let (line_tx, line_rx) = mpsc::channel(LINE_BUFFER);
		let (stop_tx, stop_rx) = watch::channel(None);
		let (exit_tx, exit_rx) = watch::channel(None);

		self.launched.fetch_add(1, Ordering::SeqCst);
		self.live.fetch_add(1, Ordering::SeqCst);
		tokio::spawn(run_script(Arc::clone(&self.script), line_tx, stop_rx, exit_tx, Arc::clone(&self.live)));

		Ok(LaunchedTunnel {
			lines: line_rx,
			control: Box::new(ScriptedControl {
				stop_tx,
				exit_rx,
			}),
		})
	}
}

/// Signal requested by the controller.
type StopRequest = Option<i32>;

async fn run_script(
	script: Arc<Vec<Step>>,
	lines: mpsc::Sender<String>,
	mut stop: watch::Receiver<StopRequest>,
	exit: watch::Sender<Option<TunnelExit>>,
	live: Arc<AtomicUsize>,
) {
	let mut listeners = Vec::new();
	let mut ignore_terminate = false;

	let scripted = tokio::select! {
		code = play(&script, &lines, &mut listeners, &mut ignore_terminate) => Ok(code),
		signal = next_stop(&mut stop, false) => Err(signal),
	};

	let outcome = match scripted {
		Ok(Some(code)) => TunnelExit::from_code(code),
		Ok(None) => TunnelExit::from_signal(next_stop(&mut stop, ignore_terminate).await),
		Err(SIGTERM) if ignore_terminate => TunnelExit::from_signal(next_stop(&mut stop, true).await),
		Err(signal) => TunnelExit::from_signal(signal),
	};

	drop(listeners);
	drop(lines);
	live.fetch_sub(1, Ordering::SeqCst);
	let _ = exit.send(Some(outcome));
}

async fn play(script: &[Step], lines: &mpsc::Sender<String>, listeners: &mut Vec<TcpListener>, ignore_terminate: &mut bool) -> Option<i32> {
	for step in script {
		match step {
			Step::Emit(line) => {
				let _ = lines.send(line.clone()).await;
			}
			Step::AnnounceBoundPort => match TcpListener::bind("127.0.0.1:0").await.and_then(|l| l.local_addr().map(|a| (l, a))) {
				Ok((listener, addr)) => {
					listeners.push(listener);
					let _ = lines.send(format!("Listening on port [{}].", addr.port())).await;
				}
				Err(err) => {
					let _ = lines.send(format!("ERROR: could not bind local port: {}", err)).await;
					return Some(1);
				}
			},
			Step::Flood(line) => while lines.send(line.clone()).await.is_ok() {},
			Step::Sleep(duration) => tokio::time::sleep(*duration).await,
			Step::Exit(code) => return Some(*code),
			Step::IgnoreTerminate => *ignore_terminate = true,
		}
	}
	None
}

/// Waits for a stop request, skipping SIGTERM when `ignore_terminate` is set.
/// A dropped controller counts as a kill.
async fn next_stop(stop: &mut watch::Receiver<StopRequest>, ignore_terminate: bool) -> i32 {
	loop {
		if stop.changed().await.is_err() {
			return SIGKILL;
		}
		match *stop.borrow_and_update() {
			Some(SIGTERM) if ignore_terminate => continue,
			Some(signal) => return signal,
			None => continue,
		}
	}
}

struct ScriptedControl {
	stop_tx: watch::Sender<StopRequest>,
	exit_rx: watch::Receiver<Option<TunnelExit>>,
}

impl ScriptedControl {
	fn current_exit(&self) -> Option<TunnelExit> {
		*self.exit_rx.borrow()
	}
}

#[async_trait]
impl ProcessControl for ScriptedControl {
	fn pid(&self) -> Option<u32> {
		None
	}

	fn try_exit(&mut self) -> io::Result<Option<TunnelExit>> {
		Ok(self.current_exit())
	}

	async fn wait(&mut self) -> io::Result<TunnelExit> {
		let exit = *self
			.exit_rx
			.wait_for(Option::is_some)
			.await
			.map_err(|_| io::Error::other("scripted tunnel vanished without an exit status"))?;
		Ok(exit.unwrap_or(TunnelExit::from_signal(SIGKILL)))
	}

	async fn terminate(&mut self, grace: Duration) -> io::Result<TunnelExit> {
		if let Some(exit) = self.current_exit() {
			return Ok(exit);
		}

		let _ = self.stop_tx.send(Some(SIGTERM));
		if let Ok(exit) = tokio::time::timeout(grace, self.wait()).await {
			return exit;
		}

		let _ = self.stop_tx.send(Some(SIGKILL));
		self.wait().await
	}
}
