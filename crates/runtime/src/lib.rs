//! Process and port lifecycle helpers shared by the tunnel supervisor and CLI.

mod process;

pub use process::{StopSignal, pid_is_alive, port_available, signal_process_group};
