//! Per-(host, worker) tunnel session lifecycle.
//!
//! A [`Session`] drives launch, port discovery, readiness probing and endpoint
//! rewriting in order, then delegates remote operations to the caller's
//! transport until it is closed.

/// Session coordinator and remote-operation delegation.
pub mod coordinator;
/// Session lifecycle states.
pub mod state;

/// Session coordinator.
pub use coordinator::Session;
/// Session lifecycle state.
pub use state::SessionState;
