//! Control channel between the control agent and the registry.
//!
//! A [`ControlSession`] accepts serialized requests, runs them against the
//! registry through a dispatch table keyed by message type, and queues the
//! serialized responses for the agent to read back.

mod handlers;
pub mod session;

pub use session::ControlSession;
