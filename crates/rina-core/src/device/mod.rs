//! Control device: control sessions served over local TCP.
//!
//! This is how an out-of-process control agent reaches the registry. Each
//! connection maps to one [`ControlSession`](crate::control::ControlSession);
//! frames are `[u32 BE len][control message]`.

pub mod client;
pub mod frame;
pub mod server;

pub use client::ControlClient;
pub use server::{ControlServer, ControlServerHandle};
