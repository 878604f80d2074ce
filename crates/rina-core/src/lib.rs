//! RINA Core - IPC process registry, control channel and forwarding engine.
//!
//! This crate hosts the core of a recursive internetwork stack:
//! - a [`Registry`] of IPC processes built by per-DIF-type factories
//! - a binary control protocol served through [`ControlSession`]s, each with
//!   its own blocking response queue
//! - the normal IPC process, which pushes a PCI header onto each SDU and
//!   forwards it through a lower IPC process chosen by its forwarding table
//!
//! The [`device`] module exposes control sessions over local TCP for an
//! out-of-process control agent.
//!
//! # Example
//!
//! ```rust,ignore
//! use rina_core::{CancellationToken, ControlSession, CtrlMessage, DifType, ProcessName, Registry};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(Registry::with_default_factories()?);
//! let session = ControlSession::new(registry);
//!
//! let request = CtrlMessage::CreateIpcp {
//!     event_id: 1,
//!     dif_type: DifType::NORMAL,
//!     name: ProcessName::process("a.IPC"),
//! };
//! session.submit(&request.serialize()?)?;
//!
//! let response = session.receive(1024, &CancellationToken::new())?;
//! println!("{:?}", CtrlMessage::deserialize(&response)?);
//! ```

pub mod cancel;
pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod flow;
pub mod name;
pub mod normal;
pub mod registry;
pub mod shim_dummy;
pub mod wire;

// Re-export commonly used types
pub use cancel::{CancellationToken, CancelledError};
pub use config::{ControlConfig, DifType, NormalConfig, RegistryConfig};
pub use control::ControlSession;
pub use device::{ControlClient, ControlServer, ControlServerHandle};
pub use error::{Result, RinaError};
pub use flow::{Flow, FlowTable};
pub use name::ProcessName;
pub use normal::{NormalFactory, NormalIpcp};
pub use registry::{
    EntrySnapshot, FlowAllocation, IpcProcess, IpcpContext, IpcpFactory, MgmtHint, Registry,
};
pub use shim_dummy::{ShimDummyFactory, ShimDummyIpcp};
pub use wire::{CtrlMessage, MessageType, Pci, PduBuf, PduType, PCI_LEN};
