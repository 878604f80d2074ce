//! Factories that build IPC processes for a DIF type.

use super::process::IpcProcess;
use crate::config::DifType;
use crate::error::Result;
use crate::flow::FlowTable;
use crate::name::ProcessName;
use std::sync::Arc;

/// What a factory gets to build a new instance with.
#[derive(Debug, Clone)]
pub struct IpcpContext {
    pub dif_type: DifType,
    pub name: ProcessName,
    /// Port table shared by every instance in the registry.
    pub flows: Arc<FlowTable>,
}

/// Builds IPC processes of one DIF type.
pub trait IpcpFactory: Send + Sync {
    fn dif_type(&self) -> DifType;

    /// Construct a fresh instance. A failure here leaves the registry
    /// untouched.
    fn create(&self, ctx: &IpcpContext) -> Result<Arc<dyn IpcProcess>>;
}
