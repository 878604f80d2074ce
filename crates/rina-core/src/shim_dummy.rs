//! Shim-dummy IPC process: a placeholder DIF type with no data plane.

use crate::config::DifType;
use crate::error::Result;
use crate::name::ProcessName;
use crate::registry::{IpcProcess, IpcpContext, IpcpFactory};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

pub struct ShimDummyIpcp {
    name: ProcessName,
    dif_name: Mutex<Option<ProcessName>>,
}

impl ShimDummyIpcp {
    pub fn new(name: ProcessName) -> Self {
        Self {
            name,
            dif_name: Mutex::new(None),
        }
    }

    pub fn dif_name(&self) -> Option<ProcessName> {
        self.dif_name
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl IpcProcess for ShimDummyIpcp {
    fn dif_type(&self) -> DifType {
        DifType::SHIM_DUMMY
    }

    fn destroy(&self) {
        info!("Shim dummy IPC process '{}' destroyed", self.name);
    }

    fn assign_to_dif(&self, dif_name: &ProcessName) -> Result<()> {
        debug!("Shim dummy '{}' assigned to '{}'", self.name, dif_name);
        *self.dif_name.lock().unwrap_or_else(PoisonError::into_inner) = Some(dif_name.clone());
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ShimDummyFactory;

impl IpcpFactory for ShimDummyFactory {
    fn dif_type(&self) -> DifType {
        DifType::SHIM_DUMMY
    }

    fn create(&self, ctx: &IpcpContext) -> Result<Arc<dyn IpcProcess>> {
        Ok(Arc::new(ShimDummyIpcp::new(ctx.name.clone())))
    }
}
