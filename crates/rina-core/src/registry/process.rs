//! Capability set every DIF type implements.

use crate::config::DifType;
use crate::error::{Result, RinaError};
use crate::flow::Flow;
use crate::name::ProcessName;
use crate::wire::PduBuf;
use std::sync::Arc;

/// Outcome of a flow allocation hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowAllocation {
    /// The instance handled the request itself.
    Handled,
    /// The request must be forwarded to the user-space control agent.
    ReflectToAgent,
}

/// Where a management SDU should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MgmtHint {
    /// Route by destination address through the forwarding table.
    DestAddress(u64),
    /// Send on the flow bound to this local port.
    LocalPort(u32),
}

/// An IPC process instance.
///
/// Only `dif_type` is mandatory. Application and DIF hooks succeed by
/// default, flow allocation reflects to the agent, and the data plane
/// operations report [`RinaError::OperationNotSupported`].
pub trait IpcProcess: Send + Sync {
    fn dif_type(&self) -> DifType;

    /// Release the instance's resources. Called once, after the instance
    /// has been removed from the registry.
    fn destroy(&self) {}

    fn register_application(&self, _app: &ProcessName) -> Result<()> {
        Ok(())
    }

    fn unregister_application(&self, _app: &ProcessName) -> Result<()> {
        Ok(())
    }

    fn assign_to_dif(&self, _dif_name: &ProcessName) -> Result<()> {
        Ok(())
    }

    fn flow_allocate_request(
        &self,
        _local: &ProcessName,
        _remote: &ProcessName,
        _port: u32,
    ) -> Result<FlowAllocation> {
        Ok(FlowAllocation::ReflectToAgent)
    }

    fn flow_allocate_response(&self, _port: u32, _accepted: bool) -> Result<FlowAllocation> {
        Ok(FlowAllocation::ReflectToAgent)
    }

    /// Send an SDU on `flow`. Returns the number of SDU bytes accepted.
    fn write_sdu(&self, _flow: &Flow, _buf: PduBuf) -> Result<usize> {
        Err(self.unsupported("write_sdu"))
    }

    fn write_management_sdu(&self, _hint: MgmtHint, _buf: PduBuf) -> Result<usize> {
        Err(self.unsupported("write_management_sdu"))
    }

    /// Accept a PDU from a lower layer.
    fn receive_sdu(&self, _buf: PduBuf) -> Result<()> {
        Err(self.unsupported("receive_sdu"))
    }

    fn set_forwarding_entry(&self, _dest_addr: u64, _flow: Arc<Flow>) -> Result<()> {
        Err(self.unsupported("set_forwarding_entry"))
    }

    fn apply_config(&self, _key: &str, _value: &str) -> Result<()> {
        Err(self.unsupported("apply_config"))
    }

    /// A flow this instance sends on or receives for has been unbound.
    fn flow_deallocated(&self, _flow: &Flow) {}

    /// Address within the DIF, for types that have one.
    fn address(&self) -> Option<u64> {
        None
    }

    #[doc(hidden)]
    fn unsupported(&self, operation: &'static str) -> RinaError {
        RinaError::OperationNotSupported {
            dif_type: self.dif_type(),
            operation,
        }
    }
}
