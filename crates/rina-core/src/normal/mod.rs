//! The normal IPC process: addressing plus PDU forwarding.
//!
//! On the way down each normal instance prepends a DATA or MGMT header and
//! hands the PDU to the instance transmitting on the next-hop flow, which may
//! itself be a normal instance one layer lower. On the way up it strips its
//! header and delivers by destination connection-endpoint id through the
//! shared flow table.

pub mod pduft;

pub use pduft::ForwardingTable;

use crate::config::{DifType, NormalConfig};
use crate::error::{Result, RinaError};
use crate::flow::{Flow, FlowTable};
use crate::name::ProcessName;
use crate::registry::{IpcProcess, IpcpContext, IpcpFactory, MgmtHint};
use crate::wire::{ConnectionId, Pci, PduBuf, PduType, PCI_LEN};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// A normal IPC process instance.
pub struct NormalIpcp {
    me: Weak<NormalIpcp>,
    name: ProcessName,
    address: AtomicU64,
    pduft: Arc<ForwardingTable>,
    flows: Arc<FlowTable>,
}

impl NormalIpcp {
    pub fn new(name: ProcessName, flows: Arc<FlowTable>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            name,
            address: AtomicU64::new(0),
            pduft: ForwardingTable::new(),
            flows,
        })
    }

    pub fn name(&self) -> &ProcessName {
        &self.name
    }

    pub fn own_address(&self) -> u64 {
        self.address.load(Ordering::Acquire)
    }

    /// Next-hop flow for `dest_addr`.
    pub fn lookup(&self, dest_addr: u64) -> Option<Arc<Flow>> {
        self.pduft.lookup(dest_addr)
    }

    pub fn forwarding_table(&self) -> &ForwardingTable {
        &self.pduft
    }

    /// Hand a PDU to the instance transmitting on `lower_flow`. Returns
    /// `None` if that instance no longer exists.
    fn forward(&self, lower_flow: &Flow, buf: PduBuf) -> Option<Result<usize>> {
        let lower = lower_flow.txrx()?;
        Some(
            lower
                .write_sdu(lower_flow, buf)
                .map(|n| n.saturating_sub(PCI_LEN)),
        )
    }
}

impl IpcProcess for NormalIpcp {
    fn dif_type(&self) -> DifType {
        DifType::NORMAL
    }

    fn destroy(&self) {
        self.pduft.clear();
        info!("Normal IPC process '{}' destroyed", self.name);
    }

    fn write_sdu(&self, flow: &Flow, mut buf: PduBuf) -> Result<usize> {
        let own = self.own_address();
        let dst = flow.remote_addr();
        let lower_flow = self.pduft.lookup(dst);

        if lower_flow.is_none() && dst != own {
            debug!(
                ipcp = %self.name,
                dst, "No route to destination, dropping SDU"
            );
            return Ok(0);
        }

        let pci = Pci {
            dst_addr: dst,
            src_addr: own,
            conn_id: ConnectionId {
                qos_id: 0,
                dst_cep: flow.remote_port(),
                src_cep: flow.local_port(),
            },
            pdu_type: PduType::Data,
            pdu_flags: 0,
            seqnum: flow.next_send_seq(),
        };
        buf.push_pci(&pci)?;

        match lower_flow {
            Some(lower_flow) => self.forward(&lower_flow, buf).unwrap_or_else(|| {
                debug!(
                    ipcp = %self.name,
                    dst, "Next hop destroyed, dropping SDU"
                );
                Ok(0)
            }),
            None => {
                let len = buf.len() - PCI_LEN;
                self.receive_sdu(buf)?;
                Ok(len)
            }
        }
    }

    fn write_management_sdu(&self, hint: MgmtHint, mut buf: PduBuf) -> Result<usize> {
        let consumed = buf.len();
        let (dst, lower_flow) = match hint {
            MgmtHint::DestAddress(dst) => match self.pduft.lookup(dst) {
                Some(flow) => (dst, flow),
                None => {
                    debug!(ipcp = %self.name, dst, "No route for management SDU");
                    return Ok(consumed);
                }
            },
            MgmtHint::LocalPort(port) => match self.flows.lookup(port) {
                Some(flow) if flow.is_served_by(self.me.as_ptr()) => (0, flow),
                _ => {
                    warn!(
                        ipcp = %self.name,
                        port, "Management SDU for a port this process does not serve"
                    );
                    return Ok(consumed);
                }
            },
        };

        buf.push_pci(&Pci::management(dst, self.own_address()))?;
        self.forward(&lower_flow, buf).unwrap_or(Ok(consumed))
    }

    fn receive_sdu(&self, mut buf: PduBuf) -> Result<()> {
        let pci = buf.pop_pci()?;
        match pci.pdu_type {
            PduType::Data => self.flows.deliver(pci.conn_id.dst_cep, pci.seqnum, buf),
            other => {
                debug!(
                    ipcp = %self.name,
                    pdu_type = other.as_u8(),
                    "Discarding non-data PDU"
                );
                Ok(())
            }
        }
    }

    fn set_forwarding_entry(&self, dest_addr: u64, flow: Arc<Flow>) -> Result<()> {
        debug!(
            ipcp = %self.name,
            dest_addr,
            port = flow.local_port(),
            "Set forwarding entry"
        );
        self.pduft.set(dest_addr, flow);
        Ok(())
    }

    fn apply_config(&self, key: &str, value: &str) -> Result<()> {
        if key != NormalConfig::ADDRESS_KEY {
            return Err(RinaError::invalid_argument(format!(
                "unknown config key '{}'",
                key
            )));
        }
        let address: u64 = value.trim().parse().map_err(|_| {
            RinaError::invalid_argument(format!("address '{}' is not a u64", value))
        })?;
        self.address.store(address, Ordering::Release);
        info!("Normal IPC process '{}' now at address {}", self.name, address);
        Ok(())
    }

    fn address(&self) -> Option<u64> {
        Some(self.own_address())
    }
}

/// Builds [`NormalIpcp`] instances.
#[derive(Debug, Default, Clone, Copy)]
pub struct NormalFactory;

impl IpcpFactory for NormalFactory {
    fn dif_type(&self) -> DifType {
        DifType::NORMAL
    }

    fn create(&self, ctx: &IpcpContext) -> Result<Arc<dyn IpcProcess>> {
        Ok(NormalIpcp::new(ctx.name.clone(), Arc::clone(&ctx.flows)))
    }
}
