//! Flows and the port table that binds them to IPC processes.
//!
//! A flow has a local port id, the peer's port id and address, and a weak
//! reference to the instance that transmits on it (`txrx`). A flow may
//! also name an upper instance: SDUs arriving on the flow are then handed to
//! that instance's `receive_sdu` instead of the flow's receive queue, which
//! is how one IPC process is stacked on another.
//!
//! Flows never keep an instance alive. Once an instance is destroyed, every
//! weak reference to it fails to upgrade and the flow behaves as if it had
//! no next hop.

use crate::config::RegistryConfig;
use crate::error::{Result, RinaError};
use crate::normal::pduft::{self, ForwardingLink};
use crate::registry::index::IdBitmap;
use crate::registry::IpcProcess;
use crate::wire::PduBuf;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, warn};

/// One end of a flow.
pub struct Flow {
    local_port: u32,
    remote_port: u32,
    remote_addr: u64,
    next_seq_to_send: AtomicU64,
    last_seq_rcvd: AtomicU64,
    /// Forwarding table and destination this flow is installed under, if any.
    fwd_link: Mutex<Option<ForwardingLink>>,
    txrx: Weak<dyn IpcProcess>,
    upper: Option<Weak<dyn IpcProcess>>,
    rx_queue: Mutex<VecDeque<Bytes>>,
}

impl Flow {
    pub fn local_port(&self) -> u32 {
        self.local_port
    }

    pub fn remote_port(&self) -> u32 {
        self.remote_port
    }

    pub fn remote_addr(&self) -> u64 {
        self.remote_addr
    }

    /// Claim the next send sequence number.
    pub fn next_send_seq(&self) -> u64 {
        self.next_seq_to_send.fetch_add(1, Ordering::Relaxed)
    }

    pub fn last_seq_received(&self) -> u64 {
        self.last_seq_rcvd.load(Ordering::Relaxed)
    }

    /// Destination address this flow is routed under, if any.
    pub fn forwarding_key(&self) -> Option<u64> {
        self.forwarding_link().map(|link| link.key())
    }

    pub(crate) fn forwarding_link(&self) -> Option<ForwardingLink> {
        self.fwd_link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn replace_forwarding_link(
        &self,
        link: Option<ForwardingLink>,
    ) -> Option<ForwardingLink> {
        std::mem::replace(
            &mut *self.fwd_link.lock().unwrap_or_else(PoisonError::into_inner),
            link,
        )
    }

    pub(crate) fn clear_forwarding_link_if(&self, matches: impl FnOnce(&ForwardingLink) -> bool) {
        let mut guard = self.fwd_link.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.as_ref().is_some_and(matches) {
            *guard = None;
        }
    }

    /// The instance transmitting on this flow, if it is still alive.
    pub fn txrx(&self) -> Option<Arc<dyn IpcProcess>> {
        self.txrx.upgrade()
    }

    /// The instance stacked on top of this flow, if any and still alive.
    pub fn upper(&self) -> Option<Arc<dyn IpcProcess>> {
        self.upper.as_ref().and_then(Weak::upgrade)
    }

    /// Whether `instance` transmits on this flow.
    pub fn is_served_by<T: ?Sized>(&self, instance: *const T) -> bool {
        std::ptr::addr_eq(self.txrx.as_ptr(), instance)
    }

    fn is_bound_to<T: ?Sized>(&self, instance: *const T) -> bool {
        self.is_served_by(instance)
            || self
                .upper
                .as_ref()
                .is_some_and(|upper| std::ptr::addr_eq(upper.as_ptr(), instance))
    }

    /// Pop the oldest SDU delivered to this flow.
    pub fn recv(&self) -> Option<Bytes> {
        self.rx_queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn pending(&self) -> usize {
        self.rx_queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("local_port", &self.local_port)
            .field("remote_port", &self.remote_port)
            .field("remote_addr", &self.remote_addr)
            .field("next_seq_to_send", &self.next_seq_to_send)
            .field("stacked", &self.upper.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct FlowState {
    ports: IdBitmap,
    flows: HashMap<u32, Arc<Flow>>,
}

/// Port table shared by all instances of a registry.
#[derive(Debug)]
pub struct FlowTable {
    state: Mutex<FlowState>,
}

impl Default for FlowTable {
    fn default() -> Self {
        Self::new(RegistryConfig::MAX_PORT_IDS)
    }
}

impl FlowTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(FlowState {
                ports: IdBitmap::new(capacity),
                flows: HashMap::new(),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, FlowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a local port and bind a new flow to it.
    pub fn bind(
        &self,
        txrx: &Arc<dyn IpcProcess>,
        upper: Option<&Arc<dyn IpcProcess>>,
        remote_port: u32,
        remote_addr: u64,
    ) -> Result<Arc<Flow>> {
        let mut state = self.lock_state();
        let capacity = state.ports.capacity();
        let port = state
            .ports
            .allocate()
            .ok_or(RinaError::OutOfIds { capacity })?;

        let flow = Arc::new(Flow {
            local_port: port as u32,
            remote_port,
            remote_addr,
            next_seq_to_send: AtomicU64::new(0),
            last_seq_rcvd: AtomicU64::new(0),
            fwd_link: Mutex::new(None),
            txrx: Arc::downgrade(txrx),
            upper: upper.map(Arc::downgrade),
            rx_queue: Mutex::new(VecDeque::new()),
        });
        state.flows.insert(flow.local_port, Arc::clone(&flow));

        debug!(
            port = flow.local_port,
            remote_port, remote_addr, "Bound flow"
        );
        Ok(flow)
    }

    pub fn lookup(&self, port: u32) -> Option<Arc<Flow>> {
        self.lock_state().flows.get(&port).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_state().flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove the flow bound to `port` and release the port.
    ///
    /// The instances the flow referenced are told after the table lock is
    /// dropped.
    pub fn unbind(&self, port: u32) -> bool {
        let flow = {
            let mut state = self.lock_state();
            let Some(flow) = state.flows.remove(&port) else {
                return false;
            };
            state.ports.release(port as usize);
            flow
        };
        notify_deallocated(&flow);
        debug!(port, "Unbound flow");
        true
    }

    /// Unbind every flow that references `instance`, on either side.
    pub fn release_bound_to(&self, instance: &Arc<dyn IpcProcess>) -> usize {
        let ptr = Arc::as_ptr(instance);
        let released: Vec<Arc<Flow>> = {
            let mut state = self.lock_state();
            let ports: Vec<u32> = state
                .flows
                .iter()
                .filter(|(_, flow)| flow.is_bound_to(ptr))
                .map(|(port, _)| *port)
                .collect();
            ports
                .into_iter()
                .filter_map(|port| {
                    state.ports.release(port as usize);
                    state.flows.remove(&port)
                })
                .collect()
        };
        for flow in &released {
            notify_deallocated(flow);
        }
        released.len()
    }

    /// Hand a PDU that arrived for `port` to whatever sits above it.
    pub fn deliver(&self, port: u32, seqnum: u64, buf: PduBuf) -> Result<()> {
        let flow = self.lookup(port).ok_or(RinaError::InvalidPort(port))?;
        flow.last_seq_rcvd.store(seqnum, Ordering::Relaxed);

        match &flow.upper {
            Some(upper) => match upper.upgrade() {
                Some(upper) => upper.receive_sdu(buf),
                None => {
                    debug!(port, "Upper instance gone, dropping SDU");
                    Ok(())
                }
            },
            None => {
                let mut queue = flow.rx_queue.lock().unwrap_or_else(PoisonError::into_inner);
                if queue.len() >= RegistryConfig::MAX_FLOW_RX_QUEUE {
                    warn!(port, queued = queue.len(), "Flow receive queue full, dropping SDU");
                } else {
                    queue.push_back(buf.freeze());
                }
                Ok(())
            }
        }
    }
}

fn notify_deallocated(flow: &Flow) {
    pduft::detach(flow);
    if let Some(txrx) = flow.txrx() {
        txrx.flow_deallocated(flow);
    }
    if let Some(upper) = flow.upper() {
        upper.flow_deallocated(flow);
    }
}
