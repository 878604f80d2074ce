//! PDU forwarding table: destination address to next-hop flow.

use crate::flow::Flow;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::debug;

/// Where a flow is installed: the owning table and the destination key.
#[derive(Debug, Clone)]
pub(crate) struct ForwardingLink {
    table: Weak<ForwardingTable>,
    key: u64,
}

impl ForwardingLink {
    pub(crate) fn key(&self) -> u64 {
        self.key
    }

    fn is(&self, table: &ForwardingTable, key: u64) -> bool {
        self.key == key && std::ptr::eq(self.table.as_ptr(), table)
    }
}

/// Per-instance forwarding table with its own lock.
///
/// A flow is installed in at most one table under one destination. The flow
/// records that link, so tearing the flow down removes its entry from
/// whichever table holds it without a scan.
///
/// A flow's link lock is only ever taken on its own or inside a table lock,
/// never the other way round.
#[derive(Debug, Default)]
pub struct ForwardingTable {
    entries: RwLock<HashMap<u64, Arc<Flow>>>,
}

impl ForwardingTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lookup(&self, dest_addr: u64) -> Option<Arc<Flow>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&dest_addr)
            .cloned()
    }

    /// Route `dest_addr` through `flow`. The last write for a destination
    /// wins and the flow it replaces is unlinked. `flow` first leaves the
    /// entry it was previously installed under, in this or any other table.
    pub fn set(self: &Arc<Self>, dest_addr: u64, flow: Arc<Flow>) {
        if let Some(previous) = flow.replace_forwarding_link(None) {
            if !previous.is(self, dest_addr) {
                if let Some(table) = previous.table.upgrade() {
                    table.remove_if(previous.key, &flow);
                }
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        flow.replace_forwarding_link(Some(ForwardingLink {
            table: Arc::downgrade(self),
            key: dest_addr,
        }));
        if let Some(replaced) = entries.insert(dest_addr, Arc::clone(&flow)) {
            if !Arc::ptr_eq(&replaced, &flow) {
                replaced.clear_forwarding_link_if(|link| link.is(self, dest_addr));
            }
        }
    }

    /// Drop the entry pointing at `flow`, if this table holds one.
    pub fn unlink(&self, flow: &Flow) -> bool {
        match flow.forwarding_link() {
            Some(link) if std::ptr::eq(link.table.as_ptr(), self) => self.remove_if(link.key, flow),
            _ => false,
        }
    }

    /// Remove `key` only while it still routes through `flow`.
    fn remove_if(&self, key: u64, flow: &Flow) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&key) {
            Some(current) if std::ptr::eq(Arc::as_ptr(current), flow) => {
                entries.remove(&key);
                flow.clear_forwarding_link_if(|link| link.is(self, key));
                true
            }
            _ => false,
        }
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for (key, flow) in entries.iter() {
            flow.clear_forwarding_link_if(|link| link.is(self, *key));
        }
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Remove `flow` from the forwarding table it is installed in, if any.
pub(crate) fn detach(flow: &Flow) {
    let Some(link) = flow.forwarding_link() else {
        return;
    };
    if let Some(table) = link.table.upgrade() {
        if table.remove_if(link.key, flow) {
            debug!(
                port = flow.local_port(),
                dest_addr = link.key,
                "Removed forwarding entry for deallocated flow"
            );
        }
    } else {
        flow.clear_forwarding_link_if(|current| current.key == link.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DifType;
    use crate::flow::FlowTable;
    use crate::registry::IpcProcess;

    struct Dummy;

    impl IpcProcess for Dummy {
        fn dif_type(&self) -> DifType {
            DifType(5)
        }
    }

    fn bound_flows(n: usize) -> (Arc<dyn IpcProcess>, Vec<Arc<Flow>>) {
        let table = FlowTable::new(16);
        let owner: Arc<dyn IpcProcess> = Arc::new(Dummy);
        let flows = (0..n)
            .map(|_| table.bind(&owner, None, 0, 0).unwrap())
            .collect();
        (owner, flows)
    }

    #[test]
    fn test_last_write_wins() {
        let (_owner, flows) = bound_flows(2);
        let table = ForwardingTable::new();

        table.set(20, Arc::clone(&flows[0]));
        table.set(20, Arc::clone(&flows[1]));

        assert!(Arc::ptr_eq(&table.lookup(20).unwrap(), &flows[1]));
        assert_eq!(flows[0].forwarding_key(), None);
        assert_eq!(flows[1].forwarding_key(), Some(20));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_flow_moves_between_destinations() {
        let (_owner, flows) = bound_flows(1);
        let table = ForwardingTable::new();

        table.set(20, Arc::clone(&flows[0]));
        table.set(30, Arc::clone(&flows[0]));

        assert!(table.lookup(20).is_none());
        assert!(table.lookup(30).is_some());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_unlink_only_removes_own_entry() {
        let (_owner, flows) = bound_flows(2);
        let table = ForwardingTable::new();

        table.set(20, Arc::clone(&flows[0]));
        assert!(!table.unlink(&flows[1]));
        assert!(table.unlink(&flows[0]));
        assert!(table.is_empty());
        assert!(!table.unlink(&flows[0]));
    }

    #[test]
    fn test_clear_resets_keys() {
        let (_owner, flows) = bound_flows(2);
        let table = ForwardingTable::new();
        table.set(1, Arc::clone(&flows[0]));
        table.set(2, Arc::clone(&flows[1]));

        table.clear();
        assert!(table.is_empty());
        assert!(flows.iter().all(|f| f.forwarding_key().is_none()));
    }

    #[test]
    fn test_flow_moves_between_tables_without_evicting_other_routes() {
        let (_owner, flows) = bound_flows(2);
        let (f, g) = (&flows[0], &flows[1]);
        let t1 = ForwardingTable::new();
        let t2 = ForwardingTable::new();

        t1.set(20, Arc::clone(f));
        t2.set(20, Arc::clone(g));
        t2.set(30, Arc::clone(f));

        assert!(t1.is_empty());
        assert!(Arc::ptr_eq(&t2.lookup(20).unwrap(), g));
        assert!(Arc::ptr_eq(&t2.lookup(30).unwrap(), f));
        assert_eq!(g.forwarding_key(), Some(20));
        assert_eq!(f.forwarding_key(), Some(30));
    }

    #[test]
    fn test_unlink_ignores_other_tables() {
        let (_owner, flows) = bound_flows(1);
        let t1 = ForwardingTable::new();
        let t2 = ForwardingTable::new();

        t1.set(20, Arc::clone(&flows[0]));
        assert!(!t2.unlink(&flows[0]));
        assert_eq!(t1.len(), 1);
    }

    #[test]
    fn test_unbound_flow_leaves_its_table() {
        let table = FlowTable::new(4);
        let owner: Arc<dyn IpcProcess> = Arc::new(Dummy);
        let flow = table.bind(&owner, None, 0, 0).unwrap();
        let pduft = ForwardingTable::new();

        pduft.set(20, Arc::clone(&flow));
        assert!(table.unbind(flow.local_port()));
        assert!(pduft.lookup(20).is_none());
        assert_eq!(flow.forwarding_key(), None);
    }
}
