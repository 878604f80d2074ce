//! Registry of live IPC processes and the factories that build them.
//!
//! The registry owns:
//! - **Factories**: one per DIF type, registered at runtime
//! - **Instances**: each under a small integer id, with its name and the
//!   DIF it has been assigned to
//! - **Flows**: the port table shared by every instance
//!
//! All registry state sits behind one lock. Creation, destruction,
//! assignment and enumeration are serialized and never observe each other
//! half-done. Forwarding tables live inside the instances and are not
//! covered by this lock.

pub mod factory;
pub mod index;
pub mod process;

pub use factory::{IpcpContext, IpcpFactory};
pub use index::{IdBitmap, IpcpIndex};
pub use process::{FlowAllocation, IpcProcess, MgmtHint};

use crate::config::{DifType, RegistryConfig};
use crate::error::{Result, RinaError};
use crate::flow::FlowTable;
use crate::name::ProcessName;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// A live instance as stored in the registry.
struct IpcpEntry {
    dif_type: DifType,
    name: ProcessName,
    dif_name: Option<ProcessName>,
    instance: Arc<dyn IpcProcess>,
}

/// Copy of one registry entry, as returned by enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySnapshot {
    pub id: u16,
    pub dif_type: DifType,
    pub name: ProcessName,
    pub dif_name: Option<ProcessName>,
}

struct RegistryState {
    index: IpcpIndex<IpcpEntry>,
    factories: HashMap<DifType, Arc<dyn IpcpFactory>>,
    /// Id returned by the last enumeration step.
    fetch_cursor: Option<u16>,
}

/// Process-wide registry of IPC processes.
pub struct Registry {
    state: Mutex<RegistryState>,
    flows: Arc<FlowTable>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an empty registry with no factories.
    pub fn new() -> Self {
        Self::with_capacity(RegistryConfig::MAX_IPCP_IDS)
    }

    /// Create an empty registry with a custom id capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                index: IpcpIndex::new(capacity),
                factories: HashMap::new(),
                fetch_cursor: None,
            }),
            flows: Arc::new(FlowTable::default()),
        }
    }

    /// Create a registry with the normal and shim-dummy factories installed.
    pub fn with_default_factories() -> Result<Self> {
        let registry = Self::new();
        registry.register_factory(Arc::new(crate::normal::NormalFactory))?;
        registry.register_factory(Arc::new(crate::shim_dummy::ShimDummyFactory))?;
        Ok(registry)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, RegistryState>> {
        self.state
            .lock()
            .map_err(|_| RinaError::Other("Failed to acquire registry lock".to_string()))
    }

    /// Port table shared by all instances.
    pub fn flows(&self) -> &Arc<FlowTable> {
        &self.flows
    }

    // ========================================
    // Factories
    // ========================================

    pub fn register_factory(&self, factory: Arc<dyn IpcpFactory>) -> Result<()> {
        let dif_type = factory.dif_type();
        if !dif_type.is_valid() {
            return Err(RinaError::invalid_argument(format!(
                "DIF type {} cannot be registered",
                dif_type.0
            )));
        }

        let mut state = self.lock_state()?;
        if state.factories.contains_key(&dif_type) {
            return Err(RinaError::AlreadyRegistered(dif_type));
        }
        state.factories.insert(dif_type, factory);

        info!("Registered factory for DIF type {}", dif_type);
        Ok(())
    }

    /// Remove the factory for a DIF type. Existing instances are unaffected.
    pub fn unregister_factory(&self, dif_type: DifType) -> Result<()> {
        let mut state = self.lock_state()?;
        if state.factories.remove(&dif_type).is_none() {
            return Err(RinaError::NotFound {
                what: format!("Factory for DIF type {}", dif_type),
            });
        }
        info!("Unregistered factory for DIF type {}", dif_type);
        Ok(())
    }

    pub fn dif_types(&self) -> Result<Vec<DifType>> {
        let state = self.lock_state()?;
        let mut types: Vec<DifType> = state.factories.keys().copied().collect();
        types.sort();
        Ok(types)
    }

    // ========================================
    // Instances
    // ========================================

    /// Build a new instance and register it under the lowest free id.
    pub fn create_instance(&self, dif_type: DifType, name: ProcessName) -> Result<u16> {
        let mut state = self.lock_state()?;
        let factory = state
            .factories
            .get(&dif_type)
            .cloned()
            .ok_or(RinaError::NoFactory(dif_type))?;

        let ctx = IpcpContext {
            dif_type,
            name: name.clone(),
            flows: Arc::clone(&self.flows),
        };
        let instance = factory.create(&ctx).map_err(|e| match e {
            e @ RinaError::AllocationFailure { .. } => e,
            other => RinaError::AllocationFailure {
                message: format!("{} factory failed: {}", dif_type, other),
            },
        })?;

        let installed = state.index.insert_with(|_| IpcpEntry {
            dif_type,
            name: name.clone(),
            dif_name: None,
            instance: Arc::clone(&instance),
        });
        let Some(id) = installed else {
            let capacity = state.index.capacity();
            drop(state);
            instance.destroy();
            warn!("Cannot create IPC process '{}': no free ids", name);
            return Err(RinaError::OutOfIds { capacity });
        };

        info!("Created IPC process {} '{}' of type {}", id, name, dif_type);
        Ok(id)
    }

    /// Remove an instance and run its destroy operation.
    ///
    /// Returns `false` if no instance has this id.
    pub fn destroy_instance(&self, id: u16) -> Result<bool> {
        let entry = {
            let mut state = self.lock_state()?;
            let Some(entry) = state.index.remove(id) else {
                debug!("Destroy of unknown IPC process {}", id);
                return Ok(false);
            };
            if state.fetch_cursor == Some(id) {
                state.fetch_cursor = None;
            }
            entry
        };

        entry.instance.destroy();
        let released = self.flows.release_bound_to(&entry.instance);

        info!(
            "Destroyed IPC process {} '{}' ({} flows released)",
            id, entry.name, released
        );
        Ok(true)
    }

    /// Record the DIF an instance belongs to and pass it to the instance.
    ///
    /// Returns `false` if no instance has this id.
    pub fn assign_to_dif(&self, id: u16, dif_name: ProcessName) -> Result<bool> {
        let mut state = self.lock_state()?;
        let Some(entry) = state.index.get_mut(id) else {
            debug!("Assign of unknown IPC process {}", id);
            return Ok(false);
        };

        entry.instance.assign_to_dif(&dif_name)?;
        info!("Assigned IPC process {} to DIF '{}'", id, dif_name);
        entry.dif_name = Some(dif_name);
        Ok(true)
    }

    pub fn instance(&self, id: u16) -> Result<Option<Arc<dyn IpcProcess>>> {
        let state = self.lock_state()?;
        Ok(state.index.get(id).map(|entry| Arc::clone(&entry.instance)))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock_state()?.index.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Return the entry after the enumeration cursor and advance it.
    ///
    /// At the end `None` is returned and the cursor resets, so the next call
    /// starts over. The cursor is shared by all callers: interleaved
    /// enumerations see each other's progress.
    pub fn enumerate_next(&self) -> Result<Option<EntrySnapshot>> {
        let mut state = self.lock_state()?;
        let cursor = state.fetch_cursor;
        let next = state.index.next_after(cursor).map(|(id, entry)| EntrySnapshot {
            id,
            dif_type: entry.dif_type,
            name: entry.name.clone(),
            dif_name: entry.dif_name.clone(),
        });
        state.fetch_cursor = next.as_ref().map(|snapshot| snapshot.id);
        Ok(next)
    }

    /// Snapshot every entry in id order without touching the cursor.
    pub fn entries(&self) -> Result<Vec<EntrySnapshot>> {
        let state = self.lock_state()?;
        Ok(state
            .index
            .iter()
            .map(|(id, entry)| EntrySnapshot {
                id,
                dif_type: entry.dif_type,
                name: entry.name.clone(),
                dif_name: entry.dif_name.clone(),
            })
            .collect())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dbg = f.debug_struct("Registry");
        if let Ok(state) = self.state.try_lock() {
            dbg.field("instances", &state.index.len())
                .field("factories", &state.factories.len());
        }
        dbg.finish_non_exhaustive()
    }
}
