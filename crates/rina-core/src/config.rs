//! Centralized configuration for the IPC process registry.
//!
//! This module provides configuration constants for id spaces, the control
//! channel and the normal IPC process, plus the DIF type tags understood by
//! the default factories.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Registry-level configuration.
pub struct RegistryConfig;

impl RegistryConfig {
    /// Capacity of the IPC process id space.
    pub const MAX_IPCP_IDS: usize = 1024;
    /// Capacity of the port id space shared by all flows.
    pub const MAX_PORT_IDS: usize = 4096;
    /// SDUs held for an application flow that has not read them; further
    /// arrivals are dropped.
    pub const MAX_FLOW_RX_QUEUE: usize = 256;
}

/// Control channel and control device configuration.
pub struct ControlConfig;

impl ControlConfig {
    /// Every control message starts with a u16 type and a u32 event id.
    pub const HEADER_SIZE: usize = 6;
    /// Bound of the scratch buffer a request is deserialized from.
    pub const MAX_MESSAGE_SIZE: usize = 1024;
    /// Largest frame the device accepts or emits (fetch responses carry two names).
    pub const MAX_FRAME_SIZE: usize = 4 * Self::MAX_MESSAGE_SIZE;
    /// Initial read capacity used by the device when draining a session.
    pub const DEFAULT_READ_CAPACITY: usize = Self::MAX_MESSAGE_SIZE;
    /// Responses buffered between a session and its socket writer.
    pub const OUTBOUND_BACKLOG: usize = 64;
    pub const MAX_CONNECTIONS: usize = 32;
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    /// How long a closing connection may spend flushing queued responses.
    pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Normal IPC process configuration.
pub struct NormalConfig;

impl NormalConfig {
    /// `apply_config` key that sets the instance address.
    pub const ADDRESS_KEY: &'static str = "address";
    /// Most PCI headers a single buffer may carry; bounds recursion through
    /// misconfigured (cyclic) forwarding tables.
    pub const MAX_LAYER_DEPTH: usize = 16;
}

/// DIF type tag selecting the factory that builds an IPC process.
///
/// The tag is an open set: factories for tags other than the built-in ones
/// may be registered at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DifType(pub u8);

impl DifType {
    /// Reserved, never backed by a factory.
    pub const INVALID: DifType = DifType(0);
    pub const NORMAL: DifType = DifType(1);
    pub const SHIM_DUMMY: DifType = DifType(2);

    pub fn as_str(&self) -> &'static str {
        match *self {
            DifType::NORMAL => "normal",
            DifType::SHIM_DUMMY => "shim-dummy",
            DifType::INVALID => "invalid",
            _ => "custom",
        }
    }

    /// Parse a DIF type from its name or its numeric tag.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "normal" => Some(DifType::NORMAL),
            "shim-dummy" | "shim_dummy" | "dummy" => Some(DifType::SHIM_DUMMY),
            other => other.parse::<u8>().ok().map(DifType),
        }
    }

    pub fn is_valid(&self) -> bool {
        *self != DifType::INVALID
    }
}

impl std::fmt::Display for DifType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.as_str() {
            "custom" => write!(f, "dif-type-{}", self.0),
            name => write!(f, "{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dif_type_roundtrip() {
        for dif_type in [DifType::NORMAL, DifType::SHIM_DUMMY] {
            let parsed = DifType::from_str(dif_type.as_str()).expect("Should parse");
            assert_eq!(dif_type, parsed);
        }
    }

    #[test]
    fn test_dif_type_numeric_tags() {
        assert_eq!(DifType::from_str("1"), Some(DifType::NORMAL));
        assert_eq!(DifType::from_str("42"), Some(DifType(42)));
        assert_eq!(DifType::from_str("bogus"), None);
        assert_eq!(DifType(42).to_string(), "dif-type-42");
        assert!(!DifType::INVALID.is_valid());
    }

    #[test]
    fn test_limits_are_consistent() {
        assert!(ControlConfig::MAX_MESSAGE_SIZE > ControlConfig::HEADER_SIZE);
        assert!(ControlConfig::MAX_FRAME_SIZE >= ControlConfig::MAX_MESSAGE_SIZE);
        assert!(RegistryConfig::MAX_IPCP_IDS <= u16::MAX as usize + 1);
        assert!(ControlConfig::REQUEST_TIMEOUT > Duration::ZERO);
    }
}
