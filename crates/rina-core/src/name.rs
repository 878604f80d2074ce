//! Structured application/process naming.

use crate::error::{Result, RinaError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Four-part application naming information.
///
/// Every component is optional; empty text is normalized to "absent" so that
/// two names compare equal exactly when they render identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessName {
    /// Application process name.
    pub process_name: Option<String>,
    /// Application process instance.
    pub process_instance: Option<String>,
    /// Application entity name.
    pub entity_name: Option<String>,
    /// Application entity instance.
    pub entity_instance: Option<String>,
}

fn normalize(part: Option<String>) -> Option<String> {
    part.filter(|s| !s.is_empty())
}

impl ProcessName {
    pub fn new(
        process_name: Option<String>,
        process_instance: Option<String>,
        entity_name: Option<String>,
        entity_instance: Option<String>,
    ) -> Self {
        Self {
            process_name: normalize(process_name),
            process_instance: normalize(process_instance),
            entity_name: normalize(entity_name),
            entity_instance: normalize(entity_instance),
        }
    }

    /// Name made of a process name only, e.g. `"a.IPC"` or `"test.DIF"`.
    pub fn process(process_name: impl Into<String>) -> Self {
        Self::new(Some(process_name.into()), None, None, None)
    }

    /// True when all four components are absent.
    pub fn is_empty(&self) -> bool {
        self.parts().iter().all(Option::is_none)
    }

    /// Components in wire order.
    pub fn parts(&self) -> [Option<&str>; 4] {
        [
            self.process_name.as_deref(),
            self.process_instance.as_deref(),
            self.entity_name.as_deref(),
            self.entity_instance.as_deref(),
        ]
    }

    pub(crate) fn from_parts(parts: [Option<String>; 4]) -> Self {
        let [apn, api, aen, aei] = parts;
        Self::new(apn, api, aen, aei)
    }
}

impl std::fmt::Display for ProcessName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts = self.parts();
        let used = parts.iter().rposition(Option::is_some).map_or(0, |i| i + 1);
        for (i, part) in parts[..used].iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(part.unwrap_or(""))?;
        }
        Ok(())
    }
}

impl FromStr for ProcessName {
    type Err = RinaError;

    /// Parse the `apn/api/aen/aei` form; missing trailing parts are absent.
    fn from_str(s: &str) -> Result<Self> {
        let pieces: Vec<&str> = s.split('/').collect();
        if pieces.len() > 4 {
            return Err(RinaError::invalid_argument(format!(
                "name '{}' has more than four components",
                s
            )));
        }

        let mut parts: [Option<String>; 4] = Default::default();
        for (slot, piece) in parts.iter_mut().zip(pieces) {
            *slot = Some(piece.to_string());
        }
        Ok(Self::from_parts(parts))
    }
}
