//! Bookkeeping of which device paths are held open.

use super::error::PortError;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Set of device paths currently claimed. Cloning shares the set.
#[derive(Debug, Clone, Default)]
pub struct PortClaims {
    held: Arc<Mutex<HashSet<String>>>,
}

impl PortClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path`, failing with [`PortError::AlreadyOpen`] if it is taken.
    pub fn claim(&self, path: &str) -> Result<PortClaim, PortError> {
        let mut held = self.held.lock();
        if !held.insert(path.to_string()) {
            return Err(PortError::AlreadyOpen(path.to_string()));
        }
        Ok(PortClaim {
            path: path.to_string(),
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, path: &str) -> bool {
        self.held.lock().contains(path)
    }
}

/// Releases its path when dropped.
#[derive(Debug)]
pub struct PortClaim {
    path: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl PortClaim {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for PortClaim {
    fn drop(&mut self) {
        self.held.lock().remove(&self.path);
    }
}
