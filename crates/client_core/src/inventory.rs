use std::sync::Arc;

use shared::domain::InventoryItem;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::{
    authority::DeviceAuthority,
    error::{SyncError, ValidationError},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryView {
    pub items: Vec<InventoryItem>,
    pub loading: bool,
}

/// Inventory as last reported by the authority. Stock is never computed
/// locally: every adjustment is followed by a re-fetch.
pub struct InventoryTracker {
    authority: Arc<dyn DeviceAuthority>,
    view: RwLock<InventoryView>,
    fetch_gate: Mutex<()>,
}

impl InventoryTracker {
    pub fn new(authority: Arc<dyn DeviceAuthority>) -> Self {
        Self {
            authority,
            view: RwLock::new(InventoryView {
                items: Vec::new(),
                loading: true,
            }),
            fetch_gate: Mutex::new(()),
        }
    }

    pub async fn view(&self) -> InventoryView {
        self.view.read().await.clone()
    }

    /// Reads `/items`. The loading flag is cleared whether or not the read
    /// succeeds; on failure the previous list is kept.
    pub async fn fetch(&self) -> Result<Vec<InventoryItem>, SyncError> {
        let _gate = self.fetch_gate.lock().await;
        self.view.write().await.loading = true;
        let result = self
            .authority
            .read_inventory()
            .await
            .map_err(|err| SyncError::from_authority("read inventory", err));

        let mut view = self.view.write().await;
        view.loading = false;
        match result {
            Ok(items) => {
                view.items = items.clone();
                Ok(items)
            }
            Err(error) => {
                warn!(%error, "inventory fetch failed; keeping previous list");
                Err(error)
            }
        }
    }

    pub async fn adjust_stock(&self, name: &str, delta: i64) -> Result<Vec<InventoryItem>, SyncError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyItemName.into());
        }
        if delta == 0 {
            return Err(ValidationError::ZeroDelta.into());
        }

        self.authority
            .adjust_stock(name, delta)
            .await
            .map_err(|error| {
                warn!(item = name, delta, %error, "stock adjustment failed");
                SyncError::DispatchFailed(format!("{error:#}"))
            })?;
        info!(item = name, delta, "stock adjusted");
        self.fetch().await
    }
}

#[cfg(test)]
#[path = "tests/inventory_tests.rs"]
mod tests;
