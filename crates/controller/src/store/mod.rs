use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use foreman_common::ids::OrderId;
use foreman_common::types::{ControllerState, WorkOrder};
use foreman_common::{ControllerError, Result};

/// Write `value` as JSON via a temp file in the same directory, then rename.
/// Readers never observe a partial file.
pub async fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Atomic text variant of [`atomic_write_json`], for rendered reports.
pub async fn atomic_write_text(path: &Path, body: &str) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, body.as_bytes()).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Durable storage for work-order artifacts and the controller state file,
/// rooted at the configured work-orders path.
pub struct StateStore {
    base: PathBuf,
}

impl StateStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn orders_dir(&self) -> PathBuf {
        self.base.join("work_orders")
    }

    fn order_path(&self, order_id: &OrderId) -> PathBuf {
        self.orders_dir().join(format!("{}.json", order_id))
    }

    fn state_path(&self) -> PathBuf {
        self.base.join("controller_state.json")
    }

    /// Create the storage directories. Safe to run on every startup.
    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.orders_dir()).await?;
        Ok(())
    }

    pub async fn write_work_order(&self, order: &WorkOrder) -> Result<PathBuf> {
        let path = self.order_path(&order.order_id);
        atomic_write_json(&path, order)
            .await
            .map_err(|e| ControllerError::WorkOrderCreation {
                issue_id: order.issue_id.clone(),
                reason: e.to_string(),
            })?;
        Ok(path)
    }

    pub async fn read_work_order(&self, order_id: &OrderId) -> Result<Option<WorkOrder>> {
        read_json(&self.order_path(order_id)).await
    }

    pub async fn delete_work_order(&self, order_id: &OrderId) -> Result<()> {
        match tokio::fs::remove_file(self.order_path(order_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read every persisted work order. Unreadable artifacts are skipped:
    /// a deleted or corrupt file must not poison state recovery.
    pub async fn list_work_orders(&self) -> Result<Vec<WorkOrder>> {
        let mut orders = Vec::new();
        let mut dir = match tokio::fs::read_dir(self.orders_dir()).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(orders),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(raw) => match serde_json::from_slice::<WorkOrder>(&raw) {
                    Ok(order) => orders.push(order),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable work order");
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable work order");
                }
            }
        }

        orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        Ok(orders)
    }

    pub async fn write_state(&self, state: &ControllerState) -> Result<()> {
        atomic_write_json(&self.state_path(), state)
            .await
            .map_err(|e| ControllerError::StatePersistence(e.to_string()))
    }

    pub async fn read_state(&self) -> Result<Option<ControllerState>> {
        read_json(&self.state_path()).await
    }
}
