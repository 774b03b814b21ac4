//! Payment state store with optional JSON persistence.

use crate::error::PaymentError;
use crate::types::{PaymentKey, PaymentState, PaymentStatus, PaymentUri};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Data version for schema migrations.
const DATA_VERSION: u32 = 1;

/// Persistent data structure for the state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateStoreData {
    pub version: u32,
    pub states: HashMap<Uuid, PaymentState>,
}

impl Default for StateStoreData {
    fn default() -> Self {
        Self {
            version: DATA_VERSION,
            states: HashMap::new(),
        }
    }
}

/// Payment states keyed by id.
///
/// A state leaves `pending` exactly once.
pub struct PaymentStateStore {
    data: RwLock<StateStoreData>,
    storage_path: Option<PathBuf>,
}

impl PaymentStateStore {
    /// Create a store, loading existing data when `storage_path` is set.
    pub async fn new(storage_path: Option<PathBuf>) -> Result<Arc<Self>, PaymentError> {
        let store = Arc::new(Self {
            data: RwLock::new(StateStoreData::default()),
            storage_path,
        });

        store.load().await?;

        Ok(store)
    }

    /// Create a store that never touches disk.
    pub fn memory() -> Arc<Self> {
        Arc::new(Self {
            data: RwLock::new(StateStoreData::default()),
            storage_path: None,
        })
    }

    async fn load(&self) -> Result<(), PaymentError> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };

        if !path.exists() {
            info!("No payment state at {:?}, starting fresh", path);
            return Ok(());
        }

        let bytes = fs::read(path).await?;
        let loaded: StateStoreData = serde_json::from_slice(&bytes)?;

        if loaded.version != DATA_VERSION {
            warn!(
                "Payment state version {} differs from {}",
                loaded.version, DATA_VERSION
            );
        }

        info!("Loaded {} payment states from {:?}", loaded.states.len(), path);
        *self.data.write().await = loaded;

        Ok(())
    }

    async fn persist(&self, data: &StateStoreData) -> Result<(), PaymentError> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };

        let bytes = serde_json::to_vec_pretty(data)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Atomic write
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &bytes).await?;
        fs::rename(&temp_path, path).await?;

        debug!("Saved payment state ({} bytes) to {:?}", bytes.len(), path);
        Ok(())
    }

    /// Record a new pending payment.
    pub async fn create(&self, key: PaymentKey, uri: PaymentUri) -> Result<PaymentState, PaymentError> {
        let state = PaymentState::new(key, uri);

        let mut data = self.data.write().await;
        data.states.insert(state.id, state.clone());
        if let Err(e) = self.persist(&data).await {
            data.states.remove(&state.id);
            return Err(e);
        }

        info!("Created payment {} for {}", state.id, state.key.sender);
        Ok(state)
    }

    pub async fn get(&self, id: Uuid) -> Option<PaymentState> {
        self.data.read().await.states.get(&id).cloned()
    }

    /// Most recent payment for `key`.
    pub async fn find_by_key(&self, key: &PaymentKey) -> Option<PaymentState> {
        self.data
            .read()
            .await
            .states
            .values()
            .filter(|state| &state.key == key)
            .max_by_key(|state| state.created_at)
            .cloned()
    }

    /// Attach the transaction a user reports for a pending payment.
    pub async fn record_tx_hash(&self, id: Uuid, tx_hash: &str) -> Result<PaymentState, PaymentError> {
        validate_tx_hash(tx_hash)?;

        self.update_pending(id, |data| {
            let claimed = data.states.values().any(|other| {
                other.id != id
                    && other
                        .tx_hash
                        .as_deref()
                        .is_some_and(|hash| hash.eq_ignore_ascii_case(tx_hash))
            });
            if claimed {
                return Err(PaymentError::TxHashInUse(tx_hash.to_string()));
            }
            Ok(move |state: &mut PaymentState| state.tx_hash = Some(tx_hash.to_string()))
        })
        .await
    }

    pub async fn mark_paid(&self, id: Uuid) -> Result<PaymentState, PaymentError> {
        let state = self
            .update_pending(id, |_| {
                Ok(|state: &mut PaymentState| state.status = PaymentStatus::Paid)
            })
            .await?;
        info!("Payment {} paid", id);
        Ok(state)
    }

    pub async fn mark_expired(&self, id: Uuid) -> Result<PaymentState, PaymentError> {
        let state = self
            .update_pending(id, |_| {
                Ok(|state: &mut PaymentState| state.status = PaymentStatus::Expired)
            })
            .await?;
        info!("Payment {} expired", id);
        Ok(state)
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.states.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.states.is_empty()
    }

    /// Drop paid and expired states last updated more than `retention` ago.
    pub async fn prune(&self, retention: Duration) -> Result<usize, PaymentError> {
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| PaymentError::Config(format!("retention {:?}: {}", retention, e)))?;
        let cutoff = Utc::now() - retention;

        let mut data = self.data.write().await;
        let stale: Vec<Uuid> = data
            .states
            .values()
            .filter(|state| !state.is_pending() && state.updated_at < cutoff)
            .map(|state| state.id)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let removed: Vec<PaymentState> = stale
            .iter()
            .filter_map(|id| data.states.remove(id))
            .collect();
        if let Err(e) = self.persist(&data).await {
            for state in removed {
                data.states.insert(state.id, state);
            }
            return Err(e);
        }

        debug!("Pruned {} settled payment states", removed.len());
        Ok(removed.len())
    }

    /// Apply the change returned by `check` to a pending state.
    ///
    /// Memory only changes once the new state is persisted.
    async fn update_pending<C, F>(&self, id: Uuid, check: C) -> Result<PaymentState, PaymentError>
    where
        C: FnOnce(&StateStoreData) -> Result<F, PaymentError>,
        F: FnOnce(&mut PaymentState),
    {
        let mut data = self.data.write().await;
        let current = data.states.get(&id).ok_or(PaymentError::NotFound(id))?;

        if !current.is_pending() {
            return Err(PaymentError::InvalidTransition {
                id,
                status: current.status.to_string(),
            });
        }

        let mut updated = current.clone();
        let apply = check(&data)?;
        apply(&mut updated);
        updated.updated_at = Utc::now();

        let previous = data.states.insert(id, updated.clone());
        if let Err(e) = self.persist(&data).await {
            if let Some(previous) = previous {
                data.states.insert(id, previous);
            }
            return Err(e);
        }
        Ok(updated)
    }
}

/// `0x` followed by 64 hex digits.
pub fn validate_tx_hash(tx_hash: &str) -> Result<(), PaymentError> {
    let digits = tx_hash
        .strip_prefix("0x")
        .ok_or_else(|| PaymentError::InvalidTxHash(tx_hash.to_string()))?;

    if digits.len() != 64 || hex::decode(digits).is_err() {
        return Err(PaymentError::InvalidTxHash(tx_hash.to_string()));
    }
    Ok(())
}
