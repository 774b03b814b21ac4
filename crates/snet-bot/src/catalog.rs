//! Service catalog: payment metadata and compiled schemas per service.

use crate::error::{AppError, AppResult};
use alloy::primitives::{Address, B256};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use grpc_invoke::DescriptorPool;
use mpe_payments::ServiceDescriptor;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

/// A callable service.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub service: ServiceDescriptor,
    pub schema: DescriptorPool,
}

/// Resolves `(snet_id, descriptor)` from a chat command.
pub trait ServiceCatalog: Send + Sync {
    fn lookup(&self, snet_id: &str, descriptor: &str) -> Option<CatalogEntry>;
}

#[derive(Debug, Deserialize)]
struct Manifest {
    services: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    /// Organization id used in commands.
    snet_id: String,
    descriptor: String,
    service_id: String,
    url: String,
    price: u64,
    /// Base64, 32 bytes once decoded.
    group_id: String,
    payment_address: String,
    expiration_threshold: u64,
    /// Compiled `FileDescriptorSet`, relative to the manifest.
    descriptor_set: PathBuf,
}

/// Catalog read from a JSON manifest at startup.
#[derive(Debug, Default)]
pub struct FileCatalog {
    entries: HashMap<(String, String), CatalogEntry>,
}

impl FileCatalog {
    /// Load every manifest entry; any unreadable entry fails the load.
    pub async fn load(path: &Path, escrow_address: Address) -> AppResult<Self> {
        let bytes = fs::read(path)
            .await
            .map_err(|e| AppError::Catalog(format!("read {:?}: {}", path, e)))?;
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::Catalog(format!("parse {:?}: {}", path, e)))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut entries = HashMap::new();

        for entry in manifest.services {
            let key = (entry.snet_id.clone(), entry.descriptor.clone());
            let catalog_entry = load_entry(base, entry, escrow_address).await?;
            entries.insert(key, catalog_entry);
        }

        info!("Loaded {} services from {:?}", entries.len(), path);
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ServiceCatalog for FileCatalog {
    fn lookup(&self, snet_id: &str, descriptor: &str) -> Option<CatalogEntry> {
        self.entries
            .get(&(snet_id.to_string(), descriptor.to_string()))
            .cloned()
    }
}

async fn load_entry(
    base: &Path,
    entry: ManifestEntry,
    escrow_address: Address,
) -> AppResult<CatalogEntry> {
    let name = format!("{}/{}", entry.snet_id, entry.descriptor);

    let group_id = parse_group_id(&entry.group_id)
        .map_err(|e| AppError::Catalog(format!("{}: {}", name, e)))?;
    let payment_address: Address = entry
        .payment_address
        .parse()
        .map_err(|e| AppError::Catalog(format!("{}: payment_address: {}", name, e)))?;

    let set_path = base.join(&entry.descriptor_set);
    let bytes = fs::read(&set_path)
        .await
        .map_err(|e| AppError::Catalog(format!("{}: read {:?}: {}", name, set_path, e)))?;
    let schema = DescriptorPool::decode(bytes.as_slice())
        .map_err(|e| AppError::Catalog(format!("{}: decode {:?}: {}", name, set_path, e)))?;

    Ok(CatalogEntry {
        service: ServiceDescriptor {
            org_id: entry.snet_id,
            service_id: entry.service_id,
            url: entry.url,
            price: entry.price,
            group_id,
            payment_address,
            escrow_address,
            expiration_threshold: entry.expiration_threshold,
        },
        schema,
    })
}

fn parse_group_id(encoded: &str) -> Result<B256, String> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("group_id: {}", e))?;
    if bytes.len() != 32 {
        return Err(format!("group_id: expected 32 bytes, got {}", bytes.len()));
    }
    Ok(B256::from_slice(&bytes))
}
