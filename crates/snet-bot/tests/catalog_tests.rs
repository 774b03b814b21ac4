mod common;

use alloy::primitives::{Address, B256};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::calculator_descriptor_set;
use prost::Message;
use snet_bot::{AppError, FileCatalog, ServiceCatalog};
use std::path::Path;
use tempfile::TempDir;

fn write_manifest(dir: &Path, group_id: &str) -> std::path::PathBuf {
    std::fs::write(
        dir.join("calc.pb"),
        calculator_descriptor_set().encode_to_vec(),
    )
    .unwrap();

    let manifest = serde_json::json!({
        "services": [{
            "snet_id": "org1",
            "descriptor": "v1",
            "service_id": "calculator",
            "url": "http://calc.example.org:7000",
            "price": 100,
            "group_id": group_id,
            "payment_address": "0x1111111111111111111111111111111111111111",
            "expiration_threshold": 100,
            "descriptor_set": "calc.pb"
        }]
    });
    let path = dir.join("catalog.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&manifest).unwrap()).unwrap();
    path
}

#[tokio::test]
async fn test_load_manifest() {
    let dir = TempDir::new().unwrap();
    let path = write_manifest(dir.path(), &STANDARD.encode([7u8; 32]));
    let escrow = Address::repeat_byte(0x22);

    let catalog = FileCatalog::load(&path, escrow).await.unwrap();

    assert_eq!(catalog.len(), 1);
    let entry = catalog.lookup("org1", "v1").unwrap();
    assert_eq!(entry.service.org_id, "org1");
    assert_eq!(entry.service.service_id, "calculator");
    assert_eq!(entry.service.price, 100);
    assert_eq!(entry.service.group_id, B256::repeat_byte(7));
    assert_eq!(entry.service.payment_address, Address::repeat_byte(0x11));
    assert_eq!(entry.service.escrow_address, escrow);
    assert!(entry.schema.get_service_by_name("example.calc").is_some());

    assert!(catalog.lookup("org1", "v2").is_none());
}

#[tokio::test]
async fn test_bad_group_id_fails_load() {
    let dir = TempDir::new().unwrap();
    let path = write_manifest(dir.path(), &STANDARD.encode([7u8; 8]));

    let err = FileCatalog::load(&path, Address::ZERO).await.unwrap_err();

    assert!(matches!(err, AppError::Catalog(ref msg) if msg.contains("group_id")));
}

#[tokio::test]
async fn test_missing_manifest() {
    let dir = TempDir::new().unwrap();

    let err = FileCatalog::load(&dir.path().join("absent.json"), Address::ZERO)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Catalog(_)));
}
