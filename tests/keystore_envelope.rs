use std::sync::Arc;

use solana_strategy_engine::audit::{AuditStatus, KeyOperation, MemoryAuditSink};
use solana_strategy_engine::error::TradeError;
use solana_strategy_engine::keystore::{AppSecret, EnvelopeKeyStore};
use solana_strategy_engine::store::{KeyRecordStore, MemoryStore};

fn keystore(
    store: &Arc<MemoryStore>,
    audit: &Arc<MemoryAuditSink>,
    secret: [u8; 32],
) -> EnvelopeKeyStore {
    EnvelopeKeyStore::new(AppSecret::from_bytes(secret), store.clone(), audit.clone())
}

#[tokio::test]
async fn store_retrieve_rotate_round_trip() {
    let store = Arc::new(MemoryStore::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let keys = keystore(&store, &audit, [42; 32]);

    keys.store_wallet_keys("owner1", 42, "deadbeef").await.unwrap();
    assert_eq!(keys.get_wallet_private_key(42).await.unwrap().as_str(), "deadbeef");

    let before = store.active_key(42).await.unwrap().unwrap();
    let version = keys.rotate_keys(42).await.unwrap();
    let after = store.active_key(42).await.unwrap().unwrap();

    assert_eq!(version, 2);
    assert_eq!(after.version, 2);
    assert_ne!(before.session_key_encrypted, after.session_key_encrypted);
    assert_ne!(before.wallet_keys_encrypted, after.wallet_keys_encrypted);
    assert_eq!(keys.get_wallet_private_key(42).await.unwrap().as_str(), "deadbeef");

    let ops: Vec<(KeyOperation, AuditStatus)> = audit
        .records()
        .await
        .iter()
        .map(|r| (r.operation, r.status))
        .collect();
    assert_eq!(
        ops,
        vec![
            (KeyOperation::Store, AuditStatus::Success),
            (KeyOperation::Retrieve, AuditStatus::Success),
            (KeyOperation::Rotate, AuditStatus::Success),
            (KeyOperation::Retrieve, AuditStatus::Success),
        ]
    );
    let dump = serde_json::to_string(&audit.records().await).unwrap();
    assert!(!dump.contains("deadbeef"));
}

#[tokio::test]
async fn restoring_replaces_the_active_row() {
    let store = Arc::new(MemoryStore::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let keys = keystore(&store, &audit, [1; 32]);

    keys.store_wallet_keys("owner1", 5, "first").await.unwrap();
    keys.store_wallet_keys("owner1", 5, "second").await.unwrap();

    let active: Vec<_> = store.key_rows(5).await.into_iter().filter(|r| r.is_active).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].version, 1);
    assert_eq!(keys.get_wallet_private_key(5).await.unwrap().as_str(), "second");
}

#[tokio::test]
async fn a_different_application_secret_fails_closed() {
    let store = Arc::new(MemoryStore::new());
    let audit = Arc::new(MemoryAuditSink::new());
    keystore(&store, &audit, [1; 32])
        .store_wallet_keys("owner1", 9, "deadbeef")
        .await
        .unwrap();

    let err = keystore(&store, &audit, [2; 32])
        .get_wallet_private_key(9)
        .await
        .unwrap_err();

    assert!(matches!(err, TradeError::Integrity(_)));
    let last = audit.records().await.pop().unwrap();
    assert_eq!(last.status, AuditStatus::Failure);
    assert_eq!(last.operation, KeyOperation::Retrieve);
}
