//! Envelope encryption for trading-wallet private keys.
//!
//! Each wallet key is sealed under its own random session key, and the
//! session key is sealed under the process-wide application secret. Both
//! layers are AES-256-GCM with a fresh 96-bit nonce per seal, stored as
//! `base64(nonce || ciphertext || tag)`. The wallet id is bound in as
//! associated data so ciphertexts cannot be moved between rows.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{anyhow, Result};
use base64::Engine as _;
use chrono::Utc;
use rand::RngCore;
use serde_json::json;
use solana_sdk::signature::Keypair;
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::audit::{AuditRecord, AuditSink, AuditStatus, KeyOperation};
use crate::error::TradeError;
use crate::store::KeyRecordStore;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Root of the envelope. Read once at boot; zeroised on drop.
#[derive(Clone)]
pub struct AppSecret(Zeroizing<[u8; KEY_LEN]>);

impl AppSecret {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn from_hex(raw: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            hex::decode(raw).map_err(|_| anyhow!("application secret is not valid hex"))?,
        );
        let arr: [u8; KEY_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| {
                anyhow!("application secret must be {KEY_LEN} bytes, got {}", bytes.len())
            })?;
        Ok(Self::from_bytes(arr))
    }

    fn bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for AppSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AppSecret(<redacted>)")
    }
}

fn random_key() -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    rand::rngs::OsRng.fill_bytes(&mut key[..]);
    key
}

/// Encrypts `plaintext` under `key`, binding `aad`.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8], aad: &[u8]) -> Result<String, TradeError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|_| TradeError::Integrity("encryption failed".into()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(base64::engine::general_purpose::STANDARD.encode(out))
}

/// Inverse of [`seal`]. Any malformed input or tag mismatch is an integrity error.
pub fn open(
    key: &[u8; KEY_LEN],
    sealed: &str,
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, TradeError> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(sealed)
        .map_err(|_| TradeError::Integrity("ciphertext is not valid base64".into()))?;
    if raw.len() < NONCE_LEN + TAG_LEN {
        return Err(TradeError::Integrity("ciphertext truncated".into()));
    }
    let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map(Zeroizing::new)
        .map_err(|_| TradeError::Integrity("authentication tag mismatch".into()))
}

fn session_aad(wallet_id: i64) -> Vec<u8> {
    format!("session-key:{wallet_id}").into_bytes()
}

fn wallet_aad(wallet_id: i64) -> Vec<u8> {
    format!("wallet-key:{wallet_id}").into_bytes()
}

/// Parses decrypted key material: base58 (Phantom export) or a JSON byte array (solana-keygen).
#[allow(deprecated)]
pub fn decode_keypair(secret: &str) -> Result<Keypair, TradeError> {
    let trimmed = secret.trim();
    let bytes: Zeroizing<Vec<u8>> = if trimmed.starts_with('[') {
        Zeroizing::new(
            serde_json::from_str::<Vec<u8>>(trimmed)
                .map_err(|_| TradeError::Integrity("wallet key is not a valid byte array".into()))?,
        )
    } else {
        Zeroizing::new(
            bs58::decode(trimmed)
                .into_vec()
                .map_err(|_| TradeError::Integrity("wallet key is not valid base58".into()))?,
        )
    };
    Keypair::from_bytes(&bytes)
        .map_err(|_| TradeError::Integrity("wallet key bytes do not form a keypair".into()))
}

pub struct EnvelopeKeyStore {
    secret: AppSecret,
    records: Arc<dyn KeyRecordStore>,
    audit: Arc<dyn AuditSink>,
}

impl EnvelopeKeyStore {
    pub fn new(
        secret: AppSecret,
        records: Arc<dyn KeyRecordStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { secret, records, audit }
    }

    /// Seals `private_key` for `wallet_id` and makes it the wallet's only active row.
    pub async fn store_wallet_keys(
        &self,
        owner_id: &str,
        wallet_id: i64,
        private_key: &str,
    ) -> Result<i64, TradeError> {
        let res = self.store_inner(owner_id, wallet_id, private_key).await;
        let metadata = json!({
            "ownerId": owner_id,
            "walletId": wallet_id,
            "keyId": res.as_ref().ok(),
        });
        self.emit(KeyOperation::Store, &res, metadata).await;
        res
    }

    /// Returns the plaintext key. Callers sign with it and drop it; never persist or log it.
    pub async fn get_wallet_private_key(
        &self,
        wallet_id: i64,
    ) -> Result<Zeroizing<String>, TradeError> {
        let res = self.retrieve_inner(wallet_id).await;
        let metadata = json!({ "walletId": wallet_id });
        self.emit(KeyOperation::Retrieve, &res, metadata).await;
        res
    }

    /// Re-seals the wallet key under a fresh session key; returns the new version.
    pub async fn rotate_keys(&self, wallet_id: i64) -> Result<i32, TradeError> {
        let res = self.rotate_inner(wallet_id).await;
        let metadata = json!({ "walletId": wallet_id, "version": res.as_ref().ok() });
        self.emit(KeyOperation::Rotate, &res, metadata).await;
        res
    }

    async fn store_inner(
        &self,
        owner_id: &str,
        wallet_id: i64,
        private_key: &str,
    ) -> Result<i64, TradeError> {
        if owner_id.trim().is_empty() {
            return Err(TradeError::Validation("owner id is required".into()));
        }
        if private_key.is_empty() {
            return Err(TradeError::Validation("private key is required".into()));
        }
        let (session_ct, wallet_ct) = self.seal_layers(wallet_id, private_key.as_bytes())?;
        self.records
            .insert_active_key(owner_id, wallet_id, &session_ct, &wallet_ct)
            .await
    }

    async fn retrieve_inner(&self, wallet_id: i64) -> Result<Zeroizing<String>, TradeError> {
        let row = self
            .records
            .active_key(wallet_id)
            .await?
            .ok_or_else(|| TradeError::NotFound(format!("no active key for wallet {wallet_id}")))?;
        let plaintext =
            self.open_layers(wallet_id, &row.session_key_encrypted, &row.wallet_keys_encrypted)?;
        self.records.touch_key(row.id, Utc::now()).await?;
        Ok(plaintext)
    }

    async fn rotate_inner(&self, wallet_id: i64) -> Result<i32, TradeError> {
        let row = self
            .records
            .active_key(wallet_id)
            .await?
            .ok_or_else(|| TradeError::NotFound(format!("no active key for wallet {wallet_id}")))?;
        let plaintext =
            self.open_layers(wallet_id, &row.session_key_encrypted, &row.wallet_keys_encrypted)?;
        let (session_ct, wallet_ct) = self.seal_layers(wallet_id, plaintext.as_bytes())?;
        self.records
            .rotate_key(row.id, row.version, &session_ct, &wallet_ct, Utc::now())
            .await
    }

    fn seal_layers(
        &self,
        wallet_id: i64,
        plaintext: &[u8],
    ) -> Result<(String, String), TradeError> {
        let session_key = random_key();
        let wallet_ct = seal(&session_key, plaintext, &wallet_aad(wallet_id))?;
        let session_ct = seal(self.secret.bytes(), &session_key[..], &session_aad(wallet_id))?;
        Ok((session_ct, wallet_ct))
    }

    fn open_layers(
        &self,
        wallet_id: i64,
        session_ct: &str,
        wallet_ct: &str,
    ) -> Result<Zeroizing<String>, TradeError> {
        let session_raw = open(self.secret.bytes(), session_ct, &session_aad(wallet_id))?;
        let session_key: Zeroizing<[u8; KEY_LEN]> = Zeroizing::new(
            session_raw
                .as_slice()
                .try_into()
                .map_err(|_| TradeError::Integrity("session key has wrong length".into()))?,
        );
        let plain = open(&session_key, wallet_ct, &wallet_aad(wallet_id))?;
        let text = std::str::from_utf8(&plain)
            .map_err(|_| TradeError::Integrity("wallet key is not valid utf-8".into()))?;
        Ok(Zeroizing::new(text.to_string()))
    }

    async fn emit<T>(
        &self,
        operation: KeyOperation,
        res: &Result<T, TradeError>,
        metadata: serde_json::Value,
    ) {
        let (status, error_message) = match res {
            Ok(_) => (AuditStatus::Success, None),
            Err(e) => (AuditStatus::Failure, Some(e.to_string())),
        };
        self.audit
            .record(AuditRecord {
                operation,
                status,
                error_message,
                metadata,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::store::MemoryStore;
    use solana_sdk::signature::Signer;

    fn secret() -> AppSecret {
        AppSecret::from_bytes([7u8; KEY_LEN])
    }

    fn keystore() -> (EnvelopeKeyStore, Arc<MemoryStore>, Arc<MemoryAuditSink>) {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        (EnvelopeKeyStore::new(secret(), store.clone(), audit.clone()), store, audit)
    }

    #[test]
    fn seal_open_round_trip() {
        let key = [3u8; KEY_LEN];
        let sealed = seal(&key, b"hello wallet", b"ctx").unwrap();
        assert_eq!(open(&key, &sealed, b"ctx").unwrap().as_slice(), b"hello wallet");
    }

    #[test]
    fn seal_uses_a_fresh_nonce_each_call() {
        let key = [3u8; KEY_LEN];
        assert_ne!(seal(&key, b"same", b"").unwrap(), seal(&key, b"same", b"").unwrap());
    }

    #[test]
    fn any_flipped_bit_fails_closed() {
        let key = [9u8; KEY_LEN];
        let sealed = seal(&key, b"deadbeef", b"wallet-key:1").unwrap();
        let raw = base64::engine::general_purpose::STANDARD.decode(&sealed).unwrap();
        for byte in 0..raw.len() {
            for bit in 0..8 {
                let mut flipped = raw.clone();
                flipped[byte] ^= 1 << bit;
                let encoded = base64::engine::general_purpose::STANDARD.encode(&flipped);
                let err = open(&key, &encoded, b"wallet-key:1").unwrap_err();
                assert!(matches!(err, TradeError::Integrity(_)), "byte {byte} bit {bit}");
            }
        }
    }

    #[test]
    fn wrong_aad_or_key_is_rejected() {
        let key = [9u8; KEY_LEN];
        let sealed = seal(&key, b"deadbeef", b"wallet-key:1").unwrap();
        assert!(matches!(open(&key, &sealed, b"wallet-key:2"), Err(TradeError::Integrity(_))));
        assert!(matches!(
            open(&[8u8; KEY_LEN], &sealed, b"wallet-key:1"),
            Err(TradeError::Integrity(_))
        ));
        assert!(matches!(open(&key, "AAAA", b"wallet-key:1"), Err(TradeError::Integrity(_))));
    }

    #[tokio::test]
    async fn store_retrieve_rotate_preserves_plaintext() {
        let (ks, store, _) = keystore();
        ks.store_wallet_keys("owner1", 42, "deadbeef").await.unwrap();
        assert_eq!(ks.get_wallet_private_key(42).await.unwrap().as_str(), "deadbeef");

        let before = store.active_key(42).await.unwrap().unwrap();
        let version = ks.rotate_keys(42).await.unwrap();
        assert_eq!(version, 2);

        let after = store.active_key(42).await.unwrap().unwrap();
        assert_eq!(after.version, before.version + 1);
        assert_ne!(after.session_key_encrypted, before.session_key_encrypted);
        assert_ne!(after.wallet_keys_encrypted, before.wallet_keys_encrypted);
        assert!(after.last_used.is_some());
        assert_eq!(ks.get_wallet_private_key(42).await.unwrap().as_str(), "deadbeef");
    }

    #[tokio::test]
    async fn missing_wallet_is_not_found_and_audited() {
        let (ks, _, audit) = keystore();
        let err = ks.get_wallet_private_key(5).await.unwrap_err();
        assert!(matches!(err, TradeError::NotFound(_)));

        let records = audit.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, KeyOperation::Retrieve);
        assert_eq!(records[0].status, AuditStatus::Failure);
    }

    #[tokio::test]
    async fn tampered_session_layer_is_an_integrity_error() {
        let (ks, store, _) = keystore();
        ks.store_wallet_keys("owner1", 42, "deadbeef").await.unwrap();
        store
            .tamper_active_key(42, |row| {
                let mut raw = base64::engine::general_purpose::STANDARD
                    .decode(&row.session_key_encrypted)
                    .unwrap();
                raw[NONCE_LEN] ^= 0x01;
                row.session_key_encrypted = base64::engine::general_purpose::STANDARD.encode(raw);
            })
            .await;
        assert!(matches!(ks.get_wallet_private_key(42).await, Err(TradeError::Integrity(_))));
    }

    #[tokio::test]
    async fn swapped_rows_do_not_decrypt_for_another_wallet() {
        let (ks, store, _) = keystore();
        ks.store_wallet_keys("owner1", 1, "key-one").await.unwrap();
        ks.store_wallet_keys("owner1", 2, "key-two").await.unwrap();
        let one = store.active_key(1).await.unwrap().unwrap();
        store
            .tamper_active_key(2, |row| {
                row.session_key_encrypted = one.session_key_encrypted.clone();
                row.wallet_keys_encrypted = one.wallet_keys_encrypted.clone();
            })
            .await;
        assert!(matches!(ks.get_wallet_private_key(2).await, Err(TradeError::Integrity(_))));
    }

    #[tokio::test]
    async fn audit_metadata_never_contains_plaintext() {
        let (ks, _, audit) = keystore();
        ks.store_wallet_keys("owner1", 42, "deadbeef").await.unwrap();
        ks.get_wallet_private_key(42).await.unwrap();
        ks.rotate_keys(42).await.unwrap();

        let records = audit.records().await;
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.status == AuditStatus::Success));
        assert!(records.iter().all(|r| !r.metadata.to_string().contains("deadbeef")));
    }

    #[tokio::test]
    async fn empty_private_key_is_rejected() {
        let (ks, _, _) = keystore();
        let err = ks.store_wallet_keys("owner1", 42, "").await.unwrap_err();
        assert!(matches!(err, TradeError::Validation(_)));
    }

    #[test]
    fn decodes_base58_and_json_array_keypairs() {
        let kp = Keypair::new();
        let b58 = kp.to_base58_string();
        assert_eq!(decode_keypair(&b58).unwrap().pubkey(), kp.pubkey());

        let json = serde_json::to_string(&kp.to_bytes().to_vec()).unwrap();
        assert_eq!(decode_keypair(&json).unwrap().pubkey(), kp.pubkey());

        assert!(matches!(decode_keypair("deadbeef"), Err(TradeError::Integrity(_))));
    }

    #[test]
    fn secret_parsing_and_debug_redaction() {
        assert!(AppSecret::from_hex("abcd").is_err());
        assert!(AppSecret::from_hex(&"zz".repeat(32)).is_err());
        let s = AppSecret::from_hex(&"11".repeat(32)).unwrap();
        assert_eq!(format!("{s:?}"), "AppSecret(<redacted>)");
    }
}
