//! Per-service signing identities.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::custody::cipher::MasterKey;
use crate::custody::types::{CustodyError, Identity, SignedPayload, WalletRecord};
use crate::custody::wallet::Wallet;
use crate::observability::metrics;
use crate::store::{StoreError, WalletStore};

/// Holds, encrypts and releases signing material per service.
///
/// Knows nothing about transactions: it signs whatever bytes it is given.
pub struct KeyCustodian {
    wallets: Arc<dyn WalletStore>,
    master: MasterKey,
    /// Decrypted wallets by service. Process memory is trusted; the
    /// encryption protects the store, not the running process.
    cache: DashMap<String, Arc<Wallet>>,
}

impl KeyCustodian {
    pub fn new(wallets: Arc<dyn WalletStore>, master: MasterKey) -> Self {
        Self {
            wallets,
            master,
            cache: DashMap::new(),
        }
    }

    /// Create the identity for `service`, or return the existing one.
    pub async fn create_identity(
        &self,
        service: &str,
        now: DateTime<Utc>,
    ) -> Result<Identity, CustodyError> {
        if let Some(existing) = self.wallets.get_wallet(service).await? {
            if existing.is_revoked() {
                return Err(CustodyError::IdentityRevoked(service.to_string()));
            }
            return Ok(existing.identity());
        }

        let wallet = Wallet::generate();
        let encrypted_key = self
            .master
            .seal(wallet.secret_bytes().as_slice(), service.as_bytes())?;
        let record = WalletRecord {
            service: service.to_string(),
            address: wallet.address(),
            public_key: wallet.public_key_hex(),
            encrypted_key,
            created_at: now,
            revoked_at: None,
        };

        match self.wallets.put_wallet(record).await {
            Ok(stored) => {
                tracing::info!(
                    service = %service,
                    address = %stored.address,
                    "Signing identity created"
                );
                self.cache.insert(service.to_string(), Arc::new(wallet));
                Ok(stored.identity())
            }
            // Lost a creation race; the stored identity wins.
            Err(StoreError::WalletExists(_)) => self.identity(service).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Public identity of an existing wallet.
    pub async fn identity(&self, service: &str) -> Result<Identity, CustodyError> {
        match self.wallets.get_wallet(service).await? {
            Some(record) if record.is_revoked() => {
                Err(CustodyError::IdentityRevoked(service.to_string()))
            }
            Some(record) => Ok(record.identity()),
            None => Err(CustodyError::IdentityNotFound(service.to_string())),
        }
    }

    /// Sign `message` with the service's key.
    pub async fn sign(&self, service: &str, message: &[u8]) -> Result<SignedPayload, CustodyError> {
        let wallet = self.unlock(service).await.map_err(|e| {
            metrics::record_signing_failure(service);
            e
        })?;
        wallet.sign(message)
    }

    async fn unlock(&self, service: &str) -> Result<Arc<Wallet>, CustodyError> {
        if let Some(wallet) = self.cache.get(service).map(|entry| Arc::clone(entry.value())) {
            return Ok(wallet);
        }

        let record = self
            .wallets
            .get_wallet(service)
            .await?
            .ok_or_else(|| CustodyError::IdentityNotFound(service.to_string()))?;
        if record.is_revoked() {
            return Err(CustodyError::IdentityRevoked(service.to_string()));
        }

        let secret = self.master.open(&record.encrypted_key, service.as_bytes())?;
        let wallet = Wallet::from_secret_bytes(secret.as_slice())?;
        if wallet.address() != record.address {
            return Err(CustodyError::DecryptionFailed(format!(
                "decrypted key does not match address {}",
                record.address
            )));
        }

        let wallet = Arc::new(wallet);
        self.cache.insert(service.to_string(), Arc::clone(&wallet));
        Ok(wallet)
    }

    /// Drop every decrypted key from memory.
    pub fn clear_cache(&self) {
        let evicted = self.cache.len();
        self.cache.clear();
        tracing::info!(evicted, "Cleared decrypted key cache");
    }

    /// Manually revoke a service identity. Never happens automatically.
    pub async fn revoke(&self, service: &str, now: DateTime<Utc>) -> Result<(), CustodyError> {
        self.wallets
            .revoke_wallet(service, now)
            .await
            .map_err(|e| match e {
                StoreError::WalletNotFound(s) => CustodyError::IdentityNotFound(s),
                other => other.into(),
            })?;
        self.cache.remove(service);
        tracing::warn!(service = %service, "Signing identity revoked");
        Ok(())
    }

    pub fn cached_identities(&self) -> usize {
        self.cache.len()
    }
}
