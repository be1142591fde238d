//! Integration tests for Nimbus.
//!
//! These tests drive complete devices (SQLite storage, seal and key store)
//! through the workflows a client goes through: initialization, identity
//! exchange, sessions, persistence, recovery and key lifecycle.

// Allow unwrap() in tests - panics are acceptable for test assertions
#![allow(clippy::disallowed_methods)]

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use nimbus_crypto::PublicKey;
use nimbus_keys::KeyStore;
use nimbus_seal::{InitOptions, KdfParams, RecoveryConfig, RecoveryShare, SealManager};
use nimbus_storage_sqlite::SqliteBackend;
use tempfile::TempDir;

/// Passphrase every test device is created with.
pub const PASSPHRASE: &str = "integration passphrase";

/// Cheap Argon2id parameters for tests.
pub fn test_kdf() -> KdfParams {
    KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    }
}

// ============================================================================
// Test Device
// ============================================================================

/// A device with its own data directory and an unsealed key store.
pub struct Device {
    pub name: String,
    pub store: KeyStore,
    data_dir: TempDir,
}

impl Device {
    /// Initializes a fresh device and unseals it.
    pub async fn create(name: &str, recovery: Option<RecoveryConfig>) -> Result<(Self, Vec<RecoveryShare>)> {
        let data_dir = TempDir::new().context("Failed to create temp dir")?;

        let mut seal = open_seal(data_dir.path()).await?;
        let result = seal
            .initialize(
                PASSPHRASE,
                InitOptions {
                    kdf: test_kdf(),
                    recovery,
                },
            )
            .await?;

        let store = unlock(data_dir.path(), PASSPHRASE).await?;

        Ok((
            Self {
                name: name.to_string(),
                store,
                data_dir,
            },
            result.shares,
        ))
    }

    /// Drops the in-memory store and opens the device again from disk.
    pub async fn restart(self, passphrase: &str) -> Result<Self> {
        let Self {
            name,
            store,
            data_dir,
        } = self;
        drop(store);

        let store = unlock(data_dir.path(), passphrase).await?;
        Ok(Self {
            name,
            store,
            data_dir,
        })
    }

    /// Creates the device identity, named after the device.
    pub async fn create_identity(&self) -> Result<PublicKey> {
        Ok(self.store.create_identity(&self.name).await?.public_key)
    }

    /// Data directory of the device.
    pub fn path(&self) -> &Path {
        self.data_dir.path()
    }
}

/// Opens the seal of a data directory.
pub async fn open_seal(dir: &Path) -> Result<SealManager> {
    let storage = SqliteBackend::open(dir, "system").await?;
    Ok(SealManager::open(Arc::new(storage)).await?)
}

/// Unseals a data directory with a passphrase and opens its key store.
pub async fn unlock(dir: &Path, passphrase: &str) -> Result<KeyStore> {
    let mut seal = open_seal(dir).await?;
    seal.unseal(passphrase)?;
    let master_key = seal.master_key()?.clone();
    seal.seal();

    let storage = SqliteBackend::open(dir, "keys").await?;
    Ok(KeyStore::new(Arc::new(storage), master_key))
}

/// Reads every SQLite file of a data directory, journals included.
pub fn read_databases(dir: &Path) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_database = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().contains(".db"));
        if is_database {
            bytes.extend(std::fs::read(&path)?);
        }
    }
    if bytes.is_empty() {
        bail!("no database files in {}", dir.display());
    }
    Ok(bytes)
}

/// Returns true if `needle` occurs in `haystack`.
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use nimbus_crypto::NimbusError;
    use nimbus_keys::{KeyError, KeyPolicy, KeyState};
    use nimbus_seal::SealError;
    use nimbus_session::{accept, initiate, Envelope, SessionConfig, SessionError};

    use super::*;

    #[tokio::test]
    async fn test_alice_and_bob_exchange_messages() {
        let (alice, _) = Device::create("alice", None).await.unwrap();
        let (bob, _) = Device::create("bob", None).await.unwrap();
        alice.create_identity().await.unwrap();
        let bob_public = bob.create_identity().await.unwrap();

        // Alice starts the session and sends the handshake with her first message.
        let alice_identity = alice.store.load_identity("alice").await.unwrap();
        let (mut alice_session, init) =
            initiate(&alice_identity, &bob_public, SessionConfig::default()).unwrap();
        let hello = alice_session.encrypt(b"hello bob").unwrap().to_base64().unwrap();
        let wire_init = init.to_base64().unwrap();

        let bob_identity = bob.store.load_identity("bob").await.unwrap();
        let init = nimbus_session::HandshakeInit::from_base64(&wire_init).unwrap();
        let mut bob_session = accept(&bob_identity, &init, SessionConfig::default()).unwrap();
        assert_eq!(alice_session.id(), bob_session.id());
        assert_eq!(bob_session.remote_identity(), &alice_identity.public_key());

        let received = bob_session
            .decrypt(&Envelope::from_base64(&hello).unwrap())
            .unwrap();
        assert_eq!(&*received, b"hello bob");

        // Replies arrive out of order.
        let r1 = bob_session.encrypt(b"reply 1").unwrap();
        let r2 = bob_session.encrypt(b"reply 2").unwrap();
        assert_eq!(&*alice_session.decrypt(&r2).unwrap(), b"reply 2");
        assert_eq!(&*alice_session.decrypt(&r1).unwrap(), b"reply 1");

        assert!(matches!(
            alice_session.decrypt(&r1),
            Err(SessionError::Replay(0))
        ));
    }

    #[tokio::test]
    async fn test_sessions_survive_restart() {
        let (alice, _) = Device::create("alice", None).await.unwrap();
        let (bob, _) = Device::create("bob", None).await.unwrap();
        let alice_public = alice.create_identity().await.unwrap();
        let bob_public = bob.create_identity().await.unwrap();

        let alice_identity = alice.store.load_identity("alice").await.unwrap();
        let (mut alice_session, init) =
            initiate(&alice_identity, &bob_public, SessionConfig::default()).unwrap();
        let bob_identity = bob.store.load_identity("bob").await.unwrap();
        let mut bob_session = accept(&bob_identity, &init, SessionConfig::default()).unwrap();
        let id = *alice_session.id();

        let m0 = alice_session.encrypt(b"m0").unwrap();
        let m1 = alice_session.encrypt(b"m1").unwrap();
        assert_eq!(&*bob_session.decrypt(&m1).unwrap(), b"m1");

        alice.store.create_session("alice", &alice_session).await.unwrap();
        bob.store.create_session("bob", &bob_session).await.unwrap();
        drop(alice_session);
        drop(bob_session);

        let alice = alice.restart(PASSPHRASE).await.unwrap();
        let bob = bob.restart(PASSPHRASE).await.unwrap();

        let mut alice_session = alice
            .store
            .load_session(&id, SessionConfig::default())
            .await
            .unwrap();
        let mut bob_session = bob
            .store
            .load_session(&id, SessionConfig::default())
            .await
            .unwrap();
        assert_eq!(bob_session.remote_identity(), &alice_public);

        // The skipped key for m0 was persisted with Bob's session.
        assert_eq!(&*bob_session.decrypt(&m0).unwrap(), b"m0");
        assert!(bob_session.decrypt(&m1).is_err());

        let m2 = alice_session.encrypt(b"m2").unwrap();
        assert_eq!(m2.counter(), 2);
        assert_eq!(&*bob_session.decrypt(&m2).unwrap(), b"m2");

        let sessions = bob.store.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].peer, alice_public);

        // Replaying the handshake must not reset Bob's stored session.
        bob.store.save_session("bob", &bob_session).await.unwrap();
        let bob_identity = bob.store.load_identity("bob").await.unwrap();
        let replayed = accept(&bob_identity, &init, SessionConfig::default()).unwrap();
        assert!(bob.store.create_session("bob", &replayed).await.is_err());
        assert!(bob.store.save_session("bob", &replayed).await.is_err());

        let mut bob_session = bob
            .store
            .load_session(&id, SessionConfig::default())
            .await
            .unwrap();
        assert!(bob_session.decrypt(&m2).is_err());
    }

    #[tokio::test]
    async fn test_handshake_for_other_identity_rejected() {
        let (alice, _) = Device::create("alice", None).await.unwrap();
        let (bob, _) = Device::create("bob", None).await.unwrap();
        let (carol, _) = Device::create("carol", None).await.unwrap();
        alice.create_identity().await.unwrap();
        let bob_public = bob.create_identity().await.unwrap();
        carol.create_identity().await.unwrap();

        let alice_identity = alice.store.load_identity("alice").await.unwrap();
        let (_, init) = initiate(&alice_identity, &bob_public, SessionConfig::default()).unwrap();

        let carol_identity = carol.store.load_identity("carol").await.unwrap();
        assert!(matches!(
            accept(&carol_identity, &init, SessionConfig::default()),
            Err(SessionError::NotForThisIdentity)
        ));
    }

    #[tokio::test]
    async fn test_tampered_envelope_leaves_session_usable() {
        let (alice, _) = Device::create("alice", None).await.unwrap();
        let (bob, _) = Device::create("bob", None).await.unwrap();
        alice.create_identity().await.unwrap();
        let bob_public = bob.create_identity().await.unwrap();

        let alice_identity = alice.store.load_identity("alice").await.unwrap();
        let (mut alice_session, init) =
            initiate(&alice_identity, &bob_public, SessionConfig::default()).unwrap();
        let bob_identity = bob.store.load_identity("bob").await.unwrap();
        let mut bob_session = accept(&bob_identity, &init, SessionConfig::default()).unwrap();

        let envelope = alice_session.encrypt(b"integrity").unwrap();
        let mut bytes = envelope.to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = Envelope::from_bytes(&bytes).unwrap();

        let err = bob_session.decrypt(&tampered).unwrap_err();
        assert_eq!(err.kind(), NimbusError::AuthenticationFailed);
        assert_eq!(bob_session.receive_counter(), 0);

        assert_eq!(&*bob_session.decrypt(&envelope).unwrap(), b"integrity");
    }

    #[tokio::test]
    async fn test_recovery_shares_restore_access() {
        let recovery = RecoveryConfig {
            shares: 3,
            threshold: 2,
        };
        let (device, shares) = Device::create("phone", Some(recovery)).await.unwrap();
        assert_eq!(shares.len(), 3);

        device
            .store
            .create_key("notes", KeyPolicy::new())
            .await
            .unwrap();
        let ciphertext = device
            .store
            .encrypt("notes", b"remember me", b"")
            .await
            .unwrap();

        // Passphrase forgotten: restore with two shares and set a new one.
        let mut seal = open_seal(device.path()).await.unwrap();
        assert!(matches!(
            seal.unseal("forgotten passphrase"),
            Err(SealError::InvalidPassphrase)
        ));
        let progress = seal
            .submit_recovery_share(&RecoveryShare::from_hex(&shares[2].to_hex()).unwrap())
            .unwrap();
        assert!(progress.sealed);
        seal.submit_recovery_share(&shares[0]).unwrap();
        seal.change_passphrase("brand new passphrase").await.unwrap();
        seal.seal();
        drop(seal);

        assert!(unlock(device.path(), PASSPHRASE).await.is_err());
        let device = device.restart("brand new passphrase").await.unwrap();
        assert_eq!(
            &*device
                .store
                .decrypt("notes", &ciphertext, b"")
                .await
                .unwrap(),
            b"remember me"
        );
    }

    #[tokio::test]
    async fn test_key_lifecycle_across_restart() {
        let (device, _) = Device::create("server", None).await.unwrap();
        device
            .store
            .create_key("orders", KeyPolicy::new().deletable())
            .await
            .unwrap();

        let v1 = device
            .store
            .encrypt("orders", b"order 1", b"tenant-a")
            .await
            .unwrap();
        device.store.rotate_key("orders").await.unwrap();

        let device = device.restart(PASSPHRASE).await.unwrap();

        let v2 = device.store.rewrap("orders", &v1, b"tenant-a").await.unwrap();
        assert!(v2.starts_with("nimbus:v2:"));

        device.store.destroy_version("orders", 1).await.unwrap();
        assert!(matches!(
            device.store.decrypt("orders", &v1, b"tenant-a").await,
            Err(KeyError::VersionDestroyed { version: 1, .. })
        ));
        assert_eq!(
            &*device
                .store
                .decrypt("orders", &v2, b"tenant-a")
                .await
                .unwrap(),
            b"order 1"
        );

        let versions = device.store.list_versions("orders").await.unwrap();
        assert_eq!(versions[0].state, KeyState::Active);
        assert_eq!(versions[1].state, KeyState::Destroyed);

        device.store.delete_key("orders").await.unwrap();
        assert!(device.store.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_databases_hold_no_plaintext_secrets() {
        let (device, _) = Device::create("laptop", None).await.unwrap();
        device.create_identity().await.unwrap();
        device
            .store
            .create_key("files", KeyPolicy::new())
            .await
            .unwrap();

        let datakey = device.store.generate_datakey("files", b"").await.unwrap();
        device
            .store
            .encrypt("files", b"plaintext marker", b"")
            .await
            .unwrap();
        let identity = device.store.load_identity("laptop").await.unwrap();

        let bytes = read_databases(device.path()).unwrap();
        assert!(!contains(&bytes, datakey.plaintext.as_bytes()));
        assert!(!contains(&bytes, &identity.secret_bytes()[..]));
        assert!(!contains(&bytes, b"plaintext marker"));
        assert!(!contains(&bytes, PASSPHRASE.as_bytes()));
    }
}
