//! The key store.
//!
//! Storage layout:
//!
//! | Key                    | Value                                        |
//! |------------------------|----------------------------------------------|
//! | `keys/{name}/meta`     | key metadata and per-version timestamps      |
//! | `keys/{name}/v{n}`     | wrapped material of version `n`              |
//! | `identities/{name}`    | public key and wrapped X25519 secret         |
//! | `sessions/{id}`        | session summary and wrapped session snapshot |
//! | `closed-sessions/{id}` | close timestamp of a deleted session         |

use std::collections::BTreeMap;
use std::sync::Arc;

use nimbus_crypto::encoding::{decode_base64, encode_base64};
use nimbus_crypto::{aead, Algorithm, KeyPair, MasterKey, PublicKey, SymmetricKey};
use nimbus_session::{Role, Session, SessionConfig, SessionId, SessionSnapshot};
use nimbus_storage::StorageBackend;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::{KeyError, KeyResult};
use crate::policy::{
    DataKey, IdentityInfo, KeyInfo, KeyPolicy, KeyState, KeyUpdate, KeyVersionInfo, SessionInfo,
};

const CIPHERTEXT_PREFIX: &str = "nimbus";
const WRAP_ALGORITHM: Algorithm = Algorithm::Aes256Gcm;

const KIND_KEY: &str = "key";
const KIND_IDENTITY: &str = "identity";
const KIND_SESSION: &str = "session";

// ============================================================================
// Stored records
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyRecord {
    info: KeyInfo,
    versions: BTreeMap<u32, VersionMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionMeta {
    created_at: u64,
    destroyed_at: Option<u64>,
}

#[derive(Serialize, Deserialize)]
struct MaterialRecord {
    version: u32,
    wrapped: String,
}

#[derive(Serialize, Deserialize)]
struct IdentityRecord {
    name: String,
    public_key: String,
    created_at: u64,
    wrapped_secret: String,
}

#[derive(Serialize, Deserialize)]
struct SessionRecord {
    id: String,
    identity: String,
    peer: String,
    role: Role,
    send_counter: u32,
    receive_counter: u32,
    updated_at: u64,
    wrapped_state: String,
}

#[derive(Serialize, Deserialize)]
struct ClosedSessionRecord {
    closed_at: u64,
}

impl SessionRecord {
    fn info(&self) -> KeyResult<SessionInfo> {
        Ok(SessionInfo {
            id: self.id.clone(),
            identity: self.identity.clone(),
            peer: PublicKey::from_base64(&self.peer)?,
            role: self.role,
            updated_at: self.updated_at,
        })
    }
}

// ============================================================================
// Key Store
// ============================================================================

/// Versioned key, identity and session storage for one device.
///
/// All mutations are serialized; reads run concurrently.
pub struct KeyStore {
    storage: Arc<dyn StorageBackend>,
    master_key: MasterKey,
    lock: Mutex<()>,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("master_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl KeyStore {
    /// Creates a key store over `storage`, wrapping secrets under keys
    /// derived from `master_key`.
    pub fn new(storage: Arc<dyn StorageBackend>, master_key: MasterKey) -> Self {
        Self {
            storage,
            master_key,
            lock: Mutex::new(()),
        }
    }

    // ========================================================================
    // Paths, names, time
    // ========================================================================

    fn meta_path(name: &str) -> String {
        format!("keys/{name}/meta")
    }

    fn material_path(name: &str, version: u32) -> String {
        format!("keys/{name}/v{version}")
    }

    fn identity_path(name: &str) -> String {
        format!("identities/{name}")
    }

    fn session_path(id: &str) -> String {
        format!("sessions/{id}")
    }

    fn closed_session_path(id: &str) -> String {
        format!("closed-sessions/{id}")
    }

    fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }

    fn validate_name(name: &str) -> KeyResult<()> {
        if name.is_empty() {
            return Err(KeyError::InvalidName("name cannot be empty".into()));
        }
        if name.len() > 128 {
            return Err(KeyError::InvalidName("name too long (max 128 chars)".into()));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(KeyError::InvalidName(
                "name can only contain ASCII letters, digits, dash, underscore".into(),
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Wrapping & record helpers
    // ========================================================================

    fn wrap_secret(&self, kind: &str, name: &str, version: u32, secret: &[u8]) -> KeyResult<String> {
        let info = format!("nimbus-keys-v1:{kind}:{name}:{version}");
        let wrapping_key = self.master_key.derive(info.as_bytes())?;
        let aad = format!("nimbus-keys:{kind}:{name}:{version}");
        let sealed = aead::seal(WRAP_ALGORITHM, &wrapping_key, secret, aad.as_bytes())?;
        Ok(encode_base64(&sealed)?)
    }

    fn unwrap_secret(
        &self,
        kind: &str,
        name: &str,
        version: u32,
        wrapped: &str,
    ) -> KeyResult<Zeroizing<Vec<u8>>> {
        let info = format!("nimbus-keys-v1:{kind}:{name}:{version}");
        let wrapping_key = self.master_key.derive(info.as_bytes())?;
        let aad = format!("nimbus-keys:{kind}:{name}:{version}");
        let sealed = decode_base64(wrapped)?;
        Ok(aead::open(&wrapping_key, &sealed, aad.as_bytes())?)
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &str) -> KeyResult<Option<T>> {
        match self.storage.get(path).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn write_json<T: Serialize>(&self, path: &str, value: &T) -> KeyResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.storage.put(path, &bytes).await?;
        Ok(())
    }

    /// Overwrites a record with zeros, then deletes it.
    async fn erase(&self, path: &str) -> KeyResult<()> {
        if let Some(existing) = self.storage.get(path).await? {
            self.storage.put(path, &vec![0u8; existing.len()]).await?;
            self.storage.delete(path).await?;
        }
        Ok(())
    }

    async fn load_record(&self, name: &str) -> KeyResult<KeyRecord> {
        Self::validate_name(name)?;
        self.read_json(&Self::meta_path(name))
            .await?
            .ok_or_else(|| KeyError::KeyNotFound(name.to_string()))
    }

    async fn material(&self, record: &KeyRecord, version: u32) -> KeyResult<SymmetricKey> {
        let name = &record.info.name;
        let meta = record
            .versions
            .get(&version)
            .ok_or_else(|| KeyError::VersionNotFound {
                name: name.clone(),
                version,
            })?;
        if meta.destroyed_at.is_some() {
            return Err(KeyError::VersionDestroyed {
                name: name.clone(),
                version,
            });
        }

        let stored: MaterialRecord = self
            .read_json(&Self::material_path(name, version))
            .await?
            .ok_or_else(|| KeyError::CorruptRecord(format!("missing material for {name} v{version}")))?;
        let bytes = self.unwrap_secret(KIND_KEY, name, stored.version, &stored.wrapped)?;
        Ok(SymmetricKey::from_bytes(&bytes)?)
    }

    async fn store_new_version(&self, name: &str, version: u32) -> KeyResult<()> {
        let material = SymmetricKey::generate()?;
        let record = MaterialRecord {
            version,
            wrapped: self.wrap_secret(KIND_KEY, name, version, material.as_bytes())?,
        };
        self.write_json(&Self::material_path(name, version), &record)
            .await
    }

    // ========================================================================
    // Key Management Operations
    // ========================================================================

    /// Creates a named key with version 1.
    pub async fn create_key(&self, name: &str, policy: KeyPolicy) -> KeyResult<KeyInfo> {
        Self::validate_name(name)?;
        let _guard = self.lock.lock().await;

        if self.storage.exists(&Self::meta_path(name)).await? {
            return Err(KeyError::KeyExists(name.to_string()));
        }

        let now = Self::now();
        self.store_new_version(name, 1).await?;

        let algorithm = policy.algorithm;
        let info = KeyInfo {
            name: name.to_string(),
            policy,
            latest_version: 1,
            min_decryption_version: 1,
            created_at: now,
            updated_at: now,
            last_rotated_at: now,
        };
        let record = KeyRecord {
            info: info.clone(),
            versions: BTreeMap::from([(
                1,
                VersionMeta {
                    created_at: now,
                    destroyed_at: None,
                },
            )]),
        };
        self.write_json(&Self::meta_path(name), &record).await?;

        info!(name = name, algorithm = %algorithm, "Key created");

        Ok(info)
    }

    /// Gets metadata for a named key.
    pub async fn get_key(&self, name: &str) -> KeyResult<KeyInfo> {
        Ok(self.load_record(name).await?.info)
    }

    /// Lists key names in ascending order.
    pub async fn list_keys(&self) -> KeyResult<Vec<String>> {
        let paths = self.storage.list("keys/").await?;
        Ok(paths
            .iter()
            .filter_map(|path| path.strip_prefix("keys/")?.strip_suffix("/meta"))
            .map(str::to_string)
            .collect())
    }

    /// Lists all versions of a key, newest first.
    pub async fn list_versions(&self, name: &str) -> KeyResult<Vec<KeyVersionInfo>> {
        let record = self.load_record(name).await?;

        Ok(record
            .versions
            .iter()
            .rev()
            .map(|(&version, meta)| KeyVersionInfo {
                version,
                state: if meta.destroyed_at.is_some() {
                    KeyState::Destroyed
                } else {
                    record.info.state_of(version)
                },
                created_at: meta.created_at,
                destroyed_at: meta.destroyed_at,
            })
            .collect())
    }

    /// Rotates a key to a new version and returns its number.
    pub async fn rotate_key(&self, name: &str) -> KeyResult<u32> {
        let _guard = self.lock.lock().await;
        self.rotate_locked(name, Self::now()).await
    }

    async fn rotate_locked(&self, name: &str, now: u64) -> KeyResult<u32> {
        let mut record = self.load_record(name).await?;
        let new_version = record
            .info
            .latest_version
            .checked_add(1)
            .ok_or_else(|| KeyError::OperationNotAllowed("version limit reached".into()))?;

        self.store_new_version(name, new_version).await?;

        record.versions.insert(
            new_version,
            VersionMeta {
                created_at: now,
                destroyed_at: None,
            },
        );
        record.info.latest_version = new_version;
        record.info.updated_at = now;
        record.info.last_rotated_at = now;
        self.write_json(&Self::meta_path(name), &record).await?;

        info!(name = name, version = new_version, "Key rotated");

        Ok(new_version)
    }

    /// Updates the minimum decryption version, deletion flag or rotation
    /// period of a key.
    pub async fn update_key_config(&self, name: &str, update: KeyUpdate) -> KeyResult<KeyInfo> {
        let _guard = self.lock.lock().await;
        let mut record = self.load_record(name).await?;

        if let Some(min) = update.min_decryption_version {
            if min == 0 || min > record.info.latest_version {
                return Err(KeyError::VersionNotFound {
                    name: name.to_string(),
                    version: min,
                });
            }
            record.info.min_decryption_version = min;
        }
        if let Some(allowed) = update.deletion_allowed {
            record.info.policy.deletion_allowed = allowed;
        }
        if let Some(period) = update.rotation_period {
            record.info.policy.rotation_period = period;
        }
        record.info.updated_at = Self::now();

        self.write_json(&Self::meta_path(name), &record).await?;

        debug!(
            name = name,
            min_decryption_version = record.info.min_decryption_version,
            "Key config updated"
        );

        Ok(record.info)
    }

    /// Erases the material of one version. The latest version cannot be
    /// destroyed; destroying an already destroyed version is a no-op.
    pub async fn destroy_version(&self, name: &str, version: u32) -> KeyResult<()> {
        let _guard = self.lock.lock().await;
        let mut record = self.load_record(name).await?;

        if version == record.info.latest_version {
            return Err(KeyError::CannotDestroyLatest(name.to_string()));
        }
        let now = Self::now();
        let meta = record
            .versions
            .get_mut(&version)
            .ok_or_else(|| KeyError::VersionNotFound {
                name: name.to_string(),
                version,
            })?;
        if meta.destroyed_at.is_some() {
            return Ok(());
        }

        self.erase(&Self::material_path(name, version)).await?;
        meta.destroyed_at = Some(now);
        record.info.updated_at = now;
        self.write_json(&Self::meta_path(name), &record).await?;

        warn!(name = name, version = version, "Key version destroyed");

        Ok(())
    }

    /// Deletes a key and erases all of its versions, if the policy allows.
    pub async fn delete_key(&self, name: &str) -> KeyResult<()> {
        let _guard = self.lock.lock().await;
        let record = self.load_record(name).await?;

        if !record.info.policy.deletion_allowed {
            return Err(KeyError::DeletionNotAllowed(name.to_string()));
        }

        for version in record.versions.keys() {
            self.erase(&Self::material_path(name, *version)).await?;
        }
        self.erase(&Self::meta_path(name)).await?;

        warn!(name = name, "Key deleted");

        Ok(())
    }

    // ========================================================================
    // Encryption/Decryption Operations
    // ========================================================================

    fn data_aad(name: &str, version: u32, context: &[u8]) -> Vec<u8> {
        let mut aad = format!("nimbus-keys:data:{name}:{version}").into_bytes();
        aad.push(0);
        aad.extend_from_slice(context);
        aad
    }

    /// Parses `nimbus:v{version}:{base64}`.
    fn parse_ciphertext(ciphertext: &str) -> KeyResult<(u32, Vec<u8>)> {
        let mut parts = ciphertext.trim().splitn(3, ':');
        let (Some(prefix), Some(version), Some(data)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(KeyError::InvalidCiphertext);
        };
        if prefix != CIPHERTEXT_PREFIX {
            return Err(KeyError::InvalidCiphertext);
        }

        let version: u32 = version
            .strip_prefix('v')
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
            .ok_or(KeyError::InvalidCiphertext)?;
        let data = decode_base64(data).map_err(|_| KeyError::InvalidCiphertext)?;

        Ok((version, data))
    }

    /// Returns the key version a ciphertext was produced with.
    pub fn ciphertext_version(ciphertext: &str) -> KeyResult<u32> {
        Ok(Self::parse_ciphertext(ciphertext)?.0)
    }

    /// Encrypts under the latest version of `name`.
    ///
    /// `context` is authenticated but not stored; decryption must supply the
    /// same bytes.
    pub async fn encrypt(&self, name: &str, plaintext: &[u8], context: &[u8]) -> KeyResult<String> {
        let record = self.load_record(name).await?;
        if !record.info.policy.supports_encryption {
            return Err(KeyError::OperationNotAllowed(
                "encryption not allowed for this key".into(),
            ));
        }

        let version = record.info.latest_version;
        let key = self.material(&record, version).await?;
        let aad = Self::data_aad(name, version, context);
        let sealed = aead::seal(record.info.policy.algorithm, &key, plaintext, &aad)?;

        Ok(format!(
            "{CIPHERTEXT_PREFIX}:v{version}:{}",
            encode_base64(&sealed)?
        ))
    }

    /// Decrypts a ciphertext produced by [`KeyStore::encrypt`].
    pub async fn decrypt(
        &self,
        name: &str,
        ciphertext: &str,
        context: &[u8],
    ) -> KeyResult<Zeroizing<Vec<u8>>> {
        let record = self.load_record(name).await?;
        if !record.info.policy.supports_decryption {
            return Err(KeyError::OperationNotAllowed(
                "decryption not allowed for this key".into(),
            ));
        }

        let (version, data) = Self::parse_ciphertext(ciphertext)?;

        match record.versions.get(&version) {
            None => {
                return Err(KeyError::VersionNotFound {
                    name: name.to_string(),
                    version,
                })
            },
            Some(meta) if meta.destroyed_at.is_some() => {
                return Err(KeyError::VersionDestroyed {
                    name: name.to_string(),
                    version,
                })
            },
            Some(_) => {},
        }
        if version < record.info.min_decryption_version {
            return Err(KeyError::VersionRetired {
                version,
                min: record.info.min_decryption_version,
            });
        }

        let key = self.material(&record, version).await?;
        let aad = Self::data_aad(name, version, context);
        aead::open(&key, &data, &aad).map_err(|_| KeyError::DecryptionFailed)
    }

    /// Re-encrypts a ciphertext under the latest key version without
    /// returning the plaintext.
    pub async fn rewrap(&self, name: &str, ciphertext: &str, context: &[u8]) -> KeyResult<String> {
        let key = self.get_key(name).await?;
        let version = Self::ciphertext_version(ciphertext)?;

        if version == key.latest_version {
            return Ok(ciphertext.trim().to_string());
        }

        let plaintext = self.decrypt(name, ciphertext, context).await?;
        let rewrapped = self.encrypt(name, &plaintext, context).await?;

        debug!(name = name, from = version, to = key.latest_version, "Ciphertext rewrapped");

        Ok(rewrapped)
    }

    /// Generates a data encryption key and returns it along with its
    /// wrapped form.
    pub async fn generate_datakey(&self, name: &str, context: &[u8]) -> KeyResult<DataKey> {
        let plaintext = SymmetricKey::generate()?;
        let ciphertext = self.encrypt(name, plaintext.as_bytes(), context).await?;
        Ok(DataKey {
            plaintext,
            ciphertext,
        })
    }

    /// Unwraps a data key produced by [`KeyStore::generate_datakey`].
    pub async fn decrypt_datakey(
        &self,
        name: &str,
        wrapped: &str,
        context: &[u8],
    ) -> KeyResult<SymmetricKey> {
        let bytes = self.decrypt(name, wrapped, context).await?;
        Ok(SymmetricKey::from_bytes(&bytes)?)
    }

    // ========================================================================
    // Rotation schedule
    // ========================================================================

    /// Names of keys whose rotation period has elapsed at `now`.
    pub async fn keys_due_for_rotation(&self, now: u64) -> KeyResult<Vec<String>> {
        let mut due = Vec::new();
        for name in self.list_keys().await? {
            let info = self.get_key(&name).await?;
            if info.next_rotation_at().is_some_and(|at| now >= at) {
                due.push(name);
            }
        }
        Ok(due)
    }

    /// Rotates every key due at `now`, returning `(name, new_version)` pairs.
    pub async fn rotate_due_keys(&self, now: u64) -> KeyResult<Vec<(String, u32)>> {
        let _guard = self.lock.lock().await;

        let mut rotated = Vec::new();
        for name in self.keys_due_for_rotation(now).await? {
            let version = self.rotate_locked(&name, now).await?;
            rotated.push((name, version));
        }

        if !rotated.is_empty() {
            info!(count = rotated.len(), "Scheduled rotation complete");
        }

        Ok(rotated)
    }

    // ========================================================================
    // Identities
    // ========================================================================

    /// Generates and stores a new X25519 identity.
    pub async fn create_identity(&self, name: &str) -> KeyResult<IdentityInfo> {
        Self::validate_name(name)?;
        let _guard = self.lock.lock().await;

        let path = Self::identity_path(name);
        if self.storage.exists(&path).await? {
            return Err(KeyError::IdentityExists(name.to_string()));
        }

        let pair = KeyPair::generate()?;
        let public_key = pair.public_key();
        let now = Self::now();
        let record = IdentityRecord {
            name: name.to_string(),
            public_key: public_key.to_base64(),
            created_at: now,
            wrapped_secret: self.wrap_secret(KIND_IDENTITY, name, 0, &pair.secret_bytes()[..])?,
        };
        self.write_json(&path, &record).await?;

        info!(name = name, fingerprint = %public_key.fingerprint(), "Identity created");

        Ok(IdentityInfo {
            name: name.to_string(),
            public_key,
            created_at: now,
        })
    }

    async fn identity_record(&self, name: &str) -> KeyResult<IdentityRecord> {
        Self::validate_name(name)?;
        self.read_json(&Self::identity_path(name))
            .await?
            .ok_or_else(|| KeyError::IdentityNotFound(name.to_string()))
    }

    /// Loads an identity key pair.
    pub async fn load_identity(&self, name: &str) -> KeyResult<KeyPair> {
        let record = self.identity_record(name).await?;
        let secret = self.unwrap_secret(KIND_IDENTITY, name, 0, &record.wrapped_secret)?;
        let pair = KeyPair::from_secret_bytes(&secret)?;

        if pair.public_key() != PublicKey::from_base64(&record.public_key)? {
            return Err(KeyError::CorruptRecord(format!(
                "identity {name} public key mismatch"
            )));
        }
        Ok(pair)
    }

    /// Public half of an identity; does not touch the secret.
    pub async fn identity_public(&self, name: &str) -> KeyResult<IdentityInfo> {
        let record = self.identity_record(name).await?;
        Ok(IdentityInfo {
            public_key: PublicKey::from_base64(&record.public_key)?,
            name: record.name,
            created_at: record.created_at,
        })
    }

    /// Lists identity names in ascending order.
    pub async fn list_identities(&self) -> KeyResult<Vec<String>> {
        let paths = self.storage.list("identities/").await?;
        Ok(paths
            .iter()
            .filter_map(|path| path.strip_prefix("identities/"))
            .map(str::to_string)
            .collect())
    }

    /// Erases an identity.
    pub async fn delete_identity(&self, name: &str) -> KeyResult<()> {
        Self::validate_name(name)?;
        let _guard = self.lock.lock().await;

        let path = Self::identity_path(name);
        if !self.storage.exists(&path).await? {
            return Err(KeyError::IdentityNotFound(name.to_string()));
        }
        self.erase(&path).await?;

        warn!(name = name, "Identity deleted");

        Ok(())
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    fn session_to_record(&self, identity: &str, session: &Session) -> KeyResult<SessionRecord> {
        Self::validate_name(identity)?;

        let id = session.id().to_hex();
        let snapshot = session.snapshot()?;
        let state = Zeroizing::new(serde_json::to_vec(&snapshot)?);
        Ok(SessionRecord {
            wrapped_state: self.wrap_secret(KIND_SESSION, &id, 0, &state)?,
            id,
            identity: identity.to_string(),
            peer: session.remote_identity().to_base64(),
            role: session.role(),
            send_counter: session.send_counter(),
            receive_counter: session.receive_counter(),
            updated_at: Self::now(),
        })
    }

    /// Stores a freshly established session, owned by `identity`.
    ///
    /// Fails with [`KeyError::SessionExists`] if the id was ever stored
    /// before, so a replayed handshake cannot reset a live or closed session.
    pub async fn create_session(&self, identity: &str, session: &Session) -> KeyResult<()> {
        let record = self.session_to_record(identity, session)?;

        let _guard = self.lock.lock().await;
        if self.storage.exists(&Self::session_path(&record.id)).await?
            || self.storage.exists(&Self::closed_session_path(&record.id)).await?
        {
            warn!(session = %record.id, "Rejected session with a known id");
            return Err(KeyError::SessionExists(record.id));
        }
        self.write_json(&Self::session_path(&record.id), &record).await?;

        info!(
            session = %record.id,
            identity = identity,
            role = ?record.role,
            "Session created"
        );

        Ok(())
    }

    /// Updates the stored state of an existing session.
    ///
    /// State whose counters are behind the stored ones is rejected with
    /// [`KeyError::StaleSession`].
    pub async fn save_session(&self, identity: &str, session: &Session) -> KeyResult<()> {
        let record = self.session_to_record(identity, session)?;

        let _guard = self.lock.lock().await;
        let path = Self::session_path(&record.id);
        let stored: SessionRecord = self
            .read_json(&path)
            .await?
            .ok_or_else(|| KeyError::SessionNotFound(record.id.clone()))?;
        if stored.identity != record.identity {
            return Err(KeyError::OperationNotAllowed(format!(
                "session {} belongs to identity {}",
                record.id, stored.identity
            )));
        }
        if record.send_counter < stored.send_counter
            || record.receive_counter < stored.receive_counter
        {
            warn!(
                session = %record.id,
                stored_send = stored.send_counter,
                stored_receive = stored.receive_counter,
                "Rejected stale session state"
            );
            return Err(KeyError::StaleSession(record.id));
        }
        self.write_json(&path, &record).await?;

        debug!(
            session = %record.id,
            identity = identity,
            send_counter = record.send_counter,
            receive_counter = record.receive_counter,
            "Session saved"
        );

        Ok(())
    }

    async fn session_record(&self, id: &SessionId) -> KeyResult<SessionRecord> {
        let hex = id.to_hex();
        self.read_json(&Self::session_path(&hex))
            .await?
            .ok_or(KeyError::SessionNotFound(hex))
    }

    /// Restores a stored session.
    pub async fn load_session(&self, id: &SessionId, config: SessionConfig) -> KeyResult<Session> {
        let record = self.session_record(id).await?;
        let state = self.unwrap_secret(KIND_SESSION, &record.id, 0, &record.wrapped_state)?;
        let snapshot: SessionSnapshot = serde_json::from_slice(&state)?;
        Ok(Session::restore(&snapshot, config)?)
    }

    /// Summary of a stored session.
    pub async fn session_info(&self, id: &SessionId) -> KeyResult<SessionInfo> {
        self.session_record(id).await?.info()
    }

    /// Lists stored sessions.
    pub async fn list_sessions(&self) -> KeyResult<Vec<SessionInfo>> {
        let mut sessions = Vec::new();
        for path in self.storage.list("sessions/").await? {
            if let Some(record) = self.read_json::<SessionRecord>(&path).await? {
                sessions.push(record.info()?);
            }
        }
        Ok(sessions)
    }

    /// Erases a stored session.
    pub async fn delete_session(&self, id: &SessionId) -> KeyResult<()> {
        let hex = id.to_hex();
        let _guard = self.lock.lock().await;

        let path = Self::session_path(&hex);
        if !self.storage.exists(&path).await? {
            return Err(KeyError::SessionNotFound(hex));
        }
        self.erase(&path).await?;
        self.write_json(
            &Self::closed_session_path(&hex),
            &ClosedSessionRecord { closed_at: Self::now() },
        )
        .await?;

        info!(session = %hex, "Session deleted");

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
