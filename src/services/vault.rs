//! VaultService: upload, download and delete orchestration.
//!
//! Upload pipes the request body through the resolved cipher (or straight
//! through for passthrough modes) into a fresh object store writer, and only
//! records the metadata row once the bytes are durably published. Any failure
//! before that point discards the partial object, so no row ever points at
//! missing bytes and no bytes are left without a row.
//!
//! Download authenticates a sealed object in full before the first plaintext
//! byte is released, then streams the decryption of the same file.

use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt, stream::BoxStream};
use std::{fmt, io};
use tokio::io::AsyncSeekExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    crypto::{self, CHUNK_SIZE, CipherError},
    errors::{VaultError, VaultResult},
    models::{EncryptionMode, StoredObject, VaultStats, format_size},
    services::{
        key_resolver::{KeyResolver, ResolvedKey},
        metadata::{MetadataRepository, NewObject, Scope},
        object_store::ObjectStore,
        sessions::Caller,
    },
};

/// Logical names ending in this are treated as client-encrypted blobs.
pub const CLIENT_OPAQUE_SUFFIX: &str = ".enc.client";

const MAX_LOGICAL_NAME_LEN: usize = 255;
const MAX_PHYSICAL_STEM_LEN: usize = 64;

/// What the uploader told us about the object.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub file_name: String,
    pub content_type: Option<String>,
    /// The client has already encrypted the bytes.
    pub client_encrypted: bool,
    /// Size announced by the client, only used for progress logging.
    pub expected_size: Option<u64>,
}

/// A download ready to be streamed.
pub struct Download {
    pub object: StoredObject,
    /// Exact number of bytes `body` will yield.
    pub content_length: u64,
    pub body: BoxStream<'static, io::Result<Bytes>>,
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("object", &self.object)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Marker carried inside the `io::Error` that aborts an oversized upload.
#[derive(Debug)]
struct UploadTooLarge;

impl fmt::Display for UploadTooLarge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("upload exceeds the configured limit")
    }
}

impl std::error::Error for UploadTooLarge {}

#[derive(Clone)]
pub struct VaultService {
    store: ObjectStore,
    metadata: MetadataRepository,
    keys: KeyResolver,
    mode: EncryptionMode,
    max_upload_bytes: u64,
}

impl VaultService {
    pub fn new(
        store: ObjectStore,
        metadata: MetadataRepository,
        keys: KeyResolver,
        mode: EncryptionMode,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            store,
            metadata,
            keys,
            mode,
            max_upload_bytes,
        }
    }

    pub fn mode(&self) -> EncryptionMode {
        self.mode
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    /// Store one object.
    pub async fn upload<S>(
        &self,
        caller: &Caller,
        request: UploadRequest,
        body: S,
    ) -> VaultResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let (logical_name, marked_opaque) = parse_logical_name(&request.file_name)?;
        let mode = if marked_opaque || request.client_encrypted {
            EncryptionMode::ClientOpaque
        } else {
            self.mode
        };

        let owner = caller.principal_id();
        if owner.is_none() && (self.mode.is_multi_tenant() || mode.is_multi_tenant()) {
            return Err(VaultError::AccessDenied);
        }

        // Nothing touches the store until we know there is at least one byte.
        let mut body = Box::pin(body);
        let first = loop {
            match body.next().await {
                None => return Err(VaultError::EmptyUpload),
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => break chunk,
                Some(Err(err)) => return Err(VaultError::StorageFailure(err)),
            }
        };

        let key = self.keys.resolve(mode, owner, caller).await?;
        let physical_name = physical_name(owner, &logical_name, mode);
        let mut writer = self.store.create(&physical_name).await?;

        let limit = self.max_upload_bytes;
        let expected = request.expected_size.filter(|n| *n > 0);
        let mut received: u64 = 0;
        let mut next_mark: u64 = 1;
        let chunks = futures::stream::iter([Ok(first)])
            .chain(body)
            .map(move |chunk: io::Result<Bytes>| {
                let chunk = chunk?;
                received += chunk.len() as u64;
                if received > limit {
                    return Err(io::Error::new(io::ErrorKind::Other, UploadTooLarge));
                }
                if let Some(total) = expected {
                    while next_mark <= 10 && received * 10 >= total * next_mark {
                        debug!("upload progress {}%", next_mark * 10);
                        next_mark += 1;
                    }
                }
                Ok(chunk)
            });
        let mut reader = StreamReader::new(chunks);

        let transferred = match &key {
            ResolvedKey::Seal(key) => crypto::seal_stream(&mut reader, &mut writer, key.as_ref())
                .await
                .map_err(|err| match err {
                    CipherError::Io(io_err) => upload_failure(io_err, limit),
                    other => other.into(),
                }),
            ResolvedKey::Passthrough => tokio::io::copy(&mut reader, &mut writer)
                .await
                .map_err(|io_err| upload_failure(io_err, limit)),
        };
        drop(reader);

        let declared_size = match transferred.and_then(|size| {
            i64::try_from(size).map_err(|_| VaultError::TooLarge { limit })
        }) {
            Ok(size) => size,
            Err(err) => {
                warn!("upload of {} failed: {}", logical_name, err);
                writer.abort().await;
                return Err(err);
            }
        };

        writer.commit().await?;

        let inserted = self
            .metadata
            .insert_object(NewObject {
                logical_name,
                physical_name: physical_name.clone(),
                content_type: request.content_type,
                declared_size,
                owner_id: owner,
                encryption_mode: mode,
            })
            .await;

        match inserted {
            Ok(object) => {
                info!(
                    "stored object {} ({} bytes, {})",
                    object.id, object.declared_size, object.encryption_mode
                );
                Ok(object)
            }
            Err(err) => {
                if let Err(cleanup) = self.store.delete(&physical_name).await {
                    warn!("could not remove {physical_name} after failed insert: {cleanup}");
                }
                Err(VaultError::Database(err))
            }
        }
    }

    /// Stream an object back in the form it was uploaded.
    pub async fn download(&self, caller: &Caller, id: Uuid) -> VaultResult<Download> {
        let object = self.authorized_object(caller, id).await?;
        let mut file = self.store.open(&object.physical_name).await?;
        let key = self
            .keys
            .resolve(object.encryption_mode, object.owner_id, caller)
            .await?;

        let content_length = u64::try_from(object.declared_size).unwrap_or_default();
        let body = match key {
            ResolvedKey::Seal(key) => {
                let authenticated = match crypto::verify(&mut file, key.as_ref()).await {
                    Ok(len) => len,
                    Err(err) => {
                        warn!("object {} failed verification: {}", object.id, err);
                        return Err(err.into());
                    }
                };
                // The response promises `declared_size` bytes up front.
                if authenticated != content_length {
                    warn!(
                        "object {} holds {} bytes but metadata declares {}",
                        object.id, authenticated, content_length
                    );
                    return Err(VaultError::AuthenticationFailed);
                }
                file.rewind().await?;
                crypto::open_stream(file, key.as_ref())
                    .await?
                    .into_stream()
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
                    .boxed()
            }
            ResolvedKey::Passthrough => ReaderStream::with_capacity(file, CHUNK_SIZE).boxed(),
        };

        debug!("streaming object {} ({} bytes)", object.id, content_length);
        Ok(Download {
            object,
            content_length,
            body,
        })
    }

    /// Administrators fetch the stored bytes without any key involved.
    pub async fn download_raw(&self, caller: &Caller, id: Uuid) -> VaultResult<Download> {
        if !caller.is_admin() {
            return Err(VaultError::AccessDenied);
        }
        let object = self.find(id).await?;
        let file = self.store.open(&object.physical_name).await?;
        let content_length = self.store.stored_len(&object.physical_name).await?;
        info!("raw download of object {}", object.id);
        Ok(Download {
            object,
            content_length,
            body: ReaderStream::with_capacity(file, CHUNK_SIZE).boxed(),
        })
    }

    /// Remove the bytes, then the row. A failed physical delete keeps the row.
    pub async fn delete(&self, caller: &Caller, id: Uuid) -> VaultResult<StoredObject> {
        let object = self.authorized_object(caller, id).await?;
        self.remove(&object).await?;
        info!("deleted object {}", object.id);
        Ok(object)
    }

    /// The caller's own objects (or the shared ones for anonymous callers),
    /// newest first.
    pub async fn list(&self, caller: &Caller) -> VaultResult<Vec<StoredObject>> {
        Ok(self.metadata.list_objects(Self::scope_of(caller)).await?)
    }

    pub async fn list_all(&self, caller: &Caller) -> VaultResult<Vec<StoredObject>> {
        Self::require_admin(caller)?;
        Ok(self.metadata.list_objects(Scope::All).await?)
    }

    pub async fn list_for_principal(
        &self,
        caller: &Caller,
        principal: Uuid,
    ) -> VaultResult<Vec<StoredObject>> {
        Self::require_admin(caller)?;
        Ok(self.metadata.list_objects(Scope::Owner(principal)).await?)
    }

    pub async fn stats(&self, caller: &Caller) -> VaultResult<VaultStats> {
        self.stats_for(Self::scope_of(caller)).await
    }

    pub async fn global_stats(&self, caller: &Caller) -> VaultResult<VaultStats> {
        Self::require_admin(caller)?;
        self.stats_for(Scope::All).await
    }

    /// Delete every object of a principal. Returns how many were removed.
    pub async fn purge_principal(&self, principal: Uuid) -> VaultResult<usize> {
        let objects = self.metadata.list_objects(Scope::Owner(principal)).await?;
        for object in &objects {
            self.remove(object).await?;
        }
        if !objects.is_empty() {
            info!("purged {} object(s) of principal {}", objects.len(), principal);
        }
        Ok(objects.len())
    }

    async fn stats_for(&self, scope: Scope) -> VaultResult<VaultStats> {
        let (object_count, total_bytes) = self.metadata.object_stats(scope).await?;
        let usable_capacity = self.store.usable_capacity().await?;
        Ok(VaultStats {
            object_count,
            total_bytes,
            total_size: format_size(u64::try_from(total_bytes).unwrap_or_default()),
            usable_capacity,
            usable_capacity_size: format_size(usable_capacity),
            encryption_enabled: self.mode.server_encrypts(),
            encryption_mode: self.mode,
        })
    }

    async fn remove(&self, object: &StoredObject) -> VaultResult<()> {
        self.store.delete(&object.physical_name).await?;
        self.metadata.delete_object(object.id).await?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> VaultResult<StoredObject> {
        self.metadata
            .find_object(id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("object {id}")))
    }

    /// Owners and administrators reach owned objects; unowned objects are
    /// shared.
    async fn authorized_object(&self, caller: &Caller, id: Uuid) -> VaultResult<StoredObject> {
        let object = self.find(id).await?;
        let owned_by_caller = caller
            .principal_id()
            .is_some_and(|principal| object.is_owned_by(principal));
        if object.owner_id.is_none() || owned_by_caller || caller.is_admin() {
            Ok(object)
        } else {
            Err(VaultError::AccessDenied)
        }
    }

    fn scope_of(caller: &Caller) -> Scope {
        match caller.principal_id() {
            Some(id) => Scope::Owner(id),
            None => Scope::Unowned,
        }
    }

    fn require_admin(caller: &Caller) -> VaultResult<()> {
        if caller.is_admin() {
            Ok(())
        } else {
            Err(VaultError::AccessDenied)
        }
    }
}

fn upload_failure(err: io::Error, limit: u64) -> VaultError {
    let too_large = err
        .get_ref()
        .is_some_and(|inner| inner.downcast_ref::<UploadTooLarge>().is_some());
    if too_large {
        VaultError::TooLarge { limit }
    } else {
        VaultError::StorageFailure(err)
    }
}

/// Validate the uploaded file name and split off the client-opaque marker.
///
/// Any directory part is dropped; names containing `..` or control
/// characters are refused outright.
pub fn parse_logical_name(raw: &str) -> VaultResult<(String, bool)> {
    if raw.contains("..") || raw.chars().any(char::is_control) {
        return Err(VaultError::InvalidName(format!("invalid file name `{}`", raw.escape_default())));
    }
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
    let (name, opaque) = match base.strip_suffix(CLIENT_OPAQUE_SUFFIX) {
        Some(stripped) => (stripped.trim(), true),
        None => (base, false),
    };
    if name.is_empty() || name.len() > MAX_LOGICAL_NAME_LEN {
        return Err(VaultError::InvalidName("file name is empty or too long".into()));
    }
    Ok((name.to_string(), opaque))
}

/// `{owner}_{uuid}_{stem}{suffix}`; the owner part is omitted when there is
/// no owner. The random UUID keeps the name unrelated to anything guessable.
pub fn physical_name(owner: Option<Uuid>, logical_name: &str, mode: EncryptionMode) -> String {
    let mut stem = String::with_capacity(MAX_PHYSICAL_STEM_LEN);
    for c in logical_name.chars().take(MAX_PHYSICAL_STEM_LEN) {
        let mapped = if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
            c
        } else {
            '_'
        };
        if mapped == '.' && stem.ends_with('.') {
            continue;
        }
        stem.push(mapped);
    }
    let random = Uuid::new_v4().simple();
    match owner {
        Some(owner) => format!("{}_{random}_{stem}{}", owner.simple(), mode.physical_suffix()),
        None => format!("{random}_{stem}{}", mode.physical_suffix()),
    }
}
