//! ObjectStore: physical bytes on the local filesystem.
//!
//! Objects are addressed by a flat physical name and sharded beneath
//! `root/{shard}/{shard}/{name}` to keep directories small. Writes go to a
//! hidden temporary file next to the destination and only become visible
//! through [`ObjectWriter::commit`], so a reader never observes a partially
//! written object under its final name.

use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    pin::Pin,
    task::{Context, Poll},
};
use thiserror::Error;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWrite, AsyncWriteExt},
};
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_PHYSICAL_NAME_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("object `{0}` already exists")]
    AlreadyExists(String),
    #[error("invalid physical name `{0}`")]
    InvalidName(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone, Debug)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject anything that could escape the store root or clash with the
    /// temporary files: separators, `..`, leading dots, control bytes.
    pub fn ensure_name_safe(name: &str) -> StoreResult<()> {
        let invalid = name.is_empty()
            || name.len() > MAX_PHYSICAL_NAME_LEN
            || name.starts_with('.')
            || name.contains("..")
            || name
                .chars()
                .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control());
        if invalid {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    /// Two-level shard directories from MD5(name), lowercase hex.
    fn shards(name: &str) -> (String, String) {
        let digest = md5::compute(name.as_bytes());
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, name: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(name);
        let mut path = self.root.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(name);
        path
    }

    /// Open a new sequential writer for `name`.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if an object of that name is
    /// already published.
    pub async fn create(&self, name: &str) -> StoreResult<ObjectWriter> {
        Self::ensure_name_safe(name)?;
        let final_path = self.object_path(name);
        if fs::try_exists(&final_path).await? {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }

        let parent = final_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .await?;
        debug!("writing {} via {}", final_path.display(), tmp_path.display());

        Ok(ObjectWriter {
            file,
            name: name.to_string(),
            tmp_path,
            final_path,
            finished: false,
        })
    }

    /// Open a published object for reading.
    pub async fn open(&self, name: &str) -> StoreResult<File> {
        Self::ensure_name_safe(name)?;
        match File::open(self.object_path(name)).await {
            Ok(file) => Ok(file),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    /// Size in bytes of a published object as it sits on disk.
    pub async fn stored_len(&self, name: &str) -> StoreResult<u64> {
        Self::ensure_name_safe(name)?;
        match fs::metadata(self.object_path(name)).await {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    /// Remove a published object. Removing an absent object succeeds.
    pub async fn delete(&self, name: &str) -> StoreResult<()> {
        Self::ensure_name_safe(name)?;
        let path = self.object_path(name);
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed physical file {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    /// Free space available to this process on the volume holding the root.
    pub async fn usable_capacity(&self) -> StoreResult<u64> {
        let root = self.root.clone();
        let space = tokio::task::spawn_blocking(move || fs4::available_space(root))
            .await
            .map_err(|err| io::Error::new(ErrorKind::Other, err))??;
        Ok(space)
    }

    /// Walk upward removing empty shard directories, stopping at the root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

/// Handle to an object being written.
///
/// Dropping the writer without calling [`commit`](Self::commit) removes the
/// temporary file, which covers request aborts and early returns alike.
pub struct ObjectWriter {
    file: File,
    name: String,
    tmp_path: PathBuf,
    final_path: PathBuf,
    finished: bool,
}

impl ObjectWriter {
    /// Flush, fsync and publish under the final name.
    pub async fn commit(mut self) -> StoreResult<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;

        if fs::try_exists(&self.final_path).await? {
            return Err(StoreError::AlreadyExists(self.name.clone()));
        }
        fs::rename(&self.tmp_path, &self.final_path).await?;
        self.finished = true;
        debug!("published {}", self.final_path.display());
        Ok(())
    }

    /// Discard everything written so far.
    pub async fn abort(mut self) {
        self.finished = true;
        match fs::remove_file(&self.tmp_path).await {
            Ok(_) => debug!("discarded partial object {}", self.name),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                "could not remove partial object {}: {}",
                self.tmp_path.display(),
                err
            ),
        }
    }
}

impl AsyncWrite for ObjectWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().file).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_shutdown(cx)
    }
}

impl Drop for ObjectWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = std::fs::remove_file(&self.tmp_path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(
                    "could not remove partial object {}: {}",
                    self.tmp_path.display(),
                    err
                );
            }
        }
    }
}
