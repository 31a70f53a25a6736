#![allow(dead_code)]

use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use object_vault::{
    config::AppConfig,
    crypto::{SymmetricKey, kdf::KdfSettings},
    models::{EncryptionMode, Role},
    services::{sessions::Caller, vault::Download},
    state::AppState,
};
use secrecy::SecretString;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tempfile::TempDir;

pub const PASSWORD: &str = "correct horse battery staple";

pub struct Harness {
    pub dir: TempDir,
    pub config: AppConfig,
    pub state: AppState,
}

impl Harness {
    pub async fn new(mode: EncryptionMode) -> Self {
        Self::with_config(mode, |_| {}).await
    }

    pub async fn with_config(mode: EncryptionMode, tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig {
            upload_dir: dir.path().join("objects").to_string_lossy().into_owned(),
            database_url: "sqlite::memory:".into(),
            encryption_mode: mode,
            secret_key: Some(SymmetricKey::generate().to_base64()),
            session_ttl_secs: 600,
            kdf: KdfSettings::fast(),
            ..AppConfig::default()
        };
        tweak(&mut config);
        std::fs::create_dir_all(&config.upload_dir).unwrap();

        let pool = if config.database_url == "sqlite::memory:" {
            memory_pool().await
        } else {
            file_pool(Path::new(&config.database_url)).await
        };
        let state = AppState::from_config(&config, pool).unwrap();
        state.metadata.migrate().await.unwrap();

        Self { dir, config, state }
    }

    pub fn upload_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.upload_dir)
    }

    /// Register and log in; returns the caller for the new session.
    pub async fn principal(&self, username: &str, role: Role) -> Caller {
        self.state
            .principals
            .register(username, SecretString::from(PASSWORD), role)
            .await
            .unwrap();
        self.login(username).await
    }

    pub async fn login(&self, username: &str) -> Caller {
        let outcome = self
            .state
            .principals
            .login(username, SecretString::from(PASSWORD))
            .await
            .unwrap();
        self.state
            .sessions
            .get(&outcome.token)
            .unwrap()
            .into_caller(outcome.token)
    }
}

/// Single-connection in-memory database that lives as long as the pool.
pub async fn memory_pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    Arc::new(pool)
}

pub async fn file_pool(path: &Path) -> Arc<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    Arc::new(pool)
}

/// Deterministic test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

/// Split `data` into a request-like body stream of `chunk`-sized pieces.
pub fn body(data: &[u8], chunk: usize) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    let pieces: Vec<io::Result<Bytes>> = data
        .chunks(chunk.max(1))
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    stream::iter(pieces)
}

pub async fn collect(mut download: Download) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(chunk) = download.body.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

/// Every regular file below `dir`.
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                found.push(path);
            }
        }
    }
    found
}

pub fn find_physical(dir: &Path, physical_name: &str) -> PathBuf {
    files_under(dir)
        .into_iter()
        .find(|p| p.file_name().is_some_and(|n| n == physical_name))
        .unwrap()
}
