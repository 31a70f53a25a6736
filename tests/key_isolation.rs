//! The derived key must never reach the logs, the database or the object
//! directory.

mod common;

use base64::{Engine as _, engine::general_purpose};
use common::{Harness, PASSWORD, body, collect, files_under};
use object_vault::{
    crypto::kdf,
    models::{EncryptionMode, Role},
    services::vault::UploadRequest,
};
use secrecy::SecretString;
use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing::Level;

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn database_files(db: &Path) -> Vec<PathBuf> {
    let mut files = vec![db.to_path_buf()];
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut name = db.as_os_str().to_owned();
        name.push(suffix);
        let path = PathBuf::from(name);
        if path.exists() {
            files.push(path);
        }
    }
    files
}

#[tokio::test]
async fn derived_key_is_never_persisted_or_logged() {
    let logs = Captured::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let h = Harness::with_config(EncryptionMode::PerPrincipalDerived, |cfg| {
        let db = Path::new(&cfg.upload_dir)
            .parent()
            .unwrap()
            .join("vault.db");
        cfg.database_url = db.to_string_lossy().into_owned();
    })
    .await;
    let alice = h.principal("alice", Role::Ordinary).await;

    let data = common::payload(300_000);
    let object = h
        .state
        .vault
        .upload(
            &alice,
            UploadRequest {
                file_name: "ledger.csv".into(),
                ..UploadRequest::default()
            },
            body(&data, 65_536),
        )
        .await
        .unwrap();
    let download = h.state.vault.download(&alice, object.id).await.unwrap();
    assert_eq!(collect(download).await.unwrap(), data);

    let principal = h
        .state
        .metadata
        .find_principal_by_username("alice")
        .await
        .unwrap()
        .unwrap();
    assert!(principal.stored_key.is_none());

    let key = kdf::derive_key(
        &SecretString::from(PASSWORD),
        &principal.kdf_salt,
        h.config.kdf.pbkdf2_iterations,
    )
    .unwrap();
    let raw = key.as_bytes().to_vec();
    let b64 = general_purpose::STANDARD.encode(&raw);
    let b64_url = general_purpose::URL_SAFE_NO_PAD.encode(&raw);
    let hex: String = raw.iter().map(|b| format!("{b:02x}")).collect();
    let needles: [&[u8]; 5] = [
        raw.as_slice(),
        b64.as_bytes(),
        b64_url.as_bytes(),
        hex.as_bytes(),
        PASSWORD.as_bytes(),
    ];

    let captured = logs.contents();
    assert!(contains(&captured, b"logged in"), "log capture is empty");
    for needle in needles {
        assert!(!contains(&captured, needle), "key material in logs");
    }

    let db = PathBuf::from(&h.config.database_url);
    let mut inspected = database_files(&db);
    inspected.extend(files_under(&h.upload_dir()));
    for path in inspected {
        let bytes = std::fs::read(&path).unwrap();
        for needle in needles {
            assert!(!contains(&bytes, needle), "key material in {}", path.display());
        }
    }
}

#[tokio::test]
async fn stored_mode_keeps_a_key_per_principal() {
    let h = Harness::new(EncryptionMode::PerPrincipalStored).await;
    h.principal("alice", Role::Ordinary).await;
    h.principal("bob", Role::Ordinary).await;

    let alice = h.state.metadata.find_principal_by_username("alice").await.unwrap().unwrap();
    let bob = h.state.metadata.find_principal_by_username("bob").await.unwrap().unwrap();
    let (Some(a), Some(b)) = (alice.stored_key, bob.stored_key) else {
        panic!("stored keys missing");
    };
    assert_ne!(a, b);
    assert_ne!(alice.kdf_salt, bob.kdf_salt);

    // Secrets stay out of the serialized principal.
    let json = serde_json::to_string(&h.state.principals.get(alice.id).await.unwrap()).unwrap();
    assert!(!json.contains(&a));
    assert!(!json.contains("credential_hash"));
}
