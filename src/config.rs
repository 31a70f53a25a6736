use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fmt, str::FromStr};

use crate::{
    crypto::{
        SymmetricKey,
        kdf::{DEFAULT_PBKDF2_ITERATIONS, KdfSettings, MIN_CONFIGURED_PBKDF2_ITERATIONS},
    },
    errors::{VaultError, VaultResult},
    models::EncryptionMode,
};

const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024 * 1024;
const DEFAULT_SESSION_TTL_SECS: u64 = 1800;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: String,
    pub database_url: String,
    pub encryption_mode: EncryptionMode,
    /// Base64 server key for the fixed mode.
    pub secret_key: Option<String>,
    pub max_upload_bytes: u64,
    pub session_ttl_secs: u64,
    pub kdf: KdfSettings,
    /// Password for the bootstrap `admin` principal.
    pub admin_password: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Encrypting object vault")]
pub struct Args {
    /// Host to bind to (overrides OBJECT_VAULT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_VAULT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides OBJECT_VAULT_UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<String>,

    /// Database URL (overrides OBJECT_VAULT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// plain | fixed | per-principal-stored | per-principal-derived | client-opaque
    #[arg(long)]
    pub encryption_mode: Option<EncryptionMode>,

    /// Largest accepted upload in bytes (overrides OBJECT_VAULT_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Idle session lifetime in seconds (overrides OBJECT_VAULT_SESSION_TTL_SECS)
    #[arg(long)]
    pub session_ttl_secs: Option<u64>,

    /// PBKDF2 iterations (overrides OBJECT_VAULT_KDF_ITERATIONS)
    #[arg(long)]
    pub kdf_iterations: Option<u32>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            upload_dir: "./data/objects".into(),
            database_url: "sqlite://./data/meta/object_vault.db".into(),
            encryption_mode: EncryptionMode::Fixed,
            secret_key: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            kdf: KdfSettings::default(),
            admin_password: None,
        }
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let defaults = Self::default();

        // --- Environment fallback ---
        let env_host = env::var("OBJECT_VAULT_HOST").unwrap_or(defaults.host);
        let env_port = env_parsed("OBJECT_VAULT_PORT")?.unwrap_or(defaults.port);
        let env_upload = env::var("OBJECT_VAULT_UPLOAD_DIR").unwrap_or(defaults.upload_dir);
        let env_db = env::var("OBJECT_VAULT_DATABASE_URL").unwrap_or(defaults.database_url);
        let env_mode = env_parsed("OBJECT_VAULT_ENCRYPTION_MODE")?.unwrap_or(defaults.encryption_mode);
        let env_max = env_parsed("OBJECT_VAULT_MAX_UPLOAD_BYTES")?.unwrap_or(defaults.max_upload_bytes);
        let env_ttl =
            env_parsed("OBJECT_VAULT_SESSION_TTL_SECS")?.unwrap_or(defaults.session_ttl_secs);
        let env_iterations =
            env_parsed("OBJECT_VAULT_KDF_ITERATIONS")?.unwrap_or(DEFAULT_PBKDF2_ITERATIONS);

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            upload_dir: args.upload_dir.unwrap_or(env_upload),
            database_url: args.database_url.unwrap_or(env_db),
            encryption_mode: args.encryption_mode.unwrap_or(env_mode),
            secret_key: env::var("OBJECT_VAULT_SECRET_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max),
            session_ttl_secs: args.session_ttl_secs.unwrap_or(env_ttl),
            kdf: KdfSettings {
                pbkdf2_iterations: args.kdf_iterations.unwrap_or(env_iterations),
                ..defaults.kdf
            },
            admin_password: env::var("OBJECT_VAULT_ADMIN_PASSWORD")
                .ok()
                .filter(|v| !v.is_empty()),
        };

        cfg.validate()?;
        Ok((cfg, args.migrate))
    }

    /// Reject settings the service must not start with.
    pub fn validate(&self) -> Result<()> {
        if self.kdf.pbkdf2_iterations < MIN_CONFIGURED_PBKDF2_ITERATIONS {
            anyhow::bail!(
                "OBJECT_VAULT_KDF_ITERATIONS must be at least {MIN_CONFIGURED_PBKDF2_ITERATIONS}, got {}",
                self.kdf.pbkdf2_iterations
            );
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Decode the server-wide key.
    ///
    /// In the fixed mode a missing key is an error; in any mode a supplied key
    /// that does not decode to exactly 32 bytes is an error. A substitute key
    /// is never generated.
    pub fn fixed_key(&self) -> VaultResult<Option<SymmetricKey>> {
        match self.secret_key.as_deref() {
            Some(encoded) => Ok(Some(SymmetricKey::from_base64(encoded)?)),
            None if self.encryption_mode == EncryptionMode::Fixed => {
                Err(VaultError::InvalidKeyMaterial { len: 0 })
            }
            None => Ok(None),
        }
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("upload_dir", &self.upload_dir)
            .field("database_url", &self.database_url)
            .field("encryption_mode", &self.encryption_mode)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "[REDACTED]"))
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("kdf", &self.kdf)
            .field(
                "admin_password",
                &self.admin_password.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

fn env_parsed<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("parsing {name} value `{value}`")),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {name}")),
    }
}
