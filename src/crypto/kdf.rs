//! Password-based key derivation and credential hashing.
//!
//! Two unrelated jobs share this module because both start from the login
//! password:
//!
//! * PBKDF2-HMAC-SHA256 turns the password and the principal's salt into the
//!   per-session data key used by the derived-key mode.
//! * Argon2id produces the PHC string stored as the principal's credential.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use base64::{Engine as _, engine::general_purpose};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroize;

use super::{
    CipherError,
    keys::{KEY_LEN, SALT_LEN, SymmetricKey, generate_salt},
};

/// PBKDF2 iteration count used unless configured otherwise.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 310_000;

/// Lowest iteration count the service will accept from configuration.
pub const MIN_CONFIGURED_PBKDF2_ITERATIONS: u32 = 300_000;

/// Hard floor for a single derivation. Only test settings go this low.
pub const MIN_PBKDF2_ITERATIONS: u32 = 1_000;

/// Cost parameters for both derivations.
#[derive(Debug, Clone)]
pub struct KdfSettings {
    pub pbkdf2_iterations: u32,
    /// Argon2id memory cost in KiB
    pub argon2_mem_kib: u32,
    pub argon2_time_cost: u32,
    pub argon2_parallelism: u32,
}

impl Default for KdfSettings {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            argon2_mem_kib: 19 * 1024,
            argon2_time_cost: 2,
            argon2_parallelism: 1,
        }
    }
}

impl KdfSettings {
    /// Cheap parameters for tests. Never use these for real credentials.
    pub fn fast() -> Self {
        Self {
            pbkdf2_iterations: MIN_PBKDF2_ITERATIONS,
            argon2_mem_kib: 1024,
            argon2_time_cost: 1,
            argon2_parallelism: 1,
        }
    }

    fn argon2(&self) -> Result<Argon2<'static>, CipherError> {
        let params = Params::new(
            self.argon2_mem_kib,
            self.argon2_time_cost,
            self.argon2_parallelism,
            None,
        )
        .map_err(|e| CipherError::Kdf(format!("invalid Argon2id params: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Fresh salt, Base64 encoded for storage next to the principal.
pub fn new_salt() -> String {
    general_purpose::STANDARD.encode(generate_salt())
}

/// Derive the 256-bit data key for a principal from their password.
///
/// Deterministic for a given (password, salt, iterations) triple.
pub fn derive_key(
    password: &SecretString,
    salt_b64: &str,
    iterations: u32,
) -> Result<SymmetricKey, CipherError> {
    if iterations < MIN_PBKDF2_ITERATIONS {
        return Err(CipherError::Kdf(format!(
            "PBKDF2 needs at least {MIN_PBKDF2_ITERATIONS} iterations"
        )));
    }
    let salt = general_purpose::STANDARD
        .decode(salt_b64.trim())
        .map_err(|e| CipherError::Kdf(format!("salt is not valid base64: {e}")))?;
    if salt.len() < SALT_LEN {
        return Err(CipherError::Kdf(format!(
            "salt must be at least {SALT_LEN} bytes"
        )));
    }

    let mut out = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        password.expose_secret().as_bytes(),
        &salt,
        iterations,
        &mut out,
    );
    let key = SymmetricKey::from_slice(&out);
    out.zeroize();
    key
}

/// Hash a password into an Argon2id PHC string.
pub fn hash_credential(password: &SecretString, settings: &KdfSettings) -> Result<String, CipherError> {
    let salt = SaltString::encode_b64(&generate_salt())
        .map_err(|e| CipherError::Kdf(format!("salt encoding failed: {e}")))?;
    let hash = settings
        .argon2()?
        .hash_password(password.expose_secret().as_bytes(), &salt)
        .map_err(|e| CipherError::Kdf(format!("Argon2id hashing failed: {e}")))?;
    Ok(hash.to_string())
}

/// Check a password against a stored PHC string. A malformed hash counts as a
/// mismatch.
pub fn verify_credential(password: &SecretString, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.expose_secret().as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &str = "AQEBAQEBAQEBAQEBAQEBAQ==";

    #[test]
    fn derivation_is_deterministic() {
        let password = SecretString::from("correct horse");
        let a = derive_key(&password, SALT, MIN_PBKDF2_ITERATIONS).unwrap();
        let b = derive_key(&password, SALT, MIN_PBKDF2_ITERATIONS).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn salt_and_password_both_matter() {
        let password = SecretString::from("correct horse");
        let base = derive_key(&password, SALT, MIN_PBKDF2_ITERATIONS).unwrap();

        let other_salt = general_purpose::STANDARD.encode([2u8; SALT_LEN]);
        let salted = derive_key(&password, &other_salt, MIN_PBKDF2_ITERATIONS).unwrap();
        assert_ne!(base.as_bytes(), salted.as_bytes());

        let other = derive_key(&SecretString::from("battery staple"), SALT, MIN_PBKDF2_ITERATIONS)
            .unwrap();
        assert_ne!(base.as_bytes(), other.as_bytes());
    }

    #[test]
    fn rejects_weak_parameters() {
        let password = SecretString::from("pw");
        assert!(matches!(
            derive_key(&password, SALT, 10),
            Err(CipherError::Kdf(_))
        ));
        assert!(matches!(
            derive_key(&password, "AAAA", MIN_PBKDF2_ITERATIONS),
            Err(CipherError::Kdf(_))
        ));
        assert!(matches!(
            derive_key(&password, "%%%", MIN_PBKDF2_ITERATIONS),
            Err(CipherError::Kdf(_))
        ));
    }

    #[test]
    fn credential_hash_verifies_only_the_right_password() {
        let settings = KdfSettings::fast();
        let hash = hash_credential(&SecretString::from("s3cret"), &settings).unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_credential(&SecretString::from("s3cret"), &hash));
        assert!(!verify_credential(&SecretString::from("s3cret!"), &hash));
        assert!(!verify_credential(&SecretString::from("s3cret"), "garbage"));
    }

    #[test]
    fn fresh_salts_differ() {
        assert_ne!(new_salt(), new_salt());
    }
}
