//! How the bytes of a stored object were transformed on the way to disk.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Key-resolution variant recorded per object.
///
/// The server-wide configured mode only decides what new uploads get; every
/// object remembers its own mode so objects written under earlier
/// configurations stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum EncryptionMode {
    /// Stored verbatim, no server-side encryption.
    Plain,
    /// One server-wide key from configuration.
    Fixed,
    /// Random key per principal, persisted in the principals table.
    PerPrincipalStored,
    /// Key derived from the login password and a persisted salt; lives only
    /// in the session.
    PerPrincipalDerived,
    /// Client already encrypted the blob; stored and returned verbatim.
    ClientOpaque,
}

impl EncryptionMode {
    pub const ALL: [EncryptionMode; 5] = [
        EncryptionMode::Plain,
        EncryptionMode::Fixed,
        EncryptionMode::PerPrincipalStored,
        EncryptionMode::PerPrincipalDerived,
        EncryptionMode::ClientOpaque,
    ];

    /// Modes whose objects always belong to a principal.
    pub fn is_multi_tenant(self) -> bool {
        matches!(
            self,
            EncryptionMode::PerPrincipalStored | EncryptionMode::PerPrincipalDerived
        )
    }

    /// Whether the server seals bytes under this mode.
    pub fn server_encrypts(self) -> bool {
        !matches!(self, EncryptionMode::Plain | EncryptionMode::ClientOpaque)
    }

    /// Suffix appended to physical names.
    pub fn physical_suffix(self) -> &'static str {
        match self {
            EncryptionMode::Plain => "",
            EncryptionMode::ClientOpaque => ".enc.client",
            _ => ".enc",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EncryptionMode::Plain => "plain",
            EncryptionMode::Fixed => "fixed",
            EncryptionMode::PerPrincipalStored => "per-principal-stored",
            EncryptionMode::PerPrincipalDerived => "per-principal-derived",
            EncryptionMode::ClientOpaque => "client-opaque",
        }
    }
}

impl fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        EncryptionMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == wanted)
            .ok_or_else(|| {
                format!(
                    "unknown encryption mode `{s}` (expected one of plain, fixed, \
                     per-principal-stored, per-principal-derived, client-opaque)"
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_its_own_names() {
        for mode in EncryptionMode::ALL {
            assert_eq!(mode.as_str().parse::<EncryptionMode>().unwrap(), mode);
        }
        assert_eq!(" FIXED ".parse::<EncryptionMode>().unwrap(), EncryptionMode::Fixed);
        assert!("aes".parse::<EncryptionMode>().is_err());
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&EncryptionMode::PerPrincipalDerived).unwrap();
        assert_eq!(json, "\"per-principal-derived\"");
    }

    #[test]
    fn suffixes() {
        assert_eq!(EncryptionMode::Plain.physical_suffix(), "");
        assert_eq!(EncryptionMode::Fixed.physical_suffix(), ".enc");
        assert_eq!(EncryptionMode::PerPrincipalDerived.physical_suffix(), ".enc");
        assert_eq!(EncryptionMode::ClientOpaque.physical_suffix(), ".enc.client");
    }
}
