use serde::Serialize;

use super::EncryptionMode;

/// Usage figures for one principal or for the whole vault.
#[derive(Debug, Clone, Serialize)]
pub struct VaultStats {
    pub object_count: i64,
    pub total_bytes: i64,
    pub total_size: String,
    pub usable_capacity: u64,
    pub usable_capacity_size: String,
    pub encryption_enabled: bool,
    pub encryption_mode: EncryptionMode,
}

/// Human-readable byte count with two decimals above 1 KiB.
pub fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let value = bytes as f64;
    if bytes < 1024 {
        format!("{bytes} B")
    } else if value < KIB * KIB {
        format!("{:.2} KB", value / KIB)
    } else if value < KIB * KIB * KIB {
        format!("{:.2} MB", value / (KIB * KIB))
    } else {
        format!("{:.2} GB", value / (KIB * KIB * KIB))
    }
}
