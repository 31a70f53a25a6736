//! Core services, composed once at startup in `main`.

pub mod key_resolver;
pub mod metadata;
pub mod object_store;
pub mod principals;
pub mod sessions;
pub mod vault;
