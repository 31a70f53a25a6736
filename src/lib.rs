//! Encrypting object vault: streams uploads through AES-256-GCM into a
//! sharded filesystem store, with per-object key resolution.

pub mod config;
pub mod crypto;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
