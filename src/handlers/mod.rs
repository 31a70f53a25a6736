//! Thin axum adapters over the services.

pub mod admin_handlers;
pub mod auth_handlers;
pub mod caller;
pub mod health_handlers;
pub mod object_handlers;
