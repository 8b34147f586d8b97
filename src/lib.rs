//! # Connector Sync
//!
//! OAuth credential lifecycle and activity sync orchestration for third-party
//! providers: encrypted credential storage, CSRF-protected authorization,
//! per-user rate limiting, scheduled and manual syncs, and user-facing
//! notifications.

pub mod auth;
pub mod cache;
pub mod config;
pub mod cron_monitor;
pub mod crypto;
pub mod csrf;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod notifications;
pub mod providers;
pub mod rate_limit;
pub mod repositories;
pub mod server;
pub mod sync;
pub mod telemetry;
pub mod vault;
pub use migration;
