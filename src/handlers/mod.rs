//! # API Handlers
//!
//! HTTP endpoints for the authorization lifecycle, manual sync, notifications
//! and the scheduler.

use crate::models::ServiceInfo;
use axum::response::Json;

pub mod cron;
pub mod health;
pub mod notifications;
pub mod oauth;
pub mod sync;
pub mod types;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

#[cfg(test)]
mod tests;
