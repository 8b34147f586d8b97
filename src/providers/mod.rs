//! Provider catalogue, OAuth coordination and activity fetch adapters.
//!
//! The set of integrable providers is closed: [`ProviderKind`] names every
//! provider the service knows about, and the [`registry`] decides at startup
//! which of them are enabled and fully configured.

pub mod adapter;
pub mod oauth;
pub mod registry;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::SyncCoreError;

pub use adapter::{ActivitySource, HttpActivitySource};
pub use oauth::OAuthCoordinator;
pub use registry::{ProviderDefinition, ProviderRegistry, RegistryError};

/// Every provider the service can integrate with
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Github,
    Slack,
    Notion,
    GoogleCalendar,
}

/// Broad product category of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCategory {
    SourceControl,
    Chat,
    Workspace,
    Calendar,
}

/// How often the scheduler syncs a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CadenceClass {
    /// Every 15 minutes
    Frequent,
    /// Every 30 minutes
    Standard,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Github,
        ProviderKind::Slack,
        ProviderKind::Notion,
        ProviderKind::GoogleCalendar,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Github => "github",
            ProviderKind::Slack => "slack",
            ProviderKind::Notion => "notion",
            ProviderKind::GoogleCalendar => "google_calendar",
        }
    }

    /// Human readable name used in notifications
    pub fn display_name(self) -> &'static str {
        match self {
            ProviderKind::Github => "GitHub",
            ProviderKind::Slack => "Slack",
            ProviderKind::Notion => "Notion",
            ProviderKind::GoogleCalendar => "Google Calendar",
        }
    }

    pub fn category(self) -> ProviderCategory {
        match self {
            ProviderKind::Github => ProviderCategory::SourceControl,
            ProviderKind::Slack => ProviderCategory::Chat,
            ProviderKind::Notion => ProviderCategory::Workspace,
            ProviderKind::GoogleCalendar => ProviderCategory::Calendar,
        }
    }

    /// Source control moves fastest and is synced on the short cadence
    pub fn cadence(self) -> CadenceClass {
        match self.category() {
            ProviderCategory::SourceControl => CadenceClass::Frequent,
            _ => CadenceClass::Standard,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = SyncCoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SyncCoreError::Validation(format!("unknown provider '{}'", s)))
    }
}

/// Scheduler interval selector accepted by the batch endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum SyncInterval {
    #[serde(rename = "15min")]
    FifteenMinutes,
    #[serde(rename = "30min")]
    ThirtyMinutes,
}

impl SyncInterval {
    /// Parse an optional `interval` query value; absent means "every class"
    pub fn parse(value: Option<&str>) -> Result<Option<Self>, SyncCoreError> {
        match value.map(str::trim) {
            None | Some("") => Ok(None),
            Some("15min") => Ok(Some(SyncInterval::FifteenMinutes)),
            Some("30min") => Ok(Some(SyncInterval::ThirtyMinutes)),
            Some(other) => Err(SyncCoreError::Validation(format!(
                "interval must be '15min' or '30min', got '{}'",
                other
            ))),
        }
    }

    pub fn cadence(self) -> CadenceClass {
        match self {
            SyncInterval::FifteenMinutes => CadenceClass::Frequent,
            SyncInterval::ThirtyMinutes => CadenceClass::Standard,
        }
    }

    /// Name recorded on the cron execution row
    pub fn job_name(interval: Option<Self>) -> &'static str {
        match interval {
            Some(SyncInterval::FifteenMinutes) => "sync_15min",
            Some(SyncInterval::ThirtyMinutes) => "sync_30min",
            None => "sync_all",
        }
    }
}

/// Providers selected by an interval, restricted to `enabled`
pub fn providers_for_interval(
    interval: Option<SyncInterval>,
    enabled: impl IntoIterator<Item = ProviderKind>,
) -> Vec<ProviderKind> {
    enabled
        .into_iter()
        .filter(|kind| interval.is_none_or(|i| kind.cadence() == i.cadence()))
        .collect()
}
