//! Connection entity model
//!
//! Per (user, provider) connection flag and sync bookkeeping. The credential
//! itself lives in `credentials`; this row is what the batch scheduler scans.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "connections")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    pub provider: String,

    /// Whether the user currently has a live authorization for the provider
    pub connected: bool,

    /// High-water mark for incremental fetches
    pub last_synced_at: Option<DateTimeUtc>,

    /// Message of the most recent failed sync, cleared on success
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
