//! Activity entity model
//!
//! Local mirror of provider activity (commits, pages, messages, events).
//! `(user_id, provider, external_id)` is unique so re-syncing a window is a no-op.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "activities")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    pub provider: String,

    /// Stable identifier assigned by the provider
    pub external_id: String,

    /// Normalized item kind (e.g. commit, page_edited, message, event)
    pub kind: String,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub url: Option<String>,

    /// When the item was created or last updated on the provider side
    pub occurred_at: DateTimeUtc,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub payload: Option<JsonValue>,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
