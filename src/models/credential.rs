//! Credential entity model
//!
//! One row per (user, provider) holding the encrypted OAuth token bundle.
//! Plaintext tokens never reach this table; see [`crate::vault`].

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "credentials")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    /// Provider slug (e.g. "github", "google_calendar")
    pub provider: String,

    /// AES-256-GCM ciphertext of the access token
    pub access_token_ciphertext: Vec<u8>,

    /// AES-256-GCM ciphertext of the refresh token, when the provider issued one
    pub refresh_token_ciphertext: Option<Vec<u8>>,

    pub expires_at: Option<DateTimeUtc>,

    /// Space-delimited scopes granted by the provider
    pub scope: Option<String>,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
