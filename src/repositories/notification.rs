//! Notification repository

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, sea_query::Expr,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::notification::{
    self, ActiveModel, Entity as Notification, Model, NotificationType, Severity,
};

/// Content of a notification, independent of its row identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContent {
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub action_url: Option<String>,
    pub action_label: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NotificationRepository {
    db: Arc<DatabaseConnection>,
}

impl NotificationRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_unread(
        &self,
        user_id: Uuid,
        provider: &str,
        notification_type: NotificationType,
    ) -> Result<Option<Model>, DbErr> {
        Notification::find()
            .filter(notification::Column::UserId.eq(user_id))
            .filter(notification::Column::Provider.eq(provider))
            .filter(notification::Column::NotificationType.eq(notification_type))
            .filter(notification::Column::Read.eq(false))
            .one(&*self.db)
            .await
    }

    pub async fn insert(
        &self,
        user_id: Uuid,
        provider: &str,
        notification_type: NotificationType,
        content: NotificationContent,
    ) -> Result<Model, DbErr> {
        let now = Utc::now();
        let model = Model {
            id: Uuid::new_v4(),
            user_id,
            provider: provider.to_string(),
            notification_type,
            severity: content.severity,
            title: content.title,
            message: content.message,
            action_url: content.action_url,
            action_label: content.action_label,
            read: false,
            created_at: now,
            updated_at: now,
        };

        let row = ActiveModel {
            id: Set(model.id),
            user_id: Set(model.user_id),
            provider: Set(model.provider.clone()),
            notification_type: Set(model.notification_type),
            severity: Set(model.severity),
            title: Set(model.title.clone()),
            message: Set(model.message.clone()),
            action_url: Set(model.action_url.clone()),
            action_label: Set(model.action_label.clone()),
            read: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Notification::insert(row).exec_without_returning(&*self.db).await?;
        Ok(model)
    }

    /// Overwrite the content of an existing row
    pub async fn update_content(&self, existing: Model, content: NotificationContent) -> Result<Model, DbErr> {
        let mut active: ActiveModel = existing.into();
        active.severity = Set(content.severity);
        active.title = Set(content.title);
        active.message = Set(content.message);
        active.action_url = Set(content.action_url);
        active.action_label = Set(content.action_label);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await
    }

    /// Mark every unread notification for a pair as read
    pub async fn mark_read_for_pair(&self, user_id: Uuid, provider: &str) -> Result<u64, DbErr> {
        self.mark_read_where(user_id, Some(provider), None).await
    }

    /// Mark unread notifications of one type for a pair as read
    pub async fn mark_read_for_type(
        &self,
        user_id: Uuid,
        provider: &str,
        notification_type: NotificationType,
    ) -> Result<u64, DbErr> {
        self.mark_read_where(user_id, Some(provider), Some(notification_type))
            .await
    }

    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<u64, DbErr> {
        self.mark_read_where(user_id, None, None).await
    }

    async fn mark_read_where(
        &self,
        user_id: Uuid,
        provider: Option<&str>,
        notification_type: Option<NotificationType>,
    ) -> Result<u64, DbErr> {
        let mut update = Notification::update_many()
            .col_expr(notification::Column::Read, Expr::value(true))
            .col_expr(notification::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(notification::Column::UserId.eq(user_id))
            .filter(notification::Column::Read.eq(false));

        if let Some(provider) = provider {
            update = update.filter(notification::Column::Provider.eq(provider));
        }
        if let Some(notification_type) = notification_type {
            update = update.filter(notification::Column::NotificationType.eq(notification_type));
        }

        Ok(update.exec(&*self.db).await?.rows_affected)
    }

    pub async fn list(&self, user_id: Uuid, unread_only: bool) -> Result<Vec<Model>, DbErr> {
        let mut query = Notification::find().filter(notification::Column::UserId.eq(user_id));
        if unread_only {
            query = query.filter(notification::Column::Read.eq(false));
        }
        query
            .order_by_desc(notification::Column::UpdatedAt)
            .all(&*self.db)
            .await
    }

    pub async fn count_unread(&self, user_id: Uuid) -> Result<u64, DbErr> {
        Notification::find()
            .filter(notification::Column::UserId.eq(user_id))
            .filter(notification::Column::Read.eq(false))
            .count(&*self.db)
            .await
    }

    /// Mark one notification as read; scoped to its owner
    pub async fn mark_read(&self, user_id: Uuid, id: Uuid) -> Result<bool, DbErr> {
        let result = Notification::update_many()
            .col_expr(notification::Column::Read, Expr::value(true))
            .col_expr(notification::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(notification::Column::Id.eq(id))
            .filter(notification::Column::UserId.eq(user_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<bool, DbErr> {
        let result = Notification::delete_many()
            .filter(notification::Column::Id.eq(id))
            .filter(notification::Column::UserId.eq(user_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}
