use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::{
    entities::user,
    errors::ServiceError,
    events::{Event, EventSender},
    services::localization::DEFAULT_LANGUAGE,
};

/// User registry. Registration is idempotent; the referrer is bound at first
/// contact and never overwritten.
#[derive(Clone)]
pub struct UserService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
}

impl UserService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Registers a user on first contact; subsequent calls refresh the
    /// display name only. A self-referral is ignored.
    #[instrument(skip(self))]
    pub async fn register(
        &self,
        user_id: i64,
        display_name: &str,
        referrer_id: Option<i64>,
    ) -> Result<user::Model, ServiceError> {
        if let Some(existing) = user::Entity::find_by_id(user_id).one(&*self.db).await? {
            if existing.display_name != display_name {
                let mut active: user::ActiveModel = existing.into();
                active.display_name = Set(display_name.to_string());
                return Ok(active.update(&*self.db).await?);
            }
            return Ok(existing);
        }

        let referrer_id = match referrer_id {
            Some(id) if id != user_id => {
                // the referrer must be a known user
                user::Entity::find_by_id(id)
                    .one(&*self.db)
                    .await?
                    .map(|r| r.id)
            }
            _ => None,
        };

        let model = user::ActiveModel {
            id: Set(user_id),
            display_name: Set(display_name.to_string()),
            language: Set(DEFAULT_LANGUAGE.to_string()),
            stars_bought: Set(0),
            referral_bonus: Set(Decimal::ZERO),
            referrer_id: Set(referrer_id),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;

        info!(user_id, referrer_id = ?referrer_id, "User registered");
        if let Some(sender) = &self.event_sender {
            let _ = sender
                .send(Event::UserRegistered {
                    user_id,
                    referrer_id,
                })
                .await;
        }
        Ok(model)
    }

    pub async fn get(&self, user_id: i64) -> Result<user::Model, ServiceError> {
        user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {user_id} not found")))
    }

    pub async fn set_language(&self, user_id: i64, language: &str) -> Result<(), ServiceError> {
        let existing = self.get(user_id).await?;
        let mut active: user::ActiveModel = existing.into();
        active.language = Set(language.to_string());
        active.update(&*self.db).await?;
        Ok(())
    }
}
