use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{Display, EnumString, IntoEnumIterator};
use tracing::instrument;

use crate::{
    entities::order_draft,
    errors::ServiceError,
    services::{
        localization::{text, LocalizationService, DEFAULT_LANGUAGE},
        pricing::PaymentRail,
        settings::{defaults, keys, SettingsService},
        users::UserService,
    },
};

pub const SUPPORTED_LANGUAGES: [&str; 2] = ["en", "ru"];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    ChooseLanguage,
    ChooseRecipient,
    ChooseQuantity,
    ChooseRail,
    Confirm,
}

/// Inputs the transport layer can feed into the conversation: structured
/// selections (button-equivalents), free text, backtracking, and the two
/// terminal signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    Start { first_contact: bool },
    SelectLanguage { language: String },
    Text { text: String },
    SelectQuantity { quantity: i64 },
    SelectRail { rail: PaymentRail },
    ChangeRecipient,
    ChangeQuantity,
    ChangeRail,
    Review,
    ConfirmOrder,
    Cancel,
}

/// A fully assembled draft, ready to be opened as a pending order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub recipient: String,
    pub quantity: i64,
    pub rail: PaymentRail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ConversationReply {
    /// Ask the user for the input belonging to `state`.
    Prompt { state: ConversationState },
    /// Ask the user to pick a rail from the enabled set.
    RailChoices { rails: Vec<PaymentRail> },
    /// Show the accumulated draft before confirmation.
    Summary {
        recipient: Option<String>,
        quantity: Option<i64>,
        rail: Option<PaymentRail>,
    },
    /// The draft was discarded.
    Cancelled,
    /// Confirmation succeeded; the caller opens the payment request.
    ReadyToOpen { draft: OrderDraft },
}

/// The order-collection dialogue: a strict linear flow with backtracking,
/// dispatched from one `(state, event)` table. No side effects beyond the
/// persisted draft.
#[derive(Clone)]
pub struct ConversationService {
    db: Arc<DatabaseConnection>,
    settings: SettingsService,
    users: UserService,
    localization: LocalizationService,
}

impl ConversationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        settings: SettingsService,
        users: UserService,
        localization: LocalizationService,
    ) -> Self {
        Self {
            db,
            settings,
            users,
            localization,
        }
    }

    /// Advances the dialogue. Validation failures keep the draft in its
    /// current state; the caller re-prompts.
    #[instrument(skip(self, event), fields(user_id = user_id))]
    pub async fn advance(
        &self,
        user_id: i64,
        event: ConversationEvent,
    ) -> Result<ConversationReply, ServiceError> {
        if let ConversationEvent::Cancel = event {
            self.discard_draft(user_id).await?;
            return Ok(ConversationReply::Cancelled);
        }
        if let ConversationEvent::Start { first_contact } = event {
            let state = if first_contact {
                ConversationState::ChooseLanguage
            } else {
                ConversationState::ChooseRecipient
            };
            self.reset_draft(user_id, state).await?;
            return Ok(ConversationReply::Prompt { state });
        }

        let draft = self.load_or_create_draft(user_id).await?;
        let state: ConversationState = draft.state.parse().map_err(|_| {
            ServiceError::InternalError(format!("corrupt draft state: {}", draft.state))
        })?;

        match (state, event) {
            // ConfirmOrder is accepted from any state so an incomplete draft
            // is always answered with the fill-all-fields validation.
            (_, ConversationEvent::ConfirmOrder) => self.try_confirm(draft).await,
            (_, ConversationEvent::Review) => {
                let draft = self.set_state(draft, ConversationState::Confirm).await?;
                Ok(self.summary(&draft))
            }
            (_, ConversationEvent::ChangeRecipient) => {
                self.set_state(draft, ConversationState::ChooseRecipient)
                    .await?;
                Ok(ConversationReply::Prompt {
                    state: ConversationState::ChooseRecipient,
                })
            }
            (_, ConversationEvent::ChangeQuantity) => {
                self.set_state(draft, ConversationState::ChooseQuantity)
                    .await?;
                Ok(ConversationReply::Prompt {
                    state: ConversationState::ChooseQuantity,
                })
            }
            (_, ConversationEvent::ChangeRail) => {
                self.set_state(draft, ConversationState::ChooseRail).await?;
                Ok(ConversationReply::RailChoices {
                    rails: self.enabled_rails().await?,
                })
            }
            (
                ConversationState::ChooseLanguage,
                ConversationEvent::SelectLanguage { language } | ConversationEvent::Text { text: language },
            ) => self.apply_language(user_id, draft, &language).await,
            (ConversationState::ChooseRecipient, ConversationEvent::Text { text }) => {
                self.apply_recipient(draft, &text).await
            }
            (ConversationState::ChooseQuantity, ConversationEvent::SelectQuantity { quantity }) => {
                self.apply_quantity(draft, quantity).await
            }
            (ConversationState::ChooseQuantity, ConversationEvent::Text { text }) => {
                let quantity: i64 = text.trim().parse().map_err(|_| {
                    ServiceError::ValidationError("quantity must be a positive integer".to_string())
                })?;
                self.apply_quantity(draft, quantity).await
            }
            (ConversationState::ChooseRail, ConversationEvent::SelectRail { rail }) => {
                self.apply_rail(draft, rail).await
            }
            (ConversationState::ChooseRail, ConversationEvent::Text { text }) => {
                let rail: PaymentRail = text.trim().parse().map_err(|_| {
                    ServiceError::ValidationError(format!("unknown payment method: {text}"))
                })?;
                self.apply_rail(draft, rail).await
            }
            (state, _) => Err(ServiceError::ValidationError(format!(
                "unexpected input for step {state}"
            ))),
        }
    }

    /// The rail options currently offered; the card rail disappears when the
    /// feature flag is off.
    pub async fn enabled_rails(&self) -> Result<Vec<PaymentRail>, ServiceError> {
        let card_enabled = self
            .settings
            .get_bool(keys::CARD_PAYMENTS_ENABLED, defaults::CARD_PAYMENTS_ENABLED)
            .await?;
        Ok(PaymentRail::iter()
            .filter(|rail| card_enabled || *rail != PaymentRail::Card)
            .collect())
    }

    async fn apply_language(
        &self,
        user_id: i64,
        draft: order_draft::Model,
        language: &str,
    ) -> Result<ConversationReply, ServiceError> {
        let language = language.trim().to_lowercase();
        if !SUPPORTED_LANGUAGES.contains(&language.as_str()) {
            return Err(ServiceError::ValidationError(format!(
                "unsupported language: {language}"
            )));
        }
        self.users.set_language(user_id, &language).await?;
        self.set_state(draft, ConversationState::ChooseRecipient)
            .await?;
        Ok(ConversationReply::Prompt {
            state: ConversationState::ChooseRecipient,
        })
    }

    async fn apply_recipient(
        &self,
        draft: order_draft::Model,
        text: &str,
    ) -> Result<ConversationReply, ServiceError> {
        let recipient = text.trim();
        if recipient.is_empty() {
            return Err(ServiceError::ValidationError(
                "recipient must not be empty".to_string(),
            ));
        }
        if recipient.starts_with('@') {
            return Err(ServiceError::ValidationError(
                "enter the recipient without the @ prefix".to_string(),
            ));
        }
        let mut active: order_draft::ActiveModel = draft.into();
        active.recipient = Set(Some(recipient.to_string()));
        active.state = Set(ConversationState::ChooseQuantity.to_string());
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;
        Ok(ConversationReply::Prompt {
            state: ConversationState::ChooseQuantity,
        })
    }

    async fn apply_quantity(
        &self,
        draft: order_draft::Model,
        quantity: i64,
    ) -> Result<ConversationReply, ServiceError> {
        let minimum = self
            .settings
            .get_i64(keys::MIN_PURCHASE_QUANTITY, defaults::MIN_PURCHASE_QUANTITY)
            .await?;
        if quantity < minimum {
            return Err(ServiceError::ValidationError(format!(
                "quantity must be at least {minimum}"
            )));
        }
        let mut active: order_draft::ActiveModel = draft.into();
        active.quantity = Set(Some(quantity));
        active.state = Set(ConversationState::ChooseRail.to_string());
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;
        Ok(ConversationReply::RailChoices {
            rails: self.enabled_rails().await?,
        })
    }

    async fn apply_rail(
        &self,
        draft: order_draft::Model,
        rail: PaymentRail,
    ) -> Result<ConversationReply, ServiceError> {
        if !self.enabled_rails().await?.contains(&rail) {
            return Err(ServiceError::ValidationError(
                "card payments are currently disabled".to_string(),
            ));
        }
        let mut active: order_draft::ActiveModel = draft.into();
        active.rail = Set(Some(rail.to_string()));
        active.state = Set(ConversationState::Confirm.to_string());
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;
        Ok(self.summary(&updated))
    }

    async fn try_confirm(
        &self,
        draft: order_draft::Model,
    ) -> Result<ConversationReply, ServiceError> {
        let (recipient, quantity, rail) = match (&draft.recipient, draft.quantity, &draft.rail) {
            (Some(recipient), Some(quantity), Some(rail)) => {
                let rail: PaymentRail = rail.parse().map_err(|_| {
                    ServiceError::InternalError(format!("corrupt draft rail: {rail}"))
                })?;
                (recipient.clone(), quantity, rail)
            }
            _ => {
                let language = self
                    .users
                    .get(draft.user_id)
                    .await
                    .map(|u| u.language)
                    .unwrap_or_else(|_| DEFAULT_LANGUAGE.to_string());
                return Err(ServiceError::ValidationError(
                    self.localization
                        .render(text::FILL_ALL_FIELDS, &language, &[])
                        .await,
                ));
            }
        };
        // the draft is kept: the order issuer clears it once a payment
        // request is actually open, so a failed open stays retryable
        Ok(ConversationReply::ReadyToOpen {
            draft: OrderDraft {
                recipient,
                quantity,
                rail,
            },
        })
    }

    fn summary(&self, draft: &order_draft::Model) -> ConversationReply {
        ConversationReply::Summary {
            recipient: draft.recipient.clone(),
            quantity: draft.quantity,
            rail: draft.rail.as_deref().and_then(|r| r.parse().ok()),
        }
    }

    async fn load_or_create_draft(
        &self,
        user_id: i64,
    ) -> Result<order_draft::Model, ServiceError> {
        if let Some(draft) = order_draft::Entity::find_by_id(user_id).one(&*self.db).await? {
            return Ok(draft);
        }
        Ok(order_draft::ActiveModel {
            user_id: Set(user_id),
            state: Set(ConversationState::ChooseRecipient.to_string()),
            recipient: Set(None),
            quantity: Set(None),
            rail: Set(None),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?)
    }

    async fn reset_draft(
        &self,
        user_id: i64,
        state: ConversationState,
    ) -> Result<(), ServiceError> {
        self.discard_draft(user_id).await?;
        order_draft::ActiveModel {
            user_id: Set(user_id),
            state: Set(state.to_string()),
            recipient: Set(None),
            quantity: Set(None),
            rail: Set(None),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;
        Ok(())
    }

    async fn set_state(
        &self,
        draft: order_draft::Model,
        state: ConversationState,
    ) -> Result<order_draft::Model, ServiceError> {
        let mut active: order_draft::ActiveModel = draft.into();
        active.state = Set(state.to_string());
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    async fn discard_draft(&self, user_id: i64) -> Result<(), ServiceError> {
        order_draft::Entity::delete_by_id(user_id)
            .exec(&*self.db)
            .await?;
        Ok(())
    }
}
