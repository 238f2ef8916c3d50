use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    entities::{order_draft, pending_order},
    errors::ServiceError,
    events::{Event, EventSender},
    rails::{rate_feed::ExchangeRateCache, InvoiceRail},
    services::{
        conversation::OrderDraft,
        localization::{text, LocalizationService},
        pricing::{self, PaymentRail, Quote},
        retry::{with_backoff, RetryConfig},
        settings::SettingsService,
        users::UserService,
    },
};

/// Payment instructions handed back to the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOrderResponse {
    pub recipient: String,
    pub quantity: i64,
    pub rail: PaymentRail,
    pub final_usd: Decimal,
    pub final_ton: Option<Decimal>,
    /// Invoice rails: where to pay.
    pub pay_url: Option<String>,
    /// Wallet rail: where and how to pay.
    pub wallet_address: Option<String>,
    pub memo: Option<String>,
    /// Payment instructions rendered in the buyer's language.
    pub message: String,
}

/// Opens payment requests against the chosen rail and persists the pending
/// order. The only writer of the Draft -> AwaitingPayment transition.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    settings: SettingsService,
    users: UserService,
    localization: LocalizationService,
    invoice_rail: Arc<dyn InvoiceRail>,
    rates: Arc<ExchangeRateCache>,
    owner_wallet_address: String,
    retry: RetryConfig,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        settings: SettingsService,
        users: UserService,
        localization: LocalizationService,
        invoice_rail: Arc<dyn InvoiceRail>,
        rates: Arc<ExchangeRateCache>,
        owner_wallet_address: String,
        retry: RetryConfig,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            settings,
            users,
            localization,
            invoice_rail,
            rates,
            owner_wallet_address,
            retry,
            event_sender,
        }
    }

    /// Opens a payment request for a confirmed draft and persists it as the
    /// user's pending order. Nothing is persisted when the external invoice
    /// call fails; an externally opened invoice without a local record is
    /// simply never reconciled.
    #[instrument(skip(self, draft), fields(user_id = user_id, rail = %draft.rail))]
    pub async fn open_order(
        &self,
        user_id: i64,
        draft: OrderDraft,
    ) -> Result<PendingOrderResponse, ServiceError> {
        // the buyer must exist before an order can be attached to them
        let buyer = self.users.get(user_id).await?;

        if pending_order::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(
                "an order is already awaiting payment".to_string(),
            ));
        }

        let usd_per_ton = self.rates.current().await;
        let snapshot = self.settings.pricing_snapshot(usd_per_ton).await?;
        if draft.rail == PaymentRail::Card && !snapshot.card_payments_enabled {
            return Err(ServiceError::ValidationError(
                "card payments are currently disabled".to_string(),
            ));
        }
        let quote = pricing::quote(draft.quantity, draft.rail, &snapshot)?;

        let mut model = pending_order::ActiveModel {
            user_id: Set(user_id),
            token: Set(Uuid::new_v4()),
            recipient: Set(draft.recipient.clone()),
            quantity: Set(draft.quantity),
            rail: Set(draft.rail.to_string()),
            invoice_id: Set(None),
            pay_url: Set(None),
            wallet_address: Set(None),
            memo: Set(None),
            expected_ton: Set(None),
            base_usd: Set(quote.base_usd),
            marked_up_usd: Set(quote.marked_up_usd),
            final_usd: Set(quote.final_usd),
            created_at: Set(Utc::now()),
        };

        let mut response = PendingOrderResponse {
            recipient: draft.recipient.clone(),
            quantity: draft.quantity,
            rail: draft.rail,
            final_usd: quote.final_usd,
            final_ton: quote.final_ton,
            pay_url: None,
            wallet_address: None,
            memo: None,
            message: String::new(),
        };

        match draft.rail {
            PaymentRail::CryptoInvoice | PaymentRail::Card => {
                let invoice = self.create_invoice(&quote).await?;
                response.pay_url = Some(invoice.pay_url.clone());
                model.invoice_id = Set(Some(invoice.invoice_id));
                model.pay_url = Set(Some(invoice.pay_url));
            }
            PaymentRail::OnChainWallet => {
                let expected_ton = quote.final_ton.ok_or_else(|| {
                    ServiceError::InternalError("wallet quote is missing a TON amount".to_string())
                })?;
                let memo = derive_memo(user_id);
                response.wallet_address = Some(self.owner_wallet_address.clone());
                response.memo = Some(memo.clone());
                model.wallet_address = Set(Some(self.owner_wallet_address.clone()));
                model.memo = Set(Some(memo));
                model.expected_ton = Set(Some(expected_ton));
            }
        }

        model.insert(&*self.db).await?;
        // only now is the conversation draft consumed; a failed open above
        // leaves it in place for another confirm
        order_draft::Entity::delete_by_id(user_id)
            .exec(&*self.db)
            .await?;
        info!(
            user_id,
            quantity = draft.quantity,
            final_usd = %quote.final_usd,
            "Pending order opened"
        );

        response.message = match draft.rail {
            PaymentRail::CryptoInvoice | PaymentRail::Card => {
                self.localization
                    .render(
                        text::ORDER_OPENED_INVOICE,
                        &buyer.language,
                        &[
                            ("quantity", draft.quantity.to_string()),
                            ("pay_url", response.pay_url.clone().unwrap_or_default()),
                        ],
                    )
                    .await
            }
            PaymentRail::OnChainWallet => {
                self.localization
                    .render(
                        text::ORDER_OPENED_WALLET,
                        &buyer.language,
                        &[
                            (
                                "amount",
                                quote.final_ton.unwrap_or_default().to_string(),
                            ),
                            ("address", self.owner_wallet_address.clone()),
                            ("memo", response.memo.clone().unwrap_or_default()),
                        ],
                    )
                    .await
            }
        };

        if let Some(sender) = &self.event_sender {
            let _ = sender
                .send(Event::OrderOpened {
                    user_id,
                    quantity: draft.quantity,
                    rail: draft.rail.to_string(),
                    final_usd: quote.final_usd,
                })
                .await;
        }
        Ok(response)
    }

    /// Returns the user's pending order, if any.
    pub async fn pending_order(
        &self,
        user_id: i64,
    ) -> Result<Option<pending_order::Model>, ServiceError> {
        Ok(pending_order::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?)
    }

    async fn create_invoice(
        &self,
        quote: &Quote,
    ) -> Result<crate::rails::InvoiceHandle, ServiceError> {
        let description = format!("{} stars", quote.quantity);
        with_backoff(&self.retry, "create_invoice", || {
            self.invoice_rail.create_invoice(quote.final_usd, &description)
        })
        .await
        .map_err(|err| {
            error!(error = %err, "Invoice creation failed after retries");
            ServiceError::ExternalServiceError(format!("invoice creation failed: {err}"))
        })
    }
}

/// Derives a per-order memo unique enough to disambiguate concurrent orders
/// from different users at the shared owner address.
fn derive_memo(user_id: i64) -> String {
    format!(
        "star-{}-{}-{:08x}",
        user_id,
        Utc::now().timestamp(),
        rand::random::<u32>()
    )
}
