use dashmap::DashMap;
use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::{
    entities::{pending_order, user},
    errors::ServiceError,
    events::{Event, EventSender},
    rails::{
        ChainExplorer, ChainTransaction, InvoiceRail, InvoiceStatus, IssuanceClient,
        NotificationSink,
    },
    services::{
        ledger::LedgerService,
        localization::{text, LocalizationService},
        retry::{with_backoff, RetryConfig},
        settings::{defaults, keys, SettingsService},
    },
};

/// Result of one reconciliation pass over a user's pending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Payment verified, stars issued, ledger settled.
    PaidAndFulfilled,
    /// The rail has not confirmed the payment; nothing was mutated.
    NotYetPaid,
    /// No order is awaiting payment (or a racing caller already settled it).
    NoPendingOrder,
    /// Payment verified but issuance failed; the order is kept for retry.
    IssuanceFailed,
}

/// What a completed settlement transaction produced, for post-commit
/// notifications.
struct Settlement {
    referral: Option<(i64, Decimal, String)>,
}

/// Verifies payment status against the correct rail and, on confirmation,
/// fulfills the order exactly once. The only writer of the terminal
/// transition: the pending row is cleared with a conditional delete keyed on
/// the order token, and passes for the same user are serialized through a
/// per-user mutex, so the on-demand check and the background sweep can race
/// safely.
pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
    settings: SettingsService,
    ledger: LedgerService,
    localization: LocalizationService,
    invoice_rail: Arc<dyn InvoiceRail>,
    chain: Arc<dyn ChainExplorer>,
    issuance: Arc<dyn IssuanceClient>,
    notifier: Arc<dyn NotificationSink>,
    retry: RetryConfig,
    event_sender: Option<Arc<EventSender>>,
    user_locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl ReconciliationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        settings: SettingsService,
        ledger: LedgerService,
        localization: LocalizationService,
        invoice_rail: Arc<dyn InvoiceRail>,
        chain: Arc<dyn ChainExplorer>,
        issuance: Arc<dyn IssuanceClient>,
        notifier: Arc<dyn NotificationSink>,
        retry: RetryConfig,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            settings,
            ledger,
            localization,
            invoice_rail,
            chain,
            issuance,
            notifier,
            retry,
            event_sender,
            user_locks: DashMap::new(),
        }
    }

    /// Checks the user's pending order against its rail and fulfills it when
    /// the payment is confirmed. Safe to call repeatedly and from concurrent
    /// call sites.
    #[instrument(skip(self), fields(user_id = user_id))]
    pub async fn reconcile(&self, user_id: i64) -> Result<ReconcileOutcome, ServiceError> {
        let lock = self
            .user_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let outcome = {
            let _guard = lock.lock().await;
            self.reconcile_under_lock(user_id).await
        };
        // drop the map entry once no other pass holds it; an interleaving
        // with a fresh entry is still covered by the token-conditioned delete
        self.user_locks
            .remove_if(&user_id, |_, entry| Arc::strong_count(entry) <= 2);
        outcome
    }

    async fn reconcile_under_lock(&self, user_id: i64) -> Result<ReconcileOutcome, ServiceError> {
        let Some(order) = pending_order::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
        else {
            return Ok(ReconcileOutcome::NoPendingOrder);
        };

        if !self.verify_payment(&order).await? {
            return Ok(ReconcileOutcome::NotYetPaid);
        }
        if let Some(sender) = &self.event_sender {
            let _ = sender
                .send(Event::PaymentConfirmed {
                    user_id,
                    rail: order.rail.clone(),
                })
                .await;
        }

        // Confirmed. Issue first: a crash after issuance but before the
        // clear is recovered by the at-least-once retry of the next pass.
        if let Err(err) = with_backoff(&self.retry, "issue_stars", || {
            self.issuance.issue(&order.recipient, order.quantity)
        })
        .await
        {
            error!(user_id, error = %err, "Issuance failed; keeping order for retry");
            if let Some(sender) = &self.event_sender {
                let _ = sender
                    .send(Event::IssuanceFailed {
                        user_id,
                        recipient: order.recipient.clone(),
                        quantity: order.quantity,
                    })
                    .await;
            }
            return Ok(ReconcileOutcome::IssuanceFailed);
        }

        let Some(settlement) = self.settle(&order).await? else {
            // a concurrent pass settled this order while we were issuing;
            // treat it as already handled
            return Ok(ReconcileOutcome::NoPendingOrder);
        };
        self.notify_fulfillment(&order).await;
        if let Some((referrer_id, amount, currency)) = settlement.referral {
            self.notify_referral(referrer_id, amount, &currency).await;
        }

        if let Some(sender) = &self.event_sender {
            let _ = sender
                .send(Event::OrderFulfilled {
                    user_id,
                    recipient: order.recipient.clone(),
                    quantity: order.quantity,
                    rail: order.rail.clone(),
                })
                .await;
        }
        Ok(ReconcileOutcome::PaidAndFulfilled)
    }

    /// One background sweep over every order awaiting payment. Outcomes are
    /// ignored; failures are logged and retried on the next interval.
    pub async fn run_sweep(&self) {
        let pending = match pending_order::Entity::find().all(&*self.db).await {
            Ok(rows) => rows,
            Err(err) => {
                error!(error = %err, "Sweep could not list pending orders");
                return;
            }
        };
        if pending.is_empty() {
            return;
        }
        info!(count = pending.len(), "Reconciliation sweep started");

        let passes = pending.iter().map(|order| {
            let user_id = order.user_id;
            async move {
                if let Err(err) = self.reconcile(user_id).await {
                    warn!(user_id, error = %err, "Sweep reconciliation failed");
                }
            }
        });
        join_all(passes).await;
    }

    /// Spawns the periodic sweep loop.
    pub fn spawn_sweep(
        service: Arc<Self>,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip the immediate first tick
            loop {
                ticker.tick().await;
                service.run_sweep().await;
            }
        })
    }

    async fn verify_payment(&self, order: &pending_order::Model) -> Result<bool, ServiceError> {
        match order.payment_request()? {
            pending_order::PaymentRequest::Invoice { invoice_id, .. } => {
                let status = with_backoff(&self.retry, "invoice_status", || {
                    self.invoice_rail.invoice_status(&invoice_id)
                })
                .await
                .map_err(|err| {
                    ServiceError::ExternalServiceError(format!("invoice check failed: {err}"))
                })?;
                Ok(status == InvoiceStatus::Paid)
            }
            pending_order::PaymentRequest::Wallet {
                address,
                memo,
                expected_ton,
            } => {
                let transactions = with_backoff(&self.retry, "recent_transactions", || {
                    self.chain.recent_transactions(&address)
                })
                .await
                .map_err(|err| {
                    ServiceError::ExternalServiceError(format!("chain query failed: {err}"))
                })?;
                Ok(find_matching_transfer(&transactions, &memo, expected_ton))
            }
        }
    }

    /// Clears the pending order and settles statistics and referral bonus in
    /// one transaction. The delete is conditioned on the order token: a
    /// racing caller that lost the race affects zero rows, backs off, and
    /// gets `None`.
    async fn settle(
        &self,
        order: &pending_order::Model,
    ) -> Result<Option<Settlement>, ServiceError> {
        let ref_bonus_percent = self
            .settings
            .get_decimal(keys::REFERRAL_BONUS_PERCENT, defaults::REFERRAL_BONUS_PERCENT)
            .await?;

        let txn = self.db.begin().await?;

        let deleted = pending_order::Entity::delete_many()
            .filter(pending_order::Column::UserId.eq(order.user_id))
            .filter(pending_order::Column::Token.eq(order.token))
            .exec(&txn)
            .await?;
        if deleted.rows_affected == 0 {
            // another caller settled this order between our load and now
            txn.rollback().await?;
            warn!(user_id = order.user_id, "Order already settled by a concurrent pass");
            return Ok(None);
        }

        let buyer = user::Entity::find_by_id(order.user_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "pending order without a user row: {}",
                    order.user_id
                ))
            })?;

        let mut buyer_active: user::ActiveModel = buyer.clone().into();
        buyer_active.stars_bought = Set(buyer.stars_bought + order.quantity);
        buyer_active.update(&txn).await?;

        let profit_usd = order.marked_up_usd - order.base_usd;
        self.ledger
            .record_sale(&txn, order.quantity, profit_usd, order.expected_ton)
            .await?;

        let mut referral = None;
        if let Some(referrer_id) = buyer.referrer_id {
            // bonus is computed from what the buyer actually paid: the TON
            // amount when the rail produced one, the USD charge otherwise
            let (payment_amount, currency) = match order.expected_ton {
                Some(ton) => (ton, "TON"),
                None => (order.final_usd, "USD"),
            };
            let bonus = payment_amount * ref_bonus_percent / dec!(100);
            self.ledger
                .credit_referrer(&txn, referrer_id, order.user_id, bonus, currency)
                .await?;
            referral = Some((referrer_id, bonus, currency.to_string()));

            if let Some(sender) = &self.event_sender {
                let _ = sender
                    .send(Event::ReferralCredited {
                        referrer_id,
                        referred_id: order.user_id,
                        amount: bonus,
                        currency: currency.to_string(),
                    })
                    .await;
            }
        }

        txn.commit().await?;
        info!(
            user_id = order.user_id,
            quantity = order.quantity,
            "Order settled"
        );
        Ok(Some(Settlement { referral }))
    }

    /// Notifies the buyer and every admin. One attempt each; failures are
    /// logged and never retried.
    async fn notify_fulfillment(&self, order: &pending_order::Model) {
        let language = user::Entity::find_by_id(order.user_id)
            .one(&*self.db)
            .await
            .ok()
            .flatten()
            .map(|u| u.language)
            .unwrap_or_else(|| "en".to_string());

        let buyer_text = self
            .localization
            .render(
                text::PAYMENT_CONFIRMED,
                &language,
                &[
                    ("quantity", order.quantity.to_string()),
                    ("recipient", order.recipient.clone()),
                ],
            )
            .await;
        if let Err(err) = self.notifier.notify(order.user_id, &buyer_text).await {
            warn!(user_id = order.user_id, error = %err, "Buyer notification failed");
        }

        let admin_ids = match self.settings.admin_ids().await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(error = %err, "Could not load admin list for notification");
                return;
            }
        };
        let admin_text = self
            .localization
            .render(
                text::ADMIN_SALE_NOTICE,
                "en",
                &[
                    ("quantity", order.quantity.to_string()),
                    ("recipient", order.recipient.clone()),
                    ("user_id", order.user_id.to_string()),
                    ("rail", order.rail.clone()),
                ],
            )
            .await;
        for admin_id in admin_ids {
            if let Err(err) = self.notifier.notify(admin_id, &admin_text).await {
                warn!(admin_id, error = %err, "Admin notification failed");
            }
        }
    }

    /// Tells the referrer about their bonus, in their language. One attempt.
    async fn notify_referral(&self, referrer_id: i64, amount: Decimal, currency: &str) {
        let language = user::Entity::find_by_id(referrer_id)
            .one(&*self.db)
            .await
            .ok()
            .flatten()
            .map(|u| u.language)
            .unwrap_or_else(|| "en".to_string());
        let notice = self
            .localization
            .render(
                text::REFERRAL_BONUS_GRANTED,
                &language,
                &[
                    ("amount", amount.to_string()),
                    ("currency", currency.to_string()),
                ],
            )
            .await;
        if let Err(err) = self.notifier.notify(referrer_id, &notice).await {
            warn!(referrer_id, error = %err, "Referral notification failed");
        }
    }
}

/// A transfer matches when the memo is exactly the order's memo and the
/// amount covers the expected TON amount. Overpaying is accepted; the
/// amount-at-least policy also absorbs exchange-rate drift between quote
/// time and payment time.
fn find_matching_transfer(
    transactions: &[ChainTransaction],
    memo: &str,
    expected_ton: Decimal,
) -> bool {
    transactions
        .iter()
        .any(|tx| tx.memo.as_deref() == Some(memo) && tx.amount_ton() >= expected_ton)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, init_schema, DbConfig};
    use crate::rails::{InvoiceHandle, NANOTON_PER_TON};
    use async_trait::async_trait;
    use rust_decimal::prelude::ToPrimitive;

    fn tx(memo: &str, amount_ton: Decimal) -> ChainTransaction {
        ChainTransaction {
            memo: Some(memo.to_string()),
            amount_nanoton: (amount_ton * Decimal::from(NANOTON_PER_TON))
                .to_i64()
                .unwrap(),
        }
    }

    #[test]
    fn exact_amount_with_matching_memo_confirms() {
        let txs = vec![tx("star-1-100-aa", dec!(0.35))];
        assert!(find_matching_transfer(&txs, "star-1-100-aa", dec!(0.35)));
    }

    #[test]
    fn overpayment_is_tolerated() {
        let txs = vec![tx("star-1-100-aa", dec!(0.40))];
        assert!(find_matching_transfer(&txs, "star-1-100-aa", dec!(0.35)));
    }

    #[test]
    fn underpayment_is_rejected() {
        let txs = vec![tx("star-1-100-aa", dec!(0.349))];
        assert!(!find_matching_transfer(&txs, "star-1-100-aa", dec!(0.35)));
    }

    #[test]
    fn memo_must_match_exactly() {
        let txs = vec![
            tx("star-1-100-ab", dec!(1.0)),
            ChainTransaction {
                memo: None,
                amount_nanoton: NANOTON_PER_TON,
            },
        ];
        assert!(!find_matching_transfer(&txs, "star-1-100-aa", dec!(0.35)));
    }

    struct NoopRails;

    #[async_trait]
    impl InvoiceRail for NoopRails {
        async fn create_invoice(
            &self,
            _amount_usd: Decimal,
            _description: &str,
        ) -> Result<InvoiceHandle, crate::rails::RailError> {
            Err(crate::rails::RailError::Rejected("unused".to_string()))
        }

        async fn invoice_status(
            &self,
            _invoice_id: &str,
        ) -> Result<InvoiceStatus, crate::rails::RailError> {
            Ok(InvoiceStatus::Unpaid)
        }
    }

    #[async_trait]
    impl ChainExplorer for NoopRails {
        async fn recent_transactions(
            &self,
            _address: &str,
        ) -> Result<Vec<ChainTransaction>, crate::rails::RailError> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl IssuanceClient for NoopRails {
        async fn issue(
            &self,
            _recipient: &str,
            _quantity: i64,
        ) -> Result<(), crate::rails::RailError> {
            Ok(())
        }
    }

    #[async_trait]
    impl NotificationSink for NoopRails {
        async fn notify(&self, _user_id: i64, _text: &str) -> Result<(), crate::rails::RailError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn lock_entries_are_released_after_each_pass() {
        let db = Arc::new(
            establish_connection_with_config(&DbConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
                min_connections: 1,
                ..Default::default()
            })
            .await
            .unwrap(),
        );
        init_schema(&db).await.unwrap();

        let rails = Arc::new(NoopRails);
        let settings = SettingsService::new(db.clone());
        let service = ReconciliationService::new(
            db.clone(),
            settings.clone(),
            LedgerService::new(db.clone(), settings, None),
            LocalizationService::new(db.clone()),
            rails.clone(),
            rails.clone(),
            rails.clone(),
            rails,
            RetryConfig::fast(),
            None,
        );

        for user_id in [1, 2, 3] {
            let outcome = service.reconcile(user_id).await.unwrap();
            assert_eq!(outcome, ReconcileOutcome::NoPendingOrder);
        }
        assert!(service.user_locks.is_empty());
    }
}
