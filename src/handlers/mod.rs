pub mod admin;
pub mod conversation;
pub mod orders;
pub mod stats;
pub mod users;

use std::sync::Arc;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::rails::{
    rate_feed::ExchangeRateCache, ChainExplorer, InvoiceRail, IssuanceClient, NotificationSink,
};
use crate::services::{
    conversation::ConversationService, ledger::LedgerService, localization::LocalizationService,
    orders::OrderService, reconciliation::ReconciliationService, retry::RetryConfig,
    settings::SettingsService, users::UserService,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub settings: SettingsService,
    pub users: UserService,
    pub conversation: ConversationService,
    pub orders: Arc<OrderService>,
    pub reconciliation: Arc<ReconciliationService>,
    pub ledger: LedgerService,
    pub localization: LocalizationService,
}

/// Collaborator implementations the services are wired against.
pub struct Collaborators {
    pub invoice_rail: Arc<dyn InvoiceRail>,
    pub chain: Arc<dyn ChainExplorer>,
    pub issuance: Arc<dyn IssuanceClient>,
    pub notifier: Arc<dyn NotificationSink>,
    pub rates: Arc<ExchangeRateCache>,
}

impl AppServices {
    pub fn build(
        db: Arc<DbPool>,
        collaborators: Collaborators,
        owner_wallet_address: String,
        retry: RetryConfig,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        let settings = SettingsService::new(db.clone());
        let users = UserService::new(db.clone(), event_sender.clone());
        let localization = LocalizationService::new(db.clone());
        let ledger = LedgerService::new(db.clone(), settings.clone(), event_sender.clone());
        let conversation = ConversationService::new(
            db.clone(),
            settings.clone(),
            users.clone(),
            localization.clone(),
        );
        let orders = Arc::new(OrderService::new(
            db.clone(),
            settings.clone(),
            users.clone(),
            localization.clone(),
            collaborators.invoice_rail.clone(),
            collaborators.rates.clone(),
            owner_wallet_address,
            retry.clone(),
            event_sender.clone(),
        ));
        let reconciliation = Arc::new(ReconciliationService::new(
            db,
            settings.clone(),
            ledger.clone(),
            localization.clone(),
            collaborators.invoice_rail,
            collaborators.chain,
            collaborators.issuance,
            collaborators.notifier,
            retry,
            event_sender,
        ));

        Self {
            settings,
            users,
            conversation,
            orders,
            reconciliation,
            ledger,
            localization,
        }
    }
}
