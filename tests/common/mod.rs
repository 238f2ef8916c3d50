#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use starshop_api::db::{establish_connection_with_config, init_schema, DbConfig, DbPool};
use starshop_api::events::{process_events, EventSender};
use starshop_api::handlers::{AppServices, Collaborators};
use starshop_api::rails::{
    rate_feed::ExchangeRateCache, ChainExplorer, ChainTransaction, InvoiceHandle, InvoiceRail,
    InvoiceStatus, IssuanceClient, NotificationSink, RailError, RateSource, NANOTON_PER_TON,
};
use starshop_api::services::retry::RetryConfig;

pub const OWNER_WALLET: &str = "EQTestOwnerWallet";
pub const TEST_RATE: Decimal = dec!(5.0);

/// Invoice rail double. Tests flip `paid` to simulate the provider
/// confirming a payment between reconciliation passes.
pub struct MockInvoiceRail {
    pub paid: Mutex<bool>,
    pub create_calls: AtomicUsize,
    pub fail_creates: AtomicUsize,
}

impl MockInvoiceRail {
    pub fn new() -> Self {
        Self {
            paid: Mutex::new(false),
            create_calls: AtomicUsize::new(0),
            fail_creates: AtomicUsize::new(0),
        }
    }

    pub fn mark_paid(&self) {
        *self.paid.lock().unwrap() = true;
    }
}

#[async_trait]
impl InvoiceRail for MockInvoiceRail {
    async fn create_invoice(
        &self,
        _amount_usd: Decimal,
        _description: &str,
    ) -> Result<InvoiceHandle, RailError> {
        if self.fail_creates.load(Ordering::SeqCst) > 0 {
            self.fail_creates.fetch_sub(1, Ordering::SeqCst);
            return Err(RailError::Transport("invoice service down".to_string()));
        }
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(InvoiceHandle {
            invoice_id: format!("inv-{n}"),
            pay_url: format!("https://pay.example/inv-{n}"),
        })
    }

    async fn invoice_status(&self, _invoice_id: &str) -> Result<InvoiceStatus, RailError> {
        Ok(if *self.paid.lock().unwrap() {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::Unpaid
        })
    }
}

/// Chain explorer double backed by an in-memory transaction list.
pub struct MockChainExplorer {
    pub transactions: Mutex<Vec<ChainTransaction>>,
}

impl MockChainExplorer {
    pub fn new() -> Self {
        Self {
            transactions: Mutex::new(Vec::new()),
        }
    }

    pub fn push_transfer(&self, memo: &str, amount_ton: Decimal) {
        self.transactions.lock().unwrap().push(ChainTransaction {
            memo: Some(memo.to_string()),
            amount_nanoton: (amount_ton * Decimal::from(NANOTON_PER_TON))
                .to_i64()
                .expect("amount fits in nanotons"),
        });
    }
}

#[async_trait]
impl ChainExplorer for MockChainExplorer {
    async fn recent_transactions(
        &self,
        _address: &str,
    ) -> Result<Vec<ChainTransaction>, RailError> {
        Ok(self.transactions.lock().unwrap().clone())
    }
}

/// Issuance double counting every delivery attempt.
pub struct MockIssuanceClient {
    pub attempts: AtomicUsize,
    pub fail_remaining: AtomicUsize,
}

impl MockIssuanceClient {
    pub fn new() -> Self {
        Self {
            attempts: AtomicUsize::new(0),
            fail_remaining: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IssuanceClient for MockIssuanceClient {
    async fn issue(&self, _recipient: &str, _quantity: i64) -> Result<(), RailError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_remaining.load(Ordering::SeqCst) > 0 {
            self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(RailError::Rejected("issuance unavailable".to_string()));
        }
        Ok(())
    }
}

/// Notification double recording every delivered message.
pub struct MockNotifier {
    pub messages: Mutex<Vec<(i64, String)>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn messages_for(&self, user_id: i64) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == user_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationSink for MockNotifier {
    async fn notify(&self, user_id: i64, text: &str) -> Result<(), RailError> {
        self.messages
            .lock()
            .unwrap()
            .push((user_id, text.to_string()));
        Ok(())
    }
}

struct StaticRateSource(Decimal);

#[async_trait]
impl RateSource for StaticRateSource {
    async fn usd_per_ton(&self) -> Result<Decimal, RailError> {
        Ok(self.0)
    }
}

/// Test harness over an in-memory SQLite database and mock rails.
pub struct TestApp {
    pub db: Arc<DbPool>,
    pub services: AppServices,
    pub invoice_rail: Arc<MockInvoiceRail>,
    pub chain: Arc<MockChainExplorer>,
    pub issuance: Arc<MockIssuanceClient>,
    pub notifier: Arc<MockNotifier>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let db = Arc::new(
            establish_connection_with_config(&DbConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
                min_connections: 1,
                ..Default::default()
            })
            .await
            .expect("failed to create test database"),
        );
        init_schema(&db).await.expect("failed to create schema");

        let (event_tx, event_rx) = tokio::sync::mpsc::channel(100);
        let event_task = tokio::spawn(process_events(event_rx));

        let invoice_rail = Arc::new(MockInvoiceRail::new());
        let chain = Arc::new(MockChainExplorer::new());
        let issuance = Arc::new(MockIssuanceClient::new());
        let notifier = Arc::new(MockNotifier::new());
        let rates = Arc::new(ExchangeRateCache::new(
            TEST_RATE,
            Arc::new(StaticRateSource(TEST_RATE)),
        ));

        let services = AppServices::build(
            db.clone(),
            Collaborators {
                invoice_rail: invoice_rail.clone(),
                chain: chain.clone(),
                issuance: issuance.clone(),
                notifier: notifier.clone(),
                rates,
            },
            OWNER_WALLET.to_string(),
            RetryConfig::fast(),
            Some(Arc::new(EventSender::new(event_tx))),
        );
        services
            .localization
            .seed_defaults()
            .await
            .expect("failed to seed localized texts");

        Self {
            db,
            services,
            invoice_rail,
            chain,
            issuance,
            notifier,
            _event_task: event_task,
        }
    }

    pub async fn register_user(&self, user_id: i64, name: &str, referrer_id: Option<i64>) {
        self.services
            .users
            .register(user_id, name, referrer_id)
            .await
            .expect("failed to register user");
    }

    /// Router over this app's state, for handler-level tests.
    pub fn router(&self) -> axum::Router {
        starshop_api::app_router(starshop_api::AppState {
            db: self.db.clone(),
            config: Arc::new(test_config()),
            services: self.services.clone(),
        })
    }
}

pub fn test_config() -> starshop_api::config::AppConfig {
    starshop_api::config::AppConfig {
        database_url: "sqlite::memory:".to_string(),
        host: "127.0.0.1".to_string(),
        port: 18080,
        environment: "test".to_string(),
        log_level: "info".to_string(),
        owner_wallet_address: OWNER_WALLET.to_string(),
        invoice_api_url: "https://invoices.example".to_string(),
        invoice_api_token: "test-token".to_string(),
        chain_api_url: "https://chain.example".to_string(),
        issuance_api_url: "https://issuance.example".to_string(),
        issuance_api_token: "test-token".to_string(),
        rate_feed_url: "https://rates.example".to_string(),
        fallback_usd_per_ton: TEST_RATE,
        sweep_interval_secs: 30,
        rate_refresh_secs: 3600,
    }
}
