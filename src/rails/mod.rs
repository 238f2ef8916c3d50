//! Collaborator seams for the payment rails and the services around them.
//!
//! The core depends on these traits only; the reqwest implementations in the
//! submodules are thin adapters over the providers' HTTP APIs.

pub mod crypto_pay;
pub mod fragment;
pub mod rate_feed;
pub mod ton_api;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Nanotons per TON; chain amounts arrive in the smallest unit.
pub const NANOTON_PER_TON: i64 = 1_000_000_000;

#[derive(Debug, thiserror::Error)]
pub enum RailError {
    /// Network-level failure; retryable.
    #[error("transport error: {0}")]
    Transport(String),

    /// Provider asked us to slow down; retryable after the given delay.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Provider rejected the request outright; not retryable.
    #[error("rejected by provider: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for RailError {
    fn from(err: reqwest::Error) -> Self {
        RailError::Transport(err.to_string())
    }
}

/// Maps a non-success HTTP response to a RailError: 429 carries the server's
/// Retry-After when present, 5xx is a retryable transport fault, other 4xx
/// are hard rejections.
pub(crate) fn error_from_response(response: &reqwest::Response) -> Option<RailError> {
    let status = response.status();
    if status.is_success() {
        return None;
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));
        return Some(RailError::RateLimited { retry_after });
    }
    if status.is_server_error() {
        return Some(RailError::Transport(format!("server error: {status}")));
    }
    Some(RailError::Rejected(format!("status {status}")))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    Paid,
    Unpaid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceHandle {
    pub invoice_id: String,
    pub pay_url: String,
}

/// A transaction observed at the owner wallet address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainTransaction {
    pub memo: Option<String>,
    pub amount_nanoton: i64,
}

impl ChainTransaction {
    pub fn amount_ton(&self) -> Decimal {
        Decimal::from(self.amount_nanoton) / Decimal::from(NANOTON_PER_TON)
    }
}

/// Escrow-style invoice service used by the crypto-invoice and card rails.
#[async_trait]
pub trait InvoiceRail: Send + Sync {
    async fn create_invoice(
        &self,
        amount_usd: Decimal,
        description: &str,
    ) -> Result<InvoiceHandle, RailError>;

    async fn invoice_status(&self, invoice_id: &str) -> Result<InvoiceStatus, RailError>;
}

/// Read-only view of recent transactions at an on-chain address.
#[async_trait]
pub trait ChainExplorer: Send + Sync {
    async fn recent_transactions(&self, address: &str)
        -> Result<Vec<ChainTransaction>, RailError>;
}

/// Delivers the purchased stars to a recipient handle.
#[async_trait]
pub trait IssuanceClient: Send + Sync {
    async fn issue(&self, recipient: &str, quantity: i64) -> Result<(), RailError>;
}

/// USD-per-TON exchange-rate feed.
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn usd_per_ton(&self) -> Result<Decimal, RailError>;
}

/// Fire-and-forget user notification. One attempt; callers log failures and
/// never retry indefinitely.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, user_id: i64, text: &str) -> Result<(), RailError>;
}

/// Notification sink for deployments without a push transport. The rendered
/// message lands in the log; clients observe fulfillment by polling the
/// check endpoint.
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, user_id: i64, text: &str) -> Result<(), RailError> {
        tracing::info!(user_id, text, "Notification");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn chain_amounts_scale_from_nanotons() {
        let tx = ChainTransaction {
            memo: Some("star-1-1700000000-00ff".to_string()),
            amount_nanoton: 350_000_000,
        };
        assert_eq!(tx.amount_ton(), dec!(0.35));
    }
}
