use async_trait::async_trait;
use serde::Deserialize;

use super::{error_from_response, ChainExplorer, ChainTransaction, RailError};

/// Chain explorer client for wallet-rail verification. Only incoming
/// transfers with a text comment are relevant to memo matching.
#[derive(Clone)]
pub struct TonApiClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TransactionsPage {
    transactions: Vec<RawTransaction>,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    in_msg: Option<InMessage>,
}

#[derive(Debug, Deserialize)]
struct InMessage {
    #[serde(default)]
    value: i64,
    #[serde(default)]
    message: Option<String>,
}

impl TonApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ChainExplorer for TonApiClient {
    async fn recent_transactions(
        &self,
        address: &str,
    ) -> Result<Vec<ChainTransaction>, RailError> {
        let response = self
            .http
            .get(format!(
                "{}/v2/blockchain/accounts/{}/transactions",
                self.base_url, address
            ))
            .query(&[("limit", "50")])
            .send()
            .await?;

        if let Some(err) = error_from_response(&response) {
            return Err(err);
        }

        let page: TransactionsPage = response.json().await?;
        let transactions = page
            .transactions
            .into_iter()
            .filter_map(|tx| tx.in_msg)
            .map(|msg| ChainTransaction {
                memo: msg.message,
                amount_nanoton: msg.value,
            })
            .collect();
        Ok(transactions)
    }
}
