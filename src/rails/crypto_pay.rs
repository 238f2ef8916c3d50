use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{error_from_response, InvoiceHandle, InvoiceRail, InvoiceStatus, RailError};

const API_TOKEN_HEADER: &str = "Crypto-Pay-API-Token";

/// Client for the escrow-style crypto invoice service. Also serves the card
/// rail, which is fronted by the same invoice API with a different
/// commission applied at quote time.
#[derive(Clone)]
pub struct CryptoPayClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CreatedInvoice {
    invoice_id: i64,
    pay_url: String,
}

#[derive(Debug, Deserialize)]
struct InvoiceList {
    items: Vec<InvoiceItem>,
}

#[derive(Debug, Deserialize)]
struct InvoiceItem {
    status: String,
}

impl CryptoPayClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl InvoiceRail for CryptoPayClient {
    async fn create_invoice(
        &self,
        amount_usd: Decimal,
        description: &str,
    ) -> Result<InvoiceHandle, RailError> {
        let response = self
            .http
            .post(format!("{}/api/createInvoice", self.base_url))
            .header(API_TOKEN_HEADER, &self.token)
            .json(&json!({
                "currency_type": "fiat",
                "fiat": "USD",
                "amount": amount_usd.to_string(),
                "description": description,
            }))
            .send()
            .await?;

        if let Some(err) = error_from_response(&response) {
            return Err(err);
        }

        let envelope: ApiEnvelope<CreatedInvoice> = response.json().await?;
        let invoice = envelope
            .result
            .filter(|_| envelope.ok)
            .ok_or_else(|| RailError::Rejected("invoice service returned ok=false".to_string()))?;

        debug!(invoice_id = invoice.invoice_id, "Invoice created");
        Ok(InvoiceHandle {
            invoice_id: invoice.invoice_id.to_string(),
            pay_url: invoice.pay_url,
        })
    }

    async fn invoice_status(&self, invoice_id: &str) -> Result<InvoiceStatus, RailError> {
        let response = self
            .http
            .get(format!("{}/api/getInvoices", self.base_url))
            .header(API_TOKEN_HEADER, &self.token)
            .query(&[("invoice_ids", invoice_id)])
            .send()
            .await?;

        if let Some(err) = error_from_response(&response) {
            return Err(err);
        }

        let envelope: ApiEnvelope<InvoiceList> = response.json().await?;
        let list = envelope
            .result
            .filter(|_| envelope.ok)
            .ok_or_else(|| RailError::Rejected("invoice service returned ok=false".to_string()))?;

        let status = match list.items.first() {
            Some(item) if item.status == "paid" => InvoiceStatus::Paid,
            Some(_) => InvoiceStatus::Unpaid,
            None => {
                return Err(RailError::Rejected(format!(
                    "invoice {invoice_id} not found"
                )))
            }
        };
        Ok(status)
    }
}
