use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter as StrumEnumIter, EnumString};

use crate::errors::ServiceError;

/// The payment backend an order is charged through.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, StrumEnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentRail {
    CryptoInvoice,
    OnChainWallet,
    Card,
}

impl PaymentRail {
    /// Rails verified through the invoice collaborator rather than the chain.
    pub fn is_invoice_backed(self) -> bool {
        matches!(self, Self::CryptoInvoice | Self::Card)
    }
}

/// Rail-specific correlation data for a pending order, decoded from the
/// persisted row. Exactly one variant exists per order; the flat nullable
/// columns never mix groups.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PaymentRequest {
    Invoice {
        invoice_id: String,
        pay_url: String,
    },
    Wallet {
        address: String,
        memo: String,
        expected_ton: Decimal,
    },
}

/// A user's single in-flight order awaiting payment confirmation. One row
/// per user; the row is deleted atomically on fulfillment, conditioned on
/// `token` so racing reconcilers cannot both settle it.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pending_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: i64,

    pub token: Uuid,
    pub recipient: String,
    pub quantity: i64,
    pub rail: String,

    pub invoice_id: Option<String>,
    pub pay_url: Option<String>,
    pub wallet_address: Option<String>,
    pub memo: Option<String>,
    pub expected_ton: Option<Decimal>,

    pub base_usd: Decimal,
    pub marked_up_usd: Decimal,
    pub final_usd: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn payment_rail(&self) -> Result<PaymentRail, ServiceError> {
        self.rail
            .parse()
            .map_err(|_| ServiceError::InternalError(format!("unknown payment rail: {}", self.rail)))
    }

    /// Decodes the rail-specific columns into the tagged payload.
    pub fn payment_request(&self) -> Result<PaymentRequest, ServiceError> {
        match self.payment_rail()? {
            PaymentRail::CryptoInvoice | PaymentRail::Card => {
                match (&self.invoice_id, &self.pay_url) {
                    (Some(invoice_id), Some(pay_url)) => Ok(PaymentRequest::Invoice {
                        invoice_id: invoice_id.clone(),
                        pay_url: pay_url.clone(),
                    }),
                    _ => Err(ServiceError::InternalError(format!(
                        "pending order for user {} is missing invoice fields",
                        self.user_id
                    ))),
                }
            }
            PaymentRail::OnChainWallet => {
                match (&self.wallet_address, &self.memo, self.expected_ton) {
                    (Some(address), Some(memo), Some(expected_ton)) => {
                        Ok(PaymentRequest::Wallet {
                            address: address.clone(),
                            memo: memo.clone(),
                            expected_ton,
                        })
                    }
                    _ => Err(ServiceError::InternalError(format!(
                        "pending order for user {} is missing wallet fields",
                        self.user_id
                    ))),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_model() -> Model {
        Model {
            user_id: 7,
            token: Uuid::new_v4(),
            recipient: "stargazer".to_string(),
            quantity: 100,
            rail: PaymentRail::OnChainWallet.to_string(),
            invoice_id: None,
            pay_url: None,
            wallet_address: Some("EQOwner".to_string()),
            memo: Some("star-7-1700000000-abcd".to_string()),
            expected_ton: Some(dec!(0.35)),
            base_usd: dec!(1.62),
            marked_up_usd: dec!(1.782),
            final_usd: dec!(1.782),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn rail_round_trips_through_storage() {
        assert_eq!(
            PaymentRail::CryptoInvoice.to_string(),
            "crypto_invoice".to_string()
        );
        assert_eq!(
            "on_chain_wallet".parse::<PaymentRail>().unwrap(),
            PaymentRail::OnChainWallet
        );
        assert!("giftcard".parse::<PaymentRail>().is_err());
    }

    #[test]
    fn wallet_payload_decodes() {
        let model = base_model();
        match model.payment_request().unwrap() {
            PaymentRequest::Wallet {
                address,
                memo,
                expected_ton,
            } => {
                assert_eq!(address, "EQOwner");
                assert!(memo.starts_with("star-7-"));
                assert_eq!(expected_ton, dec!(0.35));
            }
            other => panic!("expected wallet payload, got {other:?}"),
        }
    }

    #[test]
    fn mixed_null_groups_are_rejected() {
        let mut model = base_model();
        model.rail = PaymentRail::CryptoInvoice.to_string();
        // invoice fields are absent for this rail
        assert!(model.payment_request().is_err());
    }
}
