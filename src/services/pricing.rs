use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub use crate::entities::pending_order::PaymentRail;
use crate::errors::ServiceError;
use crate::services::settings::PricingSettings;

const TON_SCALE: u32 = 9;

/// A computed price for a star order. Produced deterministically from the
/// quantity, rail, and a settings snapshot; no I/O.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub quantity: i64,
    pub rail: PaymentRail,
    pub base_usd: Decimal,
    pub marked_up_usd: Decimal,
    pub commission_fraction: Decimal,
    pub final_usd: Decimal,
    /// Present only for the wallet rail.
    pub final_ton: Option<Decimal>,
}

impl Quote {
    /// The shop's profit on this order: the markup portion.
    pub fn profit_usd(&self) -> Decimal {
        self.marked_up_usd - self.base_usd
    }
}

fn commission_percent(rail: PaymentRail, settings: &PricingSettings) -> Decimal {
    match rail {
        PaymentRail::CryptoInvoice => settings.commission_invoice_percent,
        PaymentRail::OnChainWallet => settings.commission_wallet_percent,
        PaymentRail::Card => settings.commission_card_percent,
    }
}

/// Prices `quantity` stars charged through `rail`.
pub fn quote(
    quantity: i64,
    rail: PaymentRail,
    settings: &PricingSettings,
) -> Result<Quote, ServiceError> {
    if quantity < settings.min_purchase_quantity {
        return Err(ServiceError::ValidationError(format!(
            "quantity must be at least {}",
            settings.min_purchase_quantity
        )));
    }
    if settings.pack_size <= 0 {
        return Err(ServiceError::InternalError(
            "pack_size setting must be positive".to_string(),
        ));
    }

    let base_usd =
        settings.price_per_pack_usd * Decimal::from(quantity) / Decimal::from(settings.pack_size);
    let marked_up_usd = base_usd * (Decimal::ONE + settings.markup_percent / dec!(100));
    let commission_fraction = commission_percent(rail, settings) / dec!(100);
    let final_usd = marked_up_usd * (Decimal::ONE + commission_fraction);

    let final_ton = match rail {
        PaymentRail::OnChainWallet => {
            if settings.usd_per_ton <= Decimal::ZERO {
                return Err(ServiceError::InternalError(
                    "exchange rate must be positive".to_string(),
                ));
            }
            Some((final_usd / settings.usd_per_ton).round_dp(TON_SCALE))
        }
        _ => None,
    };

    Ok(Quote {
        quantity,
        rail,
        base_usd,
        marked_up_usd,
        commission_fraction,
        final_usd,
        final_ton,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PricingSettings {
        PricingSettings {
            usd_per_ton: dec!(5.0),
            ..Default::default()
        }
    }

    #[test]
    fn card_quote_matches_reference_numbers() {
        // 50 stars at $0.81/50, 10% markup, 30% card commission
        let q = quote(50, PaymentRail::Card, &settings()).unwrap();
        assert_eq!(q.base_usd, dec!(0.81));
        assert_eq!(q.marked_up_usd, dec!(0.891));
        assert_eq!(q.final_usd, dec!(1.1583));
        assert_eq!(q.final_ton, None);
        assert_eq!(q.profit_usd(), dec!(0.081));
    }

    #[test]
    fn wallet_quote_carries_a_ton_amount() {
        let mut s = settings();
        s.commission_wallet_percent = dec!(0);
        let q = quote(100, PaymentRail::OnChainWallet, &s).unwrap();
        assert_eq!(q.final_usd, dec!(1.782));
        assert_eq!(q.final_ton, Some(dec!(0.3564)));
    }

    #[test]
    fn quoting_is_deterministic_for_fixed_inputs() {
        let s = settings();
        let first = quote(250, PaymentRail::CryptoInvoice, &s).unwrap();
        for _ in 0..10 {
            assert_eq!(quote(250, PaymentRail::CryptoInvoice, &s).unwrap(), first);
        }
    }

    #[test]
    fn rejects_quantities_below_the_minimum() {
        let err = quote(49, PaymentRail::CryptoInvoice, &settings()).unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[test]
    fn commission_selection_follows_the_rail() {
        let s = settings();
        let invoice = quote(50, PaymentRail::CryptoInvoice, &s).unwrap();
        let wallet = quote(50, PaymentRail::OnChainWallet, &s).unwrap();
        assert_eq!(invoice.commission_fraction, dec!(0.03));
        assert_eq!(wallet.commission_fraction, dec!(0));
        // markup applies before commission on every rail
        assert_eq!(invoice.marked_up_usd, wallet.marked_up_usd);
    }
}
