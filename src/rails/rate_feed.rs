use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{error_from_response, RailError, RateSource};

/// HTTP exchange-rate feed returning USD per TON.
#[derive(Clone)]
pub struct HttpRateSource {
    http: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct RateResponse {
    usd_per_ton: f64,
}

impl HttpRateSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    async fn usd_per_ton(&self) -> Result<Decimal, RailError> {
        let response = self.http.get(&self.url).send().await?;
        if let Some(err) = error_from_response(&response) {
            return Err(err);
        }
        let body: RateResponse = response.json().await?;
        let rate = Decimal::from_f64(body.usd_per_ton)
            .filter(|r| *r > Decimal::ZERO)
            .ok_or_else(|| {
                RailError::Rejected(format!("feed returned unusable rate {}", body.usd_per_ton))
            })?;
        Ok(rate)
    }
}

/// Cached exchange rate. Quotes read the cache and never touch the network;
/// a background task refreshes it and a failed fetch keeps the last-known
/// -good value.
pub struct ExchangeRateCache {
    rate: RwLock<Decimal>,
    source: Arc<dyn RateSource>,
}

impl ExchangeRateCache {
    pub fn new(initial: Decimal, source: Arc<dyn RateSource>) -> Self {
        Self {
            rate: RwLock::new(initial),
            source,
        }
    }

    /// Current USD-per-TON rate. Never blocks on a live network call.
    pub async fn current(&self) -> Decimal {
        *self.rate.read().await
    }

    /// Fetches a fresh rate, keeping the old value on failure.
    pub async fn refresh(&self) {
        match self.source.usd_per_ton().await {
            Ok(rate) => {
                *self.rate.write().await = rate;
                info!(usd_per_ton = %rate, "Exchange rate refreshed");
            }
            Err(err) => {
                let kept = *self.rate.read().await;
                warn!(error = %err, usd_per_ton = %kept, "Rate fetch failed; keeping last known value");
            }
        }
    }

    /// Spawns the periodic refresh loop.
    pub fn spawn_refresh(cache: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick completes immediately, warming the cache at boot
            loop {
                ticker.tick().await;
                cache.refresh().await;
            }
        })
    }
}
