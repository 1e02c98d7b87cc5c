use crate::config::{CurrencyConfig, RatesProvider};
use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_derive::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{Instrument, debug};
use url::Url;

/// Decimal places kept for amounts written to the ledger.
pub const LEDGER_DECIMAL_PLACES: u32 = 2;

#[derive(Debug, Error)]
pub enum ExchangeRateError {
    #[error("The requested exchange rate does not exist: {0}")]
    RateDoesNotExist(String),
    #[error("Exchange rate for {0} is zero")]
    ZeroRate(String),
    #[error("Conversion of {amount} {from} to {to} overflowed")]
    Overflow {
        amount: Decimal,
        from: String,
        to: String,
    },
    #[error("Invalid rates endpoint: {0}")]
    InvalidEndpoint(Url),
    #[error("Rates service request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[async_trait]
pub trait ExchangeRates: Send + Sync {
    /// Converts `amount` from one ISO currency code to another.
    async fn convert(&self, amount: Decimal, from: &str, to: &str)
    -> Result<Decimal, ExchangeRateError>;
}

/// Rounds a converted amount to pence, half away from zero.
pub fn round_amount(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(LEDGER_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

pub fn from_config(config: &CurrencyConfig, client: reqwest::Client) -> Arc<dyn ExchangeRates> {
    match config.provider {
        RatesProvider::Http => Arc::new(HttpRates::new(client, config.endpoint.clone())),
        RatesProvider::Fixed => Arc::new(FixedRates::new(&config.reference, &config.rates)),
    }
}

fn same_currency(from: &str, to: &str) -> bool {
    from.eq_ignore_ascii_case(to)
}

fn multiply(
    amount: Decimal,
    rate: Decimal,
    from: &str,
    to: &str,
) -> Result<Decimal, ExchangeRateError> {
    amount
        .checked_mul(rate)
        .ok_or_else(|| ExchangeRateError::Overflow {
            amount,
            from: from.to_string(),
            to: to.to_string(),
        })
}

/// A static rates table expressed against a single reference currency.
pub struct FixedRates {
    reference: String,
    // currency -> units of reference per unit
    rates: HashMap<String, Decimal>,
}

impl FixedRates {
    pub fn new(reference: &str, rates: &HashMap<String, Decimal>) -> Self {
        Self {
            reference: reference.to_ascii_uppercase(),
            rates: rates
                .iter()
                .map(|(code, rate)| (code.to_ascii_uppercase(), *rate))
                .collect(),
        }
    }

    fn rate_to_reference(&self, currency: &str) -> Result<Decimal, ExchangeRateError> {
        let currency = currency.to_ascii_uppercase();
        if currency == self.reference {
            return Ok(Decimal::ONE);
        }
        self.rates.get(&currency).copied().ok_or_else(|| {
            ExchangeRateError::RateDoesNotExist(format!("{currency}/{}", self.reference))
        })
    }
}

#[async_trait]
impl ExchangeRates for FixedRates {
    async fn convert(
        &self,
        amount: Decimal,
        from: &str,
        to: &str,
    ) -> Result<Decimal, ExchangeRateError> {
        if same_currency(from, to) {
            return Ok(amount);
        }
        let from_rate = self.rate_to_reference(from)?;
        let to_rate = self.rate_to_reference(to)?;
        if to_rate.is_zero() {
            return Err(ExchangeRateError::ZeroRate(to.to_string()));
        }
        let in_reference = multiply(amount, from_rate, from, to)?;
        in_reference
            .checked_div(to_rate)
            .ok_or_else(|| ExchangeRateError::Overflow {
                amount,
                from: from.to_string(),
                to: to.to_string(),
            })
    }
}

#[derive(Debug, Deserialize)]
struct LatestRates {
    rates: HashMap<String, Decimal>,
}

/// Looks up the latest rate from a Frankfurter-compatible service.
pub struct HttpRates {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpRates {
    pub fn new(client: reqwest::Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }

    fn latest_url(&self, from: &str, to: &str) -> Result<Url, ExchangeRateError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ExchangeRateError::InvalidEndpoint(self.endpoint.clone()))?
            .pop_if_empty()
            .push("latest");
        url.query_pairs_mut()
            .append_pair("from", from)
            .append_pair("to", to);
        Ok(url)
    }
}

#[async_trait]
impl ExchangeRates for HttpRates {
    #[tracing::instrument(skip(self))]
    async fn convert(
        &self,
        amount: Decimal,
        from: &str,
        to: &str,
    ) -> Result<Decimal, ExchangeRateError> {
        if same_currency(from, to) {
            return Ok(amount);
        }
        let from = from.to_ascii_uppercase();
        let to = to.to_ascii_uppercase();
        let url = self.latest_url(&from, &to)?;
        let latest: LatestRates = self
            .client
            .get(url)
            .send()
            .in_current_span()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let rate = latest
            .rates
            .get(&to)
            .copied()
            .ok_or_else(|| ExchangeRateError::RateDoesNotExist(format!("{from}/{to}")))?;
        debug!("Rate {from}/{to} is {rate}");
        multiply(amount, rate, &from, &to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::serve;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use rust_decimal_macros::dec;
    use serde_json::{Map, json};

    fn table() -> FixedRates {
        let rates = HashMap::from([
            ("usd".to_string(), dec!(0.78)),
            ("EUR".to_string(), dec!(0.85)),
        ]);
        FixedRates::new("GBP", &rates)
    }

    #[tokio::test]
    async fn fixed_rates_convert_to_reference() {
        let gbp = table().convert(dec!(10.00), "USD", "GBP").await.unwrap();
        assert_eq!(round_amount(gbp), dec!(7.80));
        assert_eq!(round_amount(gbp).to_string(), "7.80");
    }

    #[tokio::test]
    async fn fixed_rates_cross_and_identity() {
        let rates = table();
        assert_eq!(rates.convert(dec!(3.5), "gbp", "GBP").await.unwrap(), dec!(3.5));
        assert_eq!(rates.convert(dec!(7.8), "GBP", "USD").await.unwrap(), dec!(10));
        assert_eq!(
            round_amount(rates.convert(dec!(85), "EUR", "USD").await.unwrap()),
            dec!(92.63)
        );
    }

    #[tokio::test]
    async fn fixed_rates_unknown_currency() {
        let err = table().convert(dec!(1), "JPY", "GBP").await.unwrap_err();
        assert!(matches!(err, ExchangeRateError::RateDoesNotExist(pair) if pair == "JPY/GBP"));
    }

    #[test]
    fn rounding_is_half_up() {
        assert_eq!(round_amount(dec!(7.805)), dec!(7.81));
        assert_eq!(round_amount(dec!(7.8049)), dec!(7.80));
        assert_eq!(round_amount(dec!(0.125)), dec!(0.13));
        assert_eq!(round_amount(dec!(-0.125)), dec!(-0.13));
    }

    #[tokio::test]
    async fn http_rates_query_latest() {
        let app = Router::new().route(
            "/latest",
            get(|Query(query): Query<HashMap<String, String>>| async move {
                if query.get("from").map(String::as_str) != Some("USD") {
                    return Err(StatusCode::NOT_FOUND);
                }
                let mut rates = Map::new();
                rates.insert(query.get("to").cloned().unwrap_or_default(), json!(0.78));
                Ok(Json(json!({
                    "amount": 1.0,
                    "base": "USD",
                    "date": "2025-01-02",
                    "rates": rates
                })))
            }),
        );
        let endpoint = serve(app).await;
        let rates = HttpRates::new(reqwest::Client::new(), endpoint);

        let gbp = rates.convert(dec!(10.00), "usd", "gbp").await.unwrap();
        assert_eq!(round_amount(gbp), dec!(7.80));

        let err = rates.convert(dec!(1), "EUR", "GBP").await.unwrap_err();
        assert!(matches!(err, ExchangeRateError::Request(_)));
    }

    #[tokio::test]
    async fn http_rates_missing_currency() {
        let app = Router::new().route(
            "/latest",
            get(|| async { Json(json!({ "rates": {} })) }),
        );
        let rates = HttpRates::new(reqwest::Client::new(), serve(app).await);
        let err = rates.convert(dec!(1), "USD", "GBP").await.unwrap_err();
        assert!(matches!(err, ExchangeRateError::RateDoesNotExist(_)));
    }
}
