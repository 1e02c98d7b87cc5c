use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub mod auth;
pub mod sheets;

use auth::AuthError;

/// One normalized donation, amount already in the reference currency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationRecord {
    pub amount: Decimal,
    pub name: String,
    pub comment: Option<String>,
}

impl DonationRecord {
    /// The `[amount, name, comment]` cells appended to the sheet.
    pub fn row(&self) -> [String; 3] {
        [
            format!("{:.2}", self.amount),
            self.name.clone(),
            self.comment.clone().unwrap_or_default(),
        ]
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Sheets request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Sheets API returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("Invalid Sheets endpoint: {0}")]
    InvalidEndpoint(Url),
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn record_donation(&self, record: DonationRecord) -> Result<(), LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn row_pads_amount_and_blanks_missing_comment() {
        let record = DonationRecord {
            amount: dec!(10),
            name: "Alex".to_string(),
            comment: None,
        };
        assert_eq!(record.row(), ["10.00", "Alex", ""]);

        let record = DonationRecord {
            amount: dec!(7.80),
            name: "Sam".to_string(),
            comment: Some("Go team!".to_string()),
        };
        assert_eq!(record.row(), ["7.80", "Sam", "Go team!"]);
    }
}
