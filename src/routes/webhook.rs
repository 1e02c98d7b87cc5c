use rust_decimal::Decimal;
use serde_derive::{Deserialize, Serialize};

/// Tiltify webhook envelope. Only the fields the ledger consumes are modelled;
/// everything else in the payload is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TiltifyWebhookRequest {
    pub data: Data,
    pub meta: Meta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Data {
    pub id: Option<String>,
    pub amount: Option<Amount>,
    pub donor_comment: Option<String>,
    pub donor_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub currency: String,
    /// Tiltify sends the value as a string; numbers are accepted too.
    pub value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub event_type: String,
}
