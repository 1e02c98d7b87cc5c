use crate::routes::webhook::{Amount, TiltifyWebhookRequest};
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

pub mod webhook;

/// Donor name recorded when Tiltify omits one.
pub const ANONYMOUS_DONOR: &str = "Anonymous";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TiltifyEventType {
    DonationUpdated,
    Other(String),
}

impl From<&str> for TiltifyEventType {
    fn from(value: &str) -> Self {
        match value {
            "public:direct:donation_updated" => TiltifyEventType::DonationUpdated,
            "private:direct:donation_updated" => TiltifyEventType::DonationUpdated,
            other => TiltifyEventType::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DonationError {
    #[error("donation {0:?} has no amount")]
    MissingAmount(Option<String>),
}

/// A donation update with its donor fields resolved, amount still in the
/// donor's currency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TiltifyDonation {
    pub id: Option<String>,
    pub amount: Amount,
    pub name: String,
    pub message: Option<String>,
}

impl TryFrom<TiltifyWebhookRequest> for TiltifyDonation {
    type Error = DonationError;

    fn try_from(value: TiltifyWebhookRequest) -> Result<Self, Self::Error> {
        let data = value.data;
        let amount = data
            .amount
            .ok_or_else(|| DonationError::MissingAmount(data.id.clone()))?;
        Ok(Self {
            id: data.id,
            amount,
            name: data
                .donor_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| ANONYMOUS_DONOR.to_string()),
            message: data.donor_comment.filter(|comment| !comment.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::webhook::{Data, Meta};
    use rust_decimal_macros::dec;

    fn request(
        name: Option<&str>,
        comment: Option<&str>,
        amount: Option<Amount>,
    ) -> TiltifyWebhookRequest {
        TiltifyWebhookRequest {
            data: Data {
                id: Some("donation-1".to_string()),
                amount,
                donor_comment: comment.map(str::to_string),
                donor_name: name.map(str::to_string),
            },
            meta: Meta {
                event_type: "public:direct:donation_updated".to_string(),
            },
        }
    }

    fn usd(value: rust_decimal::Decimal) -> Option<Amount> {
        Some(Amount {
            currency: "USD".to_string(),
            value,
        })
    }

    #[test]
    fn recognizes_direct_donation_updates_only() {
        assert_eq!(
            TiltifyEventType::from("public:direct:donation_updated"),
            TiltifyEventType::DonationUpdated
        );
        assert_eq!(
            TiltifyEventType::from("private:direct:donation_updated"),
            TiltifyEventType::DonationUpdated
        );
        for tag in [
            "public:direct:donation_created",
            "public:indirect:donation_updated",
            "",
        ] {
            assert_eq!(
                TiltifyEventType::from(tag),
                TiltifyEventType::Other(tag.to_string())
            );
        }
    }

    #[test]
    fn extracts_donor_fields() {
        let donation =
            TiltifyDonation::try_from(request(Some("Alex"), Some("Go team!"), usd(dec!(10.00))))
                .unwrap();
        assert_eq!(donation.name, "Alex");
        assert_eq!(donation.message.as_deref(), Some("Go team!"));
        assert_eq!(donation.amount.value, dec!(10.00));
        assert_eq!(donation.id.as_deref(), Some("donation-1"));
    }

    #[test]
    fn missing_donor_fields_fall_back() {
        let donation = TiltifyDonation::try_from(request(None, Some(""), usd(dec!(5)))).unwrap();
        assert_eq!(donation.name, ANONYMOUS_DONOR);
        assert!(donation.message.is_none());

        let donation = TiltifyDonation::try_from(request(Some("  "), None, usd(dec!(5)))).unwrap();
        assert_eq!(donation.name, ANONYMOUS_DONOR);
    }

    #[test]
    fn missing_amount_is_an_error() {
        assert_eq!(
            TiltifyDonation::try_from(request(Some("Alex"), None, None)),
            Err(DonationError::MissingAmount(Some("donation-1".to_string())))
        );
    }
}
