use crate::config::LedgerConfig;
use crate::ledger::auth::TokenProvider;
use crate::ledger::{DonationRecord, Ledger, LedgerError};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{Instrument, info};
use url::Url;

/// Appends donation rows to a Google Sheets range.
pub struct SheetsLedger {
    client: reqwest::Client,
    endpoint: Url,
    spreadsheet_id: String,
    range: String,
    tokens: Arc<dyn TokenProvider>,
}

impl SheetsLedger {
    pub fn new(
        client: reqwest::Client,
        config: &LedgerConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            client,
            endpoint: config.endpoint.clone(),
            spreadsheet_id: config.spreadsheet_id.clone(),
            range: config.range.clone(),
            tokens,
        }
    }

    fn append_url(&self) -> Result<Url, LedgerError> {
        let mut url = self.endpoint.clone();
        let append = format!("{}:append", self.range);
        url.path_segments_mut()
            .map_err(|_| LedgerError::InvalidEndpoint(self.endpoint.clone()))?
            .pop_if_empty()
            .extend([
                "v4",
                "spreadsheets",
                self.spreadsheet_id.as_str(),
                "values",
                append.as_str(),
            ]);
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");
        Ok(url)
    }
}

#[async_trait]
impl Ledger for SheetsLedger {
    #[tracing::instrument(skip(self))]
    async fn record_donation(&self, record: DonationRecord) -> Result<(), LedgerError> {
        let token = self.tokens.access_token().await?;
        let body = json!({
            "majorDimension": "ROWS",
            "values": [record.row()],
        });
        let response = self
            .client
            .post(self.append_url()?)
            .bearer_auth(token)
            .json(&body)
            .send()
            .in_current_span()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Api { status, body });
        }
        info!(
            "Recorded donation of {} from {} in {}",
            record.amount, record.name, self.range
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::auth::AuthError;
    use crate::test_utils::serve;
    use axum::Router;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode, Uri, header};
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use tokio::sync::Mutex;

    struct StaticToken;

    #[async_trait]
    impl TokenProvider for StaticToken {
        async fn access_token(&self) -> Result<String, AuthError> {
            Ok("test-token".to_string())
        }
    }

    #[derive(Debug, Clone)]
    struct Captured {
        uri: String,
        authorization: Option<String>,
        body: Value,
    }

    type Requests = Arc<Mutex<Vec<Captured>>>;

    async fn fake_sheets(status: StatusCode) -> (Url, Requests) {
        let requests = Requests::default();
        let app = Router::new()
            .fallback(
                |State((requests, status)): State<(Requests, StatusCode)>,
                 uri: Uri,
                 headers: HeaderMap,
                 body: Bytes| async move {
                    requests.lock().await.push(Captured {
                        uri: uri.to_string(),
                        authorization: headers
                            .get(header::AUTHORIZATION)
                            .and_then(|value| value.to_str().ok())
                            .map(str::to_string),
                        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
                    });
                    (status, "{}")
                },
            )
            .with_state((requests.clone(), status));
        (serve(app).await, requests)
    }

    fn ledger(endpoint: Url) -> SheetsLedger {
        let config = LedgerConfig {
            spreadsheet_id: "sheet-id".to_string(),
            range: "Donation List!A2:C2".to_string(),
            scopes: vec![],
            endpoint,
        };
        SheetsLedger::new(reqwest::Client::new(), &config, Arc::new(StaticToken))
    }

    #[tokio::test]
    async fn appends_one_user_entered_row() {
        let (endpoint, requests) = fake_sheets(StatusCode::OK).await;
        let record = DonationRecord {
            amount: dec!(7.80),
            name: "Alex".to_string(),
            comment: Some("Go team!".to_string()),
        };
        ledger(endpoint).record_donation(record).await.unwrap();

        let requests = requests.lock().await;
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(
            request.uri,
            "/v4/spreadsheets/sheet-id/values/Donation%20List!A2:C2:append?valueInputOption=USER_ENTERED"
        );
        assert_eq!(request.authorization.as_deref(), Some("Bearer test-token"));
        assert_eq!(request.body["values"], json!([["7.80", "Alex", "Go team!"]]));
    }

    #[tokio::test]
    async fn api_errors_are_reported() {
        let (endpoint, _requests) = fake_sheets(StatusCode::FORBIDDEN).await;
        let record = DonationRecord {
            amount: dec!(1),
            name: "Alex".to_string(),
            comment: None,
        };
        let err = ledger(endpoint).record_donation(record).await.unwrap_err();
        assert!(matches!(err, LedgerError::Api { status, .. } if status == StatusCode::FORBIDDEN));
    }
}
