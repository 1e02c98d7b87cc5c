use crate::SharedAppState;
use crate::dispatcher::{DispatchError, DonationEvent};
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum_extra::extract::WithRejection;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, warn};

/// Accepts any JSON body and queues it for processing. The sender gets
/// `200 OK` as soon as the event is queued; validation happens later.
pub async fn handler(
    State(state): State<SharedAppState>,
    WithRejection(Json(json), _): WithRejection<Json<Value>, ApiError>,
) -> Result<&'static str, ApiError> {
    let event = DonationEvent::from(json);
    let id = event.id().map(str::to_string);
    state.dispatcher.submit(event).await?;
    info!(event_id = ?id, "Tiltify Webhook received");

    Ok("OK")
}

#[derive(Debug, Error)]
pub enum ApiError {
    // The `#[from]` attribute generates `From<JsonRejection> for ApiError`
    // implementation. See `thiserror` docs for more information
    #[error(transparent)]
    JsonExtractorRejection(#[from] JsonRejection),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        warn!("Rejecting webhook: {self}");
        let payload = json!({
            "message": self.to_string(),
            "origin": "with_rejection"
        });
        let code = match self {
            ApiError::JsonExtractorRejection(x) => match x {
                JsonRejection::JsonDataError(_) => StatusCode::BAD_REQUEST,
                JsonRejection::JsonSyntaxError(_) => StatusCode::BAD_REQUEST,
                JsonRejection::MissingJsonContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Dispatch(DispatchError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (code, Json(payload)).into_response()
    }
}
