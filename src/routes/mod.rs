use axum::Router;
use axum::routing::post;
use crate::SharedAppState;

pub mod webhook;
pub mod tiltify;

pub fn router() -> Router<SharedAppState> {
    Router::new().route("/", post(tiltify::webhook::handler))
}
