//! HTTP routes.
//!
//! The management API lives under `/api` and may require basic
//! authentication. Downloads are public; the link token is the credential.

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::service::Distributor;

mod download;
mod releases;
mod subscribers;

pub(crate) fn router(distributor: Distributor) -> Router {
    let api = Router::new()
        .merge(releases::router())
        .merge(subscribers::router())
        .route_layer(middleware::from_fn_with_state(
            distributor.clone(),
            require_auth,
        ))
        .layer(DefaultBodyLimit::max(distributor.upload_limit()));

    Router::new()
        .nest("/api", api)
        .merge(download::router())
        .with_state(distributor)
}

async fn require_auth(
    State(distributor): State<Distributor>,
    request: Request,
    next: Next,
) -> Response {
    if distributor.authorized(request.headers()) {
        return next.run(request).await;
    }

    tracing::debug!(uri = %request.uri(), "Rejected unauthenticated request");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, r#"Basic realm="distributor""#)],
        Json(json!({ "message": "authentication required" })),
    )
        .into_response()
}
