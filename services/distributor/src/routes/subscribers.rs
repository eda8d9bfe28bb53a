use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{delete, get};

use crate::error::DistributorResult;
use crate::service::Distributor;
use crate::subscriber::{NewSubscriber, Subscriber};
use crate::tracker::DownloadStats;

pub(super) fn router() -> Router<Distributor> {
    Router::new()
        .route(
            "/sub",
            get(list_subscribers)
                .post(create_subscriber)
                .put(update_subscriber),
        )
        .route("/sub/{id}", delete(remove_subscriber))
        .route("/sub/{id}/stats", get(subscriber_stats))
}

async fn list_subscribers(
    State(distributor): State<Distributor>,
) -> DistributorResult<Json<Vec<Subscriber>>> {
    Ok(Json(distributor.subscribers().await?))
}

async fn create_subscriber(
    State(distributor): State<Distributor>,
    Json(subscriber): Json<NewSubscriber>,
) -> DistributorResult<(StatusCode, Json<Subscriber>)> {
    let subscriber = distributor.subscribe(subscriber).await?;
    Ok((StatusCode::CREATED, Json(subscriber)))
}

async fn update_subscriber(
    State(distributor): State<Distributor>,
    Json(subscriber): Json<Subscriber>,
) -> DistributorResult<Json<Subscriber>> {
    Ok(Json(distributor.update_subscriber(subscriber).await?))
}

async fn remove_subscriber(
    State(distributor): State<Distributor>,
    Path(id): Path<String>,
) -> DistributorResult<StatusCode> {
    distributor.unsubscribe(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Download counts by release. Unknown subscribers have none.
async fn subscriber_stats(
    State(distributor): State<Distributor>,
    Path(id): Path<String>,
) -> DistributorResult<Json<DownloadStats>> {
    Ok(Json(distributor.stats(&id).await?))
}
