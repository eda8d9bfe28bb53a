use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use bytes::Bytes;
use serde::Deserialize;

use crate::error::{DistributorError, DistributorResult};
use crate::release::{NewRelease, Release};
use crate::service::Distributor;

pub(super) fn router() -> Router<Distributor> {
    Router::new()
        .route("/release", get(list_releases).post(publish_release))
        .route("/release/{id}", get(get_release).delete(unpublish_release))
}

#[derive(Debug, Deserialize)]
struct PublishParams {
    #[serde(default, alias = "Version")]
    version: Option<String>,
    #[serde(default, alias = "Description")]
    description: Option<String>,
}

async fn list_releases(
    State(distributor): State<Distributor>,
) -> DistributorResult<Json<Vec<Release>>> {
    Ok(Json(distributor.releases().await?))
}

/// Publish the request body as a new release.
async fn publish_release(
    State(distributor): State<Distributor>,
    Query(params): Query<PublishParams>,
    body: Bytes,
) -> DistributorResult<(StatusCode, Json<Release>)> {
    let version = params
        .version
        .filter(|version| !version.trim().is_empty())
        .ok_or(DistributorError::MissingVersion)?;
    if body.is_empty() {
        return Err(DistributorError::EmptyArtifact);
    }

    let meta = NewRelease {
        version,
        description: params.description,
    };
    let release = distributor.publish(meta, &body[..]).await?;
    Ok((StatusCode::CREATED, Json(release)))
}

async fn get_release(
    State(distributor): State<Distributor>,
    Path(id): Path<String>,
) -> DistributorResult<Json<Release>> {
    Ok(Json(distributor.release(&id).await?))
}

async fn unpublish_release(
    State(distributor): State<Distributor>,
    Path(id): Path<String>,
) -> DistributorResult<StatusCode> {
    distributor.unpublish(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
