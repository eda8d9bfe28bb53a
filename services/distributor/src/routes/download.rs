use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderName, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio_util::io::ReaderStream;

use crate::error::DistributorResult;
use crate::link::LinkId;
use crate::release::Release;
use crate::service::Distributor;

const PIPE_CAPACITY: usize = 64 * 1024;

pub(super) fn router() -> Router<Distributor> {
    Router::new().route("/download/{id}", get(download).head(download_headers))
}

/// Stream a release to the holder of a link.
///
/// The link, the release metadata and the artifact are all checked before
/// the response starts, so a missing one fails with a status code rather
/// than a truncated body.
async fn download(
    State(distributor): State<Distributor>,
    Path(id): Path<String>,
) -> DistributorResult<Response> {
    let link = LinkId::from(id);
    let (_, release) = distributor.resolve(&link).await?;
    let headers = attachment_headers(&distributor, &release);

    let (mut writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    tokio::spawn(async move {
        if let Err(err) = distributor.download(&link, &mut writer).await {
            tracing::warn!(%link, "Download failed: {err}");
        }
    });

    Ok((headers, Body::from_stream(ReaderStream::new(reader))).into_response())
}

/// Answer `HEAD` without streaming, so probing a link does not count as a download.
async fn download_headers(
    State(distributor): State<Distributor>,
    Path(id): Path<String>,
) -> DistributorResult<Response> {
    let (_, release) = distributor.resolve(&LinkId::from(id)).await?;
    Ok(attachment_headers(&distributor, &release).into_response())
}

fn attachment_headers(distributor: &Distributor, release: &Release) -> [(HeaderName, String); 3] {
    [
        (header::CONTENT_TYPE, "application/octet-stream".to_owned()),
        (
            header::CONTENT_DISPOSITION,
            content_disposition(&distributor.attachment_name(release)),
        ),
        (header::CONTENT_LENGTH, release.size.to_string()),
    ]
}

/// An `attachment` disposition for `name`, reduced to printable ASCII.
fn content_disposition(name: &str) -> String {
    let name: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c == ' ' || c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();
    format!("attachment; filename=\"{name}\"")
}
