//! Integration tests for the distributor HTTP interface

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use base64::Engine as _;
use camino::Utf8Path;
use distributor::{Distributor, LinkId, MailError, Mailer, Message, RELEASE_BUCKET, Subscriber};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use storage::{MemoryStorage, Storage};
use tower::ServiceExt;

/// Keeps every message so tests can pick the download links out of them.
#[derive(Debug, Default)]
struct Outbox {
    sent: Mutex<Vec<Message>>,
}

impl Outbox {
    /// The link token mailed to `email`, most recent first.
    fn link_for(&self, email: &str) -> String {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|message| message.to == email)
            .map(|message| message.body.clone())
            .expect("no message for subscriber")
    }
}

#[async_trait::async_trait]
impl Mailer for Outbox {
    async fn send(&self, message: Message) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

fn builder(outbox: Arc<Outbox>) -> distributor::DistributorBuilder {
    builder_with(MemoryStorage::new().into(), outbox)
}

fn builder_with(storage: Storage, outbox: Arc<Outbox>) -> distributor::DistributorBuilder {
    Distributor::builder()
        .storage(storage)
        .link_url(Arc::new(|link: &LinkId| link.to_string()))
        .content_template("{link}")
        .filename_template("app-{version}.bin")
        .mailer(outbox)
        .subscribers(vec![Subscriber {
            id: "s1".into(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
        }])
}

/// Helper to create a test application
fn test_app() -> (axum::Router, Arc<Outbox>) {
    let outbox = Arc::new(Outbox::default());
    let app = builder(outbox.clone()).build().unwrap().router();
    (app, outbox)
}

async fn send(app: &axum::Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn publish(query: &str, data: &'static [u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/api/release?{query}"))
        .body(Body::from(data))
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_publish_and_fetch_release() {
    let (app, _) = test_app();
    let data = b"release payload";

    let response = send(&app, publish("version=1.0.0&description=first", data)).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let release = json_body(response).await;
    assert_eq!(release["version"], "1.0.0");
    assert_eq!(release["description"], "first");
    assert_eq!(release["size"], data.len());
    assert_eq!(release["sha256"], hex::encode(Sha256::digest(data)));
    assert!(release["createdAt"].is_string());

    let id = release["id"].as_str().unwrap().to_owned();
    let response = send(&app, get(&format!("/api/release/{id}"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, release);

    let response = send(&app, get("/api/release")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!([release]));
}

#[tokio::test]
async fn test_publish_validation() {
    let (app, _) = test_app();

    let response = send(&app, publish("description=nothing", b"data")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await["message"].is_string());

    let response = send(&app, publish("version=1.0", b"")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&app, get("/api/release")).await;
    assert_eq!(json_body(response).await, json!([]));
}

#[tokio::test]
async fn test_release_lookup_errors() {
    let (app, _) = test_app();

    let response = send(&app, get("/api/release/not-an-id")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&app, get("/api/release/20231114T221320+0000")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, delete("/api/release/20231114T221320+0000")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unpublish_release() {
    let (app, outbox) = test_app();

    let release = json_body(send(&app, publish("version=1.0", b"data")).await).await;
    let id = release["id"].as_str().unwrap();
    let link = outbox.link_for("ada@example.com");

    let response = send(&app, delete(&format!("/api/release/{id}"))).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(&app, get(&format!("/api/release/{id}"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, delete(&format!("/api/release/{id}"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Links to the release are gone with it.
    let response = send(&app, get(&format!("/download/{link}"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_subscriber_management() {
    let (app, _) = test_app();

    let response = send(
        &app,
        json_request(
            "POST",
            "/api/sub",
            json!({ "name": "Bob", "email": "bob@example.com" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let bob = json_body(response).await;
    assert_eq!(bob["name"], "Bob");
    let id = bob["id"].as_str().unwrap().to_owned();

    let response = send(
        &app,
        json_request(
            "POST",
            "/api/sub",
            json!({ "name": "Eve", "email": "not-an-email" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        json_request(
            "PUT",
            "/api/sub",
            json!({ "id": id, "name": "Robert", "email": "bob@example.com" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["name"], "Robert");

    let response = send(&app, get("/api/sub")).await;
    let names: Vec<Value> = json_body(response)
        .await
        .as_array()
        .unwrap()
        .iter()
        .map(|subscriber| subscriber["name"].clone())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&json!("Robert")));

    let response = send(&app, delete(&format!("/api/sub/{id}"))).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(&app, delete(&format!("/api/sub/{id}"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, get("/api/sub/nobody/stats")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({}));
}

#[tokio::test]
async fn test_download_counts() {
    let (app, outbox) = test_app();
    let data = b"the release binary";

    let release = json_body(send(&app, publish("version=2.1", data)).await).await;
    let id = release["id"].as_str().unwrap().to_owned();
    let link = outbox.link_for("ada@example.com");

    let response = send(
        &app,
        Request::builder()
            .method("HEAD")
            .uri(format!("/download/{link}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    for _ in 0..2 {
        let response = send(&app, get(&format!("/download/{link}"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            r#"attachment; filename="app-2.1.bin""#
        );
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH],
            data.len().to_string().as_str()
        );
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], data);
    }

    let response = send(&app, get("/api/sub/s1/stats")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ id: 2 }));
}

#[tokio::test]
async fn test_missing_artifact() {
    let storage = Storage::new(MemoryStorage::new());
    let outbox = Arc::new(Outbox::default());
    let app = builder_with(storage.clone(), outbox.clone())
        .build()
        .unwrap()
        .router();

    let release = json_body(send(&app, publish("version=1.0", b"RELEASE")).await).await;
    let id = release["id"].as_str().unwrap();
    let link = outbox.link_for("ada@example.com");

    storage
        .bucket(RELEASE_BUCKET)
        .delete(Utf8Path::new(&format!("{id}.dat")))
        .await
        .unwrap();

    let response = send(&app, get(&format!("/download/{link}"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().get(header::CONTENT_DISPOSITION).is_none());

    let response = send(
        &app,
        Request::builder()
            .method("HEAD")
            .uri(format!("/download/{link}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Nothing was served, so nothing was counted.
    let stats = json_body(send(&app, get("/api/sub/s1/stats")).await).await;
    assert_eq!(stats, json!({}));
}

#[tokio::test]
async fn test_unknown_link() {
    let (app, _) = test_app();

    let response = send(&app, get("/download/0123456789abcdef")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unsubscribe_revokes_links() {
    let (app, outbox) = test_app();

    send(&app, publish("version=1.0", b"data")).await;
    let link = outbox.link_for("ada@example.com");

    let response = send(&app, get(&format!("/download/{link}"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let response = send(&app, delete("/api/sub/s1")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(&app, get(&format!("/download/{link}"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Counts outlive the subscription.
    let stats = json_body(send(&app, get("/api/sub/s1/stats")).await).await;
    assert_eq!(stats.as_object().unwrap().len(), 1);
}

#[tokio::test]
async fn test_basic_auth() {
    let outbox = Arc::new(Outbox::default());
    let app = builder(outbox)
        .basic_auth("admin", "hunter2")
        .build()
        .unwrap()
        .router();

    let response = send(&app, get("/api/release")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

    let token = base64::engine::general_purpose::STANDARD.encode("admin:hunter2");
    let response = send(
        &app,
        Request::builder()
            .uri("/api/release")
            .header(header::AUTHORIZATION, format!("Basic {token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Downloads are authorized by the link alone.
    let response = send(&app, get("/download/0123456789abcdef")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_limit() {
    let outbox = Arc::new(Outbox::default());
    let app = builder(outbox).upload_limit(8).build().unwrap().router();

    let response = send(&app, publish("version=1.0", b"far too large for the limit")).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let response = send(&app, publish("version=1.0", b"small")).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}
