mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use common::{Harness, PASSWORD, files_under, payload};
use object_vault::{
    models::{EncryptionMode, Role},
    routes,
};
use serde_json::{Value, json};
use tower::ServiceExt;

const BOUNDARY: &str = "vault-test-boundary";

fn app(h: &Harness) -> Router {
    routes::routes().with_state(h.state.clone())
}

fn multipart(file_name: &str, data: &[u8], extra: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in extra {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: text/plain\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(token: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/files")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).unwrap()
}

fn request(method: Method, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn json_request(uri: &str, value: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(value.to_string()))
        .unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn register_and_login(app: &Router, username: &str) -> String {
    let credentials = json!({ "username": username, "password": PASSWORD });
    let response = app
        .clone()
        .oneshot(json_request("/auth/register", credentials.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let registered = read_json(response).await;
    assert!(registered.get("credential_hash").is_none());
    assert!(registered.get("stored_key").is_none());

    let response = app
        .clone()
        .oneshot(json_request("/auth/login", credentials))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    read_json(response).await["token"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn health_endpoints() {
    let h = Harness::new(EncryptionMode::Plain).await;
    let app = app(&h);

    let response = app.clone().oneshot(request(Method::GET, "/healthz", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["status"], "ok");

    let response = app.oneshot(request(Method::GET, "/readyz", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["checks"]["sqlite"]["ok"], true);
    assert_eq!(body["checks"]["disk"]["ok"], true);
}

#[tokio::test]
async fn derived_mode_session_lifecycle() {
    let h = Harness::new(EncryptionMode::PerPrincipalDerived).await;
    let app = app(&h);
    let alice = register_and_login(&app, "alice").await;
    let bob = register_and_login(&app, "bob").await;

    let data = payload(150_000);
    let response = app
        .clone()
        .oneshot(upload_request(Some(&alice), multipart("notes.txt", &data, &[])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let uploaded = read_json(response).await;
    assert_eq!(uploaded["name"], "notes.txt");
    assert_eq!(uploaded["size"], 150_000);
    assert_eq!(uploaded["encryption_mode"], "per-principal-derived");
    let id = uploaded["id"].as_str().unwrap().to_string();
    let uri = format!("/files/{id}");

    let response = app.clone().oneshot(request(Method::GET, "/files", Some(&alice))).await.unwrap();
    let listed = read_json(response).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert!(listed[0].get("physical_name").is_none());

    let response = app.clone().oneshot(request(Method::GET, &uri, Some(&alice))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers[header::CONTENT_LENGTH], "150000");
    assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"notes.txt\""
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.as_ref(), data.as_slice());

    // Someone else's object.
    let response = app.clone().oneshot(request(Method::GET, &uri, Some(&bob))).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Unknown token.
    let response = app
        .clone()
        .oneshot(request(Method::GET, &uri, Some("not-a-session")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // No anonymous uploads in a per-principal mode.
    let response = app
        .clone()
        .oneshot(upload_request(None, multipart("x.txt", b"x", &[])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(request(Method::POST, "/auth/logout", Some(&alice)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = app.clone().oneshot(request(Method::GET, &uri, Some(&alice))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // A fresh login re-derives the key.
    let response = app
        .clone()
        .oneshot(json_request(
            "/auth/login",
            json!({ "username": "alice", "password": PASSWORD }),
        ))
        .await
        .unwrap();
    let alice = read_json(response).await["token"].as_str().unwrap().to_string();

    let response = app.clone().oneshot(request(Method::DELETE, &uri, Some(&alice))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = app.oneshot(request(Method::GET, &uri, Some(&alice))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(files_under(&h.upload_dir()).is_empty());
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let h = Harness::new(EncryptionMode::PerPrincipalStored).await;
    let app = app(&h);
    register_and_login(&app, "alice").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "/auth/login",
            json!({ "username": "alice", "password": "nope" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(json_request(
            "/auth/register",
            json!({ "username": "alice", "password": PASSWORD }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn salt_lookup_does_not_reveal_accounts() {
    let h = Harness::new(EncryptionMode::PerPrincipalDerived).await;
    let app = app(&h);
    register_and_login(&app, "alice").await;

    let mut salts = Vec::new();
    for name in ["alice", "ghost", "ghost"] {
        let response = app
            .clone()
            .oneshot(request(Method::GET, &format!("/auth/salt/{name}"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["iterations"], h.config.kdf.pbkdf2_iterations);
        salts.push(body["salt"].as_str().unwrap().to_string());
    }
    assert_ne!(salts[0], salts[1]);
    assert_eq!(salts[1], salts[2]);
}

#[tokio::test]
async fn fixed_mode_anonymous_uploads() {
    let h = Harness::new(EncryptionMode::Fixed).await;
    let app = app(&h);

    let response = app
        .clone()
        .oneshot(upload_request(None, multipart("empty.txt", b"", &[])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(files_under(&h.upload_dir()).is_empty());

    let response = app
        .clone()
        .oneshot(upload_request(None, multipart("ten.txt", b"0123456789", &[])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let uploaded = read_json(response).await;
    assert_eq!(uploaded["size"], 10);
    assert_eq!(uploaded["encryption_mode"], "fixed");

    let uri = format!("/files/{}", uploaded["id"].as_str().unwrap());
    let response = app.clone().oneshot(request(Method::GET, &uri, None)).await.unwrap();
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "10");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.as_ref(), b"0123456789");

    // Client-encrypted blobs are kept verbatim.
    let response = app
        .clone()
        .oneshot(upload_request(
            None,
            multipart("blob.bin", b"opaque bytes", &[("client_encrypted", "true")]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(read_json(response).await["encryption_mode"], "client-opaque");

    let response = app.oneshot(request(Method::GET, "/api/stats", None)).await.unwrap();
    let stats = read_json(response).await;
    assert_eq!(stats["object_count"], 2);
    assert_eq!(stats["total_bytes"], 22);
    assert_eq!(stats["encryption_enabled"], true);
}

#[tokio::test]
async fn oversized_upload_is_413_and_leaves_nothing() {
    let h = Harness::with_config(EncryptionMode::Fixed, |cfg| cfg.max_upload_bytes = 1024).await;
    let app = app(&h);

    let response = app
        .oneshot(upload_request(None, multipart("big.bin", &payload(10_000), &[])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(files_under(&h.upload_dir()).is_empty());
}

#[tokio::test]
async fn admin_surface() {
    let h = Harness::new(EncryptionMode::PerPrincipalDerived).await;
    let app = app(&h);
    let alice = register_and_login(&app, "alice").await;
    let admin = h.principal("root", Role::Administrator).await;
    let admin = admin.session().unwrap().as_str().to_string();

    let response = app
        .clone()
        .oneshot(upload_request(Some(&alice), multipart("diary.txt", b"dear diary", &[])))
        .await
        .unwrap();
    let id = read_json(response).await["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/admin/files", Some(&alice)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/admin/files", Some(&admin)))
        .await
        .unwrap();
    assert_eq!(read_json(response).await.as_array().unwrap().len(), 1);

    // The administrator has no derived key for alice's object.
    let response = app
        .clone()
        .oneshot(request(Method::GET, &format!("/files/{id}"), Some(&admin)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(request(Method::GET, &format!("/admin/files/{id}/download"), Some(&admin)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "38");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"diary.txt.enc\""
    );

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/admin/principals", Some(&admin)))
        .await
        .unwrap();
    let principals = read_json(response).await;
    let alice_id = principals
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["username"] == "alice")
        .unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();

    // Disabling ends alice's session.
    let response = app
        .clone()
        .oneshot(request(
            Method::POST,
            &format!("/admin/principals/{alice_id}/toggle"),
            Some(&admin),
        ))
        .await
        .unwrap();
    assert_eq!(read_json(response).await["enabled"], false);
    let response = app
        .clone()
        .oneshot(request(Method::GET, "/files", Some(&alice)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(request(
            Method::DELETE,
            &format!("/admin/principals/{alice_id}"),
            Some(&admin),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(files_under(&h.upload_dir()).is_empty());

    let response = app
        .oneshot(request(Method::GET, "/admin/files", Some(&admin)))
        .await
        .unwrap();
    assert!(read_json(response).await.as_array().unwrap().is_empty());
}
