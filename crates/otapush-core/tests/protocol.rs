//! Integration tests for the update protocol against a mock target.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use url::Url;

use otapush_core::endpoint::Scheme;
use otapush_core::{
    probe_scheme, ConfigDir, SchemePreference, Target, TrustMaterial, UpdateError,
    UpdateSession,
};
use tokio::io::AsyncRead;

const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

type Received = Arc<Mutex<Vec<u8>>>;

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Serve `app` over TLS with the given certificate and key, as a target
/// with a self-signed certificate does.
async fn spawn_tls(app: Router, cert_pem: String, key_pem: String) -> SocketAddr {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let config = RustlsConfig::from_pem(cert_pem.into_bytes(), key_pem.into_bytes())
        .await
        .unwrap();
    let handle = Handle::new();
    let server = axum_server::bind_rustls("127.0.0.1:0".parse().unwrap(), config)
        .handle(handle.clone());
    tokio::spawn(async move {
        server.serve(app.into_make_service()).await.unwrap();
    });
    handle.listening().await.expect("tls server should be listening")
}

/// An address nothing listens on.
async fn closed_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn session_for(addr: SocketAddr) -> UpdateSession {
    let base = Url::parse(&format!("http://{addr}/")).unwrap();
    UpdateSession::with_trust(base, TrustMaterial::empty()).unwrap()
}

async fn echo_digest(State(received): State<Received>, body: Bytes) -> String {
    *received.lock().unwrap() = body.to_vec();
    hex::encode(Sha256::digest(&body))
}

/// Behaves like a proxy that flips a bit of the payload in transit.
async fn corrupting_digest(body: Bytes) -> String {
    let mut corrupted = body.to_vec();
    if let Some(first) = corrupted.first_mut() {
        *first ^= 0x80;
    } else {
        corrupted.push(0);
    }
    hex::encode(Sha256::digest(&corrupted))
}

async fn legacy_page(_body: Bytes) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/html")],
        "<!DOCTYPE html><html><body>status page</body></html>",
    )
}

/// A well-behaved target with update support.
fn device(received: Received) -> Router {
    Router::new()
        .route("/update/root", put(echo_digest))
        .route("/update/boot", put(echo_digest))
        .route("/update/mbr", put(echo_digest))
        .route("/update/switch", post(|| async { StatusCode::OK }))
        .route("/reboot", post(|| async { StatusCode::OK }))
        .route("/update/features", get(|| async { "partuuid,updatehash" }))
        .layer(DefaultBodyLimit::disable())
        .with_state(received)
}

#[tokio::test]
async fn test_upload_root_verifies_digest() {
    let received = Received::default();
    let addr = spawn(device(received.clone())).await;
    let session = session_for(addr);

    let payload: Vec<u8> = (0..300_000u32).map(|i| (i % 253) as u8).collect();
    let stats = session
        .update_root(std::io::Cursor::new(payload.clone()))
        .await
        .expect("upload should verify");

    assert_eq!(stats.bytes_transferred, payload.len() as u64);
    assert_eq!(stats.local_digest, <[u8; 32]>::from(Sha256::digest(&payload)));
    assert_eq!(*received.lock().unwrap(), payload);
}

#[tokio::test]
async fn test_upload_empty_payload() {
    let addr = spawn(device(Received::default())).await;
    let session = session_for(addr);

    let stats = session
        .update_mbr(std::io::Cursor::new(Vec::new()))
        .await
        .expect("empty upload should verify");

    assert_eq!(stats.bytes_transferred, 0);
    assert_eq!(hex::encode(stats.local_digest), EMPTY_SHA256);
}

#[tokio::test]
async fn test_upload_from_file() {
    let addr = spawn(device(Received::default())).await;
    let session = session_for(addr);

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("boot.img");
    let payload = vec![0x5au8; 3 * 1024 * 1024 + 17];
    std::fs::write(&path, &payload).unwrap();

    let file = tokio::fs::File::open(&path).await.unwrap();
    let stats = session.update_boot(file).await.unwrap();

    assert_eq!(stats.bytes_transferred, payload.len() as u64);
}

#[tokio::test]
async fn test_corrupted_transfer_is_digest_mismatch() {
    let app = Router::new().route("/update/root", put(corrupting_digest));
    let session = session_for(spawn(app).await);

    let result = session
        .update_root(std::io::Cursor::new(b"rootfs image".to_vec()))
        .await;

    match result {
        Err(UpdateError::DigestMismatch { got, want }) => {
            assert_ne!(got, want);
            assert_eq!(want, hex::encode(Sha256::digest(b"rootfs image")));
        }
        other => panic!("expected digest mismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_html_answer_is_handler_not_implemented() {
    let app = Router::new()
        .route("/update/root", put(legacy_page))
        .route("/update/boot", put(legacy_page));
    let session = session_for(spawn(app).await);

    for result in [
        session.update_root(std::io::Cursor::new(b"root".to_vec())).await,
        session.update_boot(std::io::Cursor::new(Vec::new())).await,
    ] {
        let err = result.unwrap_err();
        assert!(err.is_handler_not_implemented(), "got {err:?}");
    }
}

#[tokio::test]
async fn test_non_hex_answer_is_decode_error() {
    let app = Router::new().route("/update/root", put(|_body: Bytes| async { "ok" }));
    let session = session_for(spawn(app).await);

    let result = session.update_root(std::io::Cursor::new(b"root".to_vec())).await;
    assert!(matches!(result, Err(UpdateError::DigestDecode(_))));
}

#[tokio::test]
async fn test_unexpected_status_carries_body() {
    let app = Router::new().route(
        "/update/root",
        put(|_body: Bytes| async { (StatusCode::INTERNAL_SERVER_ERROR, "disk full") }),
    );
    let session = session_for(spawn(app).await);

    match session.update_root(std::io::Cursor::new(b"root".to_vec())).await {
        Err(UpdateError::UnexpectedStatus { got, want, body }) => {
            assert_eq!(got, 500);
            assert_eq!(want, 200);
            assert_eq!(body, "disk full");
        }
        other => panic!("expected unexpected status, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_target_is_transport_error() {
    let session = session_for(closed_addr().await);

    let result = session.update_root(std::io::Cursor::new(b"root".to_vec())).await;
    assert!(matches!(result, Err(UpdateError::Transport(_))));
}

#[tokio::test]
async fn test_progress_reports_do_not_change_outcome() {
    let addr = spawn(device(Received::default())).await;
    let mut session = session_for(addr);

    let sent = Arc::new(AtomicU64::new(0));
    let seen = sent.clone();
    session.set_progress_callback(move |p| {
        seen.store(p.sent, Ordering::SeqCst);
    });

    let payload = vec![1u8; 200_000];
    let stats = session
        .update_root(std::io::Cursor::new(payload.clone()))
        .await
        .unwrap();

    assert_eq!(sent.load(Ordering::SeqCst), payload.len() as u64);
    assert_eq!(stats.bytes_transferred, payload.len() as u64);
}

#[tokio::test]
async fn test_switch_and_reboot() {
    let session = session_for(spawn(device(Received::default())).await);

    session.switch_partitions().await.unwrap();
    session.reboot().await.unwrap();
}

#[tokio::test]
async fn test_switch_failure_carries_body() {
    let app = Router::new().route(
        "/update/switch",
        post(|| async { (StatusCode::CONFLICT, "no inactive partition") }),
    );
    let session = session_for(spawn(app).await);

    match session.switch_partitions().await {
        Err(UpdateError::UnexpectedStatus { got, body, .. }) => {
            assert_eq!(got, 409);
            assert_eq!(body, "no inactive partition");
        }
        other => panic!("expected unexpected status, got {other:?}"),
    }
}

#[tokio::test]
async fn test_features_missing_endpoint_means_unsupported() {
    let session = session_for(spawn(Router::new()).await);

    assert_eq!(session.features().await.unwrap(), None);
    assert!(!session.target_supports("updatehash").await.unwrap());
}

#[tokio::test]
async fn test_features_membership() {
    let app = Router::new().route("/update/features", get(|| async { "a,b,c" }));
    let session = session_for(spawn(app).await);

    assert!(session.target_supports("b").await.unwrap());
    assert!(!session.target_supports("z").await.unwrap());
}

#[tokio::test]
async fn test_features_server_error_is_hard_error() {
    let app = Router::new().route(
        "/update/features",
        get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
    );
    let session = session_for(spawn(app).await);

    let result = session.target_supports("b").await;
    assert!(matches!(
        result,
        Err(UpdateError::UnexpectedStatus { got: 503, .. })
    ));
}

#[tokio::test]
async fn test_probe_follows_location_scheme() {
    let app = Router::new().route(
        "/",
        get(|| async { (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, "https://gateway/")]) }),
    );
    let addr = spawn(app).await;

    let scheme = probe_scheme(&addr.to_string()).await.unwrap();
    assert_eq!(scheme, Scheme::Https);
    assert_eq!(scheme.as_str(), "https");
}

#[tokio::test]
async fn test_probe_relative_location_stays_http() {
    let app = Router::new().route(
        "/",
        get(|| async { (StatusCode::FOUND, [(header::LOCATION, "/status")]) }),
    );
    let addr = spawn(app).await;

    assert_eq!(probe_scheme(&addr.to_string()).await.unwrap(), Scheme::Http);
}

#[tokio::test]
async fn test_probe_without_location_fails() {
    let app = Router::new().route("/", get(|| async { "plain status page" }));
    let addr = spawn(app).await;

    let result = probe_scheme(&addr.to_string()).await;
    assert!(matches!(result, Err(UpdateError::Probe(_))));
}

#[tokio::test]
async fn test_probe_unreachable_fails() {
    let addr = closed_addr().await;

    let result = probe_scheme(&addr.to_string()).await;
    assert!(matches!(result, Err(UpdateError::Probe(_))));
}

#[tokio::test]
async fn test_connect_auto_without_redirect_uses_http() {
    let app = device(Received::default()).route("/", get(|| async { "status" }));
    let addr = spawn(app).await;
    let config = TempDir::new().unwrap();

    let connected = UpdateSession::connect(&Target::new(addr.to_string()), &ConfigDir::new(config.path()))
        .await
        .unwrap();

    assert_eq!(connected.scheme, Scheme::Http);
    assert!(!connected.matched_certificate);
    assert!(connected.session.target_supports("updatehash").await.unwrap());
}

#[tokio::test]
async fn test_connect_auto_with_redirect_finds_host_certificate() {
    let app = Router::new().route(
        "/",
        get(|| async { (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, "https://127.0.0.1/")]) }),
    );
    let addr = spawn(app).await;

    let config = TempDir::new().unwrap();
    let host_dir = config.path().join("hosts").join("127.0.0.1");
    std::fs::create_dir_all(&host_dir).unwrap();
    let cert = rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string()]).unwrap();
    std::fs::write(host_dir.join("cert.pem"), cert.cert.pem()).unwrap();

    let connected = UpdateSession::connect(&Target::new(addr.to_string()), &ConfigDir::new(config.path()))
        .await
        .unwrap();

    assert_eq!(connected.scheme, Scheme::Https);
    assert!(connected.matched_certificate);
    assert_eq!(connected.session.base_url().scheme(), "https");
}

#[tokio::test]
async fn test_connect_fixed_scheme_skips_probe() {
    let addr = closed_addr().await;
    let config = TempDir::new().unwrap();
    let target = Target::new(addr.to_string())
        .with_scheme(SchemePreference::Fixed(Scheme::Http));

    let connected = UpdateSession::connect(&target, &ConfigDir::new(config.path()))
        .await
        .unwrap();

    assert_eq!(connected.scheme, Scheme::Http);
    assert_eq!(connected.session.base_url().as_str(), format!("http://{addr}/"));
}

#[tokio::test]
async fn test_upload_from_boxed_reader() {
    let addr = spawn(device(Received::default())).await;
    let session = session_for(addr);

    let reader: Box<dyn AsyncRead + Send + Unpin> =
        Box::new(std::io::Cursor::new(b"boot partition".to_vec()));
    let stats = session.update_boot(reader).await.unwrap();

    assert_eq!(stats.bytes_transferred, 14);
}

fn https_target(addr: SocketAddr) -> Target {
    Target::new(format!("localhost:{}", addr.port()))
        .with_scheme(SchemePreference::Fixed(Scheme::Https))
}

#[tokio::test]
async fn test_https_without_host_certificate_is_rejected() {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let addr = spawn_tls(
        device(Received::default()),
        certified.cert.pem(),
        certified.key_pair.serialize_pem(),
    )
    .await;
    let config = TempDir::new().unwrap();

    let connected = UpdateSession::connect(&https_target(addr), &ConfigDir::new(config.path()))
        .await
        .unwrap();
    assert!(!connected.matched_certificate);

    match connected.session.target_supports("updatehash").await {
        Err(UpdateError::Transport(message)) => {
            assert!(
                message.to_lowercase().contains("certificate"),
                "cause missing from {message:?}"
            );
        }
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_https_with_host_certificate_is_trusted() {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let addr = spawn_tls(
        device(Received::default()),
        certified.cert.pem(),
        certified.key_pair.serialize_pem(),
    )
    .await;

    let config = TempDir::new().unwrap();
    let host_dir = config.path().join("hosts").join("localhost");
    std::fs::create_dir_all(&host_dir).unwrap();
    std::fs::write(host_dir.join("cert.pem"), certified.cert.pem()).unwrap();

    let connected = UpdateSession::connect(&https_target(addr), &ConfigDir::new(config.path()))
        .await
        .unwrap();
    assert!(connected.matched_certificate);

    let session = connected.session;
    assert!(session.target_supports("updatehash").await.unwrap());
    let stats = session
        .update_root(std::io::Cursor::new(b"root over tls".to_vec()))
        .await
        .unwrap();
    assert_eq!(stats.bytes_transferred, 13);
}
