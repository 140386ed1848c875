mod common;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use crl_monitor::{
    expiry::{CaApiOracle, ExpirationOracle, OracleError},
    retry::RetrySchedule,
};
use rcgen::{Certificate, CertificateParams};
use reqwest::Client;
use time::macros::datetime;
use x509_parser::num_bigint::BigUint;

#[derive(Clone, Default)]
struct FakeCa {
    requests: Arc<AtomicUsize>,
}

async fn get_cert(State(ca): State<FakeCa>, Path(serial): Path<String>) -> Response {
    let attempt = ca.requests.fetch_add(1, Ordering::SeqCst);
    let Ok(serial) = u64::from_str_radix(&serial, 16) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    match serial {
        // Fails once, then answers
        1 if attempt == 0 => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        1 => r#"{"notAfter":"2030-01-01T00:00:00Z"}"#.into_response(),
        2 => {
            let mut params = CertificateParams::new(vec!["leaf.example".to_string()]);
            params.not_after = datetime!(2029-06-30 12:00:00 UTC);
            Certificate::from_params(params)
                .unwrap()
                .serialize_pem()
                .unwrap()
                .into_response()
        }
        4 => "<html>maintenance</html>".into_response(),
        5 => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        6 => (StatusCode::FORBIDDEN, "go away").into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn setup() -> (CaApiOracle, FakeCa) {
    let ca = FakeCa::default();
    let router = Router::new()
        .route("/get/cert/{serial}", get(get_cert))
        .with_state(ca.clone());
    let base = common::spawn_server(router).await;
    let oracle = CaApiOracle::with_client(
        Client::new(),
        format!("{base}/get/cert"),
        RetrySchedule::immediate(3),
    );
    (oracle, ca)
}

#[tokio::test]
async fn test_retries_server_errors() {
    let (oracle, ca) = setup().await;
    let not_after = oracle.fetch_not_after(&BigUint::from(1u32)).await.unwrap();
    assert_eq!(not_after, datetime!(2030-01-01 00:00:00 UTC));
    assert_eq!(ca.requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_pem_response() {
    let (oracle, _) = setup().await;
    let not_after = oracle.fetch_not_after(&BigUint::from(2u32)).await.unwrap();
    assert_eq!(not_after, datetime!(2029-06-30 12:00:00 UTC));
}

#[tokio::test]
async fn test_unknown_serial() {
    let (oracle, ca) = setup().await;
    let err = oracle.fetch_not_after(&BigUint::from(3u32)).await.unwrap_err();
    assert!(matches!(err, OracleError::NotFound(serial) if serial == BigUint::from(3u32)));
    assert_eq!(ca.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_malformed_response() {
    let (oracle, _) = setup().await;
    let err = oracle.fetch_not_after(&BigUint::from(4u32)).await.unwrap_err();
    assert!(matches!(err, OracleError::MalformedResponse { .. }));
}

#[tokio::test]
async fn test_gives_up_after_schedule() {
    let (oracle, ca) = setup().await;
    let err = oracle.fetch_not_after(&BigUint::from(5u32)).await.unwrap_err();
    assert!(matches!(err, OracleError::Unreachable { .. }));
    assert_eq!(ca.requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let (oracle, ca) = setup().await;
    let err = oracle.fetch_not_after(&BigUint::from(6u32)).await.unwrap_err();
    match err {
        OracleError::Rejected { status, body, .. } => {
            assert_eq!(status, reqwest::StatusCode::FORBIDDEN);
            assert_eq!(body, "go away");
        }
        other => panic!("expected rejection, got {other}"),
    }
    assert_eq!(ca.requests.load(Ordering::SeqCst), 1);
}
