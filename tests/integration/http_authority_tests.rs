//! HTTP CSR authority tests
//!
//! Exercises the Puppet CA style client against a mocked server.

use std::collections::BTreeMap;

use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use certrotate::config::AuthorityConfig;
use certrotate::services::{CsrAuthority, HttpCsrAuthority, RequestMeta};
use certrotate::RotationError;

const REQUEST: &str = "agent1-b2c4d";

fn authority(server: &MockServer) -> HttpCsrAuthority {
    HttpCsrAuthority::new(&AuthorityConfig {
        url: server.uri(),
        timeout_secs: 5,
        ssl_verify: true,
        ssl_cert: None,
        ssl_key: None,
        ssl_ca: None,
        ssl: None,
    })
    .unwrap()
}

fn meta() -> RequestMeta {
    let mut labels = BTreeMap::new();
    labels.insert("cluster".to_string(), "cluster1".to_string());
    RequestMeta {
        name_prefix: "agent1-".to_string(),
        labels,
    }
}

#[tokio::test]
async fn test_create_submits_pem_request() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/puppet-ca/v1/certificate_request/agent1-[a-z0-9]{5}$"))
        .and(query_param("signer_name", "example.com/agent-client"))
        .and(query_param("expiration_seconds", "86400"))
        .and(query_param("label.cluster", "cluster1"))
        .and(header("content-type", "text/plain"))
        .and(body_string_contains("BEGIN CERTIFICATE REQUEST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let csr = b"-----BEGIN CERTIFICATE REQUEST-----\nMIIB\n-----END CERTIFICATE REQUEST-----\n";
    let request_id = authority(&server)
        .create(&meta(), csr, "example.com/agent-client", Some(86_400))
        .await
        .unwrap();

    assert!(request_id.starts_with("agent1-"));
    assert_eq!(request_id.len(), "agent1-".len() + 5);
}

#[tokio::test]
async fn test_create_failure_is_authority_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(400).set_body_string("duplicate request"))
        .mount(&server)
        .await;

    let err = authority(&server)
        .create(&meta(), b"csr", "example.com/agent-client", None)
        .await
        .unwrap_err();
    match err {
        RotationError::Authority(message) => assert!(message.contains("duplicate request")),
        other => panic!("unexpected error {:?}", other),
    }
}

async fn mount_status(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(format!("/puppet-ca/v1/certificate_status/{}", REQUEST)))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_signed_request_is_approved() {
    let server = MockServer::start().await;
    mount_status(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"name": REQUEST, "state": "signed"})),
    )
    .await;

    assert!(authority(&server).is_approved(REQUEST).await.unwrap());
}

#[tokio::test]
async fn test_requested_state_is_not_approved() {
    let server = MockServer::start().await;
    mount_status(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"name": REQUEST, "state": "requested"})),
    )
    .await;

    assert!(!authority(&server).is_approved(REQUEST).await.unwrap());
}

#[tokio::test]
async fn test_revoked_request_is_rejected() {
    let server = MockServer::start().await;
    mount_status(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"name": REQUEST, "state": "revoked"})),
    )
    .await;

    let err = authority(&server).is_approved(REQUEST).await.unwrap_err();
    assert_eq!(err, RotationError::RequestRejected(REQUEST.to_string()));
    assert!(err.is_terminal_for_request());
}

#[tokio::test]
async fn test_missing_request_is_not_found() {
    let server = MockServer::start().await;
    mount_status(&server, ResponseTemplate::new(404)).await;

    let err = authority(&server).is_approved(REQUEST).await.unwrap_err();
    assert_eq!(err, RotationError::RequestNotFound(REQUEST.to_string()));
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    mount_status(&server, ResponseTemplate::new(503)).await;

    let err = authority(&server).is_approved(REQUEST).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_issued_certificate_is_fetched() {
    let server = MockServer::start().await;
    let pem = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";
    Mock::given(method("GET"))
        .and(path(format!("/puppet-ca/v1/certificate/{}", REQUEST)))
        .and(header("accept", "text/plain"))
        .respond_with(ResponseTemplate::new(200).set_body_string(pem))
        .mount(&server)
        .await;

    let certificate = authority(&server)
        .issued_certificate(REQUEST)
        .await
        .unwrap();
    assert_eq!(certificate, pem.as_bytes());
}

#[tokio::test]
async fn test_unissued_certificate_is_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/puppet-ca/v1/certificate/{}", REQUEST)))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let certificate = authority(&server)
        .issued_certificate(REQUEST)
        .await
        .unwrap();
    assert!(certificate.is_empty());
}

#[tokio::test]
async fn test_unreachable_authority_is_transient() {
    let server = MockServer::start().await;
    let authority = authority(&server);
    drop(server);

    let err = authority.is_approved(REQUEST).await.unwrap_err();
    assert!(err.is_transient());
}
