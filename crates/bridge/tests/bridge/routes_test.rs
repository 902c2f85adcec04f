use crate::helpers::{next_envelope, TestApp};
use bridge::infra::signer_mock::MockSigner;
use bridge_core::{Envelope, POST_PAGE_INFO_METHOD, RPC_REQUEST_METHOD};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use uuid::Uuid;

fn connect_context() -> Value {
    json!({"network": "solana", "method": "sol_connect", "params": []})
}

#[tokio::test]
async fn test_health_check_reports_shutdown() {
    let app = TestApp::spawn(Arc::new(MockSigner::default())).await;

    let ok = app
        .client
        .get(app.url("/api/v1/health_check"))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status().as_u16(), 200);

    app.state.cancel_token.cancel();
    let draining = app
        .client
        .get(app.url("/api/v1/health_check"))
        .send()
        .await
        .unwrap();
    assert_eq!(draining.status().as_u16(), 503);

    app.shutdown().await;
}

#[tokio::test]
async fn test_wallet_info_uses_camel_case() {
    let signer = MockSigner::default();
    let expected = bs58::encode(signer.public_key_bytes()).into_string();
    let app = TestApp::spawn(Arc::new(signer)).await;

    let wallet: Value = app
        .client
        .get(app.url("/bridge/wallet"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(wallet["name"], json!("Test Wallet"));
    assert_eq!(wallet["network"], json!("solana"));
    assert_eq!(wallet["publicKey"], json!(expected));
    assert!(wallet.get("public_key").is_none());

    app.shutdown().await;
}

#[tokio::test]
async fn test_unknown_approval_is_not_found() {
    let app = TestApp::spawn(Arc::new(MockSigner::default())).await;

    assert!(app.pending_approvals().await.is_empty());
    let status = app.resolve(&Uuid::new_v4().to_string(), "accept").await;
    assert_eq!(status, 404);

    app.shutdown().await;
}

#[tokio::test]
async fn test_connect_over_socket_resolved_through_http() {
    let signer = MockSigner::default();
    let address = bs58::encode(signer.public_key_bytes()).into_string();
    let app = TestApp::spawn(Arc::new(signer)).await;
    let mut page = app.open_page().await;

    app.send_signed(
        &mut page,
        POST_PAGE_INFO_METHOD,
        json!({"url": "https://a.example.com/", "title": "A"}),
    )
    .await;
    let request_id = app
        .send_signed(&mut page, RPC_REQUEST_METHOD, connect_context())
        .await;

    let gate = app.wait_for_approval().await;
    assert_eq!(gate["kind"], json!("connect-modal-closed"));
    assert_eq!(gate["domain"], json!("a.example.com"));
    let gate_id = gate["id"].as_str().unwrap().to_string();

    assert_eq!(app.resolve(&gate_id, "accept").await, 200);
    // the gate is single-use
    assert_eq!(app.resolve(&gate_id, "accept").await, 404);

    let mut connected = None;
    let mut response = None;
    while connected.is_none() || response.is_none() {
        match next_envelope(&mut page).await {
            Envelope::Event(event) if event.name == "connect" => connected = Some(event),
            Envelope::Response(reply) if reply.id == request_id => response = Some(reply),
            _ => {}
        }
    }
    assert_eq!(connected.unwrap().args, vec![json!(address)]);
    assert_eq!(response.unwrap().into_result().unwrap(), json!(address));
    assert!(app.pending_approvals().await.is_empty());

    app.shutdown().await;
}

#[tokio::test]
async fn test_rejected_gate_answers_user_declined() {
    let app = TestApp::spawn(Arc::new(MockSigner::default())).await;
    let mut page = app.open_page().await;

    app.send_signed(
        &mut page,
        POST_PAGE_INFO_METHOD,
        json!({"url": "https://a.example.com/"}),
    )
    .await;
    let request_id = app
        .send_signed(&mut page, RPC_REQUEST_METHOD, connect_context())
        .await;

    let gate = app.wait_for_approval().await;
    assert_eq!(app.resolve(gate["id"].as_str().unwrap(), "later").await, 200);

    let error = loop {
        if let Envelope::Response(reply) = next_envelope(&mut page).await {
            if reply.id == request_id {
                break reply.into_result().unwrap_err();
            }
        }
    };
    assert!(error.is_user_declined());

    app.shutdown().await;
}

#[tokio::test]
async fn test_socket_close_ends_waiting_and_queued_requests() {
    let signer = MockSigner::default();
    let app = TestApp::spawn(Arc::new(signer.clone())).await;
    let mut page = app.open_page().await;

    app.send_signed(
        &mut page,
        POST_PAGE_INFO_METHOD,
        json!({"url": "https://a.example.com/"}),
    )
    .await;
    app.send_signed(&mut page, RPC_REQUEST_METHOD, connect_context())
        .await;
    app.send_signed(
        &mut page,
        RPC_REQUEST_METHOD,
        json!({"network": "solana", "method": "sol_signMessage", "params": ["68656c6c6f", "utf8"]}),
    )
    .await;

    let gate = app.wait_for_approval().await;
    let gate_id = gate["id"].as_str().unwrap().to_string();

    page.close(None).await.unwrap();

    let mut cleared = false;
    for _ in 0..100 {
        if app.pending_approvals().await.is_empty() {
            cleared = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(cleared, "gate outlived the page socket");

    // accepting the abandoned gate authorizes nothing
    assert_eq!(app.resolve(&gate_id, "accept").await, 404);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(app.pending_approvals().await.is_empty());
    assert_eq!(signer.calls(), 0);

    app.shutdown().await;
}
